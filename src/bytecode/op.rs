use super::Datatype;

// =============================================================================
// OPCODES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Exit = 0x01,

    // data movement
    Mov = 0x10,
    Convert = 0x11,
    Copy = 0x12,

    // arithmetic
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    Div = 0x23,
    Mod = 0x24,
    Neg = 0x25,
    Inc = 0x26,
    Dec = 0x27,

    // bitwise
    And = 0x30,
    Or = 0x31,
    Xor = 0x32,
    Shl = 0x33,
    Shr = 0x34,
    Not = 0x35,

    // comparison
    Eq = 0x40,
    Ne = 0x41,
    Lt = 0x42,
    Le = 0x43,
    Gt = 0x44,
    Ge = 0x45,

    // control flow
    Jmp = 0x50,
    Jt = 0x51,
    Jf = 0x52,
    Loop = 0x53,
    Call = 0x54,
    Ret = 0x55,
    Extern = 0x56,

    // stack
    Push = 0x60,
    Pop = 0x61,
    SpAdd = 0x62,
    SpSub = 0x63,
    PushFrame = 0x64,
    PopFrame = 0x65,

    // heap
    Alloc = 0x70,
    Free = 0x71,
}

impl Opcode {
    pub const ALL: [Opcode; 40] = [
        Opcode::Nop,
        Opcode::Exit,
        Opcode::Mov,
        Opcode::Convert,
        Opcode::Copy,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Neg,
        Opcode::Inc,
        Opcode::Dec,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Shl,
        Opcode::Shr,
        Opcode::Not,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Gt,
        Opcode::Ge,
        Opcode::Jmp,
        Opcode::Jt,
        Opcode::Jf,
        Opcode::Loop,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Extern,
        Opcode::Push,
        Opcode::Pop,
        Opcode::SpAdd,
        Opcode::SpSub,
        Opcode::PushFrame,
        Opcode::PopFrame,
        Opcode::Alloc,
        Opcode::Free,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == byte)
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.mnemonic() == name)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Exit => "exit",
            Opcode::Mov => "mov",
            Opcode::Convert => "convert",
            Opcode::Copy => "copy",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::Neg => "neg",
            Opcode::Inc => "inc",
            Opcode::Dec => "dec",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::Not => "not",
            Opcode::Eq => "eq",
            Opcode::Ne => "ne",
            Opcode::Lt => "lt",
            Opcode::Le => "le",
            Opcode::Gt => "gt",
            Opcode::Ge => "ge",
            Opcode::Jmp => "jmp",
            Opcode::Jt => "jt",
            Opcode::Jf => "jf",
            Opcode::Loop => "loop",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Extern => "extern",
            Opcode::Push => "push",
            Opcode::Pop => "pop",
            Opcode::SpAdd => "spadd",
            Opcode::SpSub => "spsub",
            Opcode::PushFrame => "pushframe",
            Opcode::PopFrame => "popframe",
            Opcode::Alloc => "alloc",
            Opcode::Free => "free",
        }
    }

    pub fn layout(self) -> &'static InstructionLayout {
        use ArgRole::{Address as A, DatatypeLit as T, Value as V};
        use DatatypeRule::{None as N, Optional as O, Required as R};

        macro_rules! layout {
            ($rule:expr, [$($role:expr),*]) => {
                &InstructionLayout { datatype: $rule, args: &[$($role),*], custom: false }
            };
            ($rule:expr, custom [$($role:expr),*]) => {
                &InstructionLayout { datatype: $rule, args: &[$($role),*], custom: true }
            };
        }

        match self {
            Opcode::Nop | Opcode::Exit | Opcode::Ret | Opcode::PushFrame | Opcode::PopFrame => {
                layout!(N, [])
            }
            Opcode::Mov
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr => layout!(R, [A, V]),
            Opcode::Neg | Opcode::Not | Opcode::Inc | Opcode::Dec => layout!(R, [A]),
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                layout!(R, [A, V, V])
            }
            Opcode::Jmp | Opcode::Loop => layout!(N, [A]),
            Opcode::Jt | Opcode::Jf => layout!(R, [A, V]),
            Opcode::Push => layout!(R, [V]),
            Opcode::Pop => layout!(R, [A]),
            Opcode::SpAdd | Opcode::SpSub => layout!(N, [V]),
            Opcode::Alloc => layout!(N, [A, V]),
            Opcode::Free => layout!(N, [A]),
            Opcode::Convert => layout!(R, [A, T, V]),
            Opcode::Copy => layout!(N, [A, A, V]),
            Opcode::Call => layout!(N, custom [A]),
            Opcode::Extern => layout!(O, custom [A]),
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// =============================================================================
// INSTRUCTION LAYOUT
// =============================================================================

/// Whether an instruction carries a `.dt` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatatypeRule {
    Required,
    Optional,
    None,
}

/// What an encoded argument means to the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgRole {
    /// A memory location (8 bytes).
    Address,
    /// A value of the instruction datatype, or `u64` when it has none.
    Value,
    /// A one-byte datatype code.
    DatatypeLit,
    /// A call argument whose datatype comes from the call descriptor.
    Typed(Datatype),
}

#[derive(Debug)]
pub struct InstructionLayout {
    pub datatype: DatatypeRule,
    /// Fixed leading arguments. Custom layouts continue with a call
    /// descriptor and its typed values.
    pub args: &'static [ArgRole],
    pub custom: bool,
}

/// opcode + datatype + deref mask
pub const HEADER_SIZE: usize = 4;

/// Every encoded argument owns one deref bit.
pub const MAX_ARGS: usize = 16;

/// Datatype a `Value` argument is encoded with.
pub fn value_datatype(instruction_dt: Datatype) -> Datatype {
    if instruction_dt == Datatype::None {
        Datatype::U64
    } else {
        instruction_dt
    }
}

// =============================================================================
// CALL DESCRIPTOR
// =============================================================================

pub const MAX_CALL_ARGS: usize = 8;
pub const CALL_DESCRIPTOR_SIZE: usize = 5;

/// Argument count plus one datatype nibble per argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallDescriptor {
    count: u8,
    packed: [u8; 4],
}

impl CallDescriptor {
    /// `None` when there are more than [`MAX_CALL_ARGS`] arguments.
    pub fn new(types: &[Datatype]) -> Option<Self> {
        if types.len() > MAX_CALL_ARGS {
            return None;
        }
        let mut packed = [0u8; 4];
        for (i, dt) in types.iter().enumerate() {
            packed[i / 2] |= (dt.code() & 0x0F) << ((i % 2) * 4);
        }
        Some(CallDescriptor {
            count: types.len() as u8,
            packed,
        })
    }

    pub fn count(&self) -> usize {
        self.count as usize
    }

    pub fn datatype(&self, i: usize) -> Option<Datatype> {
        if i >= self.count() {
            return None;
        }
        Datatype::from_code((self.packed[i / 2] >> ((i % 2) * 4)) & 0x0F)
    }

    pub fn to_bytes(&self) -> [u8; CALL_DESCRIPTOR_SIZE] {
        let mut out = [0u8; CALL_DESCRIPTOR_SIZE];
        out[0] = self.count;
        out[1..].copy_from_slice(&self.packed);
        out
    }

    pub fn from_bytes(bytes: [u8; CALL_DESCRIPTOR_SIZE]) -> Self {
        let mut packed = [0u8; 4];
        packed.copy_from_slice(&bytes[1..]);
        CallDescriptor {
            count: bytes[0],
            packed,
        }
    }
}

// =============================================================================
// REGISTERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    /// code pointer
    Cp = 0,
    /// stack pointer
    Sp = 1,
    /// frame pointer
    Fp = 2,
    /// loop counter
    Lc = 3,
    /// accumulator
    Ac = 4,
    /// temporary
    Tm = 5,
    /// exit code
    Ec = 6,
}

/// Bytes `call` and `pushframe` place between a frame pointer and the
/// caller's last argument: saved `fp`, return address, argument byte count.
pub const CALL_LINK_SIZE: u64 = 24;

pub const REGISTER_COUNT: usize = 7;
pub const REGISTER_FILE_SIZE: usize = REGISTER_COUNT * 8;

impl Register {
    pub const ALL: [Register; REGISTER_COUNT] = [
        Register::Cp,
        Register::Sp,
        Register::Fp,
        Register::Lc,
        Register::Ac,
        Register::Tm,
        Register::Ec,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Register::Cp => "cp",
            Register::Sp => "sp",
            Register::Fp => "fp",
            Register::Lc => "lc",
            Register::Ac => "ac",
            Register::Tm => "tm",
            Register::Ec => "ec",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.name() == name)
    }

    /// Byte offset inside the register file.
    pub fn offset(self) -> u64 {
        self as u64 * 8
    }

    pub fn from_offset(offset: u64) -> Option<Self> {
        if offset % 8 != 0 {
            return None;
        }
        Self::ALL.get((offset / 8) as usize).copied()
    }
}
