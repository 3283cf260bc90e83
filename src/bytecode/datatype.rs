use serde::{Deserialize, Serialize};

/// Scalar datatype carried by every datum that crosses an instruction boundary.
///
/// The discriminant is the on-wire code. Codes fit in a nibble so call
/// descriptors can pack eight of them into four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Datatype {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    U8 = 4,
    U16 = 5,
    U32 = 6,
    U64 = 7,
    F32 = 8,
    F64 = 9,
    Bool = 10,
    Addr = 11,
    Type = 12,
    None = 15,
}

/// The unsigned integer type wide enough to hold an encoded address.
pub const ADDRESS_SIZED: Datatype = Datatype::U64;

impl Datatype {
    pub const ALL: [Datatype; 13] = [
        Datatype::I8,
        Datatype::I16,
        Datatype::I32,
        Datatype::I64,
        Datatype::U8,
        Datatype::U16,
        Datatype::U32,
        Datatype::U64,
        Datatype::F32,
        Datatype::F64,
        Datatype::Bool,
        Datatype::Addr,
        Datatype::Type,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            15 => Some(Datatype::None),
            _ => Self::ALL.get(code as usize).copied(),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Storage size in bytes. `None` has no storage.
    pub fn size(self) -> usize {
        match self {
            Datatype::I8 | Datatype::U8 | Datatype::Bool | Datatype::Type => 1,
            Datatype::I16 | Datatype::U16 => 2,
            Datatype::I32 | Datatype::U32 | Datatype::F32 => 4,
            Datatype::I64 | Datatype::U64 | Datatype::F64 | Datatype::Addr => 8,
            Datatype::None => 0,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Datatype::I8 | Datatype::I16 | Datatype::I32 | Datatype::I64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            Datatype::U8 | Datatype::U16 | Datatype::U32 | Datatype::U64
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_float(self) -> bool {
        matches!(self, Datatype::F32 | Datatype::F64)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Datatype::I8 => "i8",
            Datatype::I16 => "i16",
            Datatype::I32 => "i32",
            Datatype::I64 => "i64",
            Datatype::U8 => "u8",
            Datatype::U16 => "u16",
            Datatype::U32 => "u32",
            Datatype::U64 => "u64",
            Datatype::F32 => "f32",
            Datatype::F64 => "f64",
            Datatype::Bool => "bool",
            Datatype::Addr => "addr",
            Datatype::Type => "type",
            Datatype::None => "none",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .chain(std::iter::once(Datatype::None))
            .find(|dt| dt.mnemonic() == name)
    }
}

impl std::fmt::Display for Datatype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
