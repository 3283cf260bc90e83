//! Arithmetic on untagged cells. The caller supplies the datatype; there is
//! no promotion between widths.

use crate::bytecode::{Cell, Datatype, Opcode, Value};
use crate::runtime::runtime_error::Fault;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn from_opcode(op: Opcode) -> Option<Self> {
        Some(match op {
            Opcode::Add => BinaryOp::Add,
            Opcode::Sub => BinaryOp::Sub,
            Opcode::Mul => BinaryOp::Mul,
            Opcode::Div => BinaryOp::Div,
            Opcode::Mod => BinaryOp::Mod,
            Opcode::And => BinaryOp::And,
            Opcode::Or => BinaryOp::Or,
            Opcode::Xor => BinaryOp::Xor,
            Opcode::Shl => BinaryOp::Shl,
            Opcode::Shr => BinaryOp::Shr,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
        }
    }
}

impl UnaryOp {
    pub fn from_opcode(op: Opcode) -> Option<Self> {
        Some(match op {
            Opcode::Neg => UnaryOp::Neg,
            Opcode::Not => UnaryOp::Not,
            Opcode::Inc => UnaryOp::Inc,
            Opcode::Dec => UnaryOp::Dec,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
            UnaryOp::Inc => "inc",
            UnaryOp::Dec => "dec",
        }
    }
}

impl CompareOp {
    pub fn from_opcode(op: Opcode) -> Option<Self> {
        Some(match op {
            Opcode::Eq => CompareOp::Eq,
            Opcode::Ne => CompareOp::Ne,
            Opcode::Lt => CompareOp::Lt,
            Opcode::Le => CompareOp::Le,
            Opcode::Gt => CompareOp::Gt,
            Opcode::Ge => CompareOp::Ge,
            _ => return None,
        })
    }

    fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (CompareOp::Ne, None) => true,
            (_, None) => false,
            (CompareOp::Eq, Some(o)) => o.is_eq(),
            (CompareOp::Ne, Some(o)) => o.is_ne(),
            (CompareOp::Lt, Some(o)) => o.is_lt(),
            (CompareOp::Le, Some(o)) => o.is_le(),
            (CompareOp::Gt, Some(o)) => o.is_gt(),
            (CompareOp::Ge, Some(o)) => o.is_ge(),
        }
    }
}

fn not_implemented(op: &'static str, datatype: Datatype) -> Fault {
    Fault::NotImplemented { op, datatype }
}

/// `a op b`. Integers wrap; a zero divisor faults.
pub fn binary(op: BinaryOp, dt: Datatype, a: Cell, b: Cell) -> Result<Cell, Fault> {
    macro_rules! int {
        ($get:ident, $from:ident) => {{
            let (x, y) = (a.$get(), b.$get());
            let r = match op {
                BinaryOp::Add => x.wrapping_add(y),
                BinaryOp::Sub => x.wrapping_sub(y),
                BinaryOp::Mul => x.wrapping_mul(y),
                BinaryOp::Div | BinaryOp::Mod if y == 0 => return Err(Fault::DivisionByZero),
                BinaryOp::Div => x.wrapping_div(y),
                BinaryOp::Mod => x.wrapping_rem(y),
                BinaryOp::And => x & y,
                BinaryOp::Or => x | y,
                BinaryOp::Xor => x ^ y,
                BinaryOp::Shl => x.wrapping_shl(y as u32),
                BinaryOp::Shr => x.wrapping_shr(y as u32),
            };
            Cell::$from(r)
        }};
    }
    macro_rules! float {
        ($get:ident, $from:ident) => {{
            let (x, y) = (a.$get(), b.$get());
            let r = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Mod => x % y,
                _ => return Err(not_implemented(op.name(), dt)),
            };
            Cell::$from(r)
        }};
    }

    Ok(match dt {
        Datatype::I8 => int!(i8, from_i8),
        Datatype::I16 => int!(i16, from_i16),
        Datatype::I32 => int!(i32, from_i32),
        Datatype::I64 => int!(i64, from_i64),
        Datatype::U8 => int!(u8, from_u8),
        Datatype::U16 => int!(u16, from_u16),
        Datatype::U32 => int!(u32, from_u32),
        Datatype::U64 => int!(u64, from_u64),
        Datatype::F32 => float!(f32, from_f32),
        Datatype::F64 => float!(f64, from_f64),
        Datatype::Bool => {
            let (x, y) = (a.bool(), b.bool());
            Cell::from_bool(match op {
                BinaryOp::And => x & y,
                BinaryOp::Or => x | y,
                BinaryOp::Xor => x ^ y,
                _ => return Err(not_implemented(op.name(), dt)),
            })
        }
        // Pointer arithmetic: the right operand is a signed byte delta.
        Datatype::Addr => {
            let delta = b.i64();
            Cell::from_addr(match op {
                BinaryOp::Add => a.addr().add(delta),
                BinaryOp::Sub => a.addr().add(delta.wrapping_neg()),
                _ => return Err(not_implemented(op.name(), dt)),
            })
        }
        Datatype::Type | Datatype::None => return Err(not_implemented(op.name(), dt)),
    })
}

pub fn unary(op: UnaryOp, dt: Datatype, a: Cell) -> Result<Cell, Fault> {
    macro_rules! int {
        ($get:ident, $from:ident) => {{
            let x = a.$get();
            Cell::$from(match op {
                UnaryOp::Neg => x.wrapping_neg(),
                UnaryOp::Not => !x,
                UnaryOp::Inc => x.wrapping_add(1),
                UnaryOp::Dec => x.wrapping_sub(1),
            })
        }};
    }
    macro_rules! float {
        ($get:ident, $from:ident) => {{
            let x = a.$get();
            Cell::$from(match op {
                UnaryOp::Neg => -x,
                UnaryOp::Inc => x + 1.0,
                UnaryOp::Dec => x - 1.0,
                UnaryOp::Not => return Err(not_implemented(op.name(), dt)),
            })
        }};
    }

    Ok(match dt {
        Datatype::I8 => int!(i8, from_i8),
        Datatype::I16 => int!(i16, from_i16),
        Datatype::I32 => int!(i32, from_i32),
        Datatype::I64 => int!(i64, from_i64),
        Datatype::U8 => int!(u8, from_u8),
        Datatype::U16 => int!(u16, from_u16),
        Datatype::U32 => int!(u32, from_u32),
        Datatype::U64 => int!(u64, from_u64),
        Datatype::F32 => float!(f32, from_f32),
        Datatype::F64 => float!(f64, from_f64),
        Datatype::Bool if op == UnaryOp::Not => Cell::from_bool(!a.bool()),
        Datatype::Addr if op == UnaryOp::Inc => Cell::from_addr(a.addr().add(1)),
        Datatype::Addr if op == UnaryOp::Dec => Cell::from_addr(a.addr().add(-1)),
        _ => return Err(not_implemented(op.name(), dt)),
    })
}

pub fn compare(op: CompareOp, dt: Datatype, a: Cell, b: Cell) -> Result<bool, Fault> {
    let ordering = match dt {
        Datatype::I8 => a.i8().partial_cmp(&b.i8()),
        Datatype::I16 => a.i16().partial_cmp(&b.i16()),
        Datatype::I32 => a.i32().partial_cmp(&b.i32()),
        Datatype::I64 => a.i64().partial_cmp(&b.i64()),
        Datatype::U8 => a.u8().partial_cmp(&b.u8()),
        Datatype::U16 => a.u16().partial_cmp(&b.u16()),
        Datatype::U32 => a.u32().partial_cmp(&b.u32()),
        Datatype::U64 => a.u64().partial_cmp(&b.u64()),
        Datatype::F32 => a.f32().partial_cmp(&b.f32()),
        Datatype::F64 => a.f64().partial_cmp(&b.f64()),
        Datatype::Bool => a.bool().partial_cmp(&b.bool()),
        Datatype::Addr => a.addr().bits().partial_cmp(&b.addr().bits()),
        Datatype::Type if matches!(op, CompareOp::Eq | CompareOp::Ne) => {
            a.u8().partial_cmp(&b.u8())
        }
        _ => return Err(not_implemented("compare", dt)),
    };
    Ok(op.holds(ordering))
}

/// Reinterprets `cell` as `from` and converts it to `to`.
pub fn convert(from: Datatype, to: Datatype, cell: Cell) -> Result<Cell, Fault> {
    let value = match Value::from_cell(from, cell) {
        Some(value) => value,
        None if from == Datatype::Type => return Err(Fault::InvalidDatatype(cell.u8())),
        None => return Err(not_implemented("convert", from)),
    };
    value
        .cast(to)
        .map(|v| v.to_cell())
        .ok_or(not_implemented("convert", to))
}
