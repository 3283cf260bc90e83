use super::{Address, Cell, Datatype, ADDRESS_SIZED};
use serde::{Deserialize, Serialize};

/// A scalar with its datatype attached.
///
/// Used where the tag has to travel with the value: symbol tables, decoded
/// instruction operands and external-call arguments. The interpreter's hot
/// path works on untagged [`Cell`]s instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Addr(Address),
    Type(Datatype),
}

/// Intermediate form used by numeric casts.
enum Num {
    Int(i128),
    Float(f64),
}

impl Value {
    pub fn datatype(&self) -> Datatype {
        match self {
            Value::I8(_) => Datatype::I8,
            Value::I16(_) => Datatype::I16,
            Value::I32(_) => Datatype::I32,
            Value::I64(_) => Datatype::I64,
            Value::U8(_) => Datatype::U8,
            Value::U16(_) => Datatype::U16,
            Value::U32(_) => Datatype::U32,
            Value::U64(_) => Datatype::U64,
            Value::F32(_) => Datatype::F32,
            Value::F64(_) => Datatype::F64,
            Value::Bool(_) => Datatype::Bool,
            Value::Addr(_) => Datatype::Addr,
            Value::Type(_) => Datatype::Type,
        }
    }

    pub fn to_cell(&self) -> Cell {
        match *self {
            Value::I8(v) => Cell::from_i8(v),
            Value::I16(v) => Cell::from_i16(v),
            Value::I32(v) => Cell::from_i32(v),
            Value::I64(v) => Cell::from_i64(v),
            Value::U8(v) => Cell::from_u8(v),
            Value::U16(v) => Cell::from_u16(v),
            Value::U32(v) => Cell::from_u32(v),
            Value::U64(v) => Cell::from_u64(v),
            Value::F32(v) => Cell::from_f32(v),
            Value::F64(v) => Cell::from_f64(v),
            Value::Bool(v) => Cell::from_bool(v),
            Value::Addr(v) => Cell::from_addr(v),
            Value::Type(v) => Cell::from_datatype(v),
        }
    }

    /// Attaches a tag to an untagged cell. `None` for `Datatype::None` or a
    /// `type` cell holding an unknown code.
    pub fn from_cell(dt: Datatype, cell: Cell) -> Option<Value> {
        Some(match dt {
            Datatype::I8 => Value::I8(cell.i8()),
            Datatype::I16 => Value::I16(cell.i16()),
            Datatype::I32 => Value::I32(cell.i32()),
            Datatype::I64 => Value::I64(cell.i64()),
            Datatype::U8 => Value::U8(cell.u8()),
            Datatype::U16 => Value::U16(cell.u16()),
            Datatype::U32 => Value::U32(cell.u32()),
            Datatype::U64 => Value::U64(cell.u64()),
            Datatype::F32 => Value::F32(cell.f32()),
            Datatype::F64 => Value::F64(cell.f64()),
            Datatype::Bool => Value::Bool(cell.bool()),
            Datatype::Addr => Value::Addr(cell.addr()),
            Datatype::Type => Value::Type(cell.datatype()?),
            Datatype::None => return None,
        })
    }

    fn to_num(self) -> Num {
        match self {
            Value::I8(v) => Num::Int(v as i128),
            Value::I16(v) => Num::Int(v as i128),
            Value::I32(v) => Num::Int(v as i128),
            Value::I64(v) => Num::Int(v as i128),
            Value::U8(v) => Num::Int(v as i128),
            Value::U16(v) => Num::Int(v as i128),
            Value::U32(v) => Num::Int(v as i128),
            Value::U64(v) => Num::Int(v as i128),
            Value::F32(v) => Num::Float(v as f64),
            Value::F64(v) => Num::Float(v),
            Value::Bool(v) => Num::Int(v as i128),
            Value::Addr(v) => Num::Int(v.bits() as i128),
            Value::Type(v) => Num::Int(v.code() as i128),
        }
    }

    /// Range-checked conversion of an integer to `dt`. `None` when it does
    /// not fit; nothing wraps.
    pub fn from_integer(v: i128, dt: Datatype) -> Option<Value> {
        Some(match dt {
            Datatype::I8 => Value::I8(i8::try_from(v).ok()?),
            Datatype::I16 => Value::I16(i16::try_from(v).ok()?),
            Datatype::I32 => Value::I32(i32::try_from(v).ok()?),
            Datatype::I64 => Value::I64(i64::try_from(v).ok()?),
            Datatype::U8 => Value::U8(u8::try_from(v).ok()?),
            Datatype::U16 => Value::U16(u16::try_from(v).ok()?),
            Datatype::U32 => Value::U32(u32::try_from(v).ok()?),
            Datatype::U64 => Value::U64(u64::try_from(v).ok()?),
            Datatype::F32 => Value::F32(v as f32),
            Datatype::F64 => Value::F64(v as f64),
            Datatype::Bool => match v {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                _ => return None,
            },
            Datatype::Addr => Value::Addr(Address::from_bits(u64::try_from(v).ok()?)),
            Datatype::Type => Value::Type(Datatype::from_code(u8::try_from(v).ok()?)?),
            Datatype::None => return None,
        })
    }

    /// Lossless conversion used when a symbol is bound to an operand.
    /// Integers must fit `dt`, floats only become floats and addresses only
    /// become address-sized integers.
    pub fn fit(self, dt: Datatype) -> Option<Value> {
        if self.datatype() == dt {
            return Some(self);
        }
        match self {
            Value::F32(_) | Value::F64(_) if dt.is_float() => self.cast(dt),
            Value::F32(_) | Value::F64(_) => None,
            Value::Addr(_) if dt == ADDRESS_SIZED => self.cast(dt),
            Value::Addr(_) => None,
            other => match other.to_num() {
                Num::Int(i) => Value::from_integer(i, dt),
                Num::Float(_) => None,
            },
        }
    }

    /// C-style conversion: integers truncate, floats saturate toward the
    /// integer range, addresses convert as raw bits.
    ///
    /// Returns `None` when no sensible conversion exists (float to address,
    /// anything to `none`, an integer that is not a datatype code to `type`).
    pub fn cast(self, dt: Datatype) -> Option<Value> {
        if self.datatype() == dt {
            return Some(self);
        }
        let num = self.to_num();
        macro_rules! to_int {
            ($variant:ident, $ty:ty) => {
                match num {
                    Num::Int(i) => Value::$variant(i as $ty),
                    Num::Float(f) => Value::$variant(f as $ty),
                }
            };
        }
        Some(match dt {
            Datatype::I8 => to_int!(I8, i8),
            Datatype::I16 => to_int!(I16, i16),
            Datatype::I32 => to_int!(I32, i32),
            Datatype::I64 => to_int!(I64, i64),
            Datatype::U8 => to_int!(U8, u8),
            Datatype::U16 => to_int!(U16, u16),
            Datatype::U32 => to_int!(U32, u32),
            Datatype::U64 => to_int!(U64, u64),
            Datatype::F32 => match num {
                Num::Int(i) => Value::F32(i as f32),
                Num::Float(f) => Value::F32(f as f32),
            },
            Datatype::F64 => match num {
                Num::Int(i) => Value::F64(i as f64),
                Num::Float(f) => Value::F64(f),
            },
            Datatype::Bool => match num {
                Num::Int(i) => Value::Bool(i != 0),
                Num::Float(f) => Value::Bool(f != 0.0),
            },
            Datatype::Addr => match num {
                Num::Int(i) => Value::Addr(Address::from_bits(i as u64)),
                Num::Float(_) => return None,
            },
            Datatype::Type => match num {
                Num::Int(i) => Value::Type(Datatype::from_code(u8::try_from(i).ok()?)?),
                Num::Float(_) => return None,
            },
            Datatype::None => return None,
        })
    }
}

impl std::fmt::Display for Value {
    /// Formats a value the way the assembler accepts it back.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write_float(f, v.to_string(), v.is_finite()),
            Value::F64(v) => write_float(f, v.to_string(), v.is_finite()),
            Value::Bool(v) => write!(f, "{}", *v as u8),
            Value::Addr(v) => write!(f, "{}", v.bits()),
            Value::Type(v) => write!(f, "{}", v),
        }
    }
}

/// Plain decimal with at least one fractional digit, never exponent form.
/// Non-finite values have no literal syntax and print as Rust does.
fn write_float(f: &mut std::fmt::Formatter<'_>, text: String, finite: bool) -> std::fmt::Result {
    if !finite || text.contains('.') {
        f.write_str(&text)
    } else {
        write!(f, "{}.0", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Base;

    #[test]
    fn test_cell_round_trip_keeps_tag() {
        let values = [
            Value::I16(-300),
            Value::U32(70_000),
            Value::F64(1.5),
            Value::Bool(true),
            Value::Addr(Address::new(Base::Register, 32)),
            Value::Type(Datatype::F32),
        ];
        for v in values {
            assert_eq!(Value::from_cell(v.datatype(), v.to_cell()), Some(v));
        }
    }

    #[test]
    fn test_from_cell_none_has_no_value() {
        assert_eq!(Value::from_cell(Datatype::None, Cell::default()), None);
        assert_eq!(Value::from_cell(Datatype::Type, Cell::from_u8(99)), None);
    }

    #[test]
    fn test_cast_integers_truncate() {
        assert_eq!(Value::I32(300).cast(Datatype::U8), Some(Value::U8(44)));
        assert_eq!(Value::I8(-1).cast(Datatype::U16), Some(Value::U16(0xFFFF)));
        assert_eq!(Value::U64(7).cast(Datatype::I64), Some(Value::I64(7)));
    }

    #[test]
    fn test_cast_float_and_bool() {
        assert_eq!(Value::F64(3.9).cast(Datatype::I32), Some(Value::I32(3)));
        assert_eq!(Value::I32(2).cast(Datatype::F32), Some(Value::F32(2.0)));
        assert_eq!(Value::F64(1e300).cast(Datatype::I8), Some(Value::I8(127)));
        assert_eq!(Value::U8(0).cast(Datatype::Bool), Some(Value::Bool(false)));
        assert_eq!(Value::Bool(true).cast(Datatype::I64), Some(Value::I64(1)));
    }

    #[test]
    fn test_cast_address_bits() {
        let addr = Address::code(1, 8);
        assert_eq!(
            Value::Addr(addr).cast(Datatype::U64),
            Some(Value::U64(addr.bits()))
        );
        assert_eq!(
            Value::U64(addr.bits()).cast(Datatype::Addr),
            Some(Value::Addr(addr))
        );
        assert_eq!(Value::F32(1.0).cast(Datatype::Addr), None);
        assert_eq!(Value::I32(1).cast(Datatype::None), None);
    }

    #[test]
    fn test_display_is_reassemblable() {
        assert_eq!(Value::F64(5.0).to_string(), "5.0");
        assert_eq!(Value::I32(-5).to_string(), "-5");
        assert_eq!(Value::Bool(true).to_string(), "1");
        assert_eq!(Value::Type(Datatype::U8).to_string(), "u8");
    }

    #[test]
    fn test_display_floats_without_exponent() {
        assert_eq!(Value::F64(1e20).to_string(), "100000000000000000000.0");
        assert_eq!(Value::F64(-0.5).to_string(), "-0.5");
        assert_eq!(Value::F32(2.5e-3).to_string(), "0.0025");
        assert_eq!(Value::F64(1e-7).to_string(), "0.0000001");
    }

    #[test]
    fn test_fit_never_wraps() {
        assert_eq!(Value::I64(300).fit(Datatype::I8), None);
        assert_eq!(Value::I64(-1).fit(Datatype::U8), None);
        assert_eq!(Value::I64(100).fit(Datatype::I8), Some(Value::I8(100)));
        assert_eq!(Value::U64(u64::MAX).fit(Datatype::I64), None);
        assert_eq!(Value::I64(2).fit(Datatype::F32), Some(Value::F32(2.0)));
        assert_eq!(Value::F64(1.5).fit(Datatype::I32), None);
        assert_eq!(Value::F64(1.5).fit(Datatype::F32), Some(Value::F32(1.5)));
    }

    #[test]
    fn test_fit_addresses_stay_address_sized() {
        let addr = Address::code(1, 8);
        assert_eq!(
            Value::Addr(addr).fit(Datatype::U64),
            Some(Value::U64(addr.bits()))
        );
        assert_eq!(Value::Addr(addr).fit(Datatype::U32), None);
        assert_eq!(Value::Addr(addr).fit(Datatype::I64), None);
        assert_eq!(Value::I64(-1).fit(Datatype::Addr), None);
    }
}
