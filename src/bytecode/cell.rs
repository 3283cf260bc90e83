use super::{Address, Datatype};

/// Untagged scalar storage slot.
///
/// A cell never records what it holds; the reader supplies the datatype.
/// Bytes are little-endian and a narrower value occupies the low bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Cell([u8; 8]);

macro_rules! cell_scalars {
    ($($get:ident, $from:ident, $ty:ty, $n:expr;)*) => {
        $(
            pub fn $get(self) -> $ty {
                let mut b = [0u8; $n];
                b.copy_from_slice(&self.0[..$n]);
                <$ty>::from_le_bytes(b)
            }

            pub fn $from(v: $ty) -> Self {
                let mut cell = Cell::default();
                cell.0[..$n].copy_from_slice(&v.to_le_bytes());
                cell
            }
        )*
    };
}

impl Cell {
    pub const SIZE: usize = 8;
    pub const ZERO: Cell = Cell([0; 8]);

    /// Copies up to eight bytes; missing high bytes are zero.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut cell = Cell::default();
        let n = bytes.len().min(Self::SIZE);
        cell.0[..n].copy_from_slice(&bytes[..n]);
        cell
    }

    /// The low `dt.size()` bytes, i.e. what a store of `dt` writes.
    pub fn bytes(&self, dt: Datatype) -> &[u8] {
        &self.0[..dt.size()]
    }

    pub fn raw(&self) -> [u8; 8] {
        self.0
    }

    cell_scalars! {
        i8, from_i8, i8, 1;
        i16, from_i16, i16, 2;
        i32, from_i32, i32, 4;
        i64, from_i64, i64, 8;
        u8, from_u8, u8, 1;
        u16, from_u16, u16, 2;
        u32, from_u32, u32, 4;
        u64, from_u64, u64, 8;
        f32, from_f32, f32, 4;
        f64, from_f64, f64, 8;
    }

    pub fn bool(self) -> bool {
        self.0[0] != 0
    }

    pub fn from_bool(v: bool) -> Self {
        Cell::from_u8(v as u8)
    }

    pub fn addr(self) -> Address {
        Address::from_bits(self.u64())
    }

    pub fn from_addr(addr: Address) -> Self {
        Cell::from_u64(addr.bits())
    }

    pub fn datatype(self) -> Option<Datatype> {
        Datatype::from_code(self.0[0])
    }

    pub fn from_datatype(dt: Datatype) -> Self {
        Cell::from_u8(dt.code())
    }

    /// True when the low `dt.size()` bytes are all zero.
    pub fn is_zero(&self, dt: Datatype) -> bool {
        match dt {
            Datatype::F32 => self.f32() == 0.0,
            Datatype::F64 => self.f64() == 0.0,
            _ => self.bytes(dt).iter().all(|b| *b == 0),
        }
    }
}
