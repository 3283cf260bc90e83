use serde::{Deserialize, Serialize};

const BASE_SHIFT: u32 = 61;
const OFFSET_MASK: u64 = (1 << BASE_SHIFT) - 1;

const PAGE_SHIFT: u32 = 56;
const PAGE_BITS: u32 = 5;
const PAGE_MASK: u64 = (1 << PAGE_BITS) - 1;
const INTRA_MASK: u64 = (1 << PAGE_SHIFT) - 1;

/// Number of module pages addressable by a paged address.
pub const MAX_PAGES: usize = 1 << PAGE_BITS;

/// Segment selector stored in the top three bits of an [`Address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Base {
    Static = 0,
    Stack = 1,
    FrameAdd = 2,
    FrameSub = 3,
    Code = 4,
    Register = 5,
    Heap = 6,
}

impl Base {
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Base::Static,
            1 => Base::Stack,
            2 => Base::FrameAdd,
            3 => Base::FrameSub,
            4 => Base::Code,
            5 => Base::Register,
            6 => Base::Heap,
            _ => return None,
        })
    }

    /// Code and static addresses carry a module page in their offset.
    pub fn is_paged(self) -> bool {
        matches!(self, Base::Code | Base::Static)
    }

    pub fn name(self) -> &'static str {
        match self {
            Base::Static => "static",
            Base::Stack => "stack",
            Base::FrameAdd => "frame+",
            Base::FrameSub => "frame-",
            Base::Code => "code",
            Base::Register => "reg",
            Base::Heap => "heap",
        }
    }
}

/// Tagged virtual address: 3-bit base plus 61-bit offset.
///
/// Offsets are never range-checked here; only dereference checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address(u64);

impl Address {
    pub const fn from_bits(bits: u64) -> Self {
        Address(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn new(base: Base, offset: u64) -> Self {
        Address(((base as u64) << BASE_SHIFT) | (offset & OFFSET_MASK))
    }

    pub fn paged(base: Base, page: usize, offset: u64) -> Self {
        let page = (page as u64) & PAGE_MASK;
        Address::new(base, (page << PAGE_SHIFT) | (offset & INTRA_MASK))
    }

    pub fn code(page: usize, offset: u64) -> Self {
        Address::paged(Base::Code, page, offset)
    }

    pub fn static_data(page: usize, offset: u64) -> Self {
        Address::paged(Base::Static, page, offset)
    }

    /// `None` for the one unused base encoding.
    pub fn base(self) -> Option<Base> {
        Base::from_bits((self.0 >> BASE_SHIFT) as u8)
    }

    pub fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }

    pub fn page(self) -> usize {
        ((self.offset() >> PAGE_SHIFT) & PAGE_MASK) as usize
    }

    pub fn intra_offset(self) -> u64 {
        self.offset() & INTRA_MASK
    }

    pub fn with_page(self, page: usize) -> Self {
        match self.base() {
            Some(base) if base.is_paged() => Address::paged(base, page, self.intra_offset()),
            _ => self,
        }
    }

    /// Offset arithmetic that keeps the base (and page, for paged bases).
    pub fn add(self, delta: i64) -> Self {
        match self.base() {
            Some(base) if base.is_paged() => Address::paged(
                base,
                self.page(),
                self.intra_offset().wrapping_add_signed(delta),
            ),
            Some(base) => Address::new(base, self.offset().wrapping_add_signed(delta)),
            None => Address(self.0.wrapping_add_signed(delta)),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.base() {
            Some(base) if base.is_paged() => write!(
                f,
                "{}[{}]+{:#x}",
                base.name(),
                self.page(),
                self.intra_offset()
            ),
            Some(base) => write!(f, "{}+{:#x}", base.name(), self.offset()),
            None => write!(f, "invalid({:#x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_round_trip() {
        for bits in 0..7u8 {
            let base = Base::from_bits(bits).unwrap();
            let addr = Address::new(base, 1234);
            assert_eq!(addr.base(), Some(base));
            assert_eq!(addr.offset(), 1234);
        }
        assert_eq!(Base::from_bits(7), None);
    }

    #[test]
    fn test_code_page_split() {
        let addr = Address::code(5, 0x40);
        assert_eq!(addr.base(), Some(Base::Code));
        assert_eq!(addr.page(), 5);
        assert_eq!(addr.intra_offset(), 0x40);
    }

    #[test]
    fn test_with_page_only_touches_paged_bases() {
        let s = Address::static_data(0, 16).with_page(3);
        assert_eq!(s.page(), 3);
        assert_eq!(s.intra_offset(), 16);

        let r = Address::new(Base::Register, 32);
        assert_eq!(r.with_page(3), r);
    }

    #[test]
    fn test_add_keeps_page() {
        let a = Address::code(2, 100).add(-4);
        assert_eq!(a.page(), 2);
        assert_eq!(a.intra_offset(), 96);

        let s = Address::new(Base::Stack, 8).add(8);
        assert_eq!(s, Address::new(Base::Stack, 16));
    }

    #[test]
    fn test_offset_masked_not_checked() {
        let addr = Address::new(Base::Heap, u64::MAX);
        assert_eq!(addr.base(), Some(Base::Heap));
        assert_eq!(addr.offset(), OFFSET_MASK);
    }

    #[test]
    fn test_display() {
        assert_eq!(Address::code(1, 16).to_string(), "code[1]+0x10");
        assert_eq!(Address::new(Base::Stack, 8).to_string(), "stack+0x8");
    }
}
