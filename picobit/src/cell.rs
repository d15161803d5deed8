//! Ptr: a 16 bit index, either a RAM cell, a ROM cell or an immediate
//!
//! Cell: the tagged two-slot record every heap object is made of. The left
//! slot is car-like and the right slot is cdr-like; which of them hold
//! pointers is decided by the tag (see [`CellType::has_left_link`])
//!
//! Index space:
//! ```text
//! 0x0000 .. ram_size   RAM cells (the first `reserved` hold globals)
//! 0xE000 .. 0xFDFF     ROM cells
//! 0xFE00 .. 0xFF00     small integers -1 .. 255
//! 0xFFFD, 0xFFFE       #f, #t
//! 0xFFFF               ()
//! ```
use std::fmt;

use bitflags::bitflags;

use crate::VmError;

/// Size of a cell in the program image and of a vector heap unit.
pub const CELL_SIZE: usize = 5;

pub const ROM_START: u16 = 0xE000;
pub const ROM_END: u16 = 0xFE00;
pub const SMALL_INT_START: u16 = 0xFE00;
pub const SMALL_INT_END: u16 = 0xFF00;
const SMALL_INT_MASK: u16 = 0x01FF;
const ROM_INDEX_MASK: u16 = 0x1FFF;

pub const MIN_SMALL_INT: i32 = -1;
pub const MAX_SMALL_INT: i32 = 255;

/// A 16 bit index into the unified RAM / ROM / immediate space.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ptr(u16);

impl Ptr {
    pub const FALSE: Ptr = Ptr(0xFFFD);
    pub const TRUE: Ptr = Ptr(0xFFFE);
    pub const NIL: Ptr = Ptr(0xFFFF);
    pub const NEG1: Ptr = Ptr(0xFE00);
    pub const ZERO: Ptr = Ptr(0xFE01);
    pub const POS1: Ptr = Ptr(0xFE02);

    #[inline(always)]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline(always)]
    pub const fn from_bool(value: bool) -> Self {
        if value { Self::TRUE } else { Self::FALSE }
    }

    /// ROM cell `index` of the constant pool.
    #[inline(always)]
    pub const fn rom(index: u16) -> Self {
        Self(ROM_START + index)
    }

    /// Encodes `value` as an immediate if it is in `-1..=255`.
    #[inline]
    pub const fn small_int(value: i32) -> Option<Self> {
        if value < MIN_SMALL_INT || value > MAX_SMALL_INT {
            return None;
        }
        Some(Self(((value + 1) as u16) | SMALL_INT_START))
    }

    #[inline(always)]
    pub const fn is_small_int(self) -> bool {
        self.0 >= SMALL_INT_START && self.0 <= SMALL_INT_END
    }

    #[inline]
    pub const fn as_small_int(self) -> Option<i32> {
        if self.is_small_int() {
            Some((self.0 & SMALL_INT_MASK) as i32 - 1)
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn is_rom(self) -> bool {
        self.0 >= ROM_START && self.0 < ROM_END
    }

    #[inline(always)]
    pub const fn rom_index(self) -> usize {
        (self.0 & ROM_INDEX_MASK) as usize
    }

    /// Anything at or above the small integer range needs no cell.
    #[inline(always)]
    pub const fn is_immediate(self) -> bool {
        self.0 >= SMALL_INT_START
    }

    /// One of the two bignum terminators.
    #[inline(always)]
    pub const fn is_terminator(self) -> bool {
        self.0 == Self::ZERO.0 || self.0 == Self::NEG1.0
    }
}

impl fmt::Debug for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Ptr::FALSE => write!(f, "#f"),
            Ptr::TRUE => write!(f, "#t"),
            Ptr::NIL => write!(f, "()"),
            p if p.is_small_int() => {
                write!(f, "{}", p.as_small_int().unwrap_or_default())
            }
            p if p.is_rom() => write!(f, "rom:{}", p.rom_index()),
            p => write!(f, "ram:{}", p.0),
        }
    }
}

impl fmt::Display for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Cell type tags.
///
/// Tags below 8 hold a pointer in the left slot, tags below 4 also hold one
/// in the right slot. The collector only looks at that partition, so any new
/// type has to respect it.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CellType {
    Pair = 0,
    Continuation = 1,
    Closure = 4,
    Bignum = 5,
    String = 6,
    Fixnum = 8,
    CString = 11,
    Vector = 12,
    Symbol = 13,
}

impl CellType {
    pub const fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Self::Pair,
            1 => Self::Continuation,
            4 => Self::Closure,
            5 => Self::Bignum,
            6 => Self::String,
            8 => Self::Fixnum,
            11 => Self::CString,
            12 => Self::Vector,
            13 => Self::Symbol,
            _ => return None,
        })
    }

    #[inline(always)]
    pub const fn has_left_link(self) -> bool {
        (self as u8) < 8
    }

    #[inline(always)]
    pub const fn has_right_link(self) -> bool {
        (self as u8) < 4
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Pair => "pair",
            Self::Continuation => "continuation",
            Self::Closure => "closure",
            Self::Bignum => "bignum",
            Self::String => "string",
            Self::Fixnum => "fixnum",
            Self::CString => "c-string",
            Self::Vector => "vector",
            Self::Symbol => "symbol",
        }
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct CellFlags: u8 {
        const MARK = 1 << 0;
        const FLIP = 1 << 1;
        const USER_1 = 1 << 6;
        const USER_2 = 1 << 7;
    }
}

const TYPE_SHIFT: u8 = 2;
const TYPE_MASK: u8 = 0b1111;

/// A heap cell.
///
/// The slots are raw so the collector can reverse them in place, typed access
/// goes through [`Cell::kind`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cell {
    pub left: u16,
    pub right: u16,
    pub tag: CellType,
    pub flags: CellFlags,
}

/// Typed view of a cell.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CellKind {
    Pair { car: Ptr, cdr: Ptr },
    Continuation { parent: Ptr, closure: Ptr },
    Closure { env: Ptr, entry: u16 },
    Bignum { next: Ptr, digit: u16 },
    String { chars: Ptr },
    Fixnum(i32),
    CString { chars: u16, next: u16 },
    Vector { length: u16, start: u16 },
    Symbol,
}

impl Cell {
    pub const FREE: Cell = Cell::pair(Ptr::NIL, Ptr::NIL);

    #[inline(always)]
    const fn with(tag: CellType, left: u16, right: u16) -> Self {
        Self {
            left,
            right,
            tag,
            flags: CellFlags::empty(),
        }
    }

    pub const fn pair(car: Ptr, cdr: Ptr) -> Self {
        Self::with(CellType::Pair, car.raw(), cdr.raw())
    }

    pub const fn continuation(parent: Ptr, closure: Ptr) -> Self {
        Self::with(CellType::Continuation, parent.raw(), closure.raw())
    }

    pub const fn closure(env: Ptr, entry: u16) -> Self {
        Self::with(CellType::Closure, env.raw(), entry)
    }

    pub const fn bignum(digit: u16, next: Ptr) -> Self {
        Self::with(CellType::Bignum, next.raw(), digit)
    }

    pub const fn string(chars: Ptr) -> Self {
        Self::with(CellType::String, chars.raw(), 0)
    }

    pub const fn fixnum(value: i32) -> Self {
        let bits = value as u32;
        Self::with(CellType::Fixnum, (bits >> 16) as u16, bits as u16)
    }

    pub const fn vector(length: u16, start: u16) -> Self {
        Self::with(CellType::Vector, length, start)
    }

    pub const fn symbol() -> Self {
        Self::with(CellType::Symbol, Ptr::NIL.raw(), Ptr::NIL.raw())
    }

    #[inline(always)]
    pub const fn car(&self) -> Ptr {
        Ptr(self.left)
    }

    #[inline(always)]
    pub const fn cdr(&self) -> Ptr {
        Ptr(self.right)
    }

    #[inline(always)]
    pub fn is(&self, tag: CellType) -> bool {
        self.tag == tag
    }

    pub fn kind(&self) -> CellKind {
        match self.tag {
            CellType::Pair => CellKind::Pair {
                car: self.car(),
                cdr: self.cdr(),
            },
            CellType::Continuation => CellKind::Continuation {
                parent: self.car(),
                closure: self.cdr(),
            },
            CellType::Closure => CellKind::Closure {
                env: self.car(),
                entry: self.right,
            },
            CellType::Bignum => CellKind::Bignum {
                next: self.car(),
                digit: self.right,
            },
            CellType::String => CellKind::String { chars: self.car() },
            CellType::Fixnum => CellKind::Fixnum(
                (((self.left as u32) << 16) | self.right as u32) as i32,
            ),
            CellType::CString => CellKind::CString {
                chars: self.left,
                next: self.right,
            },
            CellType::Vector => CellKind::Vector {
                length: self.left,
                start: self.right,
            },
            CellType::Symbol => CellKind::Symbol,
        }
    }

    #[inline(always)]
    pub fn is_marked(&self) -> bool {
        self.flags.contains(CellFlags::MARK)
    }

    #[inline(always)]
    pub fn is_flipped(&self) -> bool {
        self.flags.contains(CellFlags::FLIP)
    }

    /// Decodes one 5 byte cell of the ROM constant pool.
    pub fn decode(bytes: &[u8]) -> Result<Self, VmError> {
        let [r0, r1, l0, l1, bits] = bytes else {
            return Err(VmError::bad_image("truncated rom cell"));
        };
        let tag = CellType::from_bits((bits >> TYPE_SHIFT) & TYPE_MASK)
            .ok_or_else(|| VmError::bad_image(format!("unknown cell type in flags {bits:#04x}")))?;
        Ok(Self {
            left: u16::from_le_bytes([*l0, *l1]),
            right: u16::from_le_bytes([*r0, *r1]),
            tag,
            // gc bits are meaningless in ROM, user bits are kept
            flags: CellFlags::from_bits_truncate(*bits)
                & (CellFlags::USER_1 | CellFlags::USER_2),
        })
    }

    pub fn encode(&self) -> [u8; CELL_SIZE] {
        let [r0, r1] = self.right.to_le_bytes();
        let [l0, l1] = self.left.to_le_bytes();
        let bits = self.flags.bits() | ((self.tag as u8) << TYPE_SHIFT);
        [r0, r1, l0, l1, bits]
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Constant {
    False,
    True,
    Nil,
}

/// Result of classifying a pointer against the heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Class {
    SmallInt(i16),
    Const(Constant),
    Ram(CellType),
    Rom(CellType),
    /// Outside the live RAM heap, past the ROM pool, or in the gap between
    /// the small integers and the constants.
    Unmapped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_int_encoding_covers_boundaries() {
        assert_eq!(Ptr::small_int(-1), Some(Ptr::NEG1));
        assert_eq!(Ptr::small_int(0), Some(Ptr::ZERO));
        assert_eq!(Ptr::small_int(1), Some(Ptr::POS1));
        assert_eq!(Ptr::small_int(255).map(Ptr::raw), Some(0xFF00));
        assert_eq!(Ptr::small_int(256), None);
        assert_eq!(Ptr::small_int(-2), None);

        for v in -1..=255 {
            let p = Ptr::small_int(v).expect("in range");
            assert!(p.is_small_int());
            assert_eq!(p.as_small_int(), Some(v));
        }
        assert_eq!(Ptr::FALSE.as_small_int(), None);
    }

    #[test]
    fn zones_are_disjoint() {
        assert!(!Ptr::new(0xDFFF).is_rom());
        assert!(Ptr::new(0xE000).is_rom());
        assert!(Ptr::new(0xFDFF).is_rom());
        assert!(!Ptr::new(0xFE00).is_rom());
        assert!(Ptr::new(0xFE00).is_immediate());
        assert_eq!(Ptr::rom(7).rom_index(), 7);
    }

    #[test]
    fn link_partition_follows_tags() {
        assert!(CellType::Pair.has_right_link());
        assert!(CellType::Continuation.has_right_link());
        assert!(CellType::Closure.has_left_link());
        assert!(!CellType::Closure.has_right_link());
        assert!(CellType::Bignum.has_left_link());
        assert!(CellType::String.has_left_link());
        assert!(!CellType::Fixnum.has_left_link());
        assert!(!CellType::Vector.has_left_link());
        assert!(!CellType::Symbol.has_left_link());
    }

    #[test]
    fn rom_cell_layout_matches_image_format() {
        // pair (car = 0xE001, cdr = nil)
        let bytes = [0xFF, 0xFF, 0x01, 0xE0, 0x00];
        let cell = Cell::decode(&bytes).expect("valid cell");
        assert_eq!(
            cell.kind(),
            CellKind::Pair {
                car: Ptr::rom(1),
                cdr: Ptr::NIL
            }
        );
        assert_eq!(cell.encode(), bytes);

        let fixnum = Cell::fixnum(-123_456);
        let decoded = Cell::decode(&fixnum.encode()).expect("valid cell");
        assert_eq!(decoded.kind(), CellKind::Fixnum(-123_456));

        let bignum = Cell::decode(&[0x34, 0x12, 0x01, 0xFE, 5 << 2]).expect("valid cell");
        assert_eq!(
            bignum.kind(),
            CellKind::Bignum {
                next: Ptr::ZERO,
                digit: 0x1234
            }
        );
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let err = Cell::decode(&[0, 0, 0, 0, 2 << 2]).unwrap_err();
        assert!(matches!(err, VmError::BadImage { .. }), "got {err:?}");
    }
}
