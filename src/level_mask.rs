//! Level mask and descriptor byte helpers
//!
//! Every serialized cell is preceded by two descriptor bytes. The first
//! packs the reference count, the exotic flag, the embedded-hashes flag and
//! the level mask; the second encodes the payload length. The level mask
//! records at which of the three Merkle levels the cell's hash is
//! independently significant (level 0 always is).

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::error::{CellError, Result};

/// Highest Merkle level a cell can have.
pub const MAX_CELL_LEVEL: u8 = 3;

/// Mask of significant Merkle levels; bit `i` stands for level `i + 1`.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct LevelMask(u8);

impl LevelMask {
    pub const EMPTY: Self = LevelMask(0);

    /// Constructs a new mask, truncating extra bits.
    pub const fn new(mask: u8) -> Self {
        Self(mask & 0b111)
    }

    pub const fn to_byte(self) -> u8 {
        self.0
    }

    /// Mask covering every level up to and including `level`.
    pub const fn from_level(level: u8) -> Self {
        Self(match level {
            0 => 0,
            1 => 1,
            2 => 3,
            _ => 7,
        })
    }

    /// Position of the highest significant level, 0..=3.
    pub const fn level(self) -> u8 {
        (8 - self.0.leading_zeros()) as u8
    }

    /// Number of (hash, depth) pairs a cell with this mask carries.
    pub const fn hash_count(self) -> usize {
        self.0.count_ones() as usize + 1
    }

    /// Keeps only the bits below `level`.
    pub const fn apply(self, level: u8) -> Self {
        let level = if level > 3 { 3 } else { level };
        if level == 0 {
            Self(0)
        } else {
            Self(self.0 & ((1u8 << level) - 1))
        }
    }

    /// Index of the (hash, depth) pair significant at `level`.
    pub const fn hash_index(self, level: u8) -> usize {
        self.apply(level).0.count_ones() as usize
    }

    /// Whether `level` has its own hash. Level 0 always does.
    pub const fn is_significant(self, level: u8) -> bool {
        level == 0 || (self.0 >> (level - 1)) & 1 != 0
    }

    /// Drops the lowest level, the Merkle level shift.
    pub const fn shift(self) -> Self {
        Self(self.0 >> 1)
    }
}

impl BitOr for LevelMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LevelMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for LevelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03b}", self.0)
    }
}

/// The two descriptor bytes preceding a serialized cell's payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CellDescriptor {
    pub d1: u8,
    pub d2: u8,
}

impl CellDescriptor {
    /// Reference count encoding the reserved absent-cell marker.
    const ABSENT_REFS: u8 = 7;

    pub fn new(d1: u8, d2: u8) -> Self {
        Self { d1, d2 }
    }

    /// Computes descriptor bytes for a cell with the given shape.
    pub fn compute(refs: usize, is_exotic: bool, mask: LevelMask, bit_len: usize) -> Self {
        let d1 = refs as u8 | (is_exotic as u8) << 3 | mask.to_byte() << 5;
        let d2 = (bit_len / 8 + bit_len.div_ceil(8)) as u8;
        Self { d1, d2 }
    }

    pub const fn ref_count(&self) -> usize {
        (self.d1 & 0b111) as usize
    }

    pub const fn is_exotic(&self) -> bool {
        self.d1 & 0b1000 != 0
    }

    pub const fn store_hashes(&self) -> bool {
        self.d1 & 0b10000 != 0
    }

    pub const fn level_mask(&self) -> LevelMask {
        LevelMask::new(self.d1 >> 5)
    }

    pub const fn is_absent(&self) -> bool {
        self.d1 & 0b111 == Self::ABSENT_REFS && self.store_hashes()
    }

    /// Payload length in bytes, `ceil(bits / 8)`.
    pub const fn byte_len(&self) -> usize {
        ((self.d2 as usize) + 1) / 2
    }

    /// Whether the payload ends on a byte boundary (no padding marker).
    pub const fn is_aligned(&self) -> bool {
        self.d2 & 1 == 0
    }

    /// Rejects descriptors no parser is allowed to accept.
    pub fn validate(&self) -> Result<()> {
        if self.ref_count() > 4 {
            if self.is_absent() {
                return Err(CellError::AbsentCell);
            }
            return Err(CellError::InvalidDescriptor(self.d1));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level() {
        const LEVEL: [u8; 8] = [0, 1, 2, 2, 3, 3, 3, 3];
        for mask in 0b000..=0b111u8 {
            assert_eq!(LevelMask::new(mask).level(), LEVEL[mask as usize]);
        }
    }

    #[test]
    fn test_hash_index() {
        const HASH_INDEX_TABLE: [[usize; 4]; 8] = [
            [0, 0, 0, 0], // 000
            [0, 1, 1, 1], // 001
            [0, 0, 1, 1], // 010
            [0, 1, 2, 2], // 011
            [0, 0, 0, 1], // 100
            [0, 1, 1, 2], // 101
            [0, 0, 1, 2], // 110
            [0, 1, 2, 3], // 111
        ];
        for mask in 0b000..=0b111u8 {
            let mask_value = LevelMask::new(mask);
            for level in 0..=3u8 {
                assert_eq!(
                    mask_value.hash_index(level),
                    HASH_INDEX_TABLE[mask as usize][level as usize]
                );
            }
        }
    }

    #[test]
    fn test_significance() {
        let mask = LevelMask::new(0b101);
        assert!(mask.is_significant(0));
        assert!(mask.is_significant(1));
        assert!(!mask.is_significant(2));
        assert!(mask.is_significant(3));
        assert_eq!(mask.hash_count(), 3);
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let descriptor = CellDescriptor::compute(2, true, LevelMask::new(0b001), 37);
        assert_eq!(descriptor.ref_count(), 2);
        assert!(descriptor.is_exotic());
        assert!(!descriptor.store_hashes());
        assert_eq!(descriptor.level_mask(), LevelMask::new(0b001));
        assert_eq!(descriptor.byte_len(), 5);
        assert!(!descriptor.is_aligned());
    }

    #[test]
    fn test_descriptor_d2() {
        // floor(b/8) + ceil(b/8)
        assert_eq!(CellDescriptor::compute(0, false, LevelMask::EMPTY, 0).d2, 0);
        assert_eq!(CellDescriptor::compute(0, false, LevelMask::EMPTY, 7).d2, 1);
        assert_eq!(CellDescriptor::compute(0, false, LevelMask::EMPTY, 8).d2, 2);
        assert_eq!(CellDescriptor::compute(0, false, LevelMask::EMPTY, 1023).d2, 255);
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(CellDescriptor::new(0b0000_0100, 0).validate().is_ok());
        assert_eq!(
            CellDescriptor::new(0b0000_0101, 0).validate(),
            Err(CellError::InvalidDescriptor(0b0000_0101))
        );
        assert_eq!(
            CellDescriptor::new(0b0001_0111, 0).validate(),
            Err(CellError::AbsentCell)
        );
    }
}
