//! Narrow identifier newtypes used across the region space and pool layers
//!
//! These wrap plain integers so address decomposition, region-slot indices,
//! and layout ids cannot be accidentally mixed up at call sites.

use std::fmt;

/// Index of an arena within the arena map (`address >> ARENA_SIZE_L2`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaId(pub u32);

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena#{}", self.0)
    }
}

/// Index of a region within its owning arena (`position >> segmentation`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(pub u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}

/// Index into the compile-time object layout table (`ObjectLayoutInfos`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayoutId(pub u16);

impl fmt::Display for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layout#{}", self.0)
    }
}

/// Index of a free-slot bit within a region's availability bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(pub u8);

impl SlotIndex {
    /// Bit mask for this slot within a 64-bit availability word
    pub fn mask(self) -> u64 {
        1u64 << self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_mask_matches_bit_position() {
        assert_eq!(SlotIndex(0).mask(), 0b1);
        assert_eq!(SlotIndex(3).mask(), 0b1000);
        assert_eq!(SlotIndex(63).mask(), 1u64 << 63);
    }
}
