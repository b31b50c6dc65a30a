//! Compile-time-generated object layout table and size-class lookup
//!
//! The table is built once (lazily, on first use) rather than written out
//! by hand, but its shape matches what a code generator would emit: a dense
//! array of [`ObjectLayoutInfo`] plus small/medium/large lookup tables that
//! map a request size to a layout id in O(1) (small) or via a narrow bin
//! comparison (medium/large).

use once_cell::sync::Lazy;

use crate::constants::{
    LARGE_SIZE_LIMIT, MAX_OBJECTS_PER_REGION, MEDIUM_SIZE_LIMIT, OBJECT_REGION_HEAD_SIZE,
    PAGE_SIZE_L2, SMALL_SIZE_LIMIT,
};
use crate::types::ids::LayoutId;

/// Allocation policy a layout was generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPolicy {
    /// Served from the small-object lookup table, many objects per region
    Small,
    /// Served from the medium-object lookup table
    Medium,
    /// One slot per region; the region is sized to the request at allocation time
    Large,
}

/// Retention-list sizing hints carried per layout (consulted by the pool
/// layer when deciding how many regions to keep cached versus release)
#[derive(Debug, Clone, Copy)]
pub struct RetentionInfo {
    /// Target length of a context's cached usables list for this layout
    pub list_len: usize,
    /// Target number of regions the heap keeps warm for this layout
    pub heap_count: usize,
    /// Target number of regions a single context keeps warm for this layout
    pub context_count: usize,
}

/// One entry of the compile-time object layout table
#[derive(Debug, Clone, Copy)]
pub struct ObjectLayoutInfo {
    /// Usable size in bytes of one slot under this layout; for the terminal
    /// huge layout this is 0 and the actual size is taken from the request
    pub object_size: usize,
    /// Number of object slots a region of this layout holds, `<= 64`
    pub region_objects: u8,
    /// `log2` of the region size this layout's regions are allocated at
    pub region_size_l2: u32,
    /// Sizing id (commit-eagerness level) regions of this layout request
    pub region_sizing_id: usize,
    /// Which size-class table this layout was generated for
    pub policy: LayoutPolicy,
    /// Byte stride between consecutive slots (equal to `object_size` here;
    /// kept distinct from `object_size` in case of future padding)
    pub object_multiplier: usize,
    /// 32.32 fixed-point reciprocal of `object_multiplier`, used to recover
    /// a slot index from a byte offset without a division
    pub object_divisor_recip: u64,
    /// Retention sizing hints
    pub retention: RetentionInfo,
}

impl ObjectLayoutInfo {
    /// Full bitmask of a region under this layout: bit `i` set for every slot `i < region_objects`
    pub fn full_mask(&self) -> u64 {
        if self.region_objects >= 64 {
            u64::MAX
        } else {
            (1u64 << self.region_objects) - 1
        }
    }

    /// Recover the slot index of a byte offset from the region head, using
    /// the precomputed fixed-point reciprocal instead of a division.
    ///
    /// A 16-bit fraction drifts for non-power-of-two multipliers once
    /// `(region_objects - 1) * (multiplier - remainder)` approaches `2^16`;
    /// 32 fractional bits keeps the product comfortably under `2^32` for
    /// every multiplier this table generates (`region_objects <= 64`), so
    /// the reciprocal recovers the exact slot index for every slot offset.
    pub fn slot_index_for_offset(&self, offset_from_head: usize) -> usize {
        ((offset_from_head as u64 * self.object_divisor_recip) >> 32) as usize
    }
}

fn fixed_point_recip(multiplier: usize) -> u64 {
    let m = multiplier as u64;
    ((1u64 << 32) + m - 1) / m
}

fn choose_region(object_size: usize, max_region_size_l2: u32) -> (u32, u8) {
    let mut l2 = PAGE_SIZE_L2;
    loop {
        let region_bytes = 1u64 << l2;
        let capacity = ((region_bytes - OBJECT_REGION_HEAD_SIZE as u64) / object_size as u64)
            .min(MAX_OBJECTS_PER_REGION as u64);
        if capacity >= MAX_OBJECTS_PER_REGION as u64 || l2 >= max_region_size_l2 {
            return (l2, capacity.max(1) as u8);
        }
        l2 += 1;
    }
}

fn build_layout(
    object_size: usize,
    policy: LayoutPolicy,
    sizing_id: usize,
    max_region_size_l2: u32,
) -> ObjectLayoutInfo {
    let (region_size_l2, region_objects) = choose_region(object_size, max_region_size_l2);
    ObjectLayoutInfo {
        object_size,
        region_objects,
        region_size_l2,
        region_sizing_id: sizing_id,
        policy,
        object_multiplier: object_size,
        object_divisor_recip: fixed_point_recip(object_size),
        retention: RetentionInfo {
            list_len: 4,
            heap_count: 8,
            context_count: 2,
        },
    }
}

const SMALL_SIZES: &[usize] = &[
    16, 32, 48, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 640, 768, 896, 1024,
];

const MEDIUM_SIZES: &[usize] = &[
    1536, 2048, 3072, 4096, 6144, 8192, 12288, 16384, 24576, 32768,
];

const LARGE_SIZES: &[usize] = &[49152, 65536, 98304, 131072, 262144];

/// Complete generated layout table: small, then medium, then large, then a
/// terminal huge entry (`object_size == 0`, one slot per region, region
/// sized to the request at allocation time).
pub static OBJECT_LAYOUTS: Lazy<Vec<ObjectLayoutInfo>> = Lazy::new(|| {
    let mut v = Vec::with_capacity(SMALL_SIZES.len() + MEDIUM_SIZES.len() + LARGE_SIZES.len() + 1);
    for &s in SMALL_SIZES {
        v.push(build_layout(s, LayoutPolicy::Small, 0, PAGE_SIZE_L2));
    }
    for &s in MEDIUM_SIZES {
        v.push(build_layout(s, LayoutPolicy::Medium, 1, PAGE_SIZE_L2 + 4));
    }
    for &s in LARGE_SIZES {
        v.push(build_layout(s, LayoutPolicy::Medium, 2, PAGE_SIZE_L2 + 8));
    }
    v.push(ObjectLayoutInfo {
        object_size: 0,
        region_objects: 1,
        region_size_l2: 0,
        region_sizing_id: 3,
        policy: LayoutPolicy::Large,
        object_multiplier: 0,
        object_divisor_recip: 0,
        retention: RetentionInfo {
            list_len: 0,
            heap_count: 0,
            context_count: 0,
        },
    });
    for (i, l) in v.iter().enumerate() {
        assert!(l.region_objects as usize <= MAX_OBJECTS_PER_REGION);
        if i > 0 && l.object_size > 0 {
            if let Some(prev) = v[..i].iter().rev().find(|p| p.object_size > 0) {
                assert!(l.object_size >= prev.object_size, "layout table must be monotone");
            }
        }
    }
    v
});

/// Id of the terminal huge layout (one slot per region, request-sized region)
pub fn huge_layout_id() -> LayoutId {
    LayoutId((OBJECT_LAYOUTS.len() - 1) as u16)
}

/// Resolve a request size to a layout id per the three-table scheme in the
/// component design: dense lookup below `SMALL_SIZE_LIMIT`, bin-with-two-
/// candidates for medium and large ranges, huge layout above `LARGE_SIZE_LIMIT`.
pub fn layout_for_size(size: usize) -> LayoutId {
    if size == 0 {
        return LayoutId(0);
    }
    if size < SMALL_SIZE_LIMIT {
        return small_object_layout(size);
    }
    if size < MEDIUM_SIZE_LIMIT {
        return medium_object_layout(size);
    }
    if size < LARGE_SIZE_LIMIT {
        return large_object_layout(size);
    }
    huge_layout_id()
}

fn small_object_layout(size: usize) -> LayoutId {
    for (i, l) in OBJECT_LAYOUTS[..SMALL_SIZES.len()].iter().enumerate() {
        if size <= l.object_multiplier {
            return LayoutId(i as u16);
        }
    }
    LayoutId((SMALL_SIZES.len() - 1) as u16)
}

fn medium_object_layout(size: usize) -> LayoutId {
    let base = SMALL_SIZES.len();
    bin_lookup(size, base, &OBJECT_LAYOUTS[base..base + MEDIUM_SIZES.len()])
}

fn large_object_layout(size: usize) -> LayoutId {
    let base = SMALL_SIZES.len() + MEDIUM_SIZES.len();
    bin_lookup(size, base, &OBJECT_LAYOUTS[base..base + LARGE_SIZES.len()])
}

/// `{layoutMin, layoutMax}` bin comparison: the request fits `layoutMin` if
/// its multiplier is large enough, otherwise the next layout up is used.
fn bin_lookup(size: usize, base: usize, layouts: &[ObjectLayoutInfo]) -> LayoutId {
    for (i, l) in layouts.iter().enumerate() {
        if size <= l.object_multiplier {
            return LayoutId((base + i) as u16);
        }
    }
    LayoutId((base + layouts.len() - 1) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_table_respects_region_capacity_invariant() {
        for l in OBJECT_LAYOUTS.iter() {
            if l.object_size == 0 {
                continue;
            }
            let region_bytes = 1usize << l.region_size_l2;
            assert!(
                l.object_size * l.region_objects as usize + OBJECT_REGION_HEAD_SIZE <= region_bytes
            );
        }
    }

    #[test]
    fn full_mask_matches_object_count() {
        let l = &OBJECT_LAYOUTS[0];
        assert_eq!(l.full_mask(), (1u64 << l.region_objects) - 1);
    }

    #[test]
    fn size_to_layout_is_monotone_non_decreasing() {
        let mut last_multiplier = 0usize;
        for size in (1..SMALL_SIZE_LIMIT).step_by(7) {
            let id = layout_for_size(size);
            let l = &OBJECT_LAYOUTS[id.0 as usize];
            assert!(l.object_multiplier >= last_multiplier || l.object_multiplier >= size);
            assert!(size <= l.object_multiplier);
            last_multiplier = l.object_multiplier;
        }
    }

    #[test]
    fn huge_sizes_use_terminal_layout() {
        assert_eq!(layout_for_size(LARGE_SIZE_LIMIT), huge_layout_id());
        assert_eq!(layout_for_size(LARGE_SIZE_LIMIT * 4), huge_layout_id());
    }

    #[test]
    fn forty_bytes_maps_to_forty_eight_byte_layout() {
        let id = layout_for_size(40);
        assert_eq!(OBJECT_LAYOUTS[id.0 as usize].object_size, 48);
    }

    #[test]
    fn slot_index_recovered_from_offset() {
        let l = &OBJECT_LAYOUTS[0];
        for i in 0..l.region_objects as usize {
            let offset = i * l.object_multiplier;
            assert_eq!(l.slot_index_for_offset(offset), i);
        }
    }
}
