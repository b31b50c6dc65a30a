//! Region space: address-indexed arena map and region allocation
//!
//! Owns the sparse map from address to arena descriptor and, within each
//! arena, the free-slot search that backs [`allocate_region`]. Enforces the
//! process-wide physical-byte budget and delegates to the OS adapter for
//! the underlying reserve/commit/decommit/release calls.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use parking_lot::RwLock;

use crate::constants::{ARENA_COUNT, ARENA_SIZE, ARENA_SIZE_L2, PAGE_SIZE_L2, SIZING_LEVELS};
use crate::os;
use crate::types::{AllocError, ArenaId};

/// One-byte tag stored per region slot in an arena descriptor
pub mod region_tag {
    /// Slot holds no region; free to allocate
    pub const FREE: u8 = 0xFF;
    /// Slot holds a region that was disposed into a sizing cache
    pub const FREE_CACHED: u8 = 0xFE;
    /// Slot holds a region reserved for descriptor-allocator page spans
    pub const BUFFER: u8 = 0xFD;
    /// Slot holds the dedicated descriptor-heap arena's bookkeeping region
    pub const DESCRIPTOR_HEAP: u8 = 0xFC;
    /// Highest tag value that still denotes an object layout id
    pub const MAX_OBJECT_LAYOUT: u8 = 0xFB;
}

/// Callback the region space invokes when the physical-byte budget would be
/// exceeded, giving the heap controller a chance to free memory before the
/// allocation fails with [`AllocError::MissingMemory`].
pub trait StarvationConsumer {
    /// Attempt to free at least `needed` bytes; returns once an attempt has
    /// been made (successful or not) rather than looping internally.
    fn rescue_starving_situation(&self, needed: usize);
}

/// A consumer that never rescues anything; useful for tests exercising the
/// budget-exhaustion path in isolation.
pub struct NoRescue;

impl StarvationConsumer for NoRescue {
    fn rescue_starving_situation(&self, _needed: usize) {}
}

struct ArenaSlot {
    segmentation: u32,
    managed: bool,
    descriptor: ArenaDescriptor,
}

struct ArenaDescriptor {
    base: usize,
    availables_count: AtomicUsize,
    availables_scan_position: AtomicUsize,
    regions: Mutex<Vec<u8>>,
}

impl ArenaDescriptor {
    fn new(base: usize, segmentation: u32) -> Self {
        let slot_count = (ARENA_SIZE >> segmentation) as usize;
        ArenaDescriptor {
            base,
            availables_count: AtomicUsize::new(slot_count),
            availables_scan_position: AtomicUsize::new(0),
            regions: Mutex::new(vec![region_tag::FREE; slot_count]),
        }
    }

    /// Bounded linear search for a free slot starting at the rolling scan
    /// position, wrapping once. Returns the slot index if one was claimed.
    fn claim_free_slot(&self) -> Option<usize> {
        let mut regions = self.regions.lock().unwrap();
        let len = regions.len();
        if len == 0 {
            return None;
        }
        let start = self.availables_scan_position.load(Ordering::Relaxed) % len;
        for offset in 0..len {
            let i = (start + offset) % len;
            if regions[i] == region_tag::FREE {
                regions[i] = region_tag::BUFFER;
                self.availables_scan_position.store((i + 1) % len, Ordering::Relaxed);
                self.availables_count.fetch_sub(1, Ordering::Relaxed);
                return Some(i);
            }
        }
        None
    }

    fn set_tag(&self, slot: usize, tag: u8) {
        let mut regions = self.regions.lock().unwrap();
        let was_free = regions[slot] == region_tag::FREE;
        regions[slot] = tag;
        let now_free = tag == region_tag::FREE;
        if was_free && !now_free {
            self.availables_count.fetch_sub(1, Ordering::Relaxed);
        } else if !was_free && now_free {
            self.availables_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Four lock-protected free-region stacks, one per sizing id, plus the set
/// of arenas at this segmentation that still have free slots.
struct ArenaClassPool {
    segmentation: u32,
    arenas_with_space: Mutex<Vec<ArenaId>>,
    caches: [Mutex<Vec<usize>>; SIZING_LEVELS],
}

impl ArenaClassPool {
    fn new(segmentation: u32) -> Self {
        ArenaClassPool {
            segmentation,
            arenas_with_space: Mutex::new(Vec::new()),
            caches: Default::default(),
        }
    }
}

/// The address-indexed arena map and the region allocator built atop it
pub struct RegionSpace {
    arenas: RwLock<Vec<Option<ArenaSlot>>>,
    class_pools: Vec<ArenaClassPool>,
    max_usable_physical_bytes: AtomicU64,
    used_physical_bytes: AtomicU64,
    region_cache_max_depth: usize,
}

fn class_index(segmentation: u32) -> usize {
    (segmentation - PAGE_SIZE_L2) as usize
}

impl RegionSpace {
    /// Build a fresh region space with an empty arena map
    pub fn new(max_usable_physical_bytes: u64, region_cache_max_depth: usize) -> Self {
        let class_count = (ARENA_SIZE_L2 - PAGE_SIZE_L2 + 1) as usize;
        let mut class_pools = Vec::with_capacity(class_count);
        for i in 0..class_count {
            class_pools.push(ArenaClassPool::new(PAGE_SIZE_L2 + i as u32));
        }
        RegionSpace {
            arenas: RwLock::new((0..ARENA_COUNT).map(|_| None).collect()),
            class_pools,
            max_usable_physical_bytes: AtomicU64::new(max_usable_physical_bytes),
            used_physical_bytes: AtomicU64::new(0),
            region_cache_max_depth,
        }
    }

    /// Committed physical bytes currently attributed to the region space
    pub fn used_physical_bytes(&self) -> u64 {
        self.used_physical_bytes.load(Ordering::Relaxed)
    }

    /// Configured ceiling `used_physical_bytes` is checked against before
    /// committing a new region.
    pub fn max_usable_physical_bytes(&self) -> u64 {
        self.max_usable_physical_bytes.load(Ordering::Relaxed)
    }

    fn require_physical_bytes(
        &self,
        size: u64,
        consumer: &dyn StarvationConsumer,
    ) -> Result<(), AllocError> {
        let max = self.max_usable_physical_bytes.load(Ordering::Relaxed);
        loop {
            let used = self.used_physical_bytes.load(Ordering::Relaxed);
            if used + size <= max {
                if self
                    .used_physical_bytes
                    .compare_exchange(used, used + size, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(());
                }
                continue;
            }
            break;
        }
        consumer.rescue_starving_situation(size as usize);
        let used = self.used_physical_bytes.load(Ordering::Relaxed);
        if used + size <= max {
            self.used_physical_bytes.fetch_add(size, Ordering::AcqRel);
            return Ok(());
        }
        Err(AllocError::MissingMemory {
            requested: size as usize,
        })
    }

    fn release_physical_bytes(&self, size: u64) {
        self.used_physical_bytes.fetch_sub(size, Ordering::AcqRel);
    }

    /// Reserve a fresh arena from the OS adapter and register it in the map
    pub fn reserve_arena(&self, segmentation: u32, managed: bool) -> Result<ArenaId, AllocError> {
        let base = os::reserve_arena(0).map_err(|_| AllocError::MissingMemory {
            requested: ARENA_SIZE as usize,
        })?;
        let arena_id = ArenaId(((base as u64) >> ARENA_SIZE_L2) as u32);
        let mut arenas = self.arenas.write();
        let idx = arena_id.0 as usize;
        if idx >= arenas.len() {
            return Err(AllocError::MissingMemory {
                requested: ARENA_SIZE as usize,
            });
        }
        arenas[idx] = Some(ArenaSlot {
            segmentation,
            managed,
            descriptor: ArenaDescriptor::new(base, segmentation),
        });
        drop(arenas);
        self.class_pools[class_index(segmentation)]
            .arenas_with_space
            .lock()
            .unwrap()
            .push(arena_id);
        Ok(arena_id)
    }

    /// Look up the arena descriptor owning `address`, if any
    pub fn segmentation_of(&self, address: usize) -> Option<u32> {
        let arena_id = (address as u64) >> ARENA_SIZE_L2;
        let arenas = self.arenas.read();
        arenas
            .get(arena_id as usize)
            .and_then(|s| s.as_ref())
            .map(|s| s.segmentation)
    }

    /// Allocate one region of size `2^size_l2` with the given sizing id,
    /// trying the sizing cache first, then an existing arena, then a fresh one.
    pub fn allocate_region(
        &self,
        size_l2: u32,
        sizing_id: usize,
        consumer: &dyn StarvationConsumer,
    ) -> Result<usize, AllocError> {
        debug_assert!(sizing_id < SIZING_LEVELS);
        let class = &self.class_pools[class_index(size_l2)];

        if let Some(addr) = class.caches[sizing_id].lock().unwrap().pop() {
            return Ok(addr);
        }

        let region_size = 1u64 << size_l2;
        let committed = committed_bytes_for_sizing(region_size, sizing_id);
        self.require_physical_bytes(committed, consumer)?;

        loop {
            let candidate = {
                let arena_ids = class.arenas_with_space.lock().unwrap().clone();
                let mut found = None;
                for arena_id in arena_ids {
                    let arenas = self.arenas.read();
                    if let Some(slot) = arenas[arena_id.0 as usize].as_ref() {
                        if let Some(region_idx) = slot.descriptor.claim_free_slot() {
                            found = Some(slot.descriptor.base + (region_idx as u64 * region_size) as usize);
                            break;
                        }
                    }
                }
                found
            };

            if let Some(addr) = candidate {
                if !os::commit(addr, committed as usize) {
                    self.release_physical_bytes(committed);
                    return Err(AllocError::MissingMemory {
                        requested: region_size as usize,
                    });
                }
                return Ok(addr);
            }

            match self.reserve_arena(size_l2, false) {
                Ok(_) => continue,
                Err(e) => {
                    self.release_physical_bytes(committed);
                    return Err(e);
                }
            }
        }
    }

    /// Return a region to the sizing cache if there is room, otherwise
    /// release it straight back to the OS.
    pub fn dispose_region(&self, address: usize, size_l2: u32, sizing_id: usize) {
        let class = &self.class_pools[class_index(size_l2)];
        let mut cache = class.caches[sizing_id].lock().unwrap();
        if cache.len() < self.region_cache_max_depth {
            self.tag_region(address, size_l2, region_tag::FREE_CACHED);
            cache.push(address);
        } else {
            drop(cache);
            self.release_region(address, size_l2, sizing_id);
        }
    }

    /// Decommit and mark a region's slot free, returning physical bytes to the budget
    pub fn release_region(&self, address: usize, size_l2: u32, sizing_id: usize) {
        let region_size = 1u64 << size_l2;
        let committed = committed_bytes_for_sizing(region_size, sizing_id);
        os::decommit(address, committed as usize);
        self.release_physical_bytes(committed);
        self.tag_region(address, size_l2, region_tag::FREE);
    }

    /// Tag a claimed region with the object layout id it now serves
    pub fn tag_as_layout(&self, address: usize, size_l2: u32, layout_id: u8) {
        debug_assert!(layout_id <= region_tag::MAX_OBJECT_LAYOUT);
        self.tag_region(address, size_l2, layout_id);
    }

    /// Invoke `f(region_base, segmentation)` for every region currently
    /// tagged with an object layout id, across every arena. Used by the
    /// mark-and-sweep reachability pass to enumerate live object regions.
    pub fn for_each_object_region(&self, mut f: impl FnMut(usize, u32)) {
        let arenas = self.arenas.read();
        for slot in arenas.iter().flatten() {
            let regions = slot.descriptor.regions.lock().unwrap();
            let region_size = 1u64 << slot.segmentation;
            for (i, &tag) in regions.iter().enumerate() {
                if tag <= region_tag::MAX_OBJECT_LAYOUT {
                    f(slot.descriptor.base + (i as u64 * region_size) as usize, slot.segmentation);
                }
            }
        }
    }

    fn tag_region(&self, address: usize, size_l2: u32, tag: u8) {
        let arena_id = (address as u64) >> ARENA_SIZE_L2;
        let arenas = self.arenas.read();
        if let Some(slot) = arenas[arena_id as usize].as_ref() {
            let region_idx = ((address as u64) - slot.descriptor.base as u64) >> size_l2;
            slot.descriptor.set_tag(region_idx as usize, tag);
        }
    }
}

/// Commit-eagerness: sizing id 0 commits the whole region; each higher id
/// commits half as much up front, relying on on-demand commit for the rest.
fn committed_bytes_for_sizing(region_size: u64, sizing_id: usize) -> u64 {
    (region_size >> sizing_id).max(crate::constants::PAGE_SIZE as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_MAX_USABLE_PHYSICAL_BYTES;

    #[test]
    fn allocate_then_dispose_region_round_trips() {
        let space = RegionSpace::new(DEFAULT_MAX_USABLE_PHYSICAL_BYTES, 1024);
        let addr = space
            .allocate_region(PAGE_SIZE_L2, 0, &NoRescue)
            .expect("allocate");
        assert_eq!(space.segmentation_of(addr), Some(PAGE_SIZE_L2));

        space.dispose_region(addr, PAGE_SIZE_L2, 0);
        let addr2 = space
            .allocate_region(PAGE_SIZE_L2, 0, &NoRescue)
            .expect("reuse from cache");
        assert_eq!(addr, addr2, "disposed region should be reused from the sizing cache");
    }

    #[test]
    fn budget_exhaustion_surfaces_missing_memory() {
        let space = RegionSpace::new(crate::constants::PAGE_SIZE as u64, 16);
        let _ok = space.allocate_region(PAGE_SIZE_L2, 0, &NoRescue).expect("first fits");
        let err = space.allocate_region(PAGE_SIZE_L2, 0, &NoRescue);
        assert!(matches!(err, Err(AllocError::MissingMemory { .. })));
    }

    #[test]
    fn used_physical_bytes_returns_to_prior_value_after_release() {
        let space = RegionSpace::new(DEFAULT_MAX_USABLE_PHYSICAL_BYTES, 16);
        let before = space.used_physical_bytes();
        let addr = space.allocate_region(PAGE_SIZE_L2, 0, &NoRescue).expect("allocate");
        assert!(space.used_physical_bytes() > before);
        space.release_region(addr, PAGE_SIZE_L2, 0);
        assert_eq!(space.used_physical_bytes(), before);
    }
}
