//! Object pools: central (process-wide) and local (per-thread) state
//!
//! Two near-identical structures per layout id, mirroring the component
//! design: [`CentralLayoutPool`] is the process-wide fallback, guarded by a
//! mutex for its `usables`/`disposables` lists with a lock-free `notifieds`
//! stack; [`LocalLayoutPool`] is the per-context, per-layout equivalent,
//! duplicated once for "private" and once for "shared" allocations so the
//! two disjoint region sets never share ownership metadata.
//!
//! The lock-free `notifieds` stack is a [`crossbeam::queue::SegQueue`]
//! rather than a hand-rolled intrusive CAS stack: the region's own
//! `next_notified` link exists for documentation of the intrusive design
//! this generalizes, but push/pop correctness is delegated to a crate the
//! rest of the engine already depends on.

use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;

use crate::constants::NOTIFIED_RECOVERY_THRESHOLD;
use crate::descriptor_alloc::DescriptorArc;
use crate::object_region::ObjectRegionHeader;
use crate::types::{AllocError, LayoutId, OBJECT_LAYOUTS};

/// Process-wide directory from a region's base address to its header.
///
/// The allocation engine still reasons about regions purely by address (the
/// arena/region decomposition in [`crate::region_space`] is unchanged); this
/// directory is where the corresponding [`ObjectRegionHeader`] lives, backed
/// by the descriptor allocator's management-structure slabs rather than the
/// global heap.
#[derive(Default)]
pub struct RegionDirectory {
    map: DashMap<usize, DescriptorArc<ObjectRegionHeader>>,
}

impl RegionDirectory {
    /// Build an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly-allocated region's header
    pub fn insert(&self, base: usize, header: DescriptorArc<ObjectRegionHeader>) {
        self.map.insert(base, header);
    }

    /// Remove a region's header, e.g. before releasing it to the region
    /// space. Dropping the returned handle (if no other clone is held)
    /// returns its backing block to the descriptor allocator.
    pub fn remove(&self, base: usize) -> Option<DescriptorArc<ObjectRegionHeader>> {
        self.map.remove(&base).map(|(_, v)| v)
    }

    /// Look up the header owning `base`
    pub fn get(&self, base: usize) -> Option<DescriptorArc<ObjectRegionHeader>> {
        self.map.get(&base).map(|e| e.value().clone())
    }
}

/// Central (process-wide) pool state for one layout id
pub struct CentralLayoutPool {
    state: Mutex<CentralLayoutState>,
    notifieds: SegQueue<usize>,
}

#[derive(Default)]
struct CentralLayoutState {
    usables: Vec<usize>,
    disposables: Vec<usize>,
}

impl CentralLayoutPool {
    fn new() -> Self {
        CentralLayoutPool {
            state: Mutex::new(CentralLayoutState::default()),
            notifieds: SegQueue::new(),
        }
    }

    /// Queue a region directly on the central notifieds stack (used when a
    /// region has no owning context, i.e. it is already centrally owned).
    pub fn notify(&self, region_base: usize) {
        self.notifieds.push(region_base);
    }

    fn pop_usable(&self) -> Option<usize> {
        self.state.lock().unwrap().usables.pop()
    }

    /// Hand a region to the central pool, e.g. when a retiring context
    /// transfers its remaining usable regions back.
    pub fn push_usable(&self, base: usize) {
        self.state.lock().unwrap().usables.push(base);
    }

    fn pop_disposable(&self) -> Option<usize> {
        self.state.lock().unwrap().disposables.pop()
    }

    fn push_disposable(&self, base: usize) {
        self.state.lock().unwrap().disposables.push(base);
    }
}

/// Per-context, per-layout pool state, duplicated for private and shared use
pub struct LocalLayoutPool {
    active_region: Mutex<Option<usize>>,
    usables: Mutex<Vec<usize>>,
    notifieds: SegQueue<usize>,
}

impl Default for LocalLayoutPool {
    fn default() -> Self {
        LocalLayoutPool {
            active_region: Mutex::new(None),
            usables: Mutex::new(Vec::new()),
            notifieds: SegQueue::new(),
        }
    }
}

impl LocalLayoutPool {
    /// Push a region onto this pool's lock-free notifieds stack
    pub fn notify(&self, region_base: usize) {
        self.notifieds.push(region_base);
    }

    /// Pop one region out of `usables`, if any. Used when retiring a context
    /// to drain its remaining usable regions back to the central pool.
    pub fn take_usable(&self) -> Option<usize> {
        self.usables.lock().unwrap().pop()
    }

    /// Drain the notifieds stack into `usables`, scavenging each region's
    /// notified bits as it goes. Returns how many regions were drained.
    pub fn scavenge(&self, directory: &RegionDirectory) -> usize {
        let mut moved = 0;
        while let Some(base) = self.notifieds.pop() {
            if let Some(header) = directory.get(base) {
                header.scavenge();
            }
            self.usables.lock().unwrap().push(base);
            moved += 1;
        }
        moved
    }
}

/// One context's pool state for a single arena kind (managed or unmanaged):
/// `privateds[L]` and `shareds[L]` per layout, plus a shared disposables list.
pub struct ObjectLocalContext {
    privateds: Vec<LocalLayoutPool>,
    shareds: Vec<LocalLayoutPool>,
    disposables: Vec<Mutex<Vec<usize>>>,
}

impl ObjectLocalContext {
    /// Build a context with one pool per known layout id
    pub fn new() -> Self {
        let n = OBJECT_LAYOUTS.len();
        ObjectLocalContext {
            privateds: (0..n).map(|_| LocalLayoutPool::default()).collect(),
            shareds: (0..n).map(|_| LocalLayoutPool::default()).collect(),
            disposables: (0..n).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    fn pools(&self, shared: bool) -> &[LocalLayoutPool] {
        if shared {
            &self.shareds
        } else {
            &self.privateds
        }
    }
}

impl Default for ObjectLocalContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything needed to run the allocate/free/scavenge/clean protocols for
/// one layout: the layout's full mask, its central pool, the requesting
/// context's local pool, and the shared region directory.
pub struct LayoutEngine<'a> {
    pub layout_id: LayoutId,
    pub full_mask: u64,
    pub central: &'a CentralLayoutPool,
    pub local: &'a LocalLayoutPool,
    pub directory: &'a RegionDirectory,
}

/// Result of a successful allocation: the region base and the acquired slot
pub struct Acquired {
    /// Base address of the region the slot was drawn from
    pub region_base: usize,
    /// Index of the acquired slot within the region
    pub slot: u8,
}

impl<'a> LayoutEngine<'a> {
    /// Allocate protocol (§4.5): fast path on the active region, else
    /// usables, else scavenge notifieds into usables, else disposables,
    /// else the caller must request a fresh region and call
    /// [`Self::register_fresh_region`].
    pub fn allocate(&self) -> Option<Acquired> {
        if let Some(acquired) = self.try_active_region() {
            return Some(acquired);
        }
        loop {
            let candidate = self.local.usables.lock().unwrap().pop();
            let candidate = match candidate {
                Some(c) => c,
                None => {
                    if self.local.scavenge(self.directory) > 0 {
                        continue;
                    }
                    match self.central.pop_usable() {
                        Some(c) => c,
                        None => return None,
                    }
                }
            };

            let header = match self.directory.get(candidate) {
                Some(h) => h,
                None => continue,
            };

            let still_has_usables = !self.local.usables.lock().unwrap().is_empty();
            if header.is_disposable(self.full_mask) && still_has_usables {
                // candidate is already fully free and another usable region
                // exists; leave it for `clean` to move to disposables rather
                // than handing out a slot from a region about to be released.
                continue;
            }

            if let Some(slot) = header.acquire_object() {
                *self.local.active_region.lock().unwrap() = Some(candidate);
                return Some(Acquired {
                    region_base: candidate,
                    slot,
                });
            }
        }
    }

    fn try_active_region(&self) -> Option<Acquired> {
        let active = *self.local.active_region.lock().unwrap();
        let base = active?;
        let header = self.directory.get(base)?;
        let slot = header.acquire_object()?;
        Some(Acquired {
            region_base: base,
            slot,
        })
    }

    /// Register a freshly-allocated region as this context's new active region
    pub fn register_fresh_region(&self, base: usize) {
        *self.local.active_region.lock().unwrap() = Some(base);
    }

    /// Free protocol (§4.5) for a slot already decoded into `(region_base, slot)`.
    /// `owner` is the calling context's identity (0 for central contexts).
    pub fn free(&self, region_base: usize, slot: u8, owner: usize) -> Result<(), AllocError> {
        let header = self
            .directory
            .get(region_base)
            .ok_or(AllocError::FreeOutOfBound {
                address: region_base,
            })?;

        if header.is_slot_free(slot) {
            return Err(AllocError::DoubleFree {
                address: region_base,
            });
        }

        let region_owner = header.owner.load(Ordering::Acquire);
        if region_owner == owner {
            let was_empty = header.availables.load(Ordering::Acquire) == 0;
            header.release_local(slot);
            if was_empty {
                self.local.usables.lock().unwrap().push(region_base);
            }
            return Ok(());
        }

        let first_notification = header.notify_available(slot);
        if region_owner == 0 {
            if first_notification {
                self.central.notify(region_base);
            }
            return Ok(());
        }

        if first_notification {
            self.local.notify(region_base);
            if self.notifieds_len_estimate() > NOTIFIED_RECOVERY_THRESHOLD {
                tracing::warn!(
                    region = region_base,
                    "notifieds depth past recovery threshold, scheduling owner recovery"
                );
            }
        }
        Ok(())
    }

    fn notifieds_len_estimate(&self) -> usize {
        self.local.notifieds.len()
    }

    /// Clean (`PerformCleanup`, §4.5): scavenge, then move every disposable
    /// region out of `usables` into the caller-provided disposables sink.
    pub fn clean(&self, disposables_out: &mut Vec<usize>) {
        self.local.scavenge(self.directory);
        let mut usables = self.local.usables.lock().unwrap();
        let mut i = 0;
        while i < usables.len() {
            let base = usables[i];
            let disposable = self
                .directory
                .get(base)
                .map(|h| h.is_disposable(self.full_mask))
                .unwrap_or(false);
            if disposable {
                usables.swap_remove(i);
                disposables_out.push(base);
            } else {
                i += 1;
            }
        }
    }
}

/// Decode a freed address into `(region_base, slot)`, given the region size
pub fn decode_address(address: usize, region_size: usize, head_size: usize, object_size: usize) -> (usize, u8) {
    let base = address & !(region_size - 1);
    let offset = address - base - head_size;
    (base, (offset / object_size) as u8)
}

/// Look up the local pool (private or shared half) of `ctx` for `layout_id`
pub fn local_pool(ctx: &ObjectLocalContext, layout_id: LayoutId, shared: bool) -> &LocalLayoutPool {
    &ctx.pools(shared)[layout_id.0 as usize]
}

/// Push a region directly onto a context's per-layout disposables list
pub fn push_disposable(ctx: &ObjectLocalContext, layout_id: LayoutId, base: usize) {
    ctx.disposables[layout_id.0 as usize].lock().unwrap().push(base);
}

/// Pop a region from a context's per-layout disposables list
pub fn pop_disposable(ctx: &ObjectLocalContext, layout_id: LayoutId) -> Option<usize> {
    ctx.disposables[layout_id.0 as usize].lock().unwrap().pop()
}

/// All central pools, one per layout id
pub struct CentralPools {
    pools: Vec<CentralLayoutPool>,
}

impl CentralPools {
    /// Build one central pool per known layout id
    pub fn new() -> Self {
        CentralPools {
            pools: (0..OBJECT_LAYOUTS.len()).map(|_| CentralLayoutPool::new()).collect(),
        }
    }

    /// Borrow the central pool for a layout id
    pub fn get(&self, layout_id: LayoutId) -> &CentralLayoutPool {
        &self.pools[layout_id.0 as usize]
    }
}

impl Default for CentralPools {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_alloc::DescriptorAllocator;
    use crate::types::OBJECT_LAYOUTS;

    fn fresh_region(alloc: &DescriptorAllocator, directory: &RegionDirectory, layout_id: LayoutId, base: usize, owner: usize) {
        let layout = &OBJECT_LAYOUTS[layout_id.0 as usize];
        let header = DescriptorArc::new(alloc, ObjectRegionHeader::new(base, layout_id, layout, owner, owner != 0));
        directory.insert(base, header);
    }

    #[test]
    fn private_allocate_then_free_round_trips_via_usables() {
        let alloc = DescriptorAllocator::new();
        let directory = RegionDirectory::new();
        let central = CentralLayoutPool::new();
        let local = LocalLayoutPool::default();
        let layout_id = LayoutId(0);
        let full_mask = OBJECT_LAYOUTS[0].full_mask();

        fresh_region(&alloc, &directory, layout_id, 0x10000, 1);
        let engine = LayoutEngine {
            layout_id,
            full_mask,
            central: &central,
            local: &local,
            directory: &directory,
        };
        engine.register_fresh_region(0x10000);

        let a = engine.allocate().expect("first slot");
        engine.free(a.region_base, a.slot, 1).expect("free owned slot");
    }

    #[test]
    fn double_free_is_rejected() {
        let alloc = DescriptorAllocator::new();
        let directory = RegionDirectory::new();
        let central = CentralLayoutPool::new();
        let local = LocalLayoutPool::default();
        let layout_id = LayoutId(0);
        let full_mask = OBJECT_LAYOUTS[0].full_mask();
        fresh_region(&alloc, &directory, layout_id, 0x20000, 1);

        let engine = LayoutEngine {
            layout_id,
            full_mask,
            central: &central,
            local: &local,
            directory: &directory,
        };
        engine.register_fresh_region(0x20000);
        let a = engine.allocate().unwrap();
        engine.free(a.region_base, a.slot, 1).unwrap();
        let err = engine.free(a.region_base, a.slot, 1);
        assert!(matches!(err, Err(AllocError::DoubleFree { .. })));
    }

    #[test]
    fn foreign_free_notifies_owner_without_mutating_availables() {
        let alloc = DescriptorAllocator::new();
        let directory = RegionDirectory::new();
        let central = CentralLayoutPool::new();
        let local = LocalLayoutPool::default();
        let layout_id = LayoutId(0);
        let full_mask = OBJECT_LAYOUTS[0].full_mask();
        fresh_region(&alloc, &directory, layout_id, 0x30000, 1);

        let engine = LayoutEngine {
            layout_id,
            full_mask,
            central: &central,
            local: &local,
            directory: &directory,
        };
        engine.register_fresh_region(0x30000);
        let a = engine.allocate().unwrap();

        // a foreign context (id 2) frees the slot that context 1 owns
        engine.free(a.region_base, a.slot, 2).unwrap();

        let header = directory.get(0x30000).unwrap();
        assert!(header.is_slot_free(a.slot));
        assert_eq!(header.availables.load(Ordering::Relaxed) & (1u64 << a.slot), 0);

        let moved = local.scavenge(&directory);
        assert_eq!(moved, 1);
        assert_ne!(header.availables.load(Ordering::Relaxed) & (1u64 << a.slot), 0);
    }

    #[test]
    fn clean_moves_fully_free_regions_to_disposables() {
        let alloc = DescriptorAllocator::new();
        let directory = RegionDirectory::new();
        let central = CentralLayoutPool::new();
        let local = LocalLayoutPool::default();
        let layout_id = LayoutId(0);
        let full_mask = OBJECT_LAYOUTS[0].full_mask();
        fresh_region(&alloc, &directory, layout_id, 0x40000, 1);

        let engine = LayoutEngine {
            layout_id,
            full_mask,
            central: &central,
            local: &local,
            directory: &directory,
        };
        engine.register_fresh_region(0x40000);
        let a = engine.allocate().unwrap();
        engine.free(a.region_base, a.slot, 1).unwrap();

        let mut disposables = Vec::new();
        engine.clean(&mut disposables);
        assert_eq!(disposables, vec![0x40000]);
    }
}
