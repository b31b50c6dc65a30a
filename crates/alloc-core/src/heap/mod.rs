//! Heap controller: the singleton that ties every layer together
//!
//! Owns the region space, the descriptor allocator, the central pools, the
//! registry of live contexts, the starvation-rescue condition variable, the
//! cleanup worker thread, and the reference-tracker registry. This is the
//! module the public API (`malloc`/`free`/...) calls into.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use dashmap::DashMap;

use crate::core::AllocatorConfig;
use crate::descriptor_alloc::{DescriptorAllocator, DescriptorArc};
use crate::object_region::ObjectRegionHeader;
use crate::pool::{self, CentralPools, LayoutEngine, ObjectLocalContext, RegionDirectory};
use crate::region_space::{NoRescue, RegionSpace, StarvationConsumer};
use crate::types::{layout_for_size, AllocError, HeapIssue, LayoutId, OBJECT_LAYOUTS};

const NOT_SCHEDULED: usize = usize::MAX;

/// Per-thread allocation state: one [`ObjectLocalContext`] for unmanaged
/// arenas and one for managed arenas, per the data model.
pub struct MemoryContext {
    id: usize,
    pub(crate) unmanaged: ObjectLocalContext,
    pub(crate) managed: ObjectLocalContext,
    /// Sentinel-guarded recovery scheduling: `NOT_SCHEDULED` unless queued
    next_recovered: AtomicUsize,
    retired: AtomicBool,
}

impl MemoryContext {
    fn new(id: usize) -> Arc<Self> {
        Arc::new(MemoryContext {
            id,
            unmanaged: ObjectLocalContext::new(),
            managed: ObjectLocalContext::new(),
            next_recovered: AtomicUsize::new(NOT_SCHEDULED),
            retired: AtomicBool::new(false),
        })
    }

    /// Opaque context identifier, stable for the context's lifetime
    pub fn id(&self) -> usize {
        self.id
    }
}

/// One registered reachability-tracking slot
pub struct TrackerEntry {
    /// Caller-chosen identifier for this tracker (e.g. a thread or session id)
    pub owner: usize,
}

struct StarvationToken {
    lock: Mutex<bool>,
    cv: Condvar,
}

/// The singleton heap controller
pub struct HeapDescriptor {
    pub(crate) region_space: RegionSpace,
    /// Backs every [`ObjectRegionHeader`] handed out by [`Self::request_fresh_region`]
    /// and the huge-allocation path, per the component design's rule that
    /// region descriptors come from this allocator's slabs, not the global heap.
    descriptor_alloc: DescriptorAllocator,
    pub(crate) directory: RegionDirectory,
    central: CentralPools,

    /// All contexts ever acquired, keyed by id, so a foreign free can find
    /// the *owning* context's local pool rather than the freeing thread's.
    contexts: DashMap<usize, Arc<MemoryContext>>,
    released_contexts: Mutex<Vec<Arc<MemoryContext>>>,
    next_context_id: AtomicUsize,

    starvation_waiters: Mutex<Vec<Arc<StarvationToken>>>,
    recovery_queue: Mutex<Vec<Arc<MemoryContext>>>,
    worker_signal: Mutex<bool>,
    worker_cv: Condvar,
    worker_shutdown: AtomicBool,
    worker_handle: Mutex<Option<JoinHandle<()>>>,

    trackers: Mutex<Vec<Option<TrackerEntry>>>,
    max_reference_trackers: usize,

    issue_callbacks: Mutex<Vec<Box<dyn Fn(&HeapIssue) + Send + Sync>>>,
    mark_sweep_running: Mutex<()>,
}

impl HeapDescriptor {
    /// Build a heap controller from configuration and start its cleanup worker
    pub fn new(config: &AllocatorConfig) -> Arc<Self> {
        let heap = Arc::new(HeapDescriptor {
            region_space: RegionSpace::new(
                config.region_space.max_usable_physical_bytes,
                config.region_space.region_cache_max_depth,
            ),
            descriptor_alloc: DescriptorAllocator::new(),
            directory: RegionDirectory::new(),
            central: CentralPools::new(),
            contexts: DashMap::new(),
            released_contexts: Mutex::new(Vec::new()),
            next_context_id: AtomicUsize::new(1),
            starvation_waiters: Mutex::new(Vec::new()),
            recovery_queue: Mutex::new(Vec::new()),
            worker_signal: Mutex::new(false),
            worker_cv: Condvar::new(),
            worker_shutdown: AtomicBool::new(false),
            worker_handle: Mutex::new(None),
            trackers: Mutex::new((0..config.heap.max_reference_trackers).map(|_| None).collect()),
            max_reference_trackers: config.heap.max_reference_trackers,
            issue_callbacks: Mutex::new(Vec::new()),
            mark_sweep_running: Mutex::new(()),
        });

        let worker_heap = heap.clone();
        let handle = std::thread::Builder::new()
            .name("insmalloc-cleanup".into())
            .spawn(move || worker_heap.worker_loop())
            .expect("failed to spawn cleanup worker thread");
        *heap.worker_handle.lock().unwrap() = Some(handle);
        heap
    }

    /// Register a callback invoked for every recoverable [`AllocError`]
    pub fn register_issue_callback(&self, callback: Box<dyn Fn(&HeapIssue) + Send + Sync>) {
        self.issue_callbacks.lock().unwrap().push(callback);
    }

    fn notify_issue(&self, error: AllocError) {
        if !error.is_recoverable() {
            tracing::error!(?error, "fatal allocator error");
            return;
        }
        tracing::warn!(?error, "recoverable allocator issue");
        let issue = HeapIssue::new(error);
        for cb in self.issue_callbacks.lock().unwrap().iter() {
            cb(&issue);
        }
    }

    /// `AcquireContext`: reuse a released context if one exists, else allocate fresh
    pub fn acquire_context(&self) -> Arc<MemoryContext> {
        if let Some(ctx) = self.released_contexts.lock().unwrap().pop() {
            ctx.retired.store(false, Ordering::Release);
            return ctx;
        }
        let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
        let ctx = MemoryContext::new(id);
        self.contexts.insert(id, ctx.clone());
        ctx
    }

    /// `DisposeContext`: mark a context available for reuse. Its region
    /// lists remain populated until another thread claims it, except that
    /// usable regions are transferred to the central pool first so they
    /// remain reachable by other contexts in the meantime (§9, cyclic
    /// ownership: the context's lists, not destruction order, govern this).
    pub fn dispose_context(&self, ctx: Arc<MemoryContext>) {
        self.transfer_usables_to_central(&ctx);
        ctx.retired.store(true, Ordering::Release);
        self.released_contexts.lock().unwrap().push(ctx);
    }

    fn transfer_usables_to_central(&self, ctx: &Arc<MemoryContext>) {
        for local in [&ctx.unmanaged, &ctx.managed] {
            for (i, layout) in OBJECT_LAYOUTS.iter().enumerate() {
                if layout.object_size == 0 {
                    continue;
                }
                let layout_id = LayoutId(i as u16);
                for shared in [false, true] {
                    let pool = pool::local_pool(local, layout_id, shared);
                    pool.scavenge(&self.directory);
                    while let Some(base) = pool.take_usable() {
                        if let Some(header) = self.directory.get(base) {
                            header.owner.store(0, Ordering::Release);
                        }
                        self.central.get(layout_id).push_usable(base);
                    }
                }
            }
        }
    }

    /// `ScheduleContextRecovery`: idempotently enqueue a context for cleanup
    pub fn schedule_context_recovery(&self, ctx: &Arc<MemoryContext>) {
        if ctx
            .next_recovered
            .compare_exchange(NOT_SCHEDULED, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.recovery_queue.lock().unwrap().push(ctx.clone());
            self.wake_worker();
        }
    }

    fn wake_worker(&self) {
        *self.worker_signal.lock().unwrap() = true;
        self.worker_cv.notify_all();
    }

    /// `RescueStarvedConsumer`: enqueue a token, wake the worker, and block
    /// until a global cleanup pass has run and released this waiter.
    fn rescue_starving_situation(&self, needed: usize) {
        tracing::warn!(needed, "starvation rescue triggered");
        let token = Arc::new(StarvationToken {
            lock: Mutex::new(false),
            cv: Condvar::new(),
        });
        self.starvation_waiters.lock().unwrap().push(token.clone());
        self.wake_worker();

        let mut done = token.lock.lock().unwrap();
        while !*done {
            done = token.cv.wait(done).unwrap();
        }
    }

    fn worker_loop(&self) {
        loop {
            {
                let mut signal = self.worker_signal.lock().unwrap();
                while !*signal && !self.worker_shutdown.load(Ordering::Acquire) {
                    signal = self.worker_cv.wait(signal).unwrap();
                }
                *signal = false;
            }
            if self.worker_shutdown.load(Ordering::Acquire) {
                return;
            }

            let recovering: Vec<Arc<MemoryContext>> =
                std::mem::take(&mut *self.recovery_queue.lock().unwrap());
            for ctx in &recovering {
                self.perform_cleanup_context(ctx);
                ctx.next_recovered.store(NOT_SCHEDULED, Ordering::Release);
            }

            let waiters: Vec<Arc<StarvationToken>> =
                std::mem::take(&mut *self.starvation_waiters.lock().unwrap());
            if !waiters.is_empty() {
                self.perform_global_cleanup();
                for token in waiters {
                    *token.lock.lock().unwrap() = true;
                    token.cv.notify_all();
                }
            }
        }
    }

    /// Shut down the cleanup worker. No allocator calls may occur afterwards.
    pub fn shutdown(&self) {
        self.worker_shutdown.store(true, Ordering::Release);
        self.worker_cv.notify_all();
        if let Some(handle) = self.worker_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn layout_engine<'a>(&'a self, local: &'a ObjectLocalContext, layout_id: LayoutId, shared: bool) -> LayoutEngine<'a> {
        LayoutEngine {
            layout_id,
            full_mask: OBJECT_LAYOUTS[layout_id.0 as usize].full_mask(),
            central: self.central.get(layout_id),
            local: pool::local_pool(local, layout_id, shared),
            directory: &self.directory,
        }
    }

    fn request_fresh_region(&self, layout_id: LayoutId, owner: usize, privated: bool) -> Result<usize, AllocError> {
        let layout = &OBJECT_LAYOUTS[layout_id.0 as usize];
        let addr = self
            .region_space
            .allocate_region(layout.region_size_l2, layout.region_sizing_id, self)?;
        self.region_space.tag_as_layout(addr, layout.region_size_l2, layout_id.0 as u8);
        let header = DescriptorArc::new(
            &self.descriptor_alloc,
            ObjectRegionHeader::new(addr, layout_id, layout, owner, privated),
        );
        self.directory.insert(addr, header);
        Ok(addr)
    }

    /// Allocate `size` bytes on behalf of `ctx`, using the unmanaged arena kind
    pub fn allocate(&self, ctx: &Arc<MemoryContext>, size: usize, shared: bool) -> Result<usize, AllocError> {
        let layout_id = layout_for_size(size);
        let layout = &OBJECT_LAYOUTS[layout_id.0 as usize];

        if layout.object_size == 0 {
            // huge policy: one slot per region, sized to the request
            let needed = (size + crate::constants::OBJECT_REGION_HEAD_SIZE).next_power_of_two();
            let region_size_l2 = needed.trailing_zeros().max(crate::constants::PAGE_SIZE_L2);
            let addr = self
                .region_space
                .allocate_region(region_size_l2, 3, self)?;
            self.region_space.tag_as_layout(addr, region_size_l2, layout_id.0 as u8);
            let huge_layout = crate::types::ObjectLayoutInfo {
                object_size: size,
                region_objects: 1,
                region_size_l2,
                region_sizing_id: 3,
                policy: crate::types::LayoutPolicy::Large,
                object_multiplier: size,
                object_divisor_recip: 0,
                retention: layout.retention,
            };
            let header = DescriptorArc::new(
                &self.descriptor_alloc,
                ObjectRegionHeader::new(addr, layout_id, &huge_layout, ctx.id(), !shared),
            );
            self.directory.insert(addr, header);
            return Ok(addr + crate::constants::OBJECT_REGION_HEAD_SIZE);
        }

        let local = if shared { &ctx.managed } else { &ctx.unmanaged };
        let engine = self.layout_engine(local, layout_id, shared);

        if let Some(acquired) = engine.allocate() {
            return Ok(acquired.region_base
                + crate::constants::OBJECT_REGION_HEAD_SIZE
                + acquired.slot as usize * layout.object_size);
        }

        let fresh = self.request_fresh_region(layout_id, ctx.id(), !shared)?;
        engine.register_fresh_region(fresh);
        let acquired = engine.allocate().ok_or(AllocError::MissingMemory { requested: size })?;
        Ok(acquired.region_base
            + crate::constants::OBJECT_REGION_HEAD_SIZE
            + acquired.slot as usize * layout.object_size)
    }

    /// Free an address previously returned by [`Self::allocate`]
    pub fn free(&self, ctx: &Arc<MemoryContext>, address: usize) -> Result<(), AllocError> {
        let arena_segmentation = self
            .region_space
            .segmentation_of(address)
            .ok_or(AllocError::FreeOutOfBound { address })?;
        let region_size = 1usize << arena_segmentation;
        let region_base = address & !(region_size - 1);

        let header = self
            .directory
            .get(region_base)
            .ok_or(AllocError::FreeInexisting { address })?;

        let layout = &OBJECT_LAYOUTS[header.layout_id.0 as usize];
        if layout.object_size == 0 {
            // huge: single slot, free unconditionally and release the region
            self.directory.remove(region_base);
            self.region_space.release_region(region_base, arena_segmentation, 3);
            return Ok(());
        }

        let offset = address - region_base - crate::constants::OBJECT_REGION_HEAD_SIZE;
        let slot = layout.slot_index_for_offset(offset) as u8;

        let shared = !header.privated;
        let region_owner = header.owner.load(Ordering::Acquire);

        // A foreign free must land on the *owning* context's notifieds
        // stack, not the calling thread's: look the owner up by id rather
        // than assuming `ctx` is the region's owner. Centrally-owned
        // regions (owner id 0) never touch a local pool on this path, so
        // falling back to the caller's own context there is harmless.
        let owner_ctx;
        let local = if region_owner == 0 || region_owner == ctx.id() {
            if shared { &ctx.managed } else { &ctx.unmanaged }
        } else {
            owner_ctx = self.contexts.get(&region_owner).map(|e| e.value().clone());
            match &owner_ctx {
                Some(owner) => {
                    if shared { &owner.managed } else { &owner.unmanaged }
                }
                None => {
                    tracing::error!(region = region_base, region_owner, "foreign free: owning context not found");
                    if shared { &ctx.managed } else { &ctx.unmanaged }
                }
            }
        };
        let engine = self.layout_engine(local, header.layout_id, shared);

        let result = engine.free(region_base, slot, ctx.id());
        if let Err(e) = &result {
            self.notify_issue(e.clone());
            if matches!(e, AllocError::DoubleFree { .. }) {
                return Ok(());
            }
        }
        result
    }

    /// Usable capacity in bytes of the slot backing a previously-allocated
    /// address, or `None` if `address` does not map to a live object region.
    /// Matches the slot's actual capacity, which is generally `>= ` whatever
    /// size was originally requested (huge regions round up to a power of two).
    pub fn object_capacity(&self, address: usize) -> Option<usize> {
        let arena_segmentation = self.region_space.segmentation_of(address)?;
        let region_size = 1usize << arena_segmentation;
        let region_base = address & !(region_size - 1);
        let header = self.directory.get(region_base)?;
        let layout = &OBJECT_LAYOUTS[header.layout_id.0 as usize];
        if layout.object_size == 0 {
            Some(header.width - crate::constants::OBJECT_REGION_HEAD_SIZE)
        } else {
            Some(layout.object_size)
        }
    }

    /// Whether every slot in the region backing `address` is currently
    /// free, i.e. `availables == full_mask` for that region's layout. `None`
    /// if `address` does not map to a live non-huge object region. Diagnostic
    /// hook for tests that assert full reclamation after a scavenge.
    pub fn region_is_fully_available(&self, address: usize) -> Option<bool> {
        let arena_segmentation = self.region_space.segmentation_of(address)?;
        let region_size = 1usize << arena_segmentation;
        let region_base = address & !(region_size - 1);
        let header = self.directory.get(region_base)?;
        let layout = &OBJECT_LAYOUTS[header.layout_id.0 as usize];
        if layout.object_size == 0 {
            return None;
        }
        Some(header.availables.load(Ordering::Acquire) == layout.full_mask())
    }

    /// Committed physical bytes currently attributed to the region space,
    /// for diagnostics and the starvation scenario (`usedPhysicalBytes`).
    pub fn used_physical_bytes(&self) -> u64 {
        self.region_space.used_physical_bytes()
    }

    /// Configured ceiling `used_physical_bytes` is checked against before
    /// committing a new region (`maxUsablePhysicalBytes`).
    pub fn max_usable_physical_bytes(&self) -> u64 {
        self.region_space.max_usable_physical_bytes()
    }

    /// Number of live contexts currently registered, for diagnostics.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Scavenge protocol (§4.5) scoped to one context: drain every layout's
    /// notifieds stack into `usables`, clearing each drained region's
    /// `notified_availables` into `availables`. Unlike
    /// [`Self::perform_cleanup_context`] this never disposes a region, even
    /// one that scavenges out fully free.
    pub fn scavenge_context(&self, ctx: &Arc<MemoryContext>) {
        for local in [&ctx.unmanaged, &ctx.managed] {
            for (i, layout) in OBJECT_LAYOUTS.iter().enumerate() {
                if layout.object_size == 0 {
                    continue;
                }
                let layout_id = LayoutId(i as u16);
                for shared in [false, true] {
                    let engine = self.layout_engine(local, layout_id, shared);
                    engine.local.scavenge(engine.directory);
                }
            }
        }
    }

    /// `PerformCleanup` scoped to one context across both arena kinds and every layout
    pub fn perform_cleanup_context(&self, ctx: &Arc<MemoryContext>) {
        for local in [&ctx.unmanaged, &ctx.managed] {
            for (i, layout) in OBJECT_LAYOUTS.iter().enumerate() {
                if layout.object_size == 0 {
                    continue;
                }
                let layout_id = LayoutId(i as u16);
                for shared in [false, true] {
                    let engine = self.layout_engine(local, layout_id, shared);
                    let mut disposables = Vec::new();
                    engine.clean(&mut disposables);
                    for base in disposables {
                        self.directory.remove(base);
                        self.region_space
                            .dispose_region(base, layout.region_size_l2, layout.region_sizing_id);
                    }
                }
            }
        }
    }

    /// Global cleanup across every registered context, used by starvation rescue
    pub fn perform_global_cleanup(&self) {
        let contexts: Vec<Arc<MemoryContext>> = self.contexts.iter().map(|e| e.value().clone()).collect();
        for ctx in &contexts {
            self.perform_cleanup_context(ctx);
        }
    }

    /// Register a reachability tracker, returning its slot id if capacity remains
    pub fn register_tracker(&self, owner: usize) -> Option<usize> {
        let mut trackers = self.trackers.lock().unwrap();
        let slot = trackers.iter().position(|t| t.is_none())?;
        trackers[slot] = Some(TrackerEntry { owner });
        Some(slot)
    }

    /// Unregister a previously-registered tracker
    pub fn unregister_tracker(&self, slot: usize) {
        if slot < self.max_reference_trackers {
            self.trackers.lock().unwrap()[slot] = None;
        }
    }

    /// Run a mark-and-sweep reachability pass. `is_alive(region_base, slot)`
    /// is the collaborator-supplied traversal oracle (§6): slots it reports
    /// dead have their bit OR-released into `notified_availables`, which
    /// drives the normal notification path rather than mutating `availables`
    /// directly, so concurrent mutators are unaffected.
    pub fn run_mark_and_sweep(&self, is_alive: impl Fn(usize, u8) -> bool) {
        let _guard = self.mark_sweep_running.lock().unwrap();
        self.region_space.for_each_object_region(|region_base, _segmentation| {
            let Some(header) = self.directory.get(region_base) else {
                return;
            };
            let layout = &OBJECT_LAYOUTS[header.layout_id.0 as usize];
            if layout.object_size == 0 {
                return;
            }
            let available = header.availables.load(Ordering::Acquire);
            let notified = header.notified_availables.load(Ordering::Acquire);
            let live_mask = !(available | notified) & layout.full_mask();
            for slot in 0..layout.region_objects {
                if live_mask & (1u64 << slot) != 0 && !is_alive(region_base, slot) {
                    header.notify_available(slot);
                }
            }
        });
    }
}

impl StarvationConsumer for HeapDescriptor {
    fn rescue_starving_situation(&self, needed: usize) {
        HeapDescriptor::rescue_starving_situation(self, needed)
    }
}

impl Drop for HeapDescriptor {
    fn drop(&mut self) {
        self.worker_shutdown.store(true, Ordering::Release);
        self.worker_cv.notify_all();
        if let Some(handle) = self.worker_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// A no-op consumer used where a [`StarvationConsumer`] is required but the
/// caller wants budget exhaustion to fail immediately (tests, huge one-shot
/// allocations that should not trigger a full cleanup pass).
pub fn no_rescue() -> NoRescue {
    NoRescue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heap() -> Arc<HeapDescriptor> {
        HeapDescriptor::new(&AllocatorConfig::default())
    }

    #[test]
    fn allocate_then_free_small_object_round_trips() {
        let heap = test_heap();
        let ctx = heap.acquire_context();
        let p = heap.allocate(&ctx, 40, false).expect("allocate");
        heap.free(&ctx, p).expect("free");
        heap.shutdown();
    }

    #[test]
    fn two_allocations_then_two_frees_reuse_a_region() {
        let heap = test_heap();
        let ctx = heap.acquire_context();
        let p = heap.allocate(&ctx, 40, false).unwrap();
        let q = heap.allocate(&ctx, 40, false).unwrap();
        heap.free(&ctx, p).unwrap();
        heap.free(&ctx, q).unwrap();
        let r = heap.allocate(&ctx, 40, false).unwrap();
        let region_size = 1usize << OBJECT_LAYOUTS[layout_for_size(40).0 as usize].region_size_l2;
        assert_eq!(p & !(region_size - 1), r & !(region_size - 1));
        heap.shutdown();
    }

    #[test]
    fn object_capacity_covers_small_and_huge_allocations() {
        let heap = test_heap();
        let ctx = heap.acquire_context();
        let p = heap.allocate(&ctx, 40, false).unwrap();
        assert!(heap.object_capacity(p).unwrap() >= 40);

        let q = heap.allocate(&ctx, 1_048_576, false).unwrap();
        assert!(heap.object_capacity(q).unwrap() >= 1_048_576);
        heap.shutdown();
    }

    #[test]
    fn huge_allocation_round_trips_and_releases_physical_bytes() {
        let heap = test_heap();
        let ctx = heap.acquire_context();
        let before = heap.region_space.used_physical_bytes();
        let p = heap.allocate(&ctx, 1_048_576, false).expect("huge allocate");
        assert!(heap.region_space.used_physical_bytes() > before);
        heap.free(&ctx, p).expect("free huge");
        heap.perform_cleanup_context(&ctx);
        assert_eq!(heap.region_space.used_physical_bytes(), before);
        heap.shutdown();
    }

    #[test]
    fn double_free_does_not_corrupt_state_and_is_reported() {
        let heap = test_heap();
        let ctx = heap.acquire_context();
        let p = heap.allocate(&ctx, 40, false).unwrap();
        heap.free(&ctx, p).unwrap();
        heap.free(&ctx, p).expect("double free is swallowed, not propagated");
        heap.shutdown();
    }

    #[test]
    fn reference_tracker_registry_respects_capacity() {
        let mut cfg = AllocatorConfig::default();
        cfg.heap.max_reference_trackers = 2;
        let heap = HeapDescriptor::new(&cfg);
        let a = heap.register_tracker(1).expect("first");
        let _b = heap.register_tracker(2).expect("second");
        assert!(heap.register_tracker(3).is_none(), "capacity exhausted");
        heap.unregister_tracker(a);
        assert!(heap.register_tracker(4).is_some());
        heap.shutdown();
    }

    #[test]
    fn foreign_free_notifies_the_owning_context_not_the_caller() {
        let heap = test_heap();
        let owner = heap.acquire_context();
        let caller = heap.acquire_context();
        assert_ne!(owner.id(), caller.id());

        let p = heap.allocate(&owner, 40, false).unwrap();
        heap.free(&caller, p).expect("foreign free");

        // The freed slot must not be visible to the caller's context, since
        // it was never `owner`'s; perform_cleanup_context on the caller must
        // not find anything to reclaim, while cleaning the owner recovers it.
        heap.perform_cleanup_context(&caller);
        let region_size = 1usize << OBJECT_LAYOUTS[layout_for_size(40).0 as usize].region_size_l2;
        heap.perform_cleanup_context(&owner);
        let q = heap.allocate(&owner, 40, false).unwrap();
        assert_eq!(p & !(region_size - 1), q & !(region_size - 1));
        heap.shutdown();
    }

    #[test]
    fn mark_and_sweep_reclaims_slots_the_oracle_reports_dead() {
        let heap = test_heap();
        let ctx = heap.acquire_context();
        let p = heap.allocate(&ctx, 40, false).unwrap();
        heap.run_mark_and_sweep(|_region, _slot| false);
        heap.perform_cleanup_context(&ctx);
        let q = heap.allocate(&ctx, 40, false).unwrap();
        let region_size = 1usize << OBJECT_LAYOUTS[layout_for_size(40).0 as usize].region_size_l2;
        assert_eq!(p & !(region_size - 1), q & !(region_size - 1));
        heap.shutdown();
    }
}
