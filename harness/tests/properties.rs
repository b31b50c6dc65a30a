//! Property tests for the universally-quantified invariants over random
//! malloc/free sequences, run against isolated `HeapDescriptor` instances so
//! they never interact with the process-wide `insmalloc` singleton or with
//! each other under `proptest`'s parallel shrinking.

use std::thread;

use alloc_core::core::config::RegionSpaceConfig;
use alloc_core::types::{layout_for_size, OBJECT_LAYOUTS};
use alloc_core::{AllocatorConfig, HeapDescriptor};
use proptest::prelude::*;

fn isolated_heap() -> std::sync::Arc<HeapDescriptor> {
    let mut config = AllocatorConfig::default();
    config.region_space = RegionSpaceConfig {
        max_usable_physical_bytes: alloc_core::constants::DEFAULT_MAX_USABLE_PHYSICAL_BYTES,
        ..RegionSpaceConfig::default()
    };
    HeapDescriptor::new(&config)
}

proptest! {
    /// Invariant 4: any sequence of malloc/free pairs of one layout, all
    /// issued by a single thread, restores every touched region's
    /// `availables` to the layout's full mask once every object is freed.
    #[test]
    fn round_trip_restores_full_mask(
        object_size in 1usize..=512,
        free_order_seed in any::<u64>(),
        count in 1usize..40,
    ) {
        let heap = isolated_heap();
        let ctx = heap.acquire_context();

        let mut ptrs = Vec::with_capacity(count);
        for _ in 0..count {
            ptrs.push(heap.allocate(&ctx, object_size, false).expect("allocate"));
        }

        // Deterministic pseudo-shuffle of free order from the seed, so the
        // same input always frees in the same order.
        let mut order: Vec<usize> = (0..ptrs.len()).collect();
        let mut state = free_order_seed;
        for i in (1..order.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let j = (state >> 33) as usize % (i + 1);
            order.swap(i, j);
        }

        for &i in &order {
            heap.free(&ctx, ptrs[i]).expect("free");
        }
        heap.scavenge_context(&ctx);

        for &p in &ptrs {
            prop_assert_eq!(heap.region_is_fully_available(p), Some(true));
        }
        heap.shutdown();
    }

    /// Invariant 6: whatever thread frees `p`, once both threads quiesce and
    /// the owning context scavenges, the region backing `p` reports its slot
    /// available again.
    #[test]
    fn cross_thread_free_converges_to_available(object_size in 8usize..=256, count in 1usize..20) {
        let heap = isolated_heap();
        let owner_ctx = heap.acquire_context();

        let ptrs: Vec<usize> = (0..count)
            .map(|_| heap.allocate(&owner_ctx, object_size, false).expect("allocate"))
            .collect();

        let free_heap = heap.clone();
        let ptrs_for_free = ptrs.clone();
        thread::spawn(move || {
            let freer_ctx = free_heap.acquire_context();
            for p in ptrs_for_free {
                free_heap.free(&freer_ctx, p).expect("foreign free");
            }
            free_heap.dispose_context(freer_ctx);
        })
        .join()
        .expect("freeing thread panicked");

        heap.scavenge_context(&owner_ctx);

        for &p in &ptrs {
            prop_assert_eq!(heap.region_is_fully_available(p), Some(true));
        }
        heap.shutdown();
    }
}

/// Invariant 5: a second `PerformCleanup` with no intervening mutation
/// leaves the heap's observable state unchanged.
#[test]
fn cleanup_is_idempotent() {
    let heap = isolated_heap();
    let ctx = heap.acquire_context();

    for _ in 0..32 {
        let p = heap.allocate(&ctx, 64, false).expect("allocate");
        heap.free(&ctx, p).expect("free");
    }

    heap.perform_global_cleanup();
    let after_first = heap.used_physical_bytes();
    heap.perform_global_cleanup();
    let after_second = heap.used_physical_bytes();

    assert_eq!(after_first, after_second);
    heap.shutdown();
}

/// Invariant 1/2 sanity check on the layout table itself: every registered
/// layout's full mask has exactly `region_objects` bits set, which is what
/// every `region_is_fully_available` comparison above relies on.
#[test]
fn layout_full_masks_match_region_objects() {
    for layout in OBJECT_LAYOUTS.iter() {
        if layout.object_size == 0 {
            continue;
        }
        assert_eq!(layout.full_mask().count_ones() as u8, layout.region_objects);
    }
    let _ = layout_for_size(40);
}
