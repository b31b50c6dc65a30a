//! Object region: the per-region header and its bitmap operations
//!
//! An object-bearing region begins with this fixed header, followed by
//! `region_objects` slots of `object_size` bytes each (first word of each
//! slot is an [`crate::types::ObjectHeader`]). `availables` is written only
//! by the owning context; `notified_availables` is written atomically by
//! any thread that frees a slot it does not own.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::types::{LayoutId, ObjectLayoutInfo};

/// Distinguished value meaning "not linked into any list". Kept distinct
/// from `0`, which means "linked, and this is the last entry" (a null
/// next-pointer) — collapsing the two would make it impossible to tell a
/// region that was never enqueued from the tail of a list.
pub const UNLINKED: usize = usize::MAX;

/// Region header. Exactly one of these precedes every object-bearing region.
pub struct ObjectRegionHeader {
    /// Layout id fixing this region's object size and count
    pub layout_id: LayoutId,
    /// Whether this region was allocated for private (thread-bound) use
    pub privated: bool,
    /// Whether finalizers for freed-but-notified objects have been invoked
    pub notified_finalizers: bool,
    /// Region size in bytes (`1 << region_size_l2` from the layout table)
    pub width: usize,
    /// Address of the owning context, or `0` if centrally owned
    pub owner: AtomicUsize,
    /// Bitmap of slots free and locally returnable (owner-only writes)
    pub availables: AtomicU64,
    /// Bitmap of slots freed by a foreign thread, not yet scavenged
    pub notified_availables: AtomicU64,
    /// Intrusive link into a usables/disposables list, or [`UNLINKED`]
    pub next_used: AtomicUsize,
    /// Intrusive link into the owner's lock-free notifieds stack, or [`UNLINKED`]
    pub next_notified: AtomicUsize,
    /// Base address of this region, including the header
    pub base: usize,
}

impl ObjectRegionHeader {
    /// Construct a freshly-committed region's header: every slot available,
    /// unlinked from every list.
    pub fn new(base: usize, layout_id: LayoutId, layout: &ObjectLayoutInfo, owner: usize, privated: bool) -> Self {
        ObjectRegionHeader {
            layout_id,
            privated,
            notified_finalizers: false,
            width: 1usize << layout.region_size_l2,
            owner: AtomicUsize::new(owner),
            availables: AtomicU64::new(layout.full_mask()),
            notified_availables: AtomicU64::new(0),
            next_used: AtomicUsize::new(UNLINKED),
            next_notified: AtomicUsize::new(UNLINKED),
            base,
        }
    }

    /// Pop the lowest-indexed free slot, if any, clearing its bit
    pub fn acquire_object(&self) -> Option<u8> {
        loop {
            let bits = self.availables.load(Ordering::Acquire);
            if bits == 0 {
                return None;
            }
            let index = bits.trailing_zeros() as u8;
            let cleared = bits & !(1u64 << index);
            if self
                .availables
                .compare_exchange(bits, cleared, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(index);
            }
        }
    }

    /// Mark a slot available from the owning context (no atomics required on
    /// the read side since only the owner ever touches `availables`, but the
    /// field is an `AtomicU64` so the same header type works uniformly with
    /// `notified_availables`).
    pub fn release_local(&self, slot: u8) {
        self.availables.fetch_or(1u64 << slot, Ordering::Release);
    }

    /// Foreign-thread free: OR the slot into `notified_availables`, reporting
    /// whether this call transitioned the bitmap from zero (the caller must
    /// push the region onto the owner's notifieds stack exactly when this is true).
    pub fn notify_available(&self, slot: u8) -> bool {
        let prev = self.notified_availables.fetch_or(1u64 << slot, Ordering::AcqRel);
        prev == 0
    }

    /// Check whether a slot is already free, for double-free detection
    pub fn is_slot_free(&self, slot: u8) -> bool {
        let mask = 1u64 << slot;
        (self.availables.load(Ordering::Acquire) & mask) != 0
            || (self.notified_availables.load(Ordering::Acquire) & mask) != 0
    }

    /// `(availables | notifiedAvailables) == full mask`: every slot is free
    pub fn is_disposable(&self, full_mask: u64) -> bool {
        let a = self.availables.load(Ordering::Acquire);
        let n = self.notified_availables.load(Ordering::Acquire);
        (a | n) == full_mask
    }

    /// Drain `notified_availables` into `availables`, returning the bits moved
    pub fn scavenge(&self) -> u64 {
        let notified = self.notified_availables.swap(0, Ordering::AcqRel);
        if notified != 0 {
            self.availables.fetch_or(notified, Ordering::AcqRel);
        }
        notified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OBJECT_LAYOUTS;

    fn make_header() -> ObjectRegionHeader {
        let layout = &OBJECT_LAYOUTS[0];
        ObjectRegionHeader::new(0x1000, LayoutId(0), layout, 0, true)
    }

    #[test]
    fn acquire_object_returns_lowest_index_first() {
        let h = make_header();
        assert_eq!(h.acquire_object(), Some(0));
        assert_eq!(h.acquire_object(), Some(1));
    }

    #[test]
    fn release_then_acquire_round_trips() {
        let h = make_header();
        let slot = h.acquire_object().unwrap();
        assert!(!h.is_slot_free(slot));
        h.release_local(slot);
        assert!(h.is_slot_free(slot));
    }

    #[test]
    fn notify_available_reports_zero_to_nonzero_transition_once() {
        let h = make_header();
        let slot = h.acquire_object().unwrap();
        assert!(h.notify_available(slot));
        let slot2 = h.acquire_object().unwrap();
        h.notify_available(slot2);
        assert!(h.is_slot_free(slot2));
    }

    #[test]
    fn scavenge_moves_notified_bits_into_availables() {
        let h = make_header();
        let slot = h.acquire_object().unwrap();
        h.notify_available(slot);
        let moved = h.scavenge();
        assert_eq!(moved, 1u64 << slot);
        assert!(h.is_slot_free(slot));
        assert_eq!(h.notified_availables.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn full_region_is_disposable() {
        let layout = &OBJECT_LAYOUTS[0];
        let h = make_header();
        assert!(h.is_disposable(layout.full_mask()));
        let slot = h.acquire_object().unwrap();
        assert!(!h.is_disposable(layout.full_mask()));
        h.release_local(slot);
        assert!(h.is_disposable(layout.full_mask()));
    }
}
