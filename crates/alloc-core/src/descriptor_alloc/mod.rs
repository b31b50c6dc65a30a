//! Descriptor allocator: buddy-style allocator for management structures
//!
//! Backs one dedicated arena reserved lazily on first use. Sub-page
//! allocations (`[2^6, 2^16)`, region and arena descriptors) come from a
//! power-of-two block bucket; page-or-larger allocations come from a
//! page-span bucket that coalesces adjacent free spans on dispose. A single
//! mutex guards both buckets; the dedicated arena's bump pointer is a
//! separate atomic so fresh pages can be carved out without nesting locks.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicUsize, Ordering};
use std::sync::Mutex;

use once_cell::sync::OnceCell;

use crate::constants::{ARENA_SIZE, PAGE_SIZE, PAGE_SIZE_L2};
use crate::os;
use crate::types::AllocError;

const MIN_BLOCK_L2: u32 = 6;
const NUM_BLOCK_CLASSES: usize = (PAGE_SIZE_L2 - MIN_BLOCK_L2) as usize;

fn block_class(size_l2: u32) -> usize {
    (size_l2 - MIN_BLOCK_L2) as usize
}

struct Inner {
    /// One freelist per sub-page size class
    block_freelists: [Vec<usize>; NUM_BLOCK_CLASSES],
    /// Bitmap of which block freelists are non-empty, for a fast "is there a
    /// larger block to split" check
    block_presence: u32,
    /// Free page spans keyed by base address, for adjacency coalescing
    span_free_by_addr: BTreeMap<usize, usize>,
    /// Free page spans keyed by page count, for best-fit retrieval
    span_free_by_size: BTreeMap<usize, BTreeSet<usize>>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            block_freelists: Default::default(),
            block_presence: 0,
            span_free_by_addr: BTreeMap::new(),
            span_free_by_size: BTreeMap::new(),
        }
    }

    fn push_block(&mut self, size_l2: u32, addr: usize) {
        let class = block_class(size_l2);
        self.block_freelists[class].push(addr);
        self.block_presence |= 1 << class;
    }

    fn pop_block(&mut self, size_l2: u32) -> Option<usize> {
        let class = block_class(size_l2);
        let addr = self.block_freelists[class].pop();
        if self.block_freelists[class].is_empty() {
            self.block_presence &= !(1 << class);
        }
        addr
    }

    fn insert_span(&mut self, addr: usize, pages: usize) {
        self.span_free_by_addr.insert(addr, pages);
        self.span_free_by_size.entry(pages).or_default().insert(addr);
    }

    fn remove_span(&mut self, addr: usize, pages: usize) {
        self.span_free_by_addr.remove(&addr);
        if let Some(set) = self.span_free_by_size.get_mut(&pages) {
            set.remove(&addr);
            if set.is_empty() {
                self.span_free_by_size.remove(&pages);
            }
        }
    }

    fn take_best_fit_span(&mut self, min_pages: usize) -> Option<(usize, usize)> {
        let (&pages, set) = self.span_free_by_size.range(min_pages..).next()?;
        let &addr = set.iter().next()?;
        self.remove_span(addr, pages);
        Some((addr, pages))
    }
}

/// Buddy-style allocator for sub-page and page-span management structures
pub struct DescriptorAllocator {
    arena_base: OnceCell<usize>,
    next_unused: AtomicUsize,
    inner: Mutex<Inner>,
}

impl DescriptorAllocator {
    /// Construct an allocator that lazily reserves its dedicated arena on
    /// first use (the arena is otherwise never touched at construction time)
    pub fn new() -> Self {
        DescriptorAllocator {
            arena_base: OnceCell::new(),
            next_unused: AtomicUsize::new(0),
            inner: Mutex::new(Inner::new()),
        }
    }

    fn arena_base(&self) -> usize {
        *self.arena_base.get_or_init(|| {
            os::reserve_arena(0).expect("descriptor heap arena reservation failed")
        })
    }

    fn bump_pages(&self, pages: usize) -> Result<usize, AllocError> {
        let bytes = pages * PAGE_SIZE;
        let base = self.arena_base();
        let offset = self.next_unused.fetch_add(bytes, Ordering::AcqRel);
        if offset as u64 + bytes as u64 > ARENA_SIZE {
            self.next_unused.fetch_sub(bytes, Ordering::AcqRel);
            return Err(AllocError::MissingMemory { requested: bytes });
        }
        let addr = base + offset;
        if !os::commit(addr, bytes) {
            return Err(AllocError::MissingMemory { requested: bytes });
        }
        Ok(addr)
    }

    fn pull_span_locked(&self, inner: &mut Inner, pages_l2: u32) -> Result<usize, AllocError> {
        let want = 1usize << pages_l2;
        if let Some((addr, got)) = inner.take_best_fit_span(want) {
            if got > want {
                inner.insert_span(addr + want * PAGE_SIZE, got - want);
            }
            return Ok(addr);
        }
        self.bump_pages(want)
    }

    fn pull_block_locked(&self, inner: &mut Inner, size_l2: u32) -> Result<usize, AllocError> {
        if let Some(addr) = inner.pop_block(size_l2) {
            return Ok(addr);
        }
        if size_l2 + 1 < PAGE_SIZE_L2 {
            let parent = self.pull_block_locked(inner, size_l2 + 1)?;
            let half = 1usize << size_l2;
            inner.push_block(size_l2, parent + half);
            return Ok(parent);
        }
        let page = self.pull_span_locked(inner, 0)?;
        let half = 1usize << size_l2;
        let mut offset = half;
        while offset < PAGE_SIZE {
            inner.push_block(size_l2, page + offset);
            offset += half;
        }
        Ok(page)
    }

    /// Allocate a block or span of `2^size_l2` bytes, committing
    /// `2^used_size_l2` bytes of it (the rest remains reserved for a later
    /// [`extend`](Self::extend)).
    pub fn allocate(&self, size_l2: u32, used_size_l2: u32) -> Result<usize, AllocError> {
        debug_assert!(used_size_l2 <= size_l2);
        let addr = {
            let mut inner = self.inner.lock().unwrap();
            if size_l2 < PAGE_SIZE_L2 {
                self.pull_block_locked(&mut inner, size_l2)?
            } else {
                self.pull_span_locked(&mut inner, size_l2 - PAGE_SIZE_L2)?
            }
        };
        if size_l2 >= PAGE_SIZE_L2 {
            os::commit(addr, 1usize << used_size_l2);
        }
        Ok(addr)
    }

    /// Grow or shrink the committed prefix of an already-allocated entry in place
    pub fn extend(&self, addr: usize, used_size_l2_before: u32, used_size_l2_after: u32) {
        let before = 1usize << used_size_l2_before;
        let after = 1usize << used_size_l2_after;
        if after > before {
            os::commit(addr + before, after - before);
        } else if after < before {
            os::decommit(addr + after, before - after);
        }
    }

    /// Return an allocated block or span, coalescing with adjacent free
    /// spans bottom-up when returning a page-or-larger entry.
    pub fn dispose(&self, addr: usize, size_l2: u32) {
        let mut inner = self.inner.lock().unwrap();
        if size_l2 < PAGE_SIZE_L2 {
            inner.push_block(size_l2, addr);
            return;
        }

        let mut pages = (1u64 << (size_l2 - PAGE_SIZE_L2)) as usize;
        let mut base = addr;

        if let Some((&prev_addr, &prev_pages)) = inner.span_free_by_addr.range(..base).next_back() {
            if prev_addr + prev_pages * PAGE_SIZE == base {
                inner.remove_span(prev_addr, prev_pages);
                base = prev_addr;
                pages += prev_pages;
            }
        }
        if let Some((&next_addr, &next_pages)) = inner
            .span_free_by_addr
            .range(base + pages * PAGE_SIZE..)
            .next()
        {
            if base + pages * PAGE_SIZE == next_addr {
                inner.remove_span(next_addr, next_pages);
                pages += next_pages;
            }
        }
        inner.insert_span(base, pages);
    }
}

impl Default for DescriptorAllocator {
    fn default() -> Self {
        Self::new()
    }
}

struct Repr<T> {
    count: AtomicUsize,
    value: T,
}

/// Reference-counted handle to a `T` allocated from a [`DescriptorAllocator`]
/// sub-page block rather than the global heap, for the management structures
/// the component design puts above this layer (region and arena descriptors).
/// Clone/drop semantics mirror `Arc<T>`; the backing block returns to the
/// allocator's freelist when the last handle drops.
pub struct DescriptorArc<T> {
    repr: NonNull<Repr<T>>,
    size_l2: u32,
    alloc: NonNull<DescriptorAllocator>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for DescriptorArc<T> {}
unsafe impl<T: Send + Sync> Sync for DescriptorArc<T> {}

impl<T> DescriptorArc<T> {
    /// Allocate a block sized to hold `T` plus its refcount and construct
    /// `value` in place. `alloc` must outlive every handle returned here;
    /// in practice the allocator is a field of the singleton heap controller,
    /// which outlives every region descriptor it hands out.
    pub fn new(alloc: &DescriptorAllocator, value: T) -> Self {
        let bytes = std::mem::size_of::<Repr<T>>().max(1);
        let size_l2 = (usize::BITS - (bytes - 1).leading_zeros()).max(MIN_BLOCK_L2);
        let addr = alloc
            .allocate(size_l2, size_l2)
            .expect("descriptor allocator out of management-structure memory");
        let repr = addr as *mut Repr<T>;
        unsafe {
            repr.write(Repr {
                count: AtomicUsize::new(1),
                value,
            });
        }
        DescriptorArc {
            repr: NonNull::new(repr).expect("descriptor allocator returned a null address"),
            size_l2,
            alloc: NonNull::from(alloc),
            _marker: PhantomData,
        }
    }
}

impl<T> Deref for DescriptorArc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &self.repr.as_ref().value }
    }
}

impl<T> Clone for DescriptorArc<T> {
    fn clone(&self) -> Self {
        unsafe {
            self.repr.as_ref().count.fetch_add(1, Ordering::Relaxed);
        }
        DescriptorArc {
            repr: self.repr,
            size_l2: self.size_l2,
            alloc: self.alloc,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for DescriptorArc<T> {
    fn drop(&mut self) {
        unsafe {
            if self.repr.as_ref().count.fetch_sub(1, Ordering::Release) != 1 {
                return;
            }
            atomic::fence(Ordering::Acquire);
            std::ptr::drop_in_place(std::ptr::addr_of_mut!(self.repr.as_mut().value));
            let addr = self.repr.as_ptr() as usize;
            self.alloc.as_ref().dispose(addr, self.size_l2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_dispose_small_block_round_trips() {
        let alloc = DescriptorAllocator::new();
        let a = alloc.allocate(6, 6).expect("allocate 64B block");
        alloc.dispose(a, 6);
        let b = alloc.allocate(6, 6).expect("reuse from freelist");
        assert_eq!(a, b);
    }

    #[test]
    fn splitting_a_larger_block_yields_distinct_addresses() {
        let alloc = DescriptorAllocator::new();
        let a = alloc.allocate(6, 6).unwrap();
        let b = alloc.allocate(6, 6).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn page_span_allocate_and_dispose_round_trips() {
        let alloc = DescriptorAllocator::new();
        let a = alloc.allocate(PAGE_SIZE_L2, PAGE_SIZE_L2).expect("one page");
        alloc.dispose(a, PAGE_SIZE_L2);
        let b = alloc.allocate(PAGE_SIZE_L2, PAGE_SIZE_L2).expect("reuse");
        assert_eq!(a, b);
    }

    #[test]
    fn adjacent_disposed_spans_coalesce() {
        let alloc = DescriptorAllocator::new();
        let a = alloc.allocate(PAGE_SIZE_L2, PAGE_SIZE_L2).unwrap();
        let b = alloc.allocate(PAGE_SIZE_L2, PAGE_SIZE_L2).unwrap();
        assert_eq!(b, a + PAGE_SIZE, "bump allocation should be contiguous");

        alloc.dispose(a, PAGE_SIZE_L2);
        alloc.dispose(b, PAGE_SIZE_L2);

        let merged = alloc.allocate(PAGE_SIZE_L2 + 1, PAGE_SIZE_L2 + 1).expect("two-page span from merge");
        assert_eq!(merged, a);
    }

    #[test]
    fn descriptor_arc_clone_shares_the_same_value() {
        let alloc = DescriptorAllocator::new();
        let a = DescriptorArc::new(&alloc, 42u64);
        let b = a.clone();
        assert_eq!(*a, 42);
        assert_eq!(*b, 42);
    }

    #[test]
    fn descriptor_arc_returns_its_block_once_every_handle_drops() {
        let alloc = DescriptorAllocator::new();
        let a = DescriptorArc::new(&alloc, 7u64);
        let addr_a = std::ptr::addr_of!(*a) as usize;
        drop(a);
        let b = DescriptorArc::new(&alloc, 8u64);
        let addr_b = std::ptr::addr_of!(*b) as usize;
        assert_eq!(addr_a, addr_b, "freed block should be reused by the next allocation of the same size class");
    }

    #[test]
    fn descriptor_arc_keeps_block_alive_while_a_clone_is_held() {
        let alloc = DescriptorAllocator::new();
        let a = DescriptorArc::new(&alloc, 1u64);
        let b = a.clone();
        drop(a);
        assert_eq!(*b, 1, "dropping one handle must not invalidate a surviving clone");
    }
}
