//! # insmalloc
//!
//! General-purpose, multi-threaded, segregated-fit memory allocator.
//! This crate is the public surface over [`alloc_core`]: a process-wide
//! [`alloc_core::HeapDescriptor`] singleton, one [`alloc_core::MemoryContext`]
//! per thread acquired lazily and disposed on thread exit, and the C ABI
//! (`malloc`/`free`/`realloc`/`calloc`/`msize`/`new_managed`/`new_unmanaged`/
//! `get_metadata`/`check_overflow`) every consumer links against.

use std::cell::RefCell;
use std::sync::Arc;

use alloc_core::core::config::{load_config_or_default, InstrumentationConfig};
use alloc_core::types::ObjectHeader;
use alloc_core::{AllocatorConfig, HeapDescriptor, MemoryContext};

use once_cell::sync::Lazy;

/// Metadata returned by [`get_metadata`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectMetadata {
    /// Usable capacity of the slot in bytes
    pub capacity: usize,
    /// Schema identifier recorded in the object header
    pub schema_id: u32,
    /// Monotonic allocation timestamp, if `enable_time_stamp` is on
    pub timestamp: Option<u64>,
    /// Stack digest at allocation time, if `enable_stack_stamp` is on
    pub stackstamp: Option<u64>,
}

static CONFIG: Lazy<AllocatorConfig> =
    Lazy::new(|| load_config_or_default(std::env::var("INSMALLOC_CONFIG").ok().as_deref()));

static HEAP: Lazy<Arc<HeapDescriptor>> = Lazy::new(|| HeapDescriptor::new(&CONFIG));

fn instrumentation_config() -> InstrumentationConfig {
    CONFIG.instrumentation.clone()
}

struct ContextCell {
    ctx: RefCell<Option<Arc<MemoryContext>>>,
}

impl Drop for ContextCell {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.borrow_mut().take() {
            HEAP.dispose_context(ctx);
        }
    }
}

thread_local! {
    static CONTEXT: ContextCell = ContextCell { ctx: RefCell::new(None) };
}

fn with_context<R>(f: impl FnOnce(&Arc<MemoryContext>) -> R) -> R {
    CONTEXT.with(|cell| {
        let mut slot = cell.ctx.borrow_mut();
        if slot.is_none() {
            *slot = Some(HEAP.acquire_context());
        }
        f(slot.as_ref().unwrap())
    })
}

/// Prefix every slot carries before the caller-visible pointer: the object
/// header, plus an analytics tail when either timestamp or stack stamping
/// is enabled. Constant across the process since instrumentation knobs are
/// global, not per-call.
fn prefix_size(config: &InstrumentationConfig) -> usize {
    let analytics = if config.enable_time_stamp || config.enable_stack_stamp {
        alloc_core::constants::ANALYTICS_HEADER_SIZE
    } else {
        0
    };
    alloc_core::constants::OBJECT_HEADER_SIZE + analytics
}

fn trailing_size(config: &InstrumentationConfig) -> usize {
    config
        .enable_security_padding
        .map(alloc_core::instrumentation::security_padding_size)
        .unwrap_or(0)
}

/// Shared allocation path for `malloc`, `calloc`, `new_managed`, `new_unmanaged`.
fn allocate_object(size: usize, schema_id: u32, managed: bool) -> *mut u8 {
    let config = instrumentation_config();
    let prefix = prefix_size(&config);
    let trailing = trailing_size(&config);
    let total = prefix + size + trailing;

    let result = with_context(|ctx| HEAP.allocate(ctx, total, managed));
    let slot_start = match result {
        Ok(addr) => addr,
        Err(_) => return std::ptr::null_mut(),
    };

    let mut header = ObjectHeader::new(schema_id);
    header.set_has_analytics_infos(config.enable_time_stamp || config.enable_stack_stamp);
    header.set_has_security_padding(config.enable_security_padding.is_some());
    unsafe {
        std::ptr::write_unaligned(slot_start as *mut u64, header.raw());
        if config.enable_time_stamp || config.enable_stack_stamp {
            alloc_core::instrumentation::stamp_analytics(
                slot_start + alloc_core::constants::OBJECT_HEADER_SIZE,
                &config,
            );
        }
    }

    // The padding always sits at the very end of the slot's actual capacity
    // (which may exceed `total` due to bin rounding), not at `size` bytes
    // past the user pointer: that keeps its location recoverable from the
    // layout alone at `check_overflow` time, without needing the original
    // request size back from the caller.
    if let Some(n) = config.enable_security_padding {
        let capacity = HEAP.object_capacity(slot_start).unwrap_or(total);
        let pad_addr = slot_start + capacity - trailing;
        unsafe {
            alloc_core::instrumentation::write_security_padding(pad_addr, n, size as u32);
        }
    }
    (slot_start + prefix) as *mut u8
}

fn slot_start_of(ptr: *mut u8) -> usize {
    let config = instrumentation_config();
    ptr as usize - prefix_size(&config)
}

/// Allocate `size` bytes, usable and uninitialized. Returns `NULL` on OOM.
///
/// # Safety
/// Standard C `malloc` contract: the returned pointer, if non-null, must
/// eventually be passed to [`free`] or [`realloc`] exactly once, and not
/// accessed past `size` bytes (plus whatever slack [`msize`] reports).
#[no_mangle]
pub unsafe extern "C" fn malloc(size: usize) -> *mut u8 {
    allocate_object(size, 0, false)
}

/// Free a pointer obtained from `malloc`/`calloc`/`realloc`/`new_managed`/
/// `new_unmanaged`. `NULL` is tolerated and is a no-op.
///
/// # Safety
/// `p` must be `NULL` or a pointer previously returned by this crate's
/// allocation functions, not already freed.
#[no_mangle]
pub unsafe extern "C" fn free(p: *mut u8) {
    if p.is_null() {
        return;
    }
    let slot_start = slot_start_of(p);
    let _ = with_context(|ctx| HEAP.free(ctx, slot_start));
}

/// Resize an allocation, preserving `min(old_usable, new_size)` bytes.
/// `p == NULL` behaves like `malloc(new_size)`; `new_size == 0` behaves
/// like `free(p)` and returns `NULL`.
///
/// # Safety
/// `p` must be `NULL` or previously returned by this crate's allocation
/// functions.
#[no_mangle]
pub unsafe extern "C" fn realloc(p: *mut u8, new_size: usize) -> *mut u8 {
    if p.is_null() {
        return malloc(new_size);
    }
    if new_size == 0 {
        free(p);
        return std::ptr::null_mut();
    }
    let old_capacity = msize(p);
    let new_ptr = malloc(new_size);
    if new_ptr.is_null() {
        return std::ptr::null_mut();
    }
    let copy_len = old_capacity.min(new_size);
    std::ptr::copy_nonoverlapping(p, new_ptr, copy_len);
    free(p);
    new_ptr
}

/// Allocate `n * size` zero-initialized bytes. Returns `NULL` on OOM or on
/// `n * size` overflowing `usize`.
///
/// # Safety
/// Same contract as [`malloc`].
#[no_mangle]
pub unsafe extern "C" fn calloc(n: usize, size: usize) -> *mut u8 {
    let total = match n.checked_mul(size) {
        Some(t) => t,
        None => return std::ptr::null_mut(),
    };
    let p = malloc(total);
    if !p.is_null() {
        std::ptr::write_bytes(p, 0, total);
    }
    p
}

/// Usable size of the object at `p`, or `0` if `p` is foreign or `NULL`.
///
/// # Safety
/// `p` must be `NULL` or previously returned by this crate's allocation functions.
#[no_mangle]
pub unsafe extern "C" fn msize(p: *mut u8) -> usize {
    if p.is_null() {
        return 0;
    }
    let config = instrumentation_config();
    let prefix = prefix_size(&config);
    let trailing = trailing_size(&config);
    match HEAP.object_capacity(slot_start_of(p)) {
        Some(cap) if cap > prefix + trailing => cap - prefix - trailing,
        _ => 0,
    }
}

/// Allocate an object in the "managed" arena kind, whose schema controls
/// traversal and finalization (out of scope here, see [`alloc_core`]'s
/// reachability hooks).
///
/// # Safety
/// Same contract as [`malloc`].
#[no_mangle]
pub unsafe extern "C" fn new_managed(schema_id: u32, size: usize) -> *mut u8 {
    allocate_object(size, schema_id, true)
}

/// Allocate an object in the "unmanaged" arena kind.
///
/// # Safety
/// Same contract as [`malloc`].
#[no_mangle]
pub unsafe extern "C" fn new_unmanaged(schema_id: u32, size: usize) -> *mut u8 {
    allocate_object(size, schema_id, false)
}

/// Populate `out` with the analytics header (timestamp, stackstamp) and
/// schema id recorded at allocation time. Returns `false` if `p` is foreign.
///
/// # Safety
/// `p` must be previously returned by this crate's allocation functions.
#[no_mangle]
pub unsafe extern "C" fn get_metadata(p: *mut u8, out: *mut ObjectMetadata) -> bool {
    if p.is_null() || out.is_null() {
        return false;
    }
    let slot_start = slot_start_of(p);
    let Some(capacity) = HEAP.object_capacity(slot_start) else {
        return false;
    };
    let header = ObjectHeader::from_raw(std::ptr::read_unaligned(slot_start as *const u64));
    let config = instrumentation_config();
    let analytics = if header.has_analytics_infos() {
        alloc_core::instrumentation::read_analytics(
            slot_start + alloc_core::constants::OBJECT_HEADER_SIZE,
            &config,
        )
    } else {
        Default::default()
    };
    std::ptr::write(
        out,
        ObjectMetadata {
            capacity,
            schema_id: header.schema_id(),
            timestamp: analytics.timestamp,
            stackstamp: analytics.stackstamp,
        },
    );
    true
}

/// Verify the trailing canary of a security-padded object, returning the
/// address of the first corrupted byte, or `NULL` if intact or unpadded.
///
/// # Safety
/// `p` must be previously returned by this crate's allocation functions.
#[no_mangle]
pub unsafe extern "C" fn check_overflow(p: *mut u8) -> *mut u8 {
    if p.is_null() {
        return std::ptr::null_mut();
    }
    let slot_start = slot_start_of(p);
    let header = ObjectHeader::from_raw(std::ptr::read_unaligned(slot_start as *const u64));
    if !header.has_security_padding() {
        return std::ptr::null_mut();
    }
    let config = instrumentation_config();
    let Some(n) = config.enable_security_padding else {
        return std::ptr::null_mut();
    };
    let Some(capacity) = HEAP.object_capacity(slot_start) else {
        return std::ptr::null_mut();
    };
    let trailing = trailing_size(&config);
    let pad_addr = slot_start + capacity - trailing;
    let mut tag = [0u8; 4];
    std::ptr::copy_nonoverlapping((pad_addr + n as usize) as *const u8, tag.as_mut_ptr(), 4);
    let stored_len = u32::from_ne_bytes(tag) ^ alloc_core::constants::SECURITY_LENGTH_XOR;
    match alloc_core::instrumentation::check_overflow(pad_addr, n, stored_len) {
        Some(bad) => bad as *mut u8,
        None => std::ptr::null_mut(),
    }
}

/// Committed physical bytes currently attributed to the process-wide heap.
pub fn used_physical_bytes() -> u64 {
    HEAP.used_physical_bytes()
}

/// Configured ceiling `used_physical_bytes` is checked against.
pub fn max_usable_physical_bytes() -> u64 {
    HEAP.max_usable_physical_bytes()
}

/// Number of thread contexts currently registered with the heap.
pub fn context_count() -> usize {
    HEAP.context_count()
}

/// Run `PerformCleanup` across every registered context. Exposed for harness
/// and diagnostic use; the cleanup worker thread already runs this on its
/// own schedule.
pub fn perform_global_cleanup() {
    HEAP.perform_global_cleanup();
}

/// Opt-in [`std::alloc::GlobalAlloc`] wiring over the same engine `malloc`/
/// `free`/`realloc` call into. Additive sugar, not a replacement for the C
/// ABI: a consumer opts in explicitly with `#[global_allocator]`.
pub struct GlobalAllocator;

unsafe impl std::alloc::GlobalAlloc for GlobalAllocator {
    unsafe fn alloc(&self, layout: std::alloc::Layout) -> *mut u8 {
        debug_assert!(
            layout.align() <= alloc_core::constants::OBJECT_HEADER_SIZE,
            "insmalloc does not honor alignment beyond the object header's natural alignment"
        );
        malloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: std::alloc::Layout) {
        free(ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: std::alloc::Layout, new_size: usize) -> *mut u8 {
        realloc(ptr, new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_free_round_trips() {
        unsafe {
            let p = malloc(64);
            assert!(!p.is_null());
            assert!(msize(p) >= 64);
            free(p);
        }
    }

    #[test]
    fn calloc_zeroes_memory() {
        unsafe {
            let p = calloc(16, 4);
            assert!(!p.is_null());
            for i in 0..64 {
                assert_eq!(*p.add(i), 0);
            }
            free(p);
        }
    }

    #[test]
    fn realloc_preserves_prefix_bytes() {
        unsafe {
            let p = malloc(16);
            for i in 0..16 {
                *p.add(i) = i as u8;
            }
            let q = realloc(p, 128);
            assert!(!q.is_null());
            for i in 0..16 {
                assert_eq!(*q.add(i), i as u8);
            }
            free(q);
        }
    }

    #[test]
    fn free_of_null_is_a_no_op() {
        unsafe {
            free(std::ptr::null_mut());
        }
    }

    #[test]
    fn metadata_reports_schema_id_from_new_managed() {
        unsafe {
            let p = new_managed(7, 32);
            let mut out = ObjectMetadata::default();
            assert!(get_metadata(p, &mut out as *mut _));
            assert_eq!(out.schema_id, 7);
            free(p);
        }
    }

    #[test]
    fn check_overflow_is_null_when_padding_disabled() {
        unsafe {
            let p = malloc(32);
            assert!(check_overflow(p).is_null());
            free(p);
        }
    }
}
