//! Instrumentation: analytics tail, security-padding canary, reachability tracker bookkeeping
//!
//! The analytics header and security padding both live in the bytes after an
//! object's usable span, inside the tail the layout table already reserves
//! for them (`ObjectLayoutInfo::retention`'s sibling knobs configure whether
//! a given allocation carries either). Nothing here is consulted on the
//! fast allocate/free path; both are opt-in and read back only through
//! `get_metadata`/`check_overflow`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;

use crate::constants::{ANALYTICS_HEADER_SIZE, SECURITY_CANARY_BYTE, SECURITY_LENGTH_FIELD_SIZE, SECURITY_LENGTH_XOR};
use crate::core::config::InstrumentationConfig;

static TIME_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since this process's first timestamp request.
fn monotonic_nanos() -> u64 {
    TIME_ORIGIN.elapsed().as_nanos() as u64
}

/// A coarse per-thread stack digest: hashes the frame addresses of the
/// caller's current backtrace. Not a security primitive, only a diagnostic
/// aid for correlating an allocation with the call path that produced it.
fn stack_digest() -> u64 {
    let backtrace = std::backtrace::Backtrace::capture();
    let mut hasher = DefaultHasher::new();
    backtrace.to_string().hash(&mut hasher);
    hasher.finish()
}

/// Analytics tail recorded after the object header when enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnalyticsHeader {
    /// `Some` when `enable_time_stamp` was set at allocation time
    pub timestamp: Option<u64>,
    /// `Some` when `enable_stack_stamp` was set at allocation time
    pub stackstamp: Option<u64>,
}

/// Write the analytics tail at `tail_addr` per the configured knobs. Writes
/// `u64::MAX` as a sentinel for a disabled field so a later read can tell
/// "disabled" apart from a timestamp of zero.
///
/// # Safety
/// `tail_addr` must point to at least [`ANALYTICS_HEADER_SIZE`] writable bytes.
pub unsafe fn stamp_analytics(tail_addr: usize, config: &InstrumentationConfig) {
    if !config.enable_time_stamp && !config.enable_stack_stamp {
        return;
    }
    let ts = if config.enable_time_stamp { monotonic_nanos() } else { u64::MAX };
    let ss = if config.enable_stack_stamp { stack_digest() } else { u64::MAX };
    let ptr = tail_addr as *mut u64;
    std::ptr::write_unaligned(ptr, ts);
    std::ptr::write_unaligned(ptr.add(1), ss);
}

/// Read back the analytics tail written by [`stamp_analytics`].
///
/// # Safety
/// `tail_addr` must point to at least [`ANALYTICS_HEADER_SIZE`] readable
/// bytes previously written by `stamp_analytics` with tagging enabled.
pub unsafe fn read_analytics(tail_addr: usize, config: &InstrumentationConfig) -> AnalyticsHeader {
    if !config.enable_time_stamp && !config.enable_stack_stamp {
        return AnalyticsHeader::default();
    }
    let ptr = tail_addr as *const u64;
    let ts = std::ptr::read_unaligned(ptr);
    let ss = std::ptr::read_unaligned(ptr.add(1));
    AnalyticsHeader {
        timestamp: (ts != u64::MAX).then_some(ts),
        stackstamp: (ss != u64::MAX).then_some(ss),
    }
}

/// Write `n` canary bytes followed by the XOR-tagged `len` at `pad_addr`.
///
/// # Safety
/// `pad_addr` must point to at least `n + SECURITY_LENGTH_FIELD_SIZE`
/// writable bytes, immediately trailing the object's usable span.
pub unsafe fn write_security_padding(pad_addr: usize, n: u32, len: u32) {
    std::ptr::write_bytes(pad_addr as *mut u8, SECURITY_CANARY_BYTE, n as usize);
    let tag = (len ^ SECURITY_LENGTH_XOR).to_ne_bytes();
    std::ptr::copy_nonoverlapping(tag.as_ptr(), (pad_addr + n as usize) as *mut u8, SECURITY_LENGTH_FIELD_SIZE);
}

/// Verify a security-padded slot's trailing canary and length tag, returning
/// the address of the first mismatching byte, or `None` if intact.
///
/// # Safety
/// `pad_addr` must point to at least `n + SECURITY_LENGTH_FIELD_SIZE`
/// readable bytes previously written by [`write_security_padding`].
pub unsafe fn check_overflow(pad_addr: usize, n: u32, expected_len: u32) -> Option<usize> {
    for i in 0..n as usize {
        let byte = *((pad_addr + i) as *const u8);
        if byte != SECURITY_CANARY_BYTE {
            return Some(pad_addr + i);
        }
    }
    let mut tag = [0u8; SECURITY_LENGTH_FIELD_SIZE];
    std::ptr::copy_nonoverlapping((pad_addr + n as usize) as *const u8, tag.as_mut_ptr(), SECURITY_LENGTH_FIELD_SIZE);
    let stored_len = u32::from_ne_bytes(tag) ^ SECURITY_LENGTH_XOR;
    if stored_len != expected_len {
        return Some(pad_addr + n as usize);
    }
    None
}

/// Total trailing bytes a security-padded slot needs for `enable_security_padding = N`
pub fn security_padding_size(n: u32) -> usize {
    n as usize + SECURITY_LENGTH_FIELD_SIZE
}

/// Process-wide count of mark-and-sweep passes run, exposed for diagnostics
/// and tests rather than anything the allocation path consults.
static MARK_SWEEP_PASSES: AtomicU64 = AtomicU64::new(0);

/// Record that a mark-and-sweep pass completed
pub fn record_mark_sweep_pass() {
    MARK_SWEEP_PASSES.fetch_add(1, Ordering::Relaxed);
}

/// Number of mark-and-sweep passes run so far in this process
pub fn mark_sweep_pass_count() -> u64 {
    MARK_SWEEP_PASSES.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analytics_round_trips_when_both_enabled() {
        let config = InstrumentationConfig {
            enable_time_stamp: true,
            enable_stack_stamp: true,
            enable_security_padding: None,
        };
        let mut buf = [0u8; ANALYTICS_HEADER_SIZE];
        let addr = buf.as_mut_ptr() as usize;
        unsafe {
            stamp_analytics(addr, &config);
            let read = read_analytics(addr, &config);
            assert!(read.timestamp.is_some());
            assert!(read.stackstamp.is_some());
        }
    }

    #[test]
    fn analytics_disabled_reads_back_empty() {
        let config = InstrumentationConfig {
            enable_time_stamp: false,
            enable_stack_stamp: false,
            enable_security_padding: None,
        };
        let mut buf = [0u8; ANALYTICS_HEADER_SIZE];
        let addr = buf.as_mut_ptr() as usize;
        unsafe {
            stamp_analytics(addr, &config);
            let read = read_analytics(addr, &config);
            assert_eq!(read, AnalyticsHeader::default());
        }
    }

    #[test]
    fn intact_security_padding_reports_no_overflow() {
        let n = 8u32;
        let mut buf = vec![0u8; security_padding_size(n)];
        let addr = buf.as_mut_ptr() as usize;
        unsafe {
            write_security_padding(addr, n, 40);
            assert_eq!(check_overflow(addr, n, 40), None);
        }
    }

    #[test]
    fn corrupted_canary_byte_is_reported_at_its_address() {
        let n = 8u32;
        let mut buf = vec![0u8; security_padding_size(n)];
        let addr = buf.as_mut_ptr() as usize;
        unsafe {
            write_security_padding(addr, n, 40);
            *((addr + 3) as *mut u8) = 0x00;
            assert_eq!(check_overflow(addr, n, 40), Some(addr + 3));
        }
    }

    #[test]
    fn tampered_length_tag_is_reported_past_the_canary() {
        let n = 8u32;
        let mut buf = vec![0u8; security_padding_size(n)];
        let addr = buf.as_mut_ptr() as usize;
        unsafe {
            write_security_padding(addr, n, 40);
            assert_eq!(check_overflow(addr, n, 41), Some(addr + n as usize));
        }
    }
}
