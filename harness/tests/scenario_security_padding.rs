//! The `INSMALLOC_CONFIG`-driven singleton is initialized lazily on first use
//! and fixed for the life of the process, so enabling security padding has to
//! happen before anything else in this binary touches `insmalloc`. Integration
//! tests each compile to their own process, which is what makes this safe to
//! do as a module-level side effect here and nowhere else in the suite.

use std::io::Write;

fn write_config_with_padding() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config");
    write!(
        file,
        r#"
[region_space]
max_usable_physical_bytes = 8589934592
region_cache_max_depth = 16

[instrumentation]
enable_time_stamp = false
enable_stack_stamp = false
enable_security_padding = 64

[heap]
notified_recovery_threshold = 64
max_reference_trackers = 256
"#
    )
    .expect("write temp config");
    file
}

#[test]
fn security_padding_detects_trailing_overflow() {
    let config_file = write_config_with_padding();
    std::env::set_var("INSMALLOC_CONFIG", config_file.path());

    let size = 40usize;
    let p = unsafe { insmalloc::malloc(size) };
    assert!(!p.is_null(), "allocation failed");
    unsafe { std::ptr::write_bytes(p, 0, size) };

    let corrupted = unsafe { insmalloc::check_overflow(p) };
    assert!(corrupted.is_null(), "padding reported corrupt before any overflow");

    // Writing past the slot's full usable span (not just the requested
    // `size`) lands in the canary: `msize` reports where that span ends.
    let usable = unsafe { insmalloc::msize(p) };
    unsafe { std::ptr::write_bytes(p.add(usable), 0xAA, 1) };

    let corrupted = unsafe { insmalloc::check_overflow(p) };
    assert!(!corrupted.is_null(), "expected the overflow write to be detected");
    assert_eq!(corrupted as usize, unsafe { p.add(usable) } as usize);

    unsafe { insmalloc::free(p) };
}
