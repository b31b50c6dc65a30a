//! Helpers shared by the stress workload and the scenario suite.

use rand::{rng, Rng};

use crate::constants::{MAX_OBJECT_SIZE, MIN_OBJECT_SIZE};

/// Draw a pseudo-random object size from `[MIN_OBJECT_SIZE, MAX_OBJECT_SIZE]`,
/// biased toward the small end to mimic a typical allocation-size histogram.
pub fn random_object_size() -> usize {
    let mut r = rng();
    if r.random_range(0..10) < 7 {
        r.random_range(MIN_OBJECT_SIZE..=256)
    } else {
        r.random_range(256..=MAX_OBJECT_SIZE)
    }
}

/// Format a byte count with the usual binary suffixes.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Format an operation count as a throughput, ops/sec.
pub fn format_throughput(ops: u64, elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    format!("{:.0} ops/sec", ops as f64 / secs)
}
