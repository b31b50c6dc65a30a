//! Default knobs for the stress workload, overridable from the CLI.

/// Default worker thread count when `--threads` is omitted.
pub const DEFAULT_THREADS: usize = 4;

/// Default number of allocate/free operations per thread.
pub const DEFAULT_OPS_PER_THREAD: usize = 100_000;

/// Smallest object size the mixed-size workload draws from.
pub const MIN_OBJECT_SIZE: usize = 8;

/// Largest object size the mixed-size workload draws from.
pub const MAX_OBJECT_SIZE: usize = 8192;

/// Upper bound on an operation's pending-free window, so outstanding
/// allocations stay bounded instead of accumulating for the whole run.
pub const MAX_LIVE_PER_THREAD: usize = 4096;
