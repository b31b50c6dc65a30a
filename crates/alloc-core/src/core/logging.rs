//! Structured logging macros
//!
//! Thin wrappers over `tracing` so the rest of the engine logs through a
//! short, consistent name instead of spelling out the crate each time.
//! Native-only: this allocator has no WASM target.

/// Info level logging - general progress (context acquired, region allocated, ...)
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        tracing::info!($($arg)*);
    }};
}

/// Warning level logging - recoverable anomalies (starvation, double free, ...)
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        tracing::warn!($($arg)*);
    }};
}

/// Error level logging - unrecoverable conditions (corrupted slab, OS failure)
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
    }};
}

/// Debug level logging - per-operation detail, off by default
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        tracing::debug!($($arg)*);
    }};
}

/// Trace level logging - bitmap/link-level detail
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        tracing::trace!($($arg)*);
    }};
}
