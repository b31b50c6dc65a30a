//! Error types for the allocation engine
//!
//! Recoverable conditions (the first four variants) never propagate through
//! the public allocator surface; callers observe them only if they register
//! a callback via [`crate::heap::register_issue_callback`]. `CorruptedSlab`
//! is the sole fatal variant and is expected to abort the process.

use thiserror::Error;

/// Errors the allocation engine can encounter
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The region-space physical-byte budget or the OS reservation could not
    /// satisfy a request, even after starvation rescue was attempted once.
    #[error("no memory available to satisfy request of {requested} bytes")]
    MissingMemory {
        /// Size in bytes of the request that failed
        requested: usize,
    },

    /// A slot was freed whose availability bit was already set.
    #[error("double free at {address:#x}")]
    DoubleFree {
        /// Address passed to `free`
        address: usize,
    },

    /// An address passed to `free` does not map to any object region.
    #[error("free of out-of-bound address {address:#x}")]
    FreeOutOfBound {
        /// Address passed to `free`
        address: usize,
    },

    /// An address passed to `free` maps to a free arena slot.
    #[error("free of address {address:#x} in a non-allocated arena slot")]
    FreeInexisting {
        /// Address passed to `free`
        address: usize,
    },

    /// A slab scan could not find a known-present object. Fatal.
    #[error("corrupted slab detected at region {region_addr:#x}")]
    CorruptedSlab {
        /// Base address of the region found to be corrupted
        region_addr: usize,
    },

    /// Canary validation failed during `check_overflow`.
    #[error("security padding overflow at {corrupted_byte:#x}")]
    Overflow {
        /// Address of the first corrupted byte
        corrupted_byte: usize,
    },
}

impl AllocError {
    /// True for the errors that must never propagate past the allocator API:
    /// callers only ever learn of them through the issue callback registry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AllocError::CorruptedSlab { .. })
    }
}

/// Payload delivered to registered issue callbacks for a recoverable error.
///
/// Named `HeapIssue` rather than reusing `AllocError` directly because a
/// future disposition (e.g. a retry count) may be attached without changing
/// the error type malloc/free themselves return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapIssue {
    /// The underlying recoverable error
    pub error: AllocError,
}

impl HeapIssue {
    /// Wrap a recoverable error for dispatch to the issue callback registry
    pub fn new(error: AllocError) -> Self {
        Self { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupted_slab_is_not_recoverable() {
        let e = AllocError::CorruptedSlab { region_addr: 0x1000 };
        assert!(!e.is_recoverable());
    }

    #[test]
    fn double_free_is_recoverable() {
        let e = AllocError::DoubleFree { address: 0x2000 };
        assert!(e.is_recoverable());
    }
}
