//! # alloc-core
//!
//! Segregated-fit, multi-threaded memory allocation engine: arenas, regions,
//! object pools, and the heap controller that ties them together behind a
//! single [`heap::HeapDescriptor`] singleton.

#![warn(missing_docs)]

/// Core scaffolding: configuration and logging
pub mod core;

/// System constants: address geometry, size-class ladders, budgets
pub mod constants;

/// Type definitions: ids, errors, object headers, layout tables
pub mod types;

/// OS adapter: reserve/commit/decommit/release virtual pages
pub mod os;

/// Region space: arenas, arena descriptors, region claim/release
pub mod region_space;

/// Descriptor allocator: buddy-style allocator for management structures
pub mod descriptor_alloc;

/// Object region header and its bitmap operations
pub mod object_region;

/// Object pools: central and per-context local pool state
pub mod pool;

/// Heap controller: the singleton tying every layer together
pub mod heap;

/// Instrumentation: analytics headers, security padding, tracker bookkeeping
pub mod instrumentation;

pub use core::AllocatorConfig;
pub use heap::{HeapDescriptor, MemoryContext};
pub use types::{AllocError, HeapIssue};
