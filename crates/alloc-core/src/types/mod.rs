//! Shared types used across the allocation engine
//!
//! This module contains the identifiers, error kinds, the compile-time
//! object layout table, and the bit-packed object header — the vocabulary
//! every layer below the public API shares.

/// Narrow identifier newtypes (arena, region, layout, slot index)
pub mod ids;
/// Error kinds and the issue payload delivered to registered callbacks
pub mod error;
/// Compile-time object layout table and size-class lookup
pub mod layout;
/// Bit-packed object header
pub mod header;

pub use error::{AllocError, HeapIssue};
pub use header::ObjectHeader;
pub use ids::{ArenaId, LayoutId, RegionId, SlotIndex};
pub use layout::{layout_for_size, ObjectLayoutInfo, LayoutPolicy, OBJECT_LAYOUTS};
