//! Global constants used throughout the allocation engine
//!
//! This module contains compile-time constants that are shared across
//! multiple layers to ensure consistency and avoid magic numbers scattered
//! through the region space, descriptor allocator, and pool layers.

/// Total size of the process virtual address space this allocator manages (1TB).
///
/// Addresses decompose as `(arena_id: 24 bits, position: 40 bits)`; the arena
/// map has exactly `SPACE_SIZE / ARENA_SIZE` entries.
pub const SPACE_SIZE: u64 = 1 << 40;

/// Size of one arena: the unit of virtual address reservation (4GB).
pub const ARENA_SIZE: u64 = 1 << 32;

/// `log2(ARENA_SIZE)`, used to decompose an address into `(arena_id, position)`.
pub const ARENA_SIZE_L2: u32 = 32;

/// Number of arena slots in the arena map (`SPACE_SIZE / ARENA_SIZE`).
pub const ARENA_COUNT: u64 = SPACE_SIZE / ARENA_SIZE;

/// `log2` of the smallest region size a segmentation may use (64KB).
///
/// This is the OS page size this allocator assumes for commit/decommit
/// granularity; regions never get smaller than one page.
pub const PAGE_SIZE_L2: u32 = 16;

/// Size in bytes of one page (`1 << PAGE_SIZE_L2`).
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_L2;

/// Largest permitted region segmentation: a region may be as large as a
/// whole arena (one region per arena).
pub const MAX_SEGMENTATION_L2: u32 = ARENA_SIZE_L2;

/// Number of distinct sizing ids (commit-eagerness levels) per region class.
///
/// Sizing id 0 commits the full region eagerly; higher ids commit
/// progressively fewer of the region's pages up front, relying on the
/// OS adapter's commit step to back the rest on demand.
pub const SIZING_LEVELS: usize = 4;

/// Maximum number of object slots a single region may hold.
///
/// The availability bitmap is a single `u64`; this bound is asserted
/// against every generated [`crate::types::layout::ObjectLayoutInfo`] at
/// table-construction time.
pub const MAX_OBJECTS_PER_REGION: usize = 64;

/// Size in bytes of the fixed object-region header (§3, "Object region").
pub const OBJECT_REGION_HEAD_SIZE: usize = 64;

/// Size in bytes of the object header prefixing every allocated slot.
pub const OBJECT_HEADER_SIZE: usize = 8;

/// Cache line size used to pad hot atomic fields against false sharing.
pub const CACHE_LINE_SIZE: usize = 64;

/// Depth at which a per-layout `notifieds` stack schedules owner recovery.
///
/// This is the "best-effort backpressure, not a hard bound" threshold from
/// the spec's open questions: exceeding it schedules a cleanup, it never
/// truncates or drops notifications.
pub const NOTIFIED_RECOVERY_THRESHOLD: usize = 10;

/// Soft cap purely for diagnostics on how deep a `notifieds` stack may grow
/// before it is logged as anomalous.
pub const NOTIFIED_SOFT_CAP: usize = 1000;

/// Maximum depth of a sizing cache's free-region stack before regions are
/// released back to the OS instead of being cached.
pub const REGION_CACHE_MAX_DEPTH: usize = 1024;

/// Maximum number of reference trackers the heap controller can register.
pub const MAX_REFERENCE_TRACKERS: usize = 128;

/// Default process-wide committed-physical-bytes budget (8GB).
pub const DEFAULT_MAX_USABLE_PHYSICAL_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Size boundary below which a request is served by the "small" size-class table.
pub const SMALL_SIZE_LIMIT: usize = 1024;

/// Size boundary below which a request is served by the "medium" size-class table.
pub const MEDIUM_SIZE_LIMIT: usize = 32 * 1024;

/// Size boundary below which a request is served by the "large" size-class table.
/// Requests at or above this use the huge (one-region-per-object) layout.
pub const LARGE_SIZE_LIMIT: usize = MEDIUM_SIZE_LIMIT << 4;

/// Repeating byte pattern written into a security-padded slot's canary bytes.
pub const SECURITY_CANARY_BYTE: u8 = 0xAB;

/// XOR mask applied to the trailing length field of a security-padded slot,
/// so a naive memory scan does not find the raw length in the clear.
pub const SECURITY_LENGTH_XOR: u32 = 0xA5A5_A5A5;

/// Trailing bytes appended after the `N` canary bytes for the XOR-tagged length.
pub const SECURITY_LENGTH_FIELD_SIZE: usize = 4;

/// Size in bytes of the analytics header (`{timestamp: u64, stackstamp: u64}`)
/// appended after the object header when time-stamping or stack-stamping is on.
pub const ANALYTICS_HEADER_SIZE: usize = 16;
