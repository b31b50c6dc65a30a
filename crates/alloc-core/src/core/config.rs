//! Configuration for the allocation engine
//!
//! This module handles the tunables named throughout the component design:
//! the region space's physical-byte budget, region-cache depths, starvation
//! thresholds, and the instrumentation knobs from the external interface
//! (`enableTimeStamp`, `enableStackStamp`, `enableSecurityPadding`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants;

/// Top-level allocator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Region-space budget and caching tunables
    pub region_space: RegionSpaceConfig,

    /// Object introspection knobs (§6, "Environmental knobs")
    pub instrumentation: InstrumentationConfig,

    /// Heap controller tunables (starvation, cleanup worker)
    pub heap: HeapConfig,
}

/// Region-space configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSpaceConfig {
    /// Process-wide ceiling on committed physical bytes (`maxUsablePhysicalBytes`)
    pub max_usable_physical_bytes: u64,

    /// Maximum free-region stack depth per sizing id before regions are
    /// released back to the OS rather than cached (`disposeRegion`)
    pub region_cache_max_depth: usize,

    /// Optional directory to persist an arena-map snapshot for debugging.
    /// `None` means no snapshot is written.
    pub debug_snapshot_dir: Option<PathBuf>,
}

/// Instrumentation configuration — all knobs default off per §6
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentationConfig {
    /// Record an allocation timestamp into the object's analytics tail
    pub enable_time_stamp: bool,

    /// Record a stack digest into the object's analytics tail
    pub enable_stack_stamp: bool,

    /// Append `N + 4` bytes of canary per slot when `Some(N)`; `None` disables padding
    pub enable_security_padding: Option<u32>,
}

/// Heap-controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapConfig {
    /// Notification-list depth past which owner recovery is scheduled
    pub notified_recovery_threshold: usize,

    /// Maximum number of reference trackers that may be registered at once
    pub max_reference_trackers: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            region_space: RegionSpaceConfig::default(),
            instrumentation: InstrumentationConfig::default(),
            heap: HeapConfig::default(),
        }
    }
}

impl Default for RegionSpaceConfig {
    fn default() -> Self {
        Self {
            max_usable_physical_bytes: constants::DEFAULT_MAX_USABLE_PHYSICAL_BYTES,
            region_cache_max_depth: constants::REGION_CACHE_MAX_DEPTH,
            debug_snapshot_dir: None,
        }
    }
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            enable_time_stamp: false,
            enable_stack_stamp: false,
            enable_security_padding: None,
        }
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            notified_recovery_threshold: constants::NOTIFIED_RECOVERY_THRESHOLD,
            max_reference_trackers: constants::MAX_REFERENCE_TRACKERS,
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<AllocatorConfig, Box<dyn std::error::Error>> {
    let config_str = std::fs::read_to_string(path)?;
    let config: AllocatorConfig = toml::from_str(&config_str)?;
    Ok(config)
}

/// Load configuration from a file, falling back to defaults on any error
pub fn load_config_or_default(path: Option<&str>) -> AllocatorConfig {
    match path {
        Some(path) => match load_config(path) {
            Ok(config) => {
                tracing::info!("loaded allocator configuration from {}", path);
                config
            }
            Err(e) => {
                tracing::warn!(
                    "failed to load allocator config from {}: {}. using defaults",
                    path,
                    e
                );
                AllocatorConfig::default()
            }
        },
        None => {
            tracing::info!("no config file specified, using default allocator configuration");
            AllocatorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = AllocatorConfig::default();
        assert_eq!(
            cfg.region_space.max_usable_physical_bytes,
            constants::DEFAULT_MAX_USABLE_PHYSICAL_BYTES
        );
        assert!(!cfg.instrumentation.enable_time_stamp);
        assert!(!cfg.instrumentation.enable_stack_stamp);
        assert!(cfg.instrumentation.enable_security_padding.is_none());
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = AllocatorConfig::default();
        let s = toml::to_string(&cfg).expect("serialize");
        let back: AllocatorConfig = toml::from_str(&s).expect("deserialize");
        assert_eq!(
            back.region_space.max_usable_physical_bytes,
            cfg.region_space.max_usable_physical_bytes
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_config_or_default(Some("/nonexistent/path/insmalloc.toml"));
        assert_eq!(
            cfg.region_space.region_cache_max_depth,
            constants::REGION_CACHE_MAX_DEPTH
        );
    }
}
