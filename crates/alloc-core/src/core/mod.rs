//! Core scaffolding: configuration and logging
//!
//! This module contains the ambient pieces every layer below it leans on —
//! the allocator's tunable configuration and its structured-logging macros.

/// Allocator configuration (address geometry overrides, budgets, instrumentation knobs)
pub mod config;

/// Structured logging macros used across the engine
pub mod logging;

pub use config::AllocatorConfig;
