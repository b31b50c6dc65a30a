//! # insmalloc harness
//!
//! Standalone stress and scenario runner for the `insmalloc` allocator,
//! linked against the crate's public C ABI the same way any external
//! consumer would.

#![warn(missing_docs)]

/// Stress-worker core: per-thread malloc/free churn against a private shard.
pub mod core;

/// Default knobs for the stress workload.
pub mod constants;

/// Helpers shared by the stress workload and the scenario suite.
pub mod utils;

/// Multithreaded malloc/free stress run and reporting.
pub mod stress;

/// The concrete allocator scenarios (S1-S5) exercised as both a CLI check
/// and an integration-test suite.
pub mod scenarios;
