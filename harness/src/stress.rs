//! Multithreaded malloc/free stress run, driven through the public
//! `insmalloc` C ABI exactly as an external consumer would link against it.

use std::thread;
use std::time::Instant;

use crate::core::{StressWorker, WorkerReport};
use crate::utils::{format_bytes, format_throughput};

/// Parameters for one stress run.
#[derive(Debug, Clone, Copy)]
pub struct StressConfig {
    /// Number of worker threads, each owning its own shard of live allocations.
    pub threads: usize,
    /// Malloc attempts issued per worker.
    pub ops_per_thread: usize,
    /// Maximum objects a single worker keeps outstanding before it starts
    /// freeing its own oldest allocation to make room.
    pub max_live_per_thread: usize,
}

/// Aggregate counters across every worker in a run.
#[derive(Debug, Default)]
pub struct StressSummary {
    /// Per-worker reports, indexed by `worker_id`.
    pub workers: Vec<WorkerReport>,
    /// Committed physical bytes before the run started.
    pub used_physical_bytes_before: u64,
    /// Committed physical bytes after every worker's context was cleaned up.
    pub used_physical_bytes_after: u64,
}

impl StressSummary {
    /// Total malloc calls issued across every worker.
    pub fn total_allocations(&self) -> u64 {
        self.workers.iter().map(|w| w.allocations).sum()
    }

    /// Total free calls issued across every worker.
    pub fn total_frees(&self) -> u64 {
        self.workers.iter().map(|w| w.frees).sum()
    }

    /// Total malloc calls that returned `NULL`.
    pub fn total_failures(&self) -> u64 {
        self.workers.iter().map(|w| w.allocation_failures).sum()
    }
}

/// Run `config.threads` workers to completion, each on its own OS thread,
/// then run a global cleanup pass and report heap statistics before/after.
pub fn run(config: StressConfig) -> StressSummary {
    let used_physical_bytes_before = insmalloc::used_physical_bytes();
    let started = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|worker_id| {
            let worker = StressWorker::new(worker_id, config.ops_per_thread, config.max_live_per_thread);
            thread::spawn(move || worker.run())
        })
        .collect();

    let workers: Vec<WorkerReport> = handles
        .into_iter()
        .map(|h| h.join().expect("stress worker panicked"))
        .collect();

    insmalloc::perform_global_cleanup();
    let used_physical_bytes_after = insmalloc::used_physical_bytes();

    tracing::info!(
        elapsed = ?started.elapsed(),
        threads = config.threads,
        "stress run complete"
    );

    StressSummary {
        workers,
        used_physical_bytes_before,
        used_physical_bytes_after,
    }
}

/// Render a human-readable report of a completed stress run to stdout.
pub fn print_report(config: &StressConfig, summary: &StressSummary) {
    let total_elapsed = summary
        .workers
        .iter()
        .map(|w| w.elapsed)
        .max()
        .unwrap_or_default();

    println!("insmalloc stress run: {} threads, {} ops/thread", config.threads, config.ops_per_thread);
    println!(
        "  allocations: {}  frees: {}  failures: {}",
        summary.total_allocations(),
        summary.total_frees(),
        summary.total_failures()
    );
    println!(
        "  throughput:  {}",
        format_throughput(summary.total_allocations() + summary.total_frees(), total_elapsed)
    );
    println!(
        "  physical bytes: {} -> {}",
        format_bytes(summary.used_physical_bytes_before),
        format_bytes(summary.used_physical_bytes_after)
    );
    println!("  contexts registered: {}", insmalloc::context_count());
}
