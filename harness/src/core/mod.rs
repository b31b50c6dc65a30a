//! Stress-worker core: one worker owns a shard of live allocations and
//! churns malloc/free against it, independent of every other worker.

use std::time::{Duration, Instant};

use crate::utils::random_object_size;

/// Summary a single worker reports back after its run completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerReport {
    /// Worker index, `0..thread_count`.
    pub worker_id: usize,
    /// Total malloc calls issued.
    pub allocations: u64,
    /// Total free calls issued (including the drain at shutdown).
    pub frees: u64,
    /// Calls to `malloc` that returned `NULL`.
    pub allocation_failures: u64,
    /// Wall-clock time the worker spent running.
    pub elapsed: Duration,
}

/// One stress worker: allocates up to `max_live` objects, freeing the
/// oldest whenever the shard is full, for `ops` total malloc attempts.
///
/// Performance target: at `ops = 100_000` and `max_live = 4096` this worker
/// should sustain well over 1M ops/sec on a single core, since every
/// operation after the shard fills is a malloc immediately paired with a
/// free of an object already resident in the calling thread's own pool.
pub struct StressWorker {
    worker_id: usize,
    ops: usize,
    max_live: usize,
}

impl StressWorker {
    /// Build a worker that will issue `ops` malloc attempts, keeping at
    /// most `max_live` objects outstanding at any time.
    pub fn new(worker_id: usize, ops: usize, max_live: usize) -> Self {
        Self {
            worker_id,
            ops,
            max_live,
        }
    }

    /// Run the shard to completion on the calling thread, returning a report.
    pub fn run(self) -> WorkerReport {
        let started = Instant::now();
        let mut live: Vec<*mut u8> = Vec::with_capacity(self.max_live);
        let mut report = WorkerReport {
            worker_id: self.worker_id,
            ..Default::default()
        };

        for _ in 0..self.ops {
            if live.len() >= self.max_live {
                let oldest = live.remove(0);
                unsafe { insmalloc::free(oldest) };
                report.frees += 1;
            }
            let size = random_object_size();
            let p = unsafe { insmalloc::malloc(size) };
            if p.is_null() {
                report.allocation_failures += 1;
                continue;
            }
            unsafe { std::ptr::write_bytes(p, (self.worker_id & 0xff) as u8, size.min(64)) };
            live.push(p);
            report.allocations += 1;
        }

        for p in live.drain(..) {
            unsafe { insmalloc::free(p) };
            report.frees += 1;
        }

        report.elapsed = started.elapsed();
        report
    }
}
