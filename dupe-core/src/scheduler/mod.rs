//! Cooperative cancellation and worker pools. Grounded on the teacher's
//! `src/work_queue.rs` (an `AtomicUsize`-indexed shared cursor handed to
//! several `thread::scope`d workers in `src/bin/imgdup.rs`) plus `rayon`
//! for the CPU-bound fan-out stages (hashing, scoring) the teacher already
//! pulls in for "all bins".

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Checked at every suspension point: each asset in a loop, each bucket
/// expansion, each BK-tree traversal step, each transaction step.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A shared, lock-free work cursor, one item handed out per `next()` call.
/// Grounded directly on the teacher's `WorkQueue<T>`.
pub struct WorkQueue<T> {
    work: Vec<T>,
    next: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new(work: Vec<T>) -> Self {
        Self {
            work,
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.work.len()
    }

    pub fn is_empty(&self) -> bool {
        self.work.is_empty()
    }

    pub fn next(&self) -> Option<&T> {
        let cur = self.next.fetch_add(1, Ordering::SeqCst);
        self.work.get(cur)
    }

    pub fn next_index(&self) -> Option<(usize, &T)> {
        let cur = self.next.fetch_add(1, Ordering::SeqCst);
        self.work.get(cur).map(|item| (cur, item))
    }
}

/// Observed memory pressure, 0.0 (idle) to 1.0 (saturated). The concrete
/// source (cgroup limits, `/proc/meminfo`, a platform API) is an external
/// concern; the scheduler only needs a number to react to.
pub trait MemoryPressureSource: Send + Sync {
    fn pressure(&self) -> f64;
}

/// Halves (and later restores) the active worker count once pressure crosses
/// `memory_pressure_threshold` (default 0.8).
pub struct AdaptiveConcurrency {
    base_workers: usize,
    threshold: f64,
    source: Arc<dyn MemoryPressureSource>,
}

impl AdaptiveConcurrency {
    pub fn new(base_workers: usize, threshold: f64, source: Arc<dyn MemoryPressureSource>) -> Self {
        assert!(base_workers > 0);
        Self {
            base_workers,
            threshold,
            source,
        }
    }

    /// Current recommended worker count: halved while pressure is above the
    /// threshold, restored to the base count as it drops back below.
    pub fn current_workers(&self) -> usize {
        if self.source.pressure() > self.threshold {
            (self.base_workers / 2).max(1)
        } else {
            self.base_workers
        }
    }
}
