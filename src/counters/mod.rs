//! # Performance Counter Hooks
//!
//! Start/stop callbacks bracketing the parallel phase. Hooks observe the run
//! and never feed back into it, so enabling them cannot change the numbers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

/// Callbacks invoked at the boundaries of the parallel phase
pub trait CounterHooks: Send + Sync {
    /// Before any worker starts
    fn phase_start(&self, _workers: usize) {}

    /// A worker has drained its share of the segment range
    fn worker_finished(&self, _worker: usize, _segments: u64) {}

    /// After every worker has finished
    fn phase_end(&self, _elapsed: Duration) {}
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCounters;

impl CounterHooks for NoCounters {}

/// Per-worker segment counts and phase timing
#[derive(Debug, Default)]
pub struct SegmentCounters {
    per_worker: Mutex<BTreeMap<usize, u64>>,
    total: AtomicU64,
    phases: AtomicU64,
    busy_nanos: AtomicU64,
}

impl SegmentCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segments processed across all phases
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Completed parallel phases
    pub fn phases(&self) -> u64 {
        self.phases.load(Ordering::Relaxed)
    }

    /// Sum of phase wall times
    pub fn busy(&self) -> Duration {
        Duration::from_nanos(self.busy_nanos.load(Ordering::Relaxed))
    }

    /// Segments processed by each worker id
    pub fn per_worker(&self) -> BTreeMap<usize, u64> {
        self.per_worker.lock().clone()
    }

    /// Largest over smallest per-worker count (1.0 = perfectly balanced)
    pub fn imbalance(&self) -> f64 {
        let counts = self.per_worker.lock();
        let max = counts.values().copied().max().unwrap_or(0);
        let min = counts.values().copied().min().unwrap_or(0);
        if min == 0 {
            if max == 0 { 1.0 } else { f64::INFINITY }
        } else {
            max as f64 / min as f64
        }
    }
}

impl CounterHooks for SegmentCounters {
    fn phase_start(&self, workers: usize) {
        debug!(workers, "counters started");
    }

    fn worker_finished(&self, worker: usize, segments: u64) {
        *self.per_worker.lock().entry(worker).or_insert(0) += segments;
        self.total.fetch_add(segments, Ordering::Relaxed);
    }

    fn phase_end(&self, elapsed: Duration) {
        self.phases.fetch_add(1, Ordering::Relaxed);
        self.busy_nanos
            .fetch_add(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::Relaxed);
        let workers = self.per_worker.lock().len();
        let imbalance = self.imbalance();
        info!(segments = self.total(), workers, imbalance, "counter results");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_counters() {
        let counters = SegmentCounters::new();
        counters.phase_start(3);
        counters.worker_finished(0, 10);
        counters.worker_finished(1, 20);
        counters.worker_finished(0, 5);
        counters.phase_end(Duration::from_millis(3));

        assert_eq!(counters.total(), 35);
        assert_eq!(counters.phases(), 1);
        assert_eq!(counters.busy(), Duration::from_millis(3));
        assert_eq!(counters.per_worker().get(&0), Some(&15));
        assert!((counters.imbalance() - 20.0 / 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_imbalance_edges() {
        let counters = SegmentCounters::new();
        assert_eq!(counters.imbalance(), 1.0);
        counters.worker_finished(0, 0);
        counters.worker_finished(1, 4);
        assert!(counters.imbalance().is_infinite());
    }

    #[test]
    fn test_no_counters_is_inert() {
        let hooks: &dyn CounterHooks = &NoCounters;
        hooks.phase_start(4);
        hooks.worker_finished(0, 1);
        hooks.phase_end(Duration::ZERO);
    }
}
