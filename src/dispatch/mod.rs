//! # Parallel Dispatch Loop
//!
//! Drives the attenuation kernel over a synthetic workload of segments.
//!
//! ## Scheduling
//!
//! A rayon pool of `nthreads` workers is started with `broadcast`, so every
//! worker runs exactly once and owns its generator, work vectors and flux
//! state for the whole phase. Workers claim `chunk` segment indices at a
//! time from a shared atomic cursor until the range is drained: a dynamic
//! schedule that rebalances when some workers stall on contended locks.
//!
//! Each segment draws a region and a fine interval uniformly at random and
//! calls the kernel. The iteration count is fixed by the range; there is no
//! early exit.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use crate::config::{RunConfig, RunOptions};
use crate::counters::{CounterHooks, NoCounters};
use crate::error::{MocError, Result};
use crate::exptable::ExpTable;
use crate::kernel::{AttenuationKernel, WorkVectors};
use crate::source::SourceStore;
use crate::stochastic::RandomGenerator;

// ============================================================================
// WORKER STATE
// ============================================================================

/// Everything one worker owns for the duration of a phase
#[derive(Debug, Clone)]
pub struct WorkerState {
    /// Worker id (unique across devices)
    pub worker: usize,
    pub rng: RandomGenerator,
    pub scratch: WorkVectors,
    /// Angular flux carried along the worker's segments
    pub flux_state: Vec<f32>,
}

impl WorkerState {
    /// Seed the generator, allocate work vectors and draw the initial ψ
    pub fn new(config: &RunConfig, options: &RunOptions, worker: usize) -> Self {
        let mut rng = RandomGenerator::for_worker(options.seed, worker);
        let mut flux_state = vec![0.0; config.egroups];
        rng.fill(&mut flux_state, options.fill);
        Self {
            worker,
            rng,
            scratch: WorkVectors::new(config.egroups),
            flux_state,
        }
    }

    /// Draw a (region, fine interval) pair
    #[inline]
    pub fn draw(&mut self, regions: usize, fine: usize) -> (usize, usize) {
        (self.rng.gen_range(0..regions), self.rng.gen_range(0..fine))
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// Timing and work distribution of one parallel phase
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Wall time of the parallel phase
    pub elapsed: Duration,
    /// Segments attenuated
    pub segments: u64,
    /// Segments per worker, in worker order
    pub per_worker: Vec<u64>,
}

impl RunReport {
    /// Segments per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.segments as f64 / secs } else { 0.0 }
    }

    /// Merge reports of phases that ran concurrently over `elapsed`
    pub fn combine(reports: &[RunReport], elapsed: Duration) -> Self {
        Self {
            elapsed,
            segments: reports.iter().map(|r| r.segments).sum(),
            per_worker: reports.iter().flat_map(|r| r.per_worker.iter().copied()).collect(),
        }
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Parallel driver for the attenuation kernel
#[derive(Debug, Clone)]
pub struct Dispatcher<'a> {
    config: &'a RunConfig,
    options: &'a RunOptions,
    kernel: AttenuationKernel,
}

impl<'a> Dispatcher<'a> {
    /// Validate the configuration and prepare the kernel
    pub fn new(config: &'a RunConfig, options: &'a RunOptions) -> Result<Self> {
        config.validate()?;
        options.validate()?;
        Ok(Self {
            config,
            options,
            kernel: AttenuationKernel::from_options(options),
        })
    }

    /// Replace the kernel (custom placeholder geometry)
    pub fn with_kernel(mut self, kernel: AttenuationKernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Attenuate `config.segments` segments
    pub fn run(
        &self,
        store: &SourceStore,
        table: &ExpTable,
        hooks: &dyn CounterHooks,
    ) -> Result<RunReport> {
        self.run_range(store, table, 0..self.config.segments, 0, hooks)
    }

    /// Attenuate the segment indices in `range`.
    ///
    /// Worker ids start at `worker_offset`, so several devices running
    /// side by side seed distinct streams.
    pub fn run_range(
        &self,
        store: &SourceStore,
        table: &ExpTable,
        range: Range<u64>,
        worker_offset: usize,
        hooks: &dyn CounterHooks,
    ) -> Result<RunReport> {
        if !store.matches(self.config) {
            return Err(MocError::Config {
                field: "source store",
                reason: "was allocated for a different configuration".to_string(),
            });
        }

        let nthreads = self.config.nthreads;
        let regions = self.config.source_regions;
        let fine = self.config.fine_axial_intervals;
        let chunk = self.options.chunk;
        let kernel = &self.kernel;
        let end = range.end;
        let cursor = AtomicU64::new(range.start);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .thread_name(move |i| format!("moc-worker-{}", worker_offset + i))
            .build()?;

        info!(
            segments = range.end.saturating_sub(range.start),
            threads = nthreads,
            chunk,
            "entering parallel phase"
        );
        hooks.phase_start(nthreads);
        let start = Instant::now();

        let per_worker = pool.broadcast(|ctx| {
            let worker = worker_offset + ctx.index();
            let mut state = WorkerState::new(self.config, self.options, worker);
            let mut done = 0u64;

            loop {
                let first = cursor.fetch_add(chunk, Ordering::Relaxed);
                if first >= end {
                    break;
                }
                let last = first.saturating_add(chunk).min(end);
                for _ in first..last {
                    let (region, fine_interval) = state.draw(regions, fine);
                    kernel.attenuate(
                        store,
                        region,
                        fine_interval,
                        &mut state.flux_state,
                        &mut state.scratch,
                        table,
                    );
                }
                done += last - first;
            }

            hooks.worker_finished(state.worker, done);
            done
        });

        let elapsed = start.elapsed();
        hooks.phase_end(elapsed);

        let report = RunReport {
            elapsed,
            segments: per_worker.iter().sum(),
            per_worker,
        };
        debug!(per_worker = ?report.per_worker, "per-worker segments");
        info!(
            segments = report.segments,
            secs = elapsed.as_secs_f64(),
            throughput = report.throughput(),
            "parallel phase complete"
        );
        Ok(report)
    }
}

/// Attenuate `config.segments` segments with default options (table
/// lookup, clock seeding, no counters)
pub fn run(config: &RunConfig, store: &SourceStore, table: &ExpTable) -> Result<RunReport> {
    let options = RunOptions::default();
    Dispatcher::new(config, &options)?.run(store, table, &NoCounters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FillMode, SeedPolicy};
    use crate::counters::SegmentCounters;

    fn setup(config: &RunConfig) -> (SourceStore, ExpTable) {
        let mut store = SourceStore::allocate(config).unwrap();
        store.random_fill(&mut RandomGenerator::new(1), FillMode::Uniform);
        (store, ExpTable::default())
    }

    #[test]
    fn test_segment_count_exact() {
        let config = RunConfig::new(10, 3, 5, 8, 12_345, 4);
        let (store, table) = setup(&config);
        let options = RunOptions::reproducible(3).with_chunk(7);
        let counters = SegmentCounters::new();

        let report = Dispatcher::new(&config, &options)
            .unwrap()
            .run(&store, &table, &counters)
            .unwrap();

        assert_eq!(report.segments, 12_345);
        assert_eq!(report.per_worker.len(), 4);
        assert_eq!(report.per_worker.iter().sum::<u64>(), 12_345);
        assert_eq!(counters.total(), 12_345);
        assert_eq!(counters.phases(), 1);
    }

    #[test]
    fn test_flux_changes_and_stays_finite() {
        let config = RunConfig::new(4, 2, 3, 4, 2_000, 2);
        let (store, table) = setup(&config);
        let before = store.flux_snapshot();

        run(&config, &store, &table).unwrap();

        let after = store.flux_snapshot();
        assert_ne!(before, after);
        assert!(after.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_mismatched_store_rejected() {
        let config = RunConfig::new(4, 2, 3, 4, 10, 1);
        let other = RunConfig::new(4, 2, 3, 8, 10, 1);
        let (store, table) = setup(&other);
        assert!(run(&config, &store, &table).is_err());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let config = RunConfig::new(1, 1, 1, 1, 10, 1);
        let options = RunOptions::default().with_chunk(0);
        assert!(Dispatcher::new(&config, &options).is_err());
    }

    #[test]
    fn test_empty_range() {
        let config = RunConfig::new(2, 1, 2, 2, 10, 2);
        let (store, table) = setup(&config);
        let options = RunOptions::reproducible(5);
        let before = store.flux_snapshot();

        let report = Dispatcher::new(&config, &options)
            .unwrap()
            .run_range(&store, &table, 10..10, 0, &NoCounters)
            .unwrap();

        assert_eq!(report.segments, 0);
        assert_eq!(store.flux_snapshot(), before);
    }

    #[test]
    fn test_worker_state_reproducible() {
        let config = RunConfig::new(5, 1, 4, 3, 1, 1);
        let options = RunOptions { seed: SeedPolicy::Fixed(8), ..Default::default() };
        let mut a = WorkerState::new(&config, &options, 2);
        let mut b = WorkerState::new(&config, &options, 2);
        assert_eq!(a.flux_state, b.flux_state);
        assert_eq!(a.flux_state.len(), 3);
        for _ in 0..100 {
            let (region, fine) = a.draw(5, 4);
            assert!(region < 5 && fine < 4);
            assert_eq!((region, fine), b.draw(5, 4));
        }
    }

    #[test]
    fn test_report_combine() {
        let a = RunReport { elapsed: Duration::from_secs(1), segments: 10, per_worker: vec![4, 6] };
        let b = RunReport { elapsed: Duration::from_secs(2), segments: 5, per_worker: vec![5] };
        let merged = RunReport::combine(&[a, b], Duration::from_secs(2));
        assert_eq!(merged.segments, 15);
        assert_eq!(merged.per_worker, vec![4, 6, 5]);
        assert!((merged.throughput() - 7.5).abs() < 1e-12);
    }
}
