//! # Simulator Module
//!
//! Benchmark driver combining all components: allocates and fills the
//! source store, builds the exponential table, runs the parallel phase on
//! host threads or emulated devices and reports throughput.

use std::time::Instant;

use tracing::info;

use crate::config::*;
use crate::counters::SegmentCounters;
use crate::dispatch::{Dispatcher, RunReport};
use crate::error::Result;
use crate::exptable::ExpTable;
use crate::offload::{DeviceTransport, HostDevices};
use crate::source::SourceStore;
use crate::stochastic::RandomGenerator;

/// Main MOC kernel benchmark
pub struct MocBenchmark {
    /// Problem sizes
    pub config: RunConfig,
    /// Behavioural options
    pub options: RunOptions,
    /// Source region data
    pub store: SourceStore,
    /// Exponential interpolation table
    pub table: ExpTable,
    /// Per-worker counters of every phase run so far
    pub counters: SegmentCounters,
    /// Report of each completed run
    pub reports: Vec<RunReport>,
}

impl MocBenchmark {
    /// Validate, allocate, fill and build everything the parallel phase needs
    pub fn new(config: RunConfig, options: RunOptions) -> Result<Self> {
        config.validate()?;
        options.validate()?;

        let mut store = SourceStore::allocate(&config)?;
        store.random_fill(&mut RandomGenerator::new(options.data_seed), options.fill);

        let table = ExpTable::from_resolution(options.table);
        info!(segments = table.len(), dx = table.dx(), "exponential table ready");

        Ok(Self {
            config,
            options,
            store,
            table,
            counters: SegmentCounters::new(),
            reports: Vec::new(),
        })
    }

    /// Default sizes with reproducible seeding
    pub fn reproducible(config: RunConfig, seed: u64) -> Result<Self> {
        Self::new(config, RunOptions::reproducible(seed))
    }

    /// Run the parallel phase once
    pub fn run(&mut self) -> Result<RunReport> {
        let report = if self.options.devices > 0 {
            self.run_offload()?
        } else {
            Dispatcher::new(&self.config, &self.options)?
                .run(&self.store, &self.table, &self.counters)?
        };
        self.reports.push(report.clone());
        Ok(report)
    }

    /// Upload, launch on every device, download
    fn run_offload(&mut self) -> Result<RunReport> {
        let mut devices = HostDevices::new(self.options.devices)?;
        devices.upload(&self.config, &self.store, &self.table)?;

        let start = Instant::now();
        let reports = devices.launch(&self.options, &self.counters)?;
        let elapsed = start.elapsed();

        devices.download(&mut self.store)?;
        Ok(RunReport::combine(&reports, elapsed))
    }

    /// Sum of the current fine flux (a cheap checksum of the run)
    pub fn flux_checksum(&self) -> f64 {
        self.store.flux_snapshot().iter().map(|&v| v as f64).sum()
    }

    /// Human-readable input and result summary
    pub fn summary(&self) -> String {
        let mut s = String::new();
        s.push_str("=== MOC Kernel Benchmark ===\n");
        s.push_str(&format!("Source regions:          {}\n", self.config.source_regions));
        s.push_str(&format!("Coarse axial intervals:  {}\n", self.config.coarse_axial_intervals));
        s.push_str(&format!("Fine axial intervals:    {}\n", self.config.fine_axial_intervals));
        s.push_str(&format!("Energy groups:           {}\n", self.config.egroups));
        s.push_str(&format!("Segments:                {}\n", self.config.segments));
        s.push_str(&format!("Threads:                 {}\n", self.config.nthreads));
        if self.options.devices > 0 {
            s.push_str(&format!("Devices:                 {}\n", self.options.devices));
        }
        s.push_str(&format!("Exp table segments:      {}\n", self.table.len()));
        s.push_str(&format!("Exponential:             {:?}\n", self.options.exp_mode));
        s.push_str(&format!(
            "Est. memory:             {:.2} MB\n",
            self.config.store_bytes() as f64 / (1024.0 * 1024.0)
        ));

        if let Some(report) = self.reports.last() {
            s.push_str("\n=== Results ===\n");
            let secs = report.elapsed.as_secs_f64();
            s.push_str(&format!("Runtime:                 {:.3} s\n", secs));
            s.push_str(&format!("Segments attenuated:     {}\n", report.segments));
            s.push_str(&format!("Segments/s:              {:.3e}\n", report.throughput()));
            s.push_str(&format!(
                "Time per segment:        {:.3} ns\n",
                if report.segments > 0 {
                    report.elapsed.as_nanos() as f64 / report.segments as f64
                } else {
                    0.0
                }
            ));
            s.push_str(&format!("Worker imbalance:        {:.3}\n", self.counters.imbalance()));
        }
        s
    }
}
