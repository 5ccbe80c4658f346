//! # MOCSIM-RS
//!
//! Command-line driver for the MOC attenuation kernel benchmark.

use std::process;

use clap::{value_parser, Parser};
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use mocsim_rs::*;

#[derive(Parser, Debug)]
#[command(name = "mocsim", version)]
#[command(about = "Method-of-Characteristics attenuation kernel benchmark")]
struct Args {
    /// Number of source regions
    #[arg(
        long,
        default_value_t = constants::DEFAULT_SOURCE_REGIONS as u64,
        value_parser = value_parser!(u64).range(1..)
    )]
    regions: u64,

    /// Coarse axial intervals per region (lock granularity)
    #[arg(
        long,
        default_value_t = constants::DEFAULT_COARSE_AXIAL_INTERVALS as u64,
        value_parser = value_parser!(u64).range(1..)
    )]
    coarse: u64,

    /// Fine axial intervals per region
    #[arg(
        long,
        default_value_t = constants::DEFAULT_FINE_AXIAL_INTERVALS as u64,
        value_parser = value_parser!(u64).range(1..)
    )]
    fine: u64,

    /// Energy groups
    #[arg(
        long,
        default_value_t = constants::DEFAULT_EGROUPS as u64,
        value_parser = value_parser!(u64).range(1..)
    )]
    egroups: u64,

    /// Segments to attenuate
    #[arg(
        long,
        default_value_t = constants::DEFAULT_SEGMENTS,
        value_parser = value_parser!(u64).range(1..)
    )]
    segments: u64,

    /// Worker threads (default: all cores)
    #[arg(long, value_parser = value_parser!(u64).range(1..))]
    threads: Option<u64>,

    /// Emulated offload devices (0 = host threads only)
    #[arg(long, default_value_t = 0)]
    devices: usize,

    /// Segments claimed per scheduling step
    #[arg(
        long,
        default_value_t = constants::DEFAULT_CHUNK,
        value_parser = value_parser!(u64).range(1..)
    )]
    chunk: u64,

    /// Fixed worker seed (default: wall clock)
    #[arg(long)]
    seed: Option<u64>,

    /// Seed for the random source data
    #[arg(long, default_value_t = 0)]
    data_seed: u64,

    /// Hardcoded exponential table size
    #[arg(long, conflicts_with = "precision", value_parser = value_parser!(u64).range(1..))]
    table_segments: Option<u64>,

    /// Derive the exponential table size from a target precision
    #[arg(long)]
    precision: Option<f32>,

    /// Evaluate 1 - exp(-tau) exactly instead of via the table
    #[arg(long)]
    exact_exp: bool,

    /// Carry the angular flux state between segments
    #[arg(long)]
    update_state: bool,

    /// Reproduce the integer-division random fill (all zeros)
    #[arg(long)]
    truncated_fill: bool,
}

impl Args {
    fn config(&self) -> RunConfig {
        RunConfig::new(
            self.regions as usize,
            self.coarse as usize,
            self.fine as usize,
            self.egroups as usize,
            self.segments,
            self.threads.map_or_else(rayon::current_num_threads, |t| t as usize),
        )
    }

    fn options(&self) -> RunOptions {
        let table = match (self.table_segments, self.precision) {
            (Some(segments), _) => TableResolution::Fixed { segments: segments as usize },
            (None, Some(precision)) => TableResolution::Precision { precision },
            (None, None) => TableResolution::default(),
        };
        RunOptions {
            table,
            fill: if self.truncated_fill { FillMode::IntegerTruncated } else { FillMode::Uniform },
            exp_mode: if self.exact_exp { ExpMode::Exact } else { ExpMode::Table },
            update_state: self.update_state,
            seed: self.seed.map_or(SeedPolicy::Clock, SeedPolicy::Fixed),
            data_seed: self.data_seed,
            chunk: self.chunk,
            devices: self.devices,
        }
    }
}

/// 2 for rejected input or failed allocation, 1 for runtime failures
fn exit_code(err: &MocError) -> i32 {
    if err.is_fatal_setup() { 2 } else { 1 }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    init_logging();
    let args = Args::parse();

    println!("{}", info());
    println!();

    let mut bench = match MocBenchmark::new(args.config(), args.options()) {
        Ok(bench) => bench,
        Err(e) => {
            error!("setup failed: {}", e);
            process::exit(exit_code(&e));
        }
    };

    println!("Running {} segments...", bench.config.segments);
    if let Err(e) = bench.run() {
        error!("run failed: {}", e);
        process::exit(exit_code(&e));
    }

    println!();
    println!("{}", bench.summary());
    println!("Flux checksum: {:.6e}", bench.flux_checksum());
}
