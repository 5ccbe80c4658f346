//! # Run Configuration
//!
//! Problem sizes (`RunConfig`) and the explicit choices the benchmark makes
//! about table resolution, random fill, exponential evaluation and seeding
//! (`RunOptions`). Both are plain values passed by reference into every
//! component; nothing here is global.

use crate::constants::*;
use crate::error::{MocError, Result};

// ============================================================================
// PROBLEM SIZE
// ============================================================================

/// Problem dimensions consumed by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of source regions
    pub source_regions: usize,
    /// Coarse axial intervals per region (one lock each)
    pub coarse_axial_intervals: usize,
    /// Fine axial intervals per region
    pub fine_axial_intervals: usize,
    /// Energy groups
    pub egroups: usize,
    /// Total segments to attenuate
    pub segments: u64,
    /// Worker threads (per device when offloading)
    pub nthreads: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            source_regions: DEFAULT_SOURCE_REGIONS,
            coarse_axial_intervals: DEFAULT_COARSE_AXIAL_INTERVALS,
            fine_axial_intervals: DEFAULT_FINE_AXIAL_INTERVALS,
            egroups: DEFAULT_EGROUPS,
            segments: DEFAULT_SEGMENTS,
            nthreads: rayon::current_num_threads(),
        }
    }
}

impl RunConfig {
    /// Create a configuration with explicit sizes
    pub fn new(
        source_regions: usize,
        coarse_axial_intervals: usize,
        fine_axial_intervals: usize,
        egroups: usize,
        segments: u64,
        nthreads: usize,
    ) -> Self {
        Self {
            source_regions,
            coarse_axial_intervals,
            fine_axial_intervals,
            egroups,
            segments,
            nthreads,
        }
    }

    /// Builder: set segment count
    pub fn with_segments(mut self, segments: u64) -> Self {
        self.segments = segments;
        self
    }

    /// Builder: set thread count
    pub fn with_threads(mut self, nthreads: usize) -> Self {
        self.nthreads = nthreads;
        self
    }

    /// Reject zero sizes and derived sizes that overflow.
    ///
    /// Must pass before any allocation or parallel work.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&'static str, u64); 6] = [
            ("source_regions", self.source_regions as u64),
            ("coarse_axial_intervals", self.coarse_axial_intervals as u64),
            ("fine_axial_intervals", self.fine_axial_intervals as u64),
            ("egroups", self.egroups as u64),
            ("segments", self.segments),
            ("nthreads", self.nthreads as u64),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(MocError::non_positive(field));
            }
        }

        self.source_regions
            .checked_mul(self.fine_axial_intervals)
            .and_then(|n| n.checked_mul(self.egroups))
            .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
            .ok_or_else(|| MocError::overflow("fine_axial_intervals"))?;
        self.source_regions
            .checked_mul(self.coarse_axial_intervals)
            .ok_or_else(|| MocError::overflow("coarse_axial_intervals"))?;
        self.egroups
            .checked_mul(WORK_LANES)
            .ok_or_else(|| MocError::overflow("egroups"))?;

        Ok(())
    }

    /// Elements in each fine source / fine flux buffer
    pub fn fine_len(&self) -> usize {
        self.source_regions * self.fine_axial_intervals * self.egroups
    }

    /// Elements in the cross-section buffer
    pub fn sig_t_len(&self) -> usize {
        self.source_regions * self.egroups
    }

    /// Number of region/coarse-interval locks
    pub fn lock_count(&self) -> usize {
        self.source_regions * self.coarse_axial_intervals
    }

    /// Approximate resident size of the source store (bytes)
    pub fn store_bytes(&self) -> usize {
        (2 * self.fine_len() + self.sig_t_len()) * std::mem::size_of::<f32>()
    }
}

// ============================================================================
// RUN OPTIONS
// ============================================================================

/// How the exponential table resolution is chosen
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TableResolution {
    /// Hardcoded number of linear segments
    Fixed { segments: usize },
    /// N = floor(max_val * sqrt(1 / (8 * precision * 0.01)))
    Precision { precision: f32 },
}

impl Default for TableResolution {
    fn default() -> Self {
        Self::Fixed { segments: TABLE_FIXED_SEGMENTS }
    }
}

/// Normalisation used when filling test data with random values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Uniform in [0, 1); cross sections in (0, 1]
    #[default]
    Uniform,
    /// Integer `rand() / RAND_MAX`, which truncates every draw to zero.
    ///
    /// Kept only so the choice is explicit; it leaves cross sections at zero
    /// and the kernel then divides by zero.
    IntegerTruncated,
}

/// How the kernel evaluates 1 - exp(-tau)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpMode {
    /// Piecewise-linear table lookup
    #[default]
    Table,
    /// `1 - exp(-tau)` from libm
    Exact,
}

/// Worker seeding policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedPolicy {
    /// Wall clock seconds times (worker + 1).
    ///
    /// Runs started within the same second reuse seeds.
    #[default]
    Clock,
    /// Base seed plus worker index, reproducible across runs
    Fixed(u64),
}

/// Behavioural options for a benchmark run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Exponential table resolution
    pub table: TableResolution,
    /// Random fill normalisation
    pub fill: FillMode,
    /// Exponential evaluation
    pub exp_mode: ExpMode,
    /// Carry the angular flux state from segment to segment
    pub update_state: bool,
    /// Worker seeding
    pub seed: SeedPolicy,
    /// Seed for the source store test data
    pub data_seed: u64,
    /// Dynamic schedule chunk size
    pub chunk: u64,
    /// Emulated offload devices (0 = host threads only)
    pub devices: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            table: TableResolution::default(),
            fill: FillMode::default(),
            exp_mode: ExpMode::default(),
            update_state: false,
            seed: SeedPolicy::default(),
            data_seed: 0,
            chunk: DEFAULT_CHUNK,
            devices: 0,
        }
    }
}

impl RunOptions {
    /// Options with every random source pinned, for reproducible runs
    pub fn reproducible(seed: u64) -> Self {
        Self {
            seed: SeedPolicy::Fixed(seed),
            data_seed: seed,
            ..Default::default()
        }
    }

    /// Builder: choose exponential evaluation
    pub fn with_exp_mode(mut self, exp_mode: ExpMode) -> Self {
        self.exp_mode = exp_mode;
        self
    }

    /// Builder: emulate offload devices
    pub fn with_devices(mut self, devices: usize) -> Self {
        self.devices = devices;
        self
    }

    /// Builder: dynamic schedule chunk
    pub fn with_chunk(mut self, chunk: u64) -> Self {
        self.chunk = chunk;
        self
    }

    /// Reject option values the dispatcher cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.chunk == 0 {
            return Err(MocError::non_positive("chunk"));
        }
        match self.table {
            TableResolution::Fixed { segments } if segments == 0 => {
                Err(MocError::non_positive("table segments"))
            }
            TableResolution::Precision { precision } if precision.is_nan() || precision <= 0.0 => {
                Err(MocError::non_positive("table precision"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.source_regions, 2250);
        assert_eq!(config.coarse_axial_intervals, 9);
        assert_eq!(config.fine_axial_intervals, 5);
        assert_eq!(config.egroups, 100);
        assert_eq!(config.segments, 50_000_000);
        assert!(config.nthreads >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_rejected() {
        let base = RunConfig::new(4, 2, 3, 8, 100, 2);
        assert!(base.validate().is_ok());

        let mut c = base.clone();
        c.egroups = 0;
        assert!(matches!(c.validate(), Err(MocError::Config { field: "egroups", .. })));

        let c = base.clone().with_threads(0);
        assert!(matches!(c.validate(), Err(MocError::Config { field: "nthreads", .. })));

        let c = base.with_segments(0);
        assert!(matches!(c.validate(), Err(MocError::Config { field: "segments", .. })));
    }

    #[test]
    fn test_overflow_rejected() {
        let c = RunConfig::new(usize::MAX / 2, 1, 4, 4, 1, 1);
        assert!(matches!(c.validate(), Err(MocError::Config { .. })));
    }

    #[test]
    fn test_sizes() {
        let c = RunConfig::new(3, 2, 5, 10, 1, 1);
        assert_eq!(c.fine_len(), 150);
        assert_eq!(c.sig_t_len(), 30);
        assert_eq!(c.lock_count(), 6);
        assert_eq!(c.store_bytes(), (300 + 30) * 4);
    }

    #[test]
    fn test_options_validate() {
        assert!(RunOptions::default().validate().is_ok());
        assert!(RunOptions::default().with_chunk(0).validate().is_err());

        let mut o = RunOptions::default();
        o.table = TableResolution::Precision { precision: 0.0 };
        assert!(o.validate().is_err());
        o.table = TableResolution::Fixed { segments: 0 };
        assert!(o.validate().is_err());
    }

    #[test]
    fn test_reproducible() {
        let o = RunOptions::reproducible(7);
        assert_eq!(o.seed, SeedPolicy::Fixed(7));
        assert_eq!(o.data_seed, 7);
        assert_eq!(o.exp_mode, ExpMode::Table);
        assert!(!o.update_state);
    }
}
