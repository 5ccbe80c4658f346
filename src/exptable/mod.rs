//! # Exponential Table
//!
//! Piecewise-linear approximation of `1 - exp(-x)` so the attenuation
//! kernel can avoid a transcendental call per energy group.
//!
//! ## Construction
//!
//! The domain `[0, max_val)` is cut into `N` uniform intervals of width
//! `dx = max_val / N`. Interval `n` stores the tangent line of
//! `f(x) = 1 - exp(-x)` at its anchor `x_n = n·dx`:
//!
//! ```text
//! slope_n     = exp(-x_n)
//! intercept_n = 1 - (1 + x_n)·exp(-x_n)
//! ```
//!
//! The linear error of a tangent line is bounded by `f''·h²/2` with
//! `h ≤ dx/2`, which gives the precision-derived size
//! `N = max_val·sqrt(1 / (8·precision·0.01))`.
//!
//! ## Domain
//!
//! Inputs are optical depths and therefore non-negative. A negative input
//! trips a `debug_assert!`; release builds clamp it to `0.0`, which yields
//! `0.0`, the value of `1 - exp(-0)`.

use tracing::debug;

use crate::config::TableResolution;
use crate::constants::TABLE_MAX_VAL;

/// Tabulated tangent lines of `1 - exp(-x)`
#[derive(Debug, Clone, PartialEq)]
pub struct ExpTable {
    /// Interleaved (slope, intercept) pairs, length `2·n`
    values: Vec<f32>,
    /// Interval width
    dx: f32,
    /// Saturation threshold (`max_val - dx`)
    max_val: f32,
    /// Number of linear segments
    n: usize,
}

impl ExpTable {
    /// Build a table sized from a target precision.
    ///
    /// `N = floor(max_val·sqrt(1 / (8·precision·0.01)))`, at least one.
    pub fn build(precision: f32, max_val: f32) -> Self {
        let n = (max_val * (1.0 / (8.0 * precision * 0.01)).sqrt()).floor();
        Self::with_segments((n as usize).max(1), max_val)
    }

    /// Build a table with a hardcoded segment count
    pub fn with_segments(n: usize, max_val: f32) -> Self {
        assert!(n > 0, "exponential table needs at least one segment");
        assert!(max_val > 0.0, "exponential table domain must be positive");

        let dx = max_val / n as f32;
        let mut values = Vec::with_capacity(2 * n);
        for i in 0..n {
            let x = i as f32 * dx;
            let exponential = (-x).exp();
            values.push(exponential);
            values.push(1.0 - (1.0 + x) * exponential);
        }

        debug!(segments = n, dx, max_val, "built exponential table");

        Self {
            values,
            dx,
            max_val: max_val - dx,
            n,
        }
    }

    /// Build from a configured resolution over `[0, TABLE_MAX_VAL)`
    pub fn from_resolution(resolution: TableResolution) -> Self {
        match resolution {
            TableResolution::Fixed { segments } => Self::with_segments(segments, TABLE_MAX_VAL),
            TableResolution::Precision { precision } => Self::build(precision, TABLE_MAX_VAL),
        }
    }

    /// Approximate `1 - exp(-x)` for non-negative `x`.
    ///
    /// Returns exactly `1.0` for `x >= max_val()`.
    #[inline]
    pub fn interpolate(&self, x: f32) -> f32 {
        debug_assert!(x >= 0.0, "exponential table input must be non-negative, got {x}");
        let x = x.max(0.0);

        if x >= self.max_val {
            return 1.0;
        }

        let interval = 2 * (x / self.dx).round() as usize;
        self.values[interval] * x + self.values[interval + 1]
    }

    /// Number of linear segments
    pub fn len(&self) -> usize {
        self.n
    }

    /// Always false; a table has at least one segment
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Interval width
    pub fn dx(&self) -> f32 {
        self.dx
    }

    /// Saturation threshold
    pub fn max_val(&self) -> f32 {
        self.max_val
    }

    /// Raw interleaved (slope, intercept) pairs
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// (slope, intercept) of segment `n`
    pub fn segment(&self, n: usize) -> (f32, f32) {
        (self.values[2 * n], self.values[2 * n + 1])
    }

    /// Bytes moved when the table is broadcast to a device
    pub fn size_bytes(&self) -> usize {
        self.values.len() * std::mem::size_of::<f32>() + 2 * std::mem::size_of::<f32>()
    }
}

impl Default for ExpTable {
    fn default() -> Self {
        Self::from_resolution(TableResolution::default())
    }
}
