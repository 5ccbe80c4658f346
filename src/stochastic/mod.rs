//! # Stochastic Module
//!
//! Per-worker pseudo-random numbers for the synthetic segment workload and
//! the test-data fill.
//!
//! Every worker owns its own generator, so the draw in the hot loop never
//! touches shared state. The generator implements [`rand::RngCore`] and is
//! driven through the [`rand::Rng`] extension methods (`gen_range`, `gen`).
//!
//! ## Seeding
//!
//! - [`SeedPolicy::Clock`]: wall-clock seconds times `(worker + 1)`. Two
//!   runs started in the same second draw identical streams; acceptable for
//!   a throughput benchmark, useless for reproducibility work.
//! - [`SeedPolicy::Fixed`]: base seed plus the worker index.

use rand::RngCore;

use crate::config::{FillMode, SeedPolicy};

/// Largest value of a 31-bit C `rand()`
const RAND_MAX: u32 = i32::MAX as u32;

/// Pseudo-random number generator (xoshiro256**)
///
/// Fast, high-quality PRNG suitable for Monte Carlo simulations.
/// Period: 2^256 - 1
#[derive(Debug, Clone)]
pub struct RandomGenerator {
    state: [u64; 4],
}

impl RandomGenerator {
    /// Create new RNG with seed
    pub fn new(seed: u64) -> Self {
        // Initialize state using SplitMix64
        let mut s = seed;
        let mut state = [0u64; 4];
        for slot in state.iter_mut() {
            s = s.wrapping_add(0x9e3779b97f4a7c15);
            let mut z = s;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
            *slot = z ^ (z >> 31);
        }
        Self { state }
    }

    /// Generator for one worker under the given policy
    pub fn for_worker(policy: SeedPolicy, worker: usize) -> Self {
        Self::new(worker_seed(policy, worker))
    }

    #[inline]
    fn step(&mut self) -> u64 {
        let result = self.state[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;

        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);

        result
    }

    /// Uniform f32 in [0, 1) from the top 24 bits
    #[inline]
    pub fn uniform_f32(&mut self) -> f32 {
        (self.step() >> 40) as f32 * (1.0 / (1u32 << 24) as f32)
    }

    /// Uniform f32 in (0, 1], never zero
    #[inline]
    pub fn positive_f32(&mut self) -> f32 {
        ((self.step() >> 40) + 1) as f32 * (1.0 / (1u32 << 24) as f32)
    }

    /// Draw one fill value under the given normalisation
    #[inline]
    pub fn fill_value(&mut self, mode: FillMode) -> f32 {
        match mode {
            FillMode::Uniform => self.uniform_f32(),
            FillMode::IntegerTruncated => {
                // integer division: 0 unless the draw hits RAND_MAX exactly
                let draw = (self.step() >> 33) as u32;
                (draw / RAND_MAX) as f32
            }
        }
    }

    /// Fill a slice with values under the given normalisation
    pub fn fill(&mut self, dest: &mut [f32], mode: FillMode) {
        for v in dest.iter_mut() {
            *v = self.fill_value(mode);
        }
    }

    /// Fill a slice with divisor-safe values: (0, 1] under `Uniform`.
    ///
    /// `IntegerTruncated` is left as is and still yields zeros.
    pub fn fill_positive(&mut self, dest: &mut [f32], mode: FillMode) {
        match mode {
            FillMode::Uniform => {
                for v in dest.iter_mut() {
                    *v = self.positive_f32();
                }
            }
            FillMode::IntegerTruncated => self.fill(dest, mode),
        }
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new(42)  // Reproducible default
    }
}

impl RngCore for RandomGenerator {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        (self.step() >> 32) as u32
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        self.step()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut chunks = dest.chunks_exact_mut(8);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.step().to_le_bytes());
        }
        let rest = chunks.into_remainder();
        if !rest.is_empty() {
            let bytes = self.step().to_le_bytes();
            rest.copy_from_slice(&bytes[..rest.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Seed for one worker
pub fn worker_seed(policy: SeedPolicy, worker: usize) -> u64 {
    match policy {
        SeedPolicy::Clock => {
            let secs = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            secs.wrapping_mul(worker as u64 + 1)
        }
        SeedPolicy::Fixed(base) => base.wrapping_add(worker as u64),
    }
}
