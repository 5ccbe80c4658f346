//! # Source Region Store
//!
//! Per-region, per-axial-interval, per-energy-group source and flux data.
//!
//! ## Layout
//!
//! Each field is one contiguous buffer; a region is an offset into it.
//!
//! ```text
//! fine_source[(region·F + fine)·G + g]      F = fine intervals, G = groups
//! fine_flux  [(region·F + fine)·G + g]
//! sig_t      [region·G + g]
//! locks      [region·C + coarse_of(fine)]   C = coarse intervals
//! ```
//!
//! Flux lives at fine granularity while locks live at coarse granularity.
//! The fine → coarse map is fixed when the store is allocated:
//! `coarse_of(fine) = fine·C / F`.
//!
//! ## Mutation
//!
//! Fine source and cross sections are written only through `&mut self`
//! before the parallel phase, so shared readers never need a lock. Fine flux
//! is the one field updated concurrently, exclusively through
//! [`SourceStore::accumulate`] while holding the (region, coarse interval)
//! lock. Flux cells are `AtomicU32` holding `f32` bits; the mutex provides
//! the exclusion and the relaxed loads/stores inside it never race.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{FillMode, RunConfig};
use crate::error::{MocError, Result};
use crate::stochastic::RandomGenerator;

// ============================================================================
// STORE
// ============================================================================

/// Contiguous source, flux and cross-section storage for every region
#[derive(Debug)]
pub struct SourceStore {
    source_regions: usize,
    coarse_axial_intervals: usize,
    fine_axial_intervals: usize,
    egroups: usize,
    /// Fine source, immutable during the parallel phase
    fine_source: Vec<f32>,
    /// Fine flux, f32 bits, written under lock
    fine_flux: Vec<AtomicU32>,
    /// Total cross section per region and group
    sig_t: Vec<f32>,
    /// One lock per (region, coarse interval)
    locks: Vec<Mutex<()>>,
    /// Coarse interval owning each fine interval
    coarse_map: Vec<usize>,
}

/// Reserve exactly `len` elements, mapping failure to an allocation error
fn reserve<T>(what: &'static str, len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|source| MocError::Allocation {
        what,
        elements: len,
        source,
    })?;
    Ok(v)
}

impl SourceStore {
    /// Allocate zeroed storage for every region.
    ///
    /// One allocation per field. The configuration is validated first.
    pub fn allocate(config: &RunConfig) -> Result<Self> {
        config.validate()?;

        let n_fine = config.fine_len();
        let n_sig_t = config.sig_t_len();
        let n_locks = config.lock_count();

        let mut fine_source: Vec<f32> = reserve("fine source", n_fine)?;
        fine_source.resize(n_fine, 0.0);

        let mut fine_flux: Vec<AtomicU32> = reserve("fine flux", n_fine)?;
        fine_flux.extend((0..n_fine).map(|_| AtomicU32::new(0)));

        let mut sig_t: Vec<f32> = reserve("total cross section", n_sig_t)?;
        sig_t.resize(n_sig_t, 0.0);

        let mut locks: Vec<Mutex<()>> = reserve("region locks", n_locks)?;
        locks.extend((0..n_locks).map(|_| Mutex::new(())));

        let coarse_map = (0..config.fine_axial_intervals)
            .map(|fine| fine * config.coarse_axial_intervals / config.fine_axial_intervals)
            .collect();

        info!(
            regions = config.source_regions,
            fine = config.fine_axial_intervals,
            coarse = config.coarse_axial_intervals,
            egroups = config.egroups,
            mb = config.store_bytes() as f64 / (1024.0 * 1024.0),
            "allocated source store"
        );

        Ok(Self {
            source_regions: config.source_regions,
            coarse_axial_intervals: config.coarse_axial_intervals,
            fine_axial_intervals: config.fine_axial_intervals,
            egroups: config.egroups,
            fine_source,
            fine_flux,
            sig_t,
            locks,
            coarse_map,
        })
    }

    /// Populate source, flux and cross sections with random test data.
    ///
    /// The values are fixture data, not physical input. The same generator
    /// seed and mode reproduce the same store. Cross sections are drawn
    /// strictly positive under `Uniform`.
    pub fn random_fill(&mut self, rng: &mut RandomGenerator, mode: FillMode) {
        for (source, flux) in self.fine_source.iter_mut().zip(self.fine_flux.iter_mut()) {
            *source = rng.fill_value(mode);
            *flux.get_mut() = rng.fill_value(mode).to_bits();
        }
        rng.fill_positive(&mut self.sig_t, mode);
        debug!(?mode, "filled source store with random data");
    }

    /// Set every source, flux and cross-section entry to a constant
    pub fn fill_constant(&mut self, source: f32, flux: f32, sig_t: f32) {
        self.fine_source.fill(source);
        for cell in self.fine_flux.iter_mut() {
            *cell.get_mut() = flux.to_bits();
        }
        self.sig_t.fill(sig_t);
    }

    /// Overwrite the fine source of one (region, fine interval)
    pub fn set_fine_source(&mut self, region: usize, fine: usize, values: &[f32]) {
        assert_eq!(values.len(), self.egroups, "fine source needs one value per group");
        let start = self.fine_offset(region, fine);
        self.fine_source[start..start + self.egroups].copy_from_slice(values);
    }

    /// Overwrite the total cross section of one region
    pub fn set_sig_t(&mut self, region: usize, values: &[f32]) {
        assert_eq!(values.len(), self.egroups, "cross section needs one value per group");
        let start = self.sig_t_offset(region);
        self.sig_t[start..start + self.egroups].copy_from_slice(values);
    }

    // ------------------------------------------------------------------------
    // Offsets
    // ------------------------------------------------------------------------

    /// Start of (region, fine) in the fine source / flux buffers
    #[inline]
    pub fn fine_offset(&self, region: usize, fine: usize) -> usize {
        assert!(region < self.source_regions, "region {region} out of range");
        assert!(fine < self.fine_axial_intervals, "fine interval {fine} out of range");
        (region * self.fine_axial_intervals + fine) * self.egroups
    }

    /// Start of region in the cross-section buffer
    #[inline]
    pub fn sig_t_offset(&self, region: usize) -> usize {
        assert!(region < self.source_regions, "region {region} out of range");
        region * self.egroups
    }

    /// Coarse interval holding a fine interval
    #[inline]
    pub fn coarse_of(&self, fine: usize) -> usize {
        self.coarse_map[fine]
    }

    /// Lock guarding (region, fine)
    #[inline]
    pub fn lock_index(&self, region: usize, fine: usize) -> usize {
        assert!(region < self.source_regions, "region {region} out of range");
        region * self.coarse_axial_intervals + self.coarse_of(fine)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Offset view of one region
    pub fn region(&self, region: usize) -> SourceRegion<'_> {
        assert!(region < self.source_regions, "region {region} out of range");
        SourceRegion { store: self, region }
    }

    /// Fine source of (region, fine), one value per group
    #[inline]
    pub fn fine_source(&self, region: usize, fine: usize) -> &[f32] {
        let start = self.fine_offset(region, fine);
        &self.fine_source[start..start + self.egroups]
    }

    /// Total cross section of a region, one value per group
    #[inline]
    pub fn sig_t(&self, region: usize) -> &[f32] {
        let start = self.sig_t_offset(region);
        &self.sig_t[start..start + self.egroups]
    }

    /// Current fine flux of (region, fine), one value per group
    pub fn fine_flux(&self, region: usize, fine: usize) -> Vec<f32> {
        let start = self.fine_offset(region, fine);
        self.fine_flux[start..start + self.egroups]
            .iter()
            .map(|cell| f32::from_bits(cell.load(Ordering::Relaxed)))
            .collect()
    }

    /// Copy of the whole fine flux buffer
    pub fn flux_snapshot(&self) -> Vec<f32> {
        self.fine_flux
            .iter()
            .map(|cell| f32::from_bits(cell.load(Ordering::Relaxed)))
            .collect()
    }

    /// Whole fine source buffer
    pub fn fine_source_data(&self) -> &[f32] {
        &self.fine_source
    }

    /// Whole cross-section buffer
    pub fn sig_t_data(&self) -> &[f32] {
        &self.sig_t
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Add a tally into the fine flux of (region, fine).
    ///
    /// Holds the (region, coarse interval) lock for the whole group loop, so
    /// every call contributes exactly once and no update is lost.
    pub fn accumulate(&self, region: usize, fine: usize, tally: &[f32]) {
        assert_eq!(tally.len(), self.egroups, "tally needs one value per group");
        let start = self.fine_offset(region, fine);
        let cells = &self.fine_flux[start..start + self.egroups];

        let _guard = self.locks[self.lock_index(region, fine)].lock();
        for (cell, &t) in cells.iter().zip(tally) {
            let current = f32::from_bits(cell.load(Ordering::Relaxed));
            cell.store((current + t).to_bits(), Ordering::Relaxed);
        }
    }

    /// Replace the whole fine flux buffer (device gather)
    pub fn overwrite_flux(&mut self, flux: &[f32]) -> Result<()> {
        if flux.len() != self.fine_flux.len() {
            return Err(MocError::Config {
                field: "fine flux",
                reason: format!("expected {} values, got {}", self.fine_flux.len(), flux.len()),
            });
        }
        for (cell, &v) in self.fine_flux.iter_mut().zip(flux) {
            *cell.get_mut() = v.to_bits();
        }
        Ok(())
    }

    /// Independent copy with identical data and fresh locks
    pub fn replicate(&self) -> Result<Self> {
        let mut fine_source: Vec<f32> = reserve("fine source", self.fine_source.len())?;
        fine_source.extend_from_slice(&self.fine_source);

        let mut fine_flux: Vec<AtomicU32> = reserve("fine flux", self.fine_flux.len())?;
        fine_flux.extend(
            self.fine_flux
                .iter()
                .map(|cell| AtomicU32::new(cell.load(Ordering::Relaxed))),
        );

        let mut sig_t: Vec<f32> = reserve("total cross section", self.sig_t.len())?;
        sig_t.extend_from_slice(&self.sig_t);

        let mut locks: Vec<Mutex<()>> = reserve("region locks", self.locks.len())?;
        locks.extend((0..self.locks.len()).map(|_| Mutex::new(())));

        Ok(Self {
            source_regions: self.source_regions,
            coarse_axial_intervals: self.coarse_axial_intervals,
            fine_axial_intervals: self.fine_axial_intervals,
            egroups: self.egroups,
            fine_source,
            fine_flux,
            sig_t,
            locks,
            coarse_map: self.coarse_map.clone(),
        })
    }

    // ------------------------------------------------------------------------
    // Dimensions
    // ------------------------------------------------------------------------

    pub fn source_regions(&self) -> usize {
        self.source_regions
    }

    pub fn coarse_axial_intervals(&self) -> usize {
        self.coarse_axial_intervals
    }

    pub fn fine_axial_intervals(&self) -> usize {
        self.fine_axial_intervals
    }

    pub fn egroups(&self) -> usize {
        self.egroups
    }

    /// Number of locks
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Bytes in the source, flux and cross-section buffers
    pub fn size_bytes(&self) -> usize {
        (self.fine_source.len() + self.fine_flux.len() + self.sig_t.len())
            * std::mem::size_of::<f32>()
    }

    /// Does this store have the shape described by `config`?
    pub fn matches(&self, config: &RunConfig) -> bool {
        self.source_regions == config.source_regions
            && self.coarse_axial_intervals == config.coarse_axial_intervals
            && self.fine_axial_intervals == config.fine_axial_intervals
            && self.egroups == config.egroups
    }
}

// ============================================================================
// REGION VIEW
// ============================================================================

/// Borrowed view of one source region
#[derive(Debug, Clone, Copy)]
pub struct SourceRegion<'a> {
    store: &'a SourceStore,
    region: usize,
}

impl<'a> SourceRegion<'a> {
    /// Region index
    pub fn id(&self) -> usize {
        self.region
    }

    /// Fine source of one axial interval
    pub fn fine_source(&self, fine: usize) -> &'a [f32] {
        self.store.fine_source(self.region, fine)
    }

    /// Total cross section
    pub fn sig_t(&self) -> &'a [f32] {
        self.store.sig_t(self.region)
    }

    /// Current flux of one axial interval
    pub fn fine_flux(&self, fine: usize) -> Vec<f32> {
        self.store.fine_flux(self.region, fine)
    }

    /// Lock index guarding one axial interval
    pub fn lock_index(&self, fine: usize) -> usize {
        self.store.lock_index(self.region, fine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> RunConfig {
        RunConfig::new(3, 2, 5, 4, 10, 1)
    }

    #[test]
    fn test_allocation_sizes() {
        let store = SourceStore::allocate(&small()).unwrap();
        assert_eq!(store.fine_source_data().len(), 3 * 5 * 4);
        assert_eq!(store.flux_snapshot().len(), 3 * 5 * 4);
        assert_eq!(store.sig_t_data().len(), 3 * 4);
        assert_eq!(store.lock_count(), 6);
        assert!(store.flux_snapshot().iter().all(|&v| v == 0.0));
        assert!(store.matches(&small()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = small();
        config.source_regions = 0;
        assert!(SourceStore::allocate(&config).is_err());
    }

    #[test]
    fn test_offsets() {
        let store = SourceStore::allocate(&small()).unwrap();
        assert_eq!(store.fine_offset(0, 0), 0);
        assert_eq!(store.fine_offset(0, 1), 4);
        assert_eq!(store.fine_offset(1, 0), 20);
        assert_eq!(store.fine_offset(2, 4), (2 * 5 + 4) * 4);
        assert_eq!(store.sig_t_offset(2), 8);
    }

    #[test]
    fn test_coarse_map() {
        // 5 fine intervals over 2 coarse: 0,0,0,1,1
        let store = SourceStore::allocate(&small()).unwrap();
        let map: Vec<usize> = (0..5).map(|f| store.coarse_of(f)).collect();
        assert_eq!(map, vec![0, 0, 0, 1, 1]);
        assert_eq!(store.lock_index(1, 4), 3);

        // every coarse interval is used when coarse <= fine
        let store = SourceStore::allocate(&RunConfig::new(1, 9, 45, 1, 1, 1)).unwrap();
        let mut used = vec![false; 9];
        for f in 0..45 {
            used[store.coarse_of(f)] = true;
        }
        assert!(used.iter().all(|&u| u));

        // more coarse than fine: map stays in range
        let store = SourceStore::allocate(&RunConfig::new(1, 9, 5, 1, 1, 1)).unwrap();
        assert!((0..5).all(|f| store.coarse_of(f) < 9));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_region_out_of_range() {
        let store = SourceStore::allocate(&small()).unwrap();
        store.fine_source(3, 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_fine_out_of_range() {
        let store = SourceStore::allocate(&small()).unwrap();
        store.accumulate(0, 5, &[0.0; 4]);
    }

    #[test]
    fn test_random_fill_reproducible() {
        let mut a = SourceStore::allocate(&small()).unwrap();
        let mut b = SourceStore::allocate(&small()).unwrap();
        a.random_fill(&mut RandomGenerator::new(11), FillMode::Uniform);
        b.random_fill(&mut RandomGenerator::new(11), FillMode::Uniform);

        assert_eq!(a.fine_source_data(), b.fine_source_data());
        assert_eq!(a.sig_t_data(), b.sig_t_data());
        assert_eq!(a.flux_snapshot(), b.flux_snapshot());
        assert!(a.fine_source_data().iter().all(|&v| (0.0..1.0).contains(&v)));
        assert!(a.sig_t_data().iter().all(|&v| v > 0.0 && v <= 1.0));
    }

    #[test]
    fn test_truncated_fill_zeroes() {
        let mut store = SourceStore::allocate(&small()).unwrap();
        store.random_fill(&mut RandomGenerator::new(3), FillMode::IntegerTruncated);
        assert!(store.sig_t_data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_accumulate() {
        let mut store = SourceStore::allocate(&small()).unwrap();
        store.fill_constant(0.5, 1.0, 0.2);
        store.accumulate(1, 2, &[1.0, 2.0, 3.0, 4.0]);
        store.accumulate(1, 2, &[1.0, 1.0, 1.0, 1.0]);

        assert_eq!(store.fine_flux(1, 2), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(store.fine_flux(1, 1), vec![1.0; 4]);
        assert_eq!(store.region(1).fine_flux(2), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_region_view() {
        let mut store = SourceStore::allocate(&small()).unwrap();
        store.set_fine_source(2, 3, &[1.0, 2.0, 3.0, 4.0]);
        store.set_sig_t(2, &[0.1, 0.2, 0.3, 0.4]);

        let region = store.region(2);
        assert_eq!(region.id(), 2);
        assert_eq!(region.fine_source(3), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(region.sig_t(), &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(region.lock_index(3), 2 * 2 + 1);
        assert_eq!(store.fine_source(2, 2), &[0.0; 4]);
    }

    #[test]
    fn test_replicate_and_overwrite() {
        let mut store = SourceStore::allocate(&small()).unwrap();
        store.random_fill(&mut RandomGenerator::new(4), FillMode::Uniform);

        let copy = store.replicate().unwrap();
        assert_eq!(copy.fine_source_data(), store.fine_source_data());
        assert_eq!(copy.flux_snapshot(), store.flux_snapshot());
        assert_eq!(copy.lock_count(), store.lock_count());

        copy.accumulate(0, 0, &[1.0; 4]);
        assert_ne!(copy.flux_snapshot(), store.flux_snapshot());

        store.overwrite_flux(&copy.flux_snapshot()).unwrap();
        assert_eq!(copy.flux_snapshot(), store.flux_snapshot());
        assert!(store.overwrite_flux(&[0.0; 3]).is_err());
    }
}
