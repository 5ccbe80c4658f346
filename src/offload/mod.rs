//! # Offload Transport
//!
//! Moves the source store and exponential table to discrete devices, runs
//! the dispatch loop there and gathers the flux back. The numerical core
//! never depends on this module; a host-only run skips it entirely.
//!
//! ## Phases
//!
//! ```text
//! upload   : host → every device   (store buffers + table, broadcast)
//! launch   : each device attenuates its own slice of the segment range
//! download : every device → host   (fine flux)
//! ```
//!
//! Transfers never overlap with compute. Counter hooks see one phase per
//! launch, spanning every device.
//!
//! ## Gather policy
//!
//! Devices work on private copies of the whole store. `download` copies
//! each device's flux back in device order, so the last device's buffer is
//! what the host keeps. Reducing the per-device contributions into one flux
//! is not implemented; that is an open integration point for a transport
//! that needs it.

use std::ops::Range;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::{RunConfig, RunOptions};
use crate::counters::CounterHooks;
use crate::dispatch::{Dispatcher, RunReport};
use crate::error::{MocError, Result};
use crate::exptable::ExpTable;
use crate::source::SourceStore;

/// Completion signal of one device transfer
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub device: usize,
    /// Bytes moved
    pub bytes: usize,
    pub elapsed: Duration,
}

/// Data movement and launch on a set of devices
pub trait DeviceTransport {
    /// Number of devices driven by this transport
    fn device_count(&self) -> usize;

    /// Broadcast the store and table to every device.
    ///
    /// After completion each device holds data identical to the host copy.
    fn upload(
        &mut self,
        config: &RunConfig,
        store: &SourceStore,
        table: &ExpTable,
    ) -> Result<Vec<Completion>>;

    /// Run the dispatch loop on every device over its slice of the segments
    fn launch(&mut self, options: &RunOptions, hooks: &dyn CounterHooks) -> Result<Vec<RunReport>>;

    /// Gather device flux into the host store and release device memory
    fn download(&mut self, store: &mut SourceStore) -> Result<Vec<Completion>>;
}

/// Forwards per-worker events only; the launch brackets the phase itself
struct DeviceHooks<'h>(&'h dyn CounterHooks);

impl CounterHooks for DeviceHooks<'_> {
    fn worker_finished(&self, worker: usize, segments: u64) {
        self.0.worker_finished(worker, segments);
    }
}

/// Slice of `0..segments` handled by `device` out of `devices`.
///
/// Even split by device index; the remainder goes one segment each to the
/// lowest-index devices so the slices cover the whole range.
pub fn device_range(segments: u64, devices: usize, device: usize) -> Range<u64> {
    assert!(device < devices, "device {device} out of range");
    let n = devices as u64;
    let d = device as u64;
    let base = segments / n;
    let extra = segments % n;
    let start = d * base + d.min(extra);
    let len = base + u64::from(d < extra);
    start..start + len
}

// ============================================================================
// HOST-EMULATED DEVICES
// ============================================================================

/// Device-resident copy of the benchmark data
#[derive(Debug)]
struct DeviceImage {
    store: SourceStore,
    table: ExpTable,
}

/// Devices emulated in host memory, each with its own worker pool
#[derive(Debug)]
pub struct HostDevices {
    devices: usize,
    config: Option<RunConfig>,
    images: Vec<DeviceImage>,
}

impl HostDevices {
    pub fn new(devices: usize) -> Result<Self> {
        if devices == 0 {
            return Err(MocError::non_positive("devices"));
        }
        Ok(Self {
            devices,
            config: None,
            images: Vec::with_capacity(devices),
        })
    }

    /// Has data been uploaded and not yet downloaded?
    pub fn is_resident(&self) -> bool {
        !self.images.is_empty()
    }

    /// Flux currently held by one device
    pub fn device_flux(&self, device: usize) -> Option<Vec<f32>> {
        self.images.get(device).map(|image| image.store.flux_snapshot())
    }

    fn not_resident(device: usize) -> MocError {
        MocError::Device {
            device,
            reason: "no data resident; upload first".to_string(),
        }
    }
}

impl DeviceTransport for HostDevices {
    fn device_count(&self) -> usize {
        self.devices
    }

    fn upload(
        &mut self,
        config: &RunConfig,
        store: &SourceStore,
        table: &ExpTable,
    ) -> Result<Vec<Completion>> {
        config.validate()?;
        if !store.matches(config) {
            return Err(MocError::Config {
                field: "source store",
                reason: "was allocated for a different configuration".to_string(),
            });
        }

        let mut images = Vec::with_capacity(self.devices);
        let mut completions = Vec::with_capacity(self.devices);
        for device in 0..self.devices {
            let start = Instant::now();
            images.push(DeviceImage {
                store: store.replicate()?,
                table: table.clone(),
            });
            completions.push(Completion {
                device,
                bytes: store.size_bytes() + table.size_bytes(),
                elapsed: start.elapsed(),
            });
        }

        self.images = images;
        self.config = Some(config.clone());
        let bytes = store.size_bytes() + table.size_bytes();
        info!(devices = self.devices, bytes, "uploaded to devices");
        Ok(completions)
    }

    fn launch(&mut self, options: &RunOptions, hooks: &dyn CounterHooks) -> Result<Vec<RunReport>> {
        let config = self.config.as_ref().ok_or_else(|| Self::not_resident(0))?;
        let dispatcher = Dispatcher::new(config, options)?;
        let devices = self.devices;
        let segments = config.segments;
        let nthreads = config.nthreads;

        let device_hooks = DeviceHooks(hooks);
        hooks.phase_start(devices * nthreads);
        let start = Instant::now();

        let results: Vec<Result<RunReport>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .images
                .iter()
                .enumerate()
                .map(|(device, image)| {
                    let dispatcher = &dispatcher;
                    let device_hooks = &device_hooks;
                    scope.spawn(move || {
                        let range = device_range(segments, devices, device);
                        debug!(device, start = range.start, end = range.end, "launching device");
                        dispatcher.run_range(
                            &image.store,
                            &image.table,
                            range,
                            device * nthreads,
                            device_hooks,
                        )
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        hooks.phase_end(start.elapsed());
        results.into_iter().collect()
    }

    fn download(&mut self, store: &mut SourceStore) -> Result<Vec<Completion>> {
        if self.images.is_empty() {
            return Err(Self::not_resident(0));
        }

        let mut completions = Vec::with_capacity(self.images.len());
        for (device, image) in self.images.iter().enumerate() {
            let start = Instant::now();
            let flux = image.store.flux_snapshot();
            store.overwrite_flux(&flux).map_err(|err| MocError::Device {
                device,
                reason: err.to_string(),
            })?;
            completions.push(Completion {
                device,
                bytes: flux.len() * std::mem::size_of::<f32>(),
                elapsed: start.elapsed(),
            });
        }

        self.images.clear();
        self.config = None;
        info!(devices = completions.len(), "downloaded flux from devices");
        Ok(completions)
    }
}
