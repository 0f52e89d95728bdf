//! src/loader.rs
//!
//! The `Loader` orchestrates one transfer of a contiguous byte range of a
//! file into a host or device destination.
//!
//! # Stages
//!
//! ```text
//!   file [offset, offset+length)
//!        │
//!        ├─► prefetch readers (R threads, contiguous split)     ── join ──┐
//!        │                                                                │
//!        └─► block producers (R threads, striped blocks) ──► work queue   │
//!                                                               │         │
//!                                      copy threads (C streams) ◄┘        │
//!                                               │                         │
//!                                  device memory ◄── full device sync ◄───┘
//! ```
//!
//! Host destinations skip the queue entirely: the destination slice is the
//! staging buffer and producers only read. Device destinations get a staging
//! buffer owned by the call and released before the final device
//! synchronization.
//!
//! Any worker failure raises a shared flag; everyone else stops at their next
//! check. The caller sees a single aggregate error once all threads joined,
//! and the destination contents are unspecified.

use anyhow::Context;
use crossbeam_channel::{bounded, unbounded};
use std::path::Path;
use std::thread;

use crate::config::{LoaderConfig, ReadStrategy};
use crate::device::DeviceBuffer;
use crate::error::{LoadError, Result};
use crate::pipeline::producer::{self, BlockJob};
use crate::pipeline::signal::FailureFlag;
use crate::pipeline::{consumer, prefetch};

/// Where the loaded bytes end up. Owned by the caller in both cases.
pub enum Destination<'a, D> {
    /// Host memory of exactly `length` bytes.
    Host(&'a mut [u8]),
    /// Device memory of exactly `length` bytes.
    Device(&'a D),
}

/// One load: `length` bytes at `offset` of the file at `path`.
pub struct TransferRequest<'a, D> {
    pub path: &'a Path,
    pub offset: u64,
    pub length: usize,
    pub destination: Destination<'a, D>,
}

/// Parallel range loader.
///
/// A `Loader` only holds configuration; every call spawns and joins its own
/// threads, so one loader can serve many concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct Loader {
    config: LoaderConfig,
}

impl Loader {
    /// Creates a loader, rejecting configurations that cannot make progress.
    pub fn new(config: LoaderConfig) -> anyhow::Result<Self> {
        config
            .validate()
            .context("Invalid loader configuration")?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Runs one transfer request.
    pub fn load<D: DeviceBuffer>(&self, request: TransferRequest<'_, D>) -> Result<()> {
        let TransferRequest {
            path,
            offset,
            length,
            destination,
        } = request;

        match destination {
            Destination::Host(buffer) => {
                if buffer.len() != length {
                    return Err(LoadError::invalid_request(format!(
                        "host destination holds {} bytes, request is for {}",
                        buffer.len(),
                        length
                    )));
                }
                self.load_into_host(path, offset, buffer)
            }
            Destination::Device(device) => self.load_into_device(path, offset, length, device),
        }
    }

    /// Loads `destination.len()` bytes at `offset` directly into host memory.
    pub fn load_into_host(
        &self,
        path: impl AsRef<Path>,
        offset: u64,
        destination: &mut [u8],
    ) -> Result<()> {
        let path = path.as_ref();
        validate_range(offset, destination.len())?;

        tracing::debug!(
            path = %path.display(),
            offset,
            length = destination.len(),
            "loading into host memory"
        );

        if self.config.read_strategy == ReadStrategy::TwoPass {
            prefetch::run(path, offset, destination, self.config.reader_threads)?;
        }

        let failure = FailureFlag::new();
        let job = self.block_job(path, offset);
        let spawn_error = thread::scope(|s| {
            producer::spawn(s, job, destination, None, &failure).join(&failure)
        });

        if let Some(e) = spawn_error {
            return Err(e);
        }
        failure.to_error().map_or(Ok(()), Err)
    }

    /// Loads `length` bytes at `offset` into `device` through a staging buffer.
    pub fn load_into_device<D: DeviceBuffer>(
        &self,
        path: impl AsRef<Path>,
        offset: u64,
        length: usize,
        device: &D,
    ) -> Result<()> {
        let path = path.as_ref();
        validate_range(offset, length)?;
        if device.len() != length {
            return Err(LoadError::invalid_request(format!(
                "device destination holds {} bytes, request is for {}",
                device.len(),
                length
            )));
        }

        tracing::debug!(
            path = %path.display(),
            offset,
            length,
            device = device.ordinal(),
            "loading into device memory"
        );

        let mut staging = vec![0u8; length];
        if self.config.read_strategy == ReadStrategy::TwoPass {
            prefetch::run(path, offset, &mut staging, self.config.reader_threads)?;
        }

        let failure = FailureFlag::new();
        let job = self.block_job(path, offset);
        let (tx, rx) = match self.config.queue_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };

        let spawn_error = thread::scope(|s| {
            let producers = producer::spawn(s, job, &mut staging, Some(&tx), &failure);
            let consumers = consumer::spawn(s, device, &rx, self.config.copy_threads, &failure);
            drop(rx);
            tracing::debug!(
                producers = producers.len(),
                copy_threads = consumers.len(),
                "block stage running"
            );

            let producer_error = producers.join(&failure);
            // Completion: no sender is left once producers are joined.
            drop(tx);
            let consumer_error = consumers.join(&failure);
            producer_error.or(consumer_error)
        });

        if let Some(e) = spawn_error {
            return Err(e);
        }
        if let Some(e) = failure.to_error() {
            return Err(e);
        }

        drop(staging);
        device.synchronize().map_err(|e| {
            tracing::error!(device = device.ordinal(), error = %format!("{e:#}"), "device synchronization failed");
            LoadError::Transfer
        })?;

        tracing::debug!(length, device = device.ordinal(), "device load complete");
        Ok(())
    }

    fn block_job<'a>(&self, path: &'a Path, offset: u64) -> BlockJob<'a> {
        BlockJob {
            path,
            offset,
            block_size: self.config.block_size,
            stride: self.config.reader_threads,
        }
    }
}

fn validate_range(offset: u64, length: usize) -> Result<()> {
    if length == 0 {
        return Err(LoadError::invalid_request("length must be > 0"));
    }
    if offset.checked_add(length as u64).is_none() {
        return Err(LoadError::invalid_request(format!(
            "offset {} + length {} overflows",
            offset, length
        )));
    }
    Ok(())
}
