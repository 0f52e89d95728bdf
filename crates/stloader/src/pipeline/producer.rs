//! Striped block producers.
//!
//! Producer `i` owns blocks `i, i + R, i + 2R, …` where `R` is the configured
//! reader count. For each block it performs a positioned read into the
//! staging buffer, then hands the finished block to the work queue. A failed
//! read raises the shared flag and stops the producer without queuing the
//! block.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use std::path::Path;
use std::thread::Scope;

use super::signal::{FailureFlag, FailureKind};
use super::{Block, WorkerSet};
use crate::io::RangeReader;
use crate::plan;

/// Read-side parameters shared by every producer of one load.
#[derive(Clone, Copy)]
pub(crate) struct BlockJob<'a> {
    pub(crate) path: &'a Path,
    pub(crate) offset: u64,
    pub(crate) block_size: usize,
    pub(crate) stride: usize,
}

/// Splits `staging` into blocks, deals them out round-robin and spawns one
/// producer per non-empty share.
///
/// When `queue` is `None` the blocks are only read (host destinations).
pub(crate) fn spawn<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    job: BlockJob<'env>,
    staging: &'env mut [u8],
    queue: Option<&Sender<Block<'env>>>,
    failure: &'env FailureFlag,
) -> WorkerSet<'scope> {
    let length = staging.len();
    let active = plan::active_producers(length, job.block_size, job.stride);

    let mut shares: Vec<Vec<(usize, &'env mut [u8])>> = (0..active).map(|_| Vec::new()).collect();
    for (index, piece) in staging.chunks_mut(job.block_size).enumerate() {
        let start = plan::block_range(index, length, job.block_size).start;
        shares[index % job.stride].push((start, piece));
    }

    let mut workers = WorkerSet::new("producer", FailureKind::Io);
    for (worker_id, share) in shares.into_iter().enumerate() {
        let queue = queue.cloned();
        workers.spawn(scope, worker_id, failure, move || {
            match produce(job, share, queue, failure) {
                Ok(blocks) => tracing::debug!(worker_id, blocks, "producer finished"),
                Err(e) => {
                    tracing::error!(worker_id, error = %format!("{e:#}"), "block read failed");
                    failure.raise(FailureKind::Io);
                }
            }
        });
    }
    workers
}

/// Reads this worker's blocks in order. Returns how many were produced.
fn produce<'a>(
    job: BlockJob<'_>,
    share: Vec<(usize, &'a mut [u8])>,
    queue: Option<Sender<Block<'a>>>,
    failure: &FailureFlag,
) -> Result<usize> {
    let reader = RangeReader::open(job.path)?;
    let mut produced = 0;

    for (start, piece) in share {
        if failure.is_raised() {
            break;
        }
        reader
            .read_exact_at(piece, job.offset + start as u64)
            .with_context(|| format!("Block at range offset {} failed", start))?;

        if let Some(queue) = &queue {
            // Every copy thread is gone; only happens after a failure.
            if queue.send(Block { start, data: piece }).is_err() {
                break;
            }
        }
        produced += 1;
    }
    Ok(produced)
}
