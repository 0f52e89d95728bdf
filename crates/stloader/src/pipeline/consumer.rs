//! Device copy threads.
//!
//! Each copy thread opens its own stream on the destination, then takes one
//! block per wake-up from the work queue and issues an asynchronous copy to
//! the block's absolute offset. Taking a single block (rather than merging
//! adjacent ones) spreads the work evenly across streams.
//!
//! A copy thread exits when the failure flag is raised or when the queue is
//! empty and every sender is gone. Before exiting it always synchronizes its
//! own stream, so no thread leaves copies in flight.

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::thread::{self, Scope};

use super::signal::{FailureFlag, FailureKind};
use super::{Block, WorkerSet};
use crate::device::{CopyStream, DeviceBuffer};

/// Spawns `copy_threads` consumers draining `queue` into `device`.
pub(crate) fn spawn<'scope, 'env, D>(
    scope: &'scope Scope<'scope, 'env>,
    device: &'env D,
    queue: &Receiver<Block<'env>>,
    copy_threads: usize,
    failure: &'env FailureFlag,
) -> WorkerSet<'scope>
where
    D: DeviceBuffer,
{
    let mut workers = WorkerSet::new("copy", FailureKind::Transfer);
    for worker_id in 0..copy_threads {
        let queue = queue.clone();
        workers.spawn(scope, worker_id, failure, move || {
            match consume(worker_id, device, queue, failure) {
                Ok(blocks) => tracing::debug!(worker_id, blocks, "copy thread finished"),
                Err(e) => {
                    tracing::error!(worker_id, error = %format!("{e:#}"), "device copy failed");
                    failure.raise(FailureKind::Transfer);
                }
            }
        });
    }
    workers
}

/// Drains the queue on a private stream. Returns how many blocks were copied.
fn consume<'a, D>(
    worker_id: usize,
    device: &'a D,
    queue: Receiver<Block<'a>>,
    failure: &FailureFlag,
) -> Result<usize>
where
    D: DeviceBuffer,
{
    let mut stream = device.create_stream().with_context(|| {
        format!(
            "Copy thread {} could not create a stream on device {}",
            worker_id,
            device.ordinal()
        )
    })?;

    let mut copied = 0;
    let drained = drain(&mut stream, &queue, failure, &mut copied);
    drop(queue);

    let synced = stream
        .synchronize()
        .with_context(|| format!("Copy thread {} stream synchronization failed", worker_id));
    drained?;
    synced?;
    Ok(copied)
}

fn drain<'a, S>(
    stream: &mut S,
    queue: &Receiver<Block<'a>>,
    failure: &FailureFlag,
    copied: &mut usize,
) -> Result<()>
where
    S: CopyStream<'a>,
{
    while !failure.is_raised() {
        // Disconnected and empty: all producers are done.
        let Ok(block) = queue.recv() else {
            break;
        };
        if failure.is_raised() {
            break;
        }
        stream
            .copy_async(block.start, block.data)
            .with_context(|| format!("Copy of range {:?} failed", block.range()))?;
        *copied += 1;
        thread::yield_now();
    }
    Ok(())
}
