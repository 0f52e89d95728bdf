//! Whole-range parallel prefetch.
//!
//! The range is split into one contiguous piece per reader. Each reader opens
//! its own handle and reads its piece straight into the staging buffer. The
//! stage completes only when every reader has finished; a single short read
//! fails the whole stage.

use anyhow::Result;
use std::path::Path;
use std::thread;

use super::signal::{FailureFlag, FailureKind};
use super::WorkerSet;
use crate::error::LoadError;
use crate::io::RangeReader;
use crate::plan;

/// Fills `staging` with `staging.len()` bytes starting at file offset `offset`.
pub(crate) fn run(
    path: &Path,
    offset: u64,
    staging: &mut [u8],
    readers: usize,
) -> std::result::Result<(), LoadError> {
    let length = staging.len();
    let chunk = plan::prefetch_chunk_len(length, readers);
    let ranges = plan::prefetch_ranges(length, readers);
    let failure = FailureFlag::new();

    tracing::debug!(length, readers = ranges.len(), chunk, "prefetch started");

    let spawn_error = thread::scope(|s| {
        let mut workers = WorkerSet::new("reader", FailureKind::Io);
        for (worker_id, (range, piece)) in ranges.iter().zip(staging.chunks_mut(chunk)).enumerate()
        {
            let position = offset + range.start as u64;
            let failure = &failure;
            workers.spawn(s, worker_id, failure, move || {
                if let Err(e) = read_piece(path, position, piece) {
                    tracing::error!(worker_id, error = %format!("{e:#}"), "prefetch read failed");
                    failure.raise(FailureKind::Io);
                }
            });
        }
        workers.join(&failure)
    });

    if let Some(e) = spawn_error {
        return Err(e);
    }
    match failure.to_error() {
        Some(e) => Err(e),
        None => {
            tracing::debug!(length, "prefetch complete");
            Ok(())
        }
    }
}

fn read_piece(path: &Path, position: u64, piece: &mut [u8]) -> Result<()> {
    let reader = RangeReader::open(path)?;
    reader.read_exact_at(piece, position)
}
