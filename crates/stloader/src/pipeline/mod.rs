//! Worker stages of a load.
//!
//! This module provides the threads that move bytes:
//! - `prefetch`: contiguous whole-range readers
//! - `producer`: striped block readers feeding the work queue
//! - `consumer`: device copy threads draining the work queue
//! - `signal`: the shared failure flag
//!
//! Every stage runs on scoped threads, so each borrow of the staging buffer
//! or destination ends before the stage returns. The staging buffer is split
//! into disjoint `&mut [u8]` pieces up front; a producer hands a piece over as
//! a shared [`Block`] only after its read has completed.

pub(crate) mod consumer;
pub(crate) mod prefetch;
pub(crate) mod producer;
pub(crate) mod signal;

use std::ops::Range;
use std::thread::{self, Scope, ScopedJoinHandle};

use crate::error::LoadError;
use signal::{FailureFlag, FailureKind};

/// A fully written block of the staging buffer, ready to be copied.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Block<'a> {
    /// Offset of the block within the requested range.
    pub(crate) start: usize,
    /// The block's bytes in the staging buffer.
    pub(crate) data: &'a [u8],
}

impl Block<'_> {
    /// Half-open byte range of the block within the requested range.
    pub(crate) fn range(&self) -> Range<usize> {
        self.start..self.start + self.data.len()
    }
}

/// Handles of one stage's workers plus any spawn failure.
pub(crate) struct WorkerSet<'scope> {
    stage: &'static str,
    kind: FailureKind,
    handles: Vec<ScopedJoinHandle<'scope, ()>>,
    spawn_error: Option<LoadError>,
}

impl<'scope> WorkerSet<'scope> {
    pub(crate) fn new(stage: &'static str, kind: FailureKind) -> Self {
        Self {
            stage,
            kind,
            handles: Vec::new(),
            spawn_error: None,
        }
    }

    /// Spawns a named worker. A spawn failure raises the flag and is kept for
    /// [`WorkerSet::join`]; later spawns on this set are skipped.
    pub(crate) fn spawn<'env, F>(
        &mut self,
        scope: &'scope Scope<'scope, 'env>,
        worker_id: usize,
        failure: &FailureFlag,
        body: F,
    ) where
        F: FnOnce() + Send + 'scope,
    {
        if self.spawn_error.is_some() {
            return;
        }
        let spawned = thread::Builder::new()
            .name(format!("stloader-{}-{}", self.stage, worker_id))
            .spawn_scoped(scope, body);
        match spawned {
            Ok(handle) => self.handles.push(handle),
            Err(e) => {
                tracing::error!(stage = self.stage, worker_id, error = %e, "failed to spawn worker");
                failure.raise(self.kind);
                self.spawn_error = Some(LoadError::Spawn {
                    reason: format!("{} worker {}: {}", self.stage, worker_id, e),
                });
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Joins every worker. A panicking worker counts as a failure of this
    /// stage's kind.
    pub(crate) fn join(self, failure: &FailureFlag) -> Option<LoadError> {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!(stage = self.stage, "worker panicked");
                failure.raise(self.kind);
            }
        }
        self.spawn_error
    }
}
