//! src/error.rs
//!
//! Error taxonomy surfaced to callers of the loader and the remap utilities.
//!
//! Worker threads build detailed `anyhow` errors (path, offset, worker id) and
//! log them where they happen. What crosses the public boundary is deliberately
//! coarse: one aggregate variant per failure class, reported after every
//! thread has joined.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoadError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// A worker could not open the file, or a positioned read came back short.
    #[error("I/O error reading tensor")]
    Io,

    /// A device stream could not be created, or a copy or synchronization failed.
    #[error("device transfer error")]
    Transfer,

    /// The request was rejected before any worker started.
    #[error("invalid load request: {reason}")]
    InvalidRequest { reason: String },

    /// A worker thread could not be spawned.
    #[error("failed to spawn loader thread: {reason}")]
    Spawn { reason: String },

    /// Remap inputs are inconsistent with the matrix they describe.
    #[error("shape mismatch: {reason}")]
    ShapeMismatch { reason: String },
}

impl LoadError {
    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn shape_mismatch(reason: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            reason: reason.into(),
        }
    }
}
