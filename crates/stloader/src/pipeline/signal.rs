//! Shared failure flag for cooperative fail-fast shutdown.
//!
//! The flag only ever goes from clear to set. Every worker checks it at its
//! loop boundary and abandons remaining work once it is set; in-flight system
//! calls are allowed to finish. The kind of the first failure is kept so the
//! orchestrator can report a single aggregate error.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::error::LoadError;

/// Class of the failure that set the flag first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    Io,
    Transfer,
}

const KIND_NONE: u8 = 0;
const KIND_IO: u8 = 1;
const KIND_TRANSFER: u8 = 2;

#[derive(Debug, Default)]
pub(crate) struct FailureFlag {
    failed: AtomicBool,
    first_kind: AtomicU8,
}

impl FailureFlag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Only the first caller's kind is recorded.
    pub(crate) fn raise(&self, kind: FailureKind) {
        let code = match kind {
            FailureKind::Io => KIND_IO,
            FailureKind::Transfer => KIND_TRANSFER,
        };
        let _ = self
            .first_kind
            .compare_exchange(KIND_NONE, code, Ordering::AcqRel, Ordering::Acquire);
        self.failed.store(true, Ordering::Release);
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// The aggregate error for the caller, if any worker failed.
    pub(crate) fn to_error(&self) -> Option<LoadError> {
        if !self.is_raised() {
            return None;
        }
        match self.first_kind.load(Ordering::Acquire) {
            KIND_TRANSFER => Some(LoadError::Transfer),
            _ => Some(LoadError::Io),
        }
    }
}
