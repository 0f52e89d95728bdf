//! src/device/mod.rs
//!
//! Destinations that live outside host memory.
//!
//! A device destination is anything that can hand out independent copy
//! streams. Copies issued on one stream run in order; copies on different
//! streams may overlap. A copy is only guaranteed to have landed once its
//! stream (or the whole device) has been synchronized.
//!
//! - `emulated`: device memory simulated in host RAM with deferred copies
//! - `cuda` (feature `cuda`): raw device memory, one non-blocking stream per
//!   copy thread
//! - `torch` (feature `tch`): libtorch tensors, CUDA ones through `cuda`

#[cfg(feature = "cuda")]
pub mod cuda;
mod emulated;
#[cfg(feature = "tch")]
pub mod torch;

pub use emulated::{EmulatedDevice, EmulatedStream};

use anyhow::Result;

/// Caller-owned device memory of a fixed byte length.
///
/// `Sync` because every copy thread borrows the destination to open its own
/// stream.
pub trait DeviceBuffer: Sync {
    /// A copy stream that may hold on to source slices until synchronized.
    type Stream<'buf>: CopyStream<'buf>
    where
        Self: 'buf;

    /// Index of the device this memory lives on.
    fn ordinal(&self) -> usize;

    /// Size of the destination in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a new non-blocking stream targeting this buffer.
    fn create_stream<'buf>(&'buf self) -> Result<Self::Stream<'buf>>;

    /// Blocks until every outstanding operation on the device has finished.
    fn synchronize(&self) -> Result<()>;
}

/// An ordered queue of asynchronous host→device copies.
///
/// Source slices are borrowed for `'buf`, so the host bytes stay alive and
/// unmodified for as long as the stream may still read them.
pub trait CopyStream<'buf> {
    /// Enqueues a copy of `src` to byte offset `dst_offset` of the destination.
    fn copy_async(&mut self, dst_offset: usize, src: &'buf [u8]) -> Result<()>;

    /// Blocks until every copy enqueued on this stream has completed.
    fn synchronize(&mut self) -> Result<()>;
}
