//! Raw CUDA device memory as a load destination.
//!
//! Every copy thread binds the device context, creates its own non-blocking
//! stream and issues `cuMemcpyHtoDAsync` straight from the staging block it
//! borrows. Streams are synchronized individually; the orchestrator performs
//! the single device-wide synchronization at the end.
//!
//! The memory itself is owned elsewhere (a torch tensor, a `CudaSlice`, a
//! pointer handed over from Python). `CudaMemory` only records where it is.

use anyhow::{anyhow, bail, Result};
use cudarc::driver::result::stream::{self as cu_stream, StreamKind};
use cudarc::driver::{result, sys, CudaDevice};
use std::marker::PhantomData;
use std::sync::Arc;

use super::{CopyStream, DeviceBuffer};

/// `len` bytes of device memory at `ptr` on one CUDA device.
pub struct CudaMemory {
    device: Arc<CudaDevice>,
    ptr: sys::CUdeviceptr,
    len: usize,
}

impl CudaMemory {
    /// Describes `len` bytes of device memory starting at `ptr`.
    ///
    /// Waits for all outstanding work on the device, so that nothing queued
    /// earlier still writes the range once copies start.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `len` bytes allocated on device `ordinal`,
    /// and the allocation must stay alive and otherwise untouched for as long
    /// as the returned value (or any stream created from it) exists.
    pub unsafe fn from_raw(ordinal: usize, ptr: u64, len: usize) -> Result<Self> {
        if ptr == 0 {
            bail!("null device pointer");
        }
        let device = CudaDevice::new(ordinal)
            .map_err(|e| anyhow!("Failed to open cuda:{}: {:?}", ordinal, e))?;
        device
            .synchronize()
            .map_err(|e| anyhow!("Failed to synchronize cuda:{}: {:?}", ordinal, e))?;
        Ok(Self {
            device,
            ptr: ptr as sys::CUdeviceptr,
            len,
        })
    }
}

impl DeviceBuffer for CudaMemory {
    type Stream<'buf> = CudaCopyStream<'buf>;

    fn ordinal(&self) -> usize {
        self.device.ordinal()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn create_stream<'buf>(&'buf self) -> Result<CudaCopyStream<'buf>> {
        let ordinal = self.device.ordinal();
        self.device
            .bind_to_thread()
            .map_err(|e| anyhow!("Failed to bind cuda:{} to copy thread: {:?}", ordinal, e))?;
        let stream = cu_stream::create(StreamKind::NonBlocking)
            .map_err(|e| anyhow!("Failed to create stream on cuda:{}: {:?}", ordinal, e))?;
        Ok(CudaCopyStream {
            memory: self,
            stream,
            _src: PhantomData,
        })
    }

    fn synchronize(&self) -> Result<()> {
        self.device
            .synchronize()
            .map_err(|e| anyhow!("Failed to synchronize cuda:{}: {:?}", self.device.ordinal(), e))
    }
}

/// A non-blocking stream owned by one copy thread.
///
/// Source slices are borrowed for `'buf`; dropping the stream waits for its
/// copies before the stream is destroyed.
pub struct CudaCopyStream<'buf> {
    memory: &'buf CudaMemory,
    stream: sys::CUstream,
    _src: PhantomData<&'buf [u8]>,
}

impl<'buf> CopyStream<'buf> for CudaCopyStream<'buf> {
    fn copy_async(&mut self, dst_offset: usize, src: &'buf [u8]) -> Result<()> {
        let fits = dst_offset
            .checked_add(src.len())
            .is_some_and(|end| end <= self.memory.len);
        if !fits {
            bail!(
                "copy of {} bytes at offset {} overruns device buffer of {} bytes",
                src.len(),
                dst_offset,
                self.memory.len
            );
        }

        let dst = self.memory.ptr + dst_offset as sys::CUdeviceptr;
        // SAFETY: `dst..dst + src.len()` lies inside the destination range
        // checked above, and `src` stays borrowed until this stream has been
        // synchronized (explicitly or on drop).
        unsafe { result::memcpy_htod_async(dst, src, self.stream) }.map_err(|e| {
            anyhow!(
                "Async copy of {} bytes to cuda:{}+{} failed: {:?}",
                src.len(),
                self.memory.device.ordinal(),
                dst_offset,
                e
            )
        })
    }

    fn synchronize(&mut self) -> Result<()> {
        // SAFETY: the stream was created by this value and is not destroyed yet.
        unsafe { cu_stream::synchronize(self.stream) }.map_err(|e| {
            anyhow!(
                "Stream synchronization on cuda:{} failed: {:?}",
                self.memory.device.ordinal(),
                e
            )
        })
    }
}

impl Drop for CudaCopyStream<'_> {
    fn drop(&mut self) {
        // SAFETY: the stream is owned by this value; pending copies finish
        // before it is destroyed.
        unsafe {
            if let Err(e) = cu_stream::synchronize(self.stream) {
                tracing::error!(error = ?e, "stream synchronization failed on drop");
            }
            if let Err(e) = cu_stream::destroy(self.stream) {
                tracing::error!(error = ?e, "failed to destroy copy stream");
            }
        }
    }
}
