//! Device memory emulated in host RAM.
//!
//! Copies are deferred: `copy_async` only records the source slice and the
//! bytes land when the stream is synchronized. A stream dropped with copies
//! still pending counts them as abandoned, which makes "thread exited with
//! copies in flight" observable in tests. Copy and stream failures can be
//! injected.

use anyhow::{anyhow, bail, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{CopyStream, DeviceBuffer};

pub struct EmulatedDevice {
    ordinal: usize,
    len: usize,
    memory: Mutex<Vec<u8>>,
    fail_copy_at: Option<usize>,
    fail_stream_creation: bool,
    copies_issued: AtomicUsize,
    copies_completed: AtomicUsize,
    copies_abandoned: AtomicUsize,
    streams_created: AtomicUsize,
    device_syncs: AtomicUsize,
}

impl EmulatedDevice {
    /// Zero-filled device memory of `len` bytes on device `ordinal`.
    pub fn new(ordinal: usize, len: usize) -> Self {
        Self {
            ordinal,
            len,
            memory: Mutex::new(vec![0; len]),
            fail_copy_at: None,
            fail_stream_creation: false,
            copies_issued: AtomicUsize::new(0),
            copies_completed: AtomicUsize::new(0),
            copies_abandoned: AtomicUsize::new(0),
            streams_created: AtomicUsize::new(0),
            device_syncs: AtomicUsize::new(0),
        }
    }

    /// Makes the `n`-th copy (0-based, counted across all streams) and every
    /// later one fail.
    pub fn with_copy_failure_at(mut self, n: usize) -> Self {
        self.fail_copy_at = Some(n);
        self
    }

    /// Makes every `create_stream` call fail.
    pub fn with_stream_failure(mut self) -> Self {
        self.fail_stream_creation = true;
        self
    }

    /// Snapshot of the device memory.
    pub fn read_back(&self) -> Result<Vec<u8>> {
        Ok(self.lock_memory()?.clone())
    }

    pub fn copies_issued(&self) -> usize {
        self.copies_issued.load(Ordering::SeqCst)
    }

    pub fn copies_completed(&self) -> usize {
        self.copies_completed.load(Ordering::SeqCst)
    }

    /// Copies that were enqueued but whose stream was dropped unsynchronized.
    pub fn copies_abandoned(&self) -> usize {
        self.copies_abandoned.load(Ordering::SeqCst)
    }

    pub fn streams_created(&self) -> usize {
        self.streams_created.load(Ordering::SeqCst)
    }

    pub fn device_syncs(&self) -> usize {
        self.device_syncs.load(Ordering::SeqCst)
    }

    fn lock_memory(&self) -> Result<std::sync::MutexGuard<'_, Vec<u8>>> {
        self.memory
            .lock()
            .map_err(|_| anyhow!("emulated device {} memory lock poisoned", self.ordinal))
    }
}

impl DeviceBuffer for EmulatedDevice {
    type Stream<'buf> = EmulatedStream<'buf>;

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn len(&self) -> usize {
        self.len
    }

    fn create_stream<'buf>(&'buf self) -> Result<EmulatedStream<'buf>> {
        if self.fail_stream_creation {
            bail!("emulated device {}: stream creation failed", self.ordinal);
        }
        let id = self.streams_created.fetch_add(1, Ordering::SeqCst);
        Ok(EmulatedStream {
            device: self,
            id,
            pending: Vec::new(),
        })
    }

    fn synchronize(&self) -> Result<()> {
        self.device_syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One stream on an [`EmulatedDevice`].
pub struct EmulatedStream<'buf> {
    device: &'buf EmulatedDevice,
    id: usize,
    pending: Vec<(usize, &'buf [u8])>,
}

impl<'buf> CopyStream<'buf> for EmulatedStream<'buf> {
    fn copy_async(&mut self, dst_offset: usize, src: &'buf [u8]) -> Result<()> {
        let n = self.device.copies_issued.fetch_add(1, Ordering::SeqCst);
        if self.device.fail_copy_at.is_some_and(|at| n >= at) {
            bail!(
                "emulated device {}: injected copy failure on stream {} (copy #{})",
                self.device.ordinal,
                self.id,
                n
            );
        }
        let len = self.device.len;
        if dst_offset + src.len() > len {
            bail!(
                "copy of {} bytes at offset {} overruns device buffer of {} bytes",
                src.len(),
                dst_offset,
                len
            );
        }
        self.pending.push((dst_offset, src));
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut memory = self.device.lock_memory()?;
        for (offset, src) in self.pending.drain(..) {
            memory[offset..offset + src.len()].copy_from_slice(src);
            self.device.copies_completed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for EmulatedStream<'_> {
    fn drop(&mut self) {
        self.device
            .copies_abandoned
            .fetch_add(self.pending.len(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_land_on_synchronize() -> Result<()> {
        let device = EmulatedDevice::new(0, 8);
        let src = [1u8, 2, 3, 4];
        {
            let mut stream = device.create_stream()?;
            stream.copy_async(2, &src)?;
            assert_eq!(device.read_back()?, vec![0; 8]);
            stream.synchronize()?;
        }
        assert_eq!(device.read_back()?, vec![0, 0, 1, 2, 3, 4, 0, 0]);
        assert_eq!(device.copies_completed(), 1);
        assert_eq!(device.copies_abandoned(), 0);
        Ok(())
    }

    #[test]
    fn dropped_stream_abandons_pending_copies() -> Result<()> {
        let device = EmulatedDevice::new(0, 4);
        let src = [9u8; 2];
        {
            let mut stream = device.create_stream()?;
            stream.copy_async(0, &src)?;
            stream.copy_async(2, &src)?;
        }
        assert_eq!(device.copies_abandoned(), 2);
        assert_eq!(device.read_back()?, vec![0; 4]);
        Ok(())
    }

    #[test]
    fn injected_failures() -> Result<()> {
        let device = EmulatedDevice::new(1, 4).with_copy_failure_at(1);
        let src = [7u8; 2];
        let mut stream = device.create_stream()?;
        assert!(stream.copy_async(0, &src).is_ok());
        assert!(stream.copy_async(2, &src).is_err());

        let device = EmulatedDevice::new(1, 4).with_stream_failure();
        assert!(device.create_stream().is_err());
        Ok(())
    }

    #[test]
    fn length_survives_poisoned_memory() {
        let device = EmulatedDevice::new(0, 16);
        let joined = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = device.memory.lock();
                panic!("poison the memory lock");
            })
            .join()
        });
        assert!(joined.is_err());
        assert!(device.memory.is_poisoned());
        assert_eq!(device.len(), 16);
        assert!(device.read_back().is_err());
    }

    #[test]
    fn out_of_bounds_copy_is_rejected() -> Result<()> {
        let device = EmulatedDevice::new(0, 4);
        let src = [0u8; 3];
        let mut stream = device.create_stream()?;
        assert!(stream.copy_async(2, &src).is_err());
        Ok(())
    }
}
