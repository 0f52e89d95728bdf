//! libtorch tensors as load destinations.
//!
//! `load_into_tensor` mirrors the usual torch extension entry point: the
//! target tensor's device decides the path. CPU tensors are filled in place;
//! CUDA tensors (feature `cuda`) are staged through host memory and copied on
//! one non-blocking stream per copy thread.
//!
//! # Setup Requirements
//!
//! ```bash
//! export LIBTORCH_USE_PYTORCH=1
//! ```

use anyhow::{anyhow, bail, Result};
use std::path::Path;
use tch::{Device, Kind, Tensor};

use crate::loader::Loader;
use crate::remap::RowMatrix;

#[cfg(feature = "cuda")]
pub use self::cuda_tensor::CudaTensorBuffer;

#[cfg(feature = "cuda")]
mod cuda_tensor {
    use anyhow::{bail, Result};
    use tch::{Device, Tensor};

    use super::byte_len;
    use crate::device::cuda::{CudaCopyStream, CudaMemory};
    use crate::device::DeviceBuffer;

    /// The storage of a contiguous CUDA tensor, viewed as bytes.
    ///
    /// Holds a shallow clone of the tensor so the storage outlives every
    /// copy stream.
    pub struct CudaTensorBuffer {
        memory: CudaMemory,
        _tensor: Tensor,
    }

    impl CudaTensorBuffer {
        pub fn new(tensor: &Tensor) -> Result<Self> {
            let ordinal = match tensor.device() {
                Device::Cuda(ordinal) => ordinal,
                other => bail!("expected a CUDA tensor, got one on {:?}", other),
            };
            if !tensor.is_contiguous() {
                bail!("destination tensor must be contiguous");
            }
            let tensor = tensor.shallow_clone();
            // SAFETY: the storage of a contiguous tensor spans `byte_len`
            // bytes from `data_ptr`, and `_tensor` keeps it allocated.
            let memory = unsafe {
                CudaMemory::from_raw(ordinal, tensor.data_ptr() as u64, byte_len(&tensor))?
            };
            Ok(Self {
                memory,
                _tensor: tensor,
            })
        }
    }

    impl DeviceBuffer for CudaTensorBuffer {
        type Stream<'buf> = CudaCopyStream<'buf>;

        fn ordinal(&self) -> usize {
            self.memory.ordinal()
        }

        fn len(&self) -> usize {
            self.memory.len()
        }

        fn create_stream<'buf>(&'buf self) -> Result<CudaCopyStream<'buf>> {
            self.memory.create_stream()
        }

        fn synchronize(&self) -> Result<()> {
            self.memory.synchronize()
        }
    }
}

fn byte_len(tensor: &Tensor) -> usize {
    tensor.numel() * tensor.kind().elt_size_in_bytes()
}

/// Loads `tensor`'s byte size from `offset` of `path` into `tensor`.
pub fn load_into_tensor(
    loader: &Loader,
    path: impl AsRef<Path>,
    offset: u64,
    tensor: &mut Tensor,
) -> Result<()> {
    let path = path.as_ref();
    let len = byte_len(tensor);
    match tensor.device() {
        Device::Cpu => {
            if !tensor.is_contiguous() {
                bail!("destination tensor must be contiguous");
            }
            // SAFETY: the tensor is contiguous and owns `len` bytes of CPU
            // storage; the exclusive borrow of `tensor` keeps it alive and
            // unaliased for the duration of the load.
            let dest = unsafe { std::slice::from_raw_parts_mut(tensor.data_ptr() as *mut u8, len) };
            loader.load_into_host(path, offset, dest)?;
        }
        #[cfg(feature = "cuda")]
        Device::Cuda(_) => {
            let dst = CudaTensorBuffer::new(tensor)?;
            loader.load_into_device(path, offset, len, &dst)?;
        }
        #[cfg(not(feature = "cuda"))]
        Device::Cuda(_) => bail!("CUDA destinations need the `cuda` feature"),
        other => bail!("unsupported destination device {:?}", other),
    }
    Ok(())
}

/// Checks that `tensor` is a contiguous CPU int32 tensor and returns its words.
fn int32_words(tensor: &mut Tensor, what: &str) -> Result<&mut [u32]> {
    if tensor.kind() != Kind::Int {
        bail!("{} must be int32, got {:?}", what, tensor.kind());
    }
    if tensor.device() != Device::Cpu || !tensor.is_contiguous() {
        bail!("{} must be a contiguous CPU tensor", what);
    }
    let len = tensor.numel();
    // SAFETY: int32 elements are 4 bytes and the storage is contiguous; the
    // returned slice borrows `tensor` mutably.
    Ok(unsafe { std::slice::from_raw_parts_mut(tensor.data_ptr() as *mut u32, len) })
}

fn permutation(index: &Tensor) -> Result<Vec<u32>> {
    if index.kind() != Kind::Int {
        bail!("index must be int32, got {:?}", index.kind());
    }
    let values = Vec::<i32>::try_from(index.flatten(0, -1))?;
    values
        .into_iter()
        .map(|v| u32::try_from(v).map_err(|_| anyhow!("negative permutation entry {}", v)))
        .collect()
}

fn columns(tensor: &Tensor) -> Result<usize> {
    match tensor.size().as_slice() {
        [_, cols] => Ok(*cols as usize),
        other => bail!("expected a 2-D tensor, got shape {:?}", other),
    }
}

/// Column permutation of an int32 `[rows, cols]` tensor, in place.
pub fn remap_tensor(tensor: &mut Tensor, index: &Tensor) -> Result<()> {
    let cols = columns(tensor)?;
    let index = permutation(index)?;
    RowMatrix::new(int32_words(tensor, "tensor")?, cols)?.remap(&index)?;
    Ok(())
}

/// Packed 4-bit column permutation of an int32 `[rows, words]` tensor, in place.
pub fn remap_tensor_4bit(tensor: &mut Tensor, index: &Tensor) -> Result<()> {
    let words = columns(tensor)?;
    let index = permutation(index)?;
    RowMatrix::new(int32_words(tensor, "tensor")?, words)?.remap_4bit(&index)?;
    Ok(())
}
