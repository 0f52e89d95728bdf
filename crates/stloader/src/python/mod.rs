//! src/python/mod.rs
//!
//! Python bindings.
//!
//! # Usage
//!
//! ```python
//! import stloader
//!
//! raw = stloader.read_range("model.safetensors", offset, length, reader_threads=16)
//!
//! weight = torch.empty(shape, dtype=torch.float16, device="cuda:0")
//! stloader.read_range_into("model.safetensors", offset, weight)
//! stloader.remap_tensor_4bit(qweight, perm)
//! ```
//!
//! The GIL is released for the whole load, from the first read to the last
//! join, so the reader threads run in parallel with other Python threads.
//! Tensor targets are written in place; they must not be used from another
//! Python thread until the call returns.

mod tensor;

use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;
use std::path::PathBuf;

use crate::config::{LoaderConfig, ReadStrategy};
#[cfg(feature = "cuda")]
use crate::device::cuda::CudaMemory;
use crate::error::LoadError;
use crate::loader::Loader;
use tensor::{index_values, Placement, TensorInfo};

fn to_py_err(e: LoadError) -> PyErr {
    match e {
        LoadError::Io => PyIOError::new_err(e.to_string()),
        LoadError::InvalidRequest { .. } | LoadError::ShapeMismatch { .. } => {
            PyValueError::new_err(e.to_string())
        }
        LoadError::Transfer | LoadError::Spawn { .. } => PyRuntimeError::new_err(e.to_string()),
    }
}

fn build_loader(
    reader_threads: Option<usize>,
    copy_threads: Option<usize>,
    block_size: Option<usize>,
    fused: bool,
) -> PyResult<Loader> {
    let mut builder = LoaderConfig::builder();
    if let Some(threads) = reader_threads {
        builder = builder.reader_threads(threads);
    }
    if let Some(threads) = copy_threads {
        builder = builder.copy_threads(threads);
    }
    if let Some(bytes) = block_size {
        builder = builder.block_size(bytes);
    }
    if fused {
        builder = builder.read_strategy(ReadStrategy::Fused);
    }
    Loader::new(builder.build()).map_err(|e| PyValueError::new_err(format!("{e:#}")))
}

/// Reads `length` bytes at `offset` of `path` with parallel reader threads.
#[pyfunction]
#[pyo3(signature = (path, offset, length, reader_threads=None, block_size=None, fused=false))]
fn read_range<'py>(
    py: Python<'py>,
    path: PathBuf,
    offset: u64,
    length: usize,
    reader_threads: Option<usize>,
    block_size: Option<usize>,
    fused: bool,
) -> PyResult<Bound<'py, PyBytes>> {
    let loader = build_loader(reader_threads, None, block_size, fused)?;

    PyBytes::new_with(py, length, |buf| {
        py.allow_threads(|| loader.load_into_host(&path, offset, buf))
            .map_err(to_py_err)
    })
}

/// Fills a contiguous CPU or CUDA tensor with its byte size from `offset`.
#[pyfunction]
#[pyo3(signature = (path, offset, tensor, reader_threads=None, copy_threads=None, block_size=None, fused=false))]
#[allow(clippy::too_many_arguments)]
fn read_range_into(
    py: Python<'_>,
    path: PathBuf,
    offset: u64,
    tensor: &Bound<'_, PyAny>,
    reader_threads: Option<usize>,
    copy_threads: Option<usize>,
    block_size: Option<usize>,
    fused: bool,
) -> PyResult<()> {
    let info = TensorInfo::inspect(tensor)?;
    info.check_destination().map_err(to_py_err)?;
    let loader = build_loader(reader_threads, copy_threads, block_size, fused)?;
    let (ptr, len) = (info.ptr, info.byte_len());

    match info.placement {
        Placement::Cpu => py
            .allow_threads(|| {
                // SAFETY: a contiguous CPU tensor owns `len` bytes at `ptr`;
                // `tensor` is borrowed for the whole call.
                let dest = unsafe { std::slice::from_raw_parts_mut(ptr as *mut u8, len) };
                loader.load_into_host(&path, offset, dest)
            })
            .map_err(to_py_err),
        #[cfg(feature = "cuda")]
        Placement::Cuda(ordinal) => py.allow_threads(|| -> PyResult<()> {
            // SAFETY: a contiguous CUDA tensor owns `len` bytes at `ptr` on
            // device `ordinal`; `tensor` is borrowed for the whole call.
            let memory = unsafe { CudaMemory::from_raw(ordinal, ptr as u64, len) }
                .map_err(|e| PyRuntimeError::new_err(format!("{e:#}")))?;
            loader
                .load_into_device(&path, offset, len, &memory)
                .map_err(to_py_err)
        }),
        #[cfg(not(feature = "cuda"))]
        Placement::Cuda(_) => Err(PyRuntimeError::new_err(
            "stloader was built without the `cuda` feature",
        )),
    }
}

/// In-place column permutation of a contiguous int32 `[rows, cols]` tensor.
#[pyfunction]
fn remap_tensor(py: Python<'_>, tensor: &Bound<'_, PyAny>, index: &Bound<'_, PyAny>) -> PyResult<()> {
    let info = TensorInfo::inspect(tensor)?;
    let cols = info.int32_matrix_cols().map_err(to_py_err)?;
    let index = index_values(index)?;
    let (ptr, numel) = (info.ptr, info.numel);

    py.allow_threads(|| {
        // SAFETY: checked above to be a contiguous int32 CPU tensor of `numel`
        // elements.
        let data = unsafe { std::slice::from_raw_parts_mut(ptr as *mut u32, numel) };
        crate::remap::remap_rows(data, cols, &index)
    })
    .map_err(to_py_err)
}

/// In-place packed 4-bit column permutation of an int32 `[rows, words]` tensor.
#[pyfunction]
fn remap_tensor_4bit(
    py: Python<'_>,
    tensor: &Bound<'_, PyAny>,
    index: &Bound<'_, PyAny>,
) -> PyResult<()> {
    let info = TensorInfo::inspect(tensor)?;
    let words = info.int32_matrix_cols().map_err(to_py_err)?;
    let index = index_values(index)?;
    let (ptr, numel) = (info.ptr, info.numel);

    py.allow_threads(|| {
        // SAFETY: as in `remap_tensor`.
        let data = unsafe { std::slice::from_raw_parts_mut(ptr as *mut u32, numel) };
        crate::remap::remap_rows_4bit(data, words, &index)
    })
    .map_err(to_py_err)
}

/// Column permutation of a flat row-major `[rows, cols]` int32 matrix.
#[pyfunction]
fn remap_rows(py: Python<'_>, mut data: Vec<u32>, cols: usize, index: Vec<u32>) -> PyResult<Vec<u32>> {
    py.allow_threads(|| crate::remap::remap_rows(&mut data, cols, &index))
        .map_err(to_py_err)?;
    Ok(data)
}

/// Packed 4-bit column permutation of a flat `[rows, words_per_row]` matrix.
#[pyfunction]
fn remap_rows_4bit(
    py: Python<'_>,
    mut data: Vec<u32>,
    words_per_row: usize,
    index: Vec<u32>,
) -> PyResult<Vec<u32>> {
    py.allow_threads(|| crate::remap::remap_rows_4bit(&mut data, words_per_row, &index))
        .map_err(to_py_err)?;
    Ok(data)
}

#[pymodule]
fn stloader(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(read_range, m)?)?;
    m.add_function(wrap_pyfunction!(read_range_into, m)?)?;
    m.add_function(wrap_pyfunction!(remap_tensor, m)?)?;
    m.add_function(wrap_pyfunction!(remap_tensor_4bit, m)?)?;
    m.add_function(wrap_pyfunction!(remap_rows, m)?)?;
    m.add_function(wrap_pyfunction!(remap_rows_4bit, m)?)?;
    Ok(())
}
