//! src/python/tensor.rs
//!
//! Torch tensors handed in from Python, described by their storage.
//!
//! A tensor is inspected through its own Python methods (`data_ptr`, `numel`,
//! `element_size`, `is_contiguous`, `device`, `dtype`, `shape`). Nothing is
//! copied: loads and remaps write straight into the tensor's memory, and the
//! tensor stays owned by Python for the whole call.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::error::LoadError;

/// Where a tensor's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    Cpu,
    Cuda(usize),
}

/// Storage layout of a torch tensor.
#[derive(Debug, Clone)]
pub(crate) struct TensorInfo {
    pub(crate) ptr: usize,
    pub(crate) numel: usize,
    pub(crate) element_size: usize,
    pub(crate) contiguous: bool,
    pub(crate) placement: Placement,
    pub(crate) dtype: String,
    pub(crate) shape: Vec<usize>,
}

impl TensorInfo {
    pub(crate) fn inspect(tensor: &Bound<'_, PyAny>) -> PyResult<Self> {
        let device = tensor.getattr("device")?;
        let device_type: String = device.getattr("type")?.extract()?;
        let placement = match device_type.as_str() {
            "cpu" => Placement::Cpu,
            "cuda" => {
                let index: Option<usize> = device.getattr("index")?.extract()?;
                let ordinal = match index {
                    Some(ordinal) => ordinal,
                    None => tensor
                        .py()
                        .import("torch")?
                        .getattr("cuda")?
                        .call_method0("current_device")?
                        .extract()?,
                };
                Placement::Cuda(ordinal)
            }
            other => {
                return Err(PyValueError::new_err(format!(
                    "unsupported tensor device '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            ptr: tensor.call_method0("data_ptr")?.extract()?,
            numel: tensor.call_method0("numel")?.extract()?,
            element_size: tensor.call_method0("element_size")?.extract()?,
            contiguous: tensor.call_method0("is_contiguous")?.extract()?,
            placement,
            dtype: tensor.getattr("dtype")?.str()?.to_string(),
            shape: tensor.getattr("shape")?.extract()?,
        })
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.numel * self.element_size
    }

    /// Checks the tensor can be filled as one flat run of bytes.
    pub(crate) fn check_destination(&self) -> Result<(), LoadError> {
        if self.byte_len() == 0 {
            return Err(LoadError::invalid_request("destination tensor is empty"));
        }
        if !self.contiguous {
            return Err(LoadError::invalid_request(
                "destination tensor must be contiguous",
            ));
        }
        Ok(())
    }

    /// Checks for a contiguous int32 CPU matrix and returns its column count.
    pub(crate) fn int32_matrix_cols(&self) -> Result<usize, LoadError> {
        if self.dtype != "torch.int32" {
            return Err(LoadError::shape_mismatch(format!(
                "tensor must be torch.int32, got {}",
                self.dtype
            )));
        }
        if self.placement != Placement::Cpu || !self.contiguous {
            return Err(LoadError::shape_mismatch(
                "tensor must be a contiguous CPU tensor",
            ));
        }
        match self.shape.as_slice() {
            [_, cols] => Ok(*cols),
            other => Err(LoadError::shape_mismatch(format!(
                "expected a 2-D tensor, got shape {:?}",
                other
            ))),
        }
    }
}

/// Flattened values of an integer index tensor.
pub(crate) fn index_values(index: &Bound<'_, PyAny>) -> PyResult<Vec<u32>> {
    let values: Vec<i64> = index
        .call_method0("flatten")?
        .call_method0("tolist")?
        .extract()?;
    permutation(values).map_err(|e| PyValueError::new_err(e.to_string()))
}

fn permutation(values: Vec<i64>) -> Result<Vec<u32>, LoadError> {
    values
        .into_iter()
        .map(|v| {
            u32::try_from(v).map_err(|_| {
                LoadError::shape_mismatch(format!("permutation entry {} is out of range", v))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32_matrix(rows: usize, cols: usize) -> TensorInfo {
        TensorInfo {
            ptr: 0x1000,
            numel: rows * cols,
            element_size: 4,
            contiguous: true,
            placement: Placement::Cpu,
            dtype: "torch.int32".to_string(),
            shape: vec![rows, cols],
        }
    }

    #[test]
    fn accepts_contiguous_int32_matrix() {
        assert_eq!(int32_matrix(3, 5).int32_matrix_cols(), Ok(5));
        assert_eq!(int32_matrix(3, 5).byte_len(), 60);
    }

    #[test]
    fn rejects_unusable_remap_targets() {
        let mut floats = int32_matrix(2, 2);
        floats.dtype = "torch.float32".to_string();
        assert!(floats.int32_matrix_cols().is_err());

        let mut on_gpu = int32_matrix(2, 2);
        on_gpu.placement = Placement::Cuda(0);
        assert!(on_gpu.int32_matrix_cols().is_err());

        let mut flat = int32_matrix(2, 2);
        flat.shape = vec![4];
        assert!(flat.int32_matrix_cols().is_err());
    }

    #[test]
    fn destination_must_be_contiguous_and_non_empty() {
        let mut strided = int32_matrix(2, 2);
        strided.contiguous = false;
        assert!(matches!(
            strided.check_destination(),
            Err(LoadError::InvalidRequest { .. })
        ));

        let empty = int32_matrix(0, 4);
        assert!(empty.check_destination().is_err());
        assert!(int32_matrix(1, 1).check_destination().is_ok());
    }

    #[test]
    fn negative_index_entries_are_rejected() {
        assert_eq!(permutation(vec![2, 0, 1]), Ok(vec![2, 0, 1]));
        assert!(permutation(vec![0, -1]).is_err());
    }
}
