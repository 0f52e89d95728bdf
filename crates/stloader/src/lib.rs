//! Parallel loading of a contiguous byte range of a file into host memory or
//! accelerator memory.
//!
//! ```ignore
//! let loader = Loader::new(LoaderConfig::builder().reader_threads(8).build())?;
//!
//! // Host destination: the slice is filled in place.
//! let mut weights = vec![0u8; length];
//! loader.load_into_host("model.safetensors", offset, &mut weights)?;
//!
//! // Device destination: staged through host memory, copied on several streams.
//! loader.load_into_device("model.safetensors", offset, length, &device_buffer)?;
//! ```

pub mod config;
pub mod device;
pub mod error;
mod io;
pub mod loader;
mod pipeline;
pub mod plan;
pub mod remap;

#[cfg(feature = "python")]
pub mod python;

pub use config::{LoaderConfig, LoaderConfigBuilder, ReadStrategy};
pub use device::{CopyStream, DeviceBuffer, EmulatedDevice};
pub use error::{LoadError, Result};
pub use loader::{Destination, Loader, TransferRequest};
pub use remap::{invert_permutation, remap_rows, remap_rows_4bit, RowMatrix};
