//! src/config.rs
//!
//! Tuning knobs for the loader.
//!
//! The `LoaderConfig` struct stores the parameters that control how a byte
//! range is read and copied.
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .reader_threads(8)
//!     .copy_threads(4)
//!     .block_size(512 * 1024)
//!     .queue_capacity(64)
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `reader_threads`: More readers help on fast NVMe arrays, but each one opens
//!                     its own file handle.
//! - `block_size`: Larger blocks mean fewer copies and less queue traffic;
//!                 smaller blocks start the first device copy sooner.
//! - `queue_capacity`: `None` lets producers run arbitrarily far ahead of the
//!                     copy threads. A bound applies backpressure instead.

use anyhow::{anyhow, Result};

/// Default number of reader threads (prefetch readers and block producers).
pub const DEFAULT_READER_THREADS: usize = 8;
/// Default number of device copy threads, one stream each.
pub const DEFAULT_COPY_THREADS: usize = 4;
/// Default block size for the producer/consumer handoff.
pub const DEFAULT_BLOCK_SIZE: usize = 512 * 1024;

/// How the requested range is read from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadStrategy {
    /// Whole-range parallel prefetch first, then a striped block pass that
    /// feeds the copy stage. Every byte is read twice; the first pass surfaces
    /// I/O errors before any device work starts and warms the page cache.
    #[default]
    TwoPass,
    /// Only the striped block pass. Every byte is read once.
    Fused,
}

/// Configuration for the loader
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of reader threads used by both read passes
    pub reader_threads: usize,
    /// Number of device copy threads (ignored for host destinations)
    pub copy_threads: usize,
    /// Size in bytes of one block handed from producers to copy threads
    pub block_size: usize,
    /// Maximum number of queued blocks (`None` = unbounded)
    pub queue_capacity: Option<usize>,
    /// Whether to run the prefetch pass before the block pass
    pub read_strategy: ReadStrategy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            reader_threads: DEFAULT_READER_THREADS,
            copy_threads: DEFAULT_COPY_THREADS,
            block_size: DEFAULT_BLOCK_SIZE,
            queue_capacity: None,
            read_strategy: ReadStrategy::TwoPass,
        }
    }
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// Rejects configurations that could never make progress.
    pub fn validate(&self) -> Result<()> {
        if self.reader_threads == 0 {
            return Err(anyhow!(
                "reader_threads must be > 0. \
                At least one thread is needed to read the file."
            ));
        }
        if self.copy_threads == 0 {
            return Err(anyhow!(
                "copy_threads must be > 0. \
                Device destinations are drained by copy threads only."
            ));
        }
        if self.block_size == 0 {
            return Err(anyhow!("block_size must be > 0"));
        }
        if self.queue_capacity == Some(0) {
            return Err(anyhow!(
                "queue_capacity must be > 0 when set. \
                Use None for an unbounded queue."
            ));
        }
        Ok(())
    }
}

/// Builder for LoaderConfig with method chaining
#[derive(Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// Set the number of reader threads (must be > 0)
    pub fn reader_threads(mut self, threads: usize) -> Self {
        self.config.reader_threads = threads;
        self
    }

    /// Set the number of device copy threads (must be > 0)
    pub fn copy_threads(mut self, threads: usize) -> Self {
        self.config.copy_threads = threads;
        self
    }

    /// Set the block size in bytes (must be > 0)
    pub fn block_size(mut self, bytes: usize) -> Self {
        self.config.block_size = bytes;
        self
    }

    /// Bound the work queue.
    ///
    /// - Too low: producers stall waiting on copy threads.
    /// - Unbounded: the whole staging buffer may end up queued at once.
    pub fn queue_capacity(mut self, blocks: usize) -> Self {
        self.config.queue_capacity = Some(blocks);
        self
    }

    /// Remove any queue bound (the default).
    pub fn unbounded_queue(mut self) -> Self {
        self.config.queue_capacity = None;
        self
    }

    pub fn read_strategy(mut self, strategy: ReadStrategy) -> Self {
        self.config.read_strategy = strategy;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}
