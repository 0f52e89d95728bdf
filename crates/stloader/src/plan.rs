//! src/plan.rs
//!
//! Pure partitioning of a byte range into the pieces each worker owns.
//!
//! All ranges are relative to the start of the requested range, i.e. they live
//! in `[0, length)`. Adding the request offset gives the file position.

use std::ops::Range;

/// Length of each prefetch sub-range: `ceil(length / readers)`.
///
/// Every reader but possibly the last gets exactly this many bytes; readers
/// past the end of the range get nothing.
pub fn prefetch_chunk_len(length: usize, readers: usize) -> usize {
    length.div_ceil(readers.max(1)).max(1)
}

/// Contiguous split of `[0, length)` for the prefetch readers.
///
/// Empty sub-ranges are omitted, so fewer than `readers` ranges come back for
/// tiny requests.
pub fn prefetch_ranges(length: usize, readers: usize) -> Vec<Range<usize>> {
    let chunk = prefetch_chunk_len(length, readers);
    (0..readers.max(1))
        .map(|i| {
            let start = (i * chunk).min(length);
            let end = (start + chunk).min(length);
            start..end
        })
        .filter(|r| !r.is_empty())
        .collect()
}

/// Number of blocks covering `[0, length)`.
pub fn block_count(length: usize, block_size: usize) -> usize {
    length.div_ceil(block_size.max(1))
}

/// Byte range of block `index`.
pub fn block_range(index: usize, length: usize, block_size: usize) -> Range<usize> {
    let start = index * block_size;
    let end = (start + block_size).min(length);
    start..end
}

/// Number of producers that own at least one block.
///
/// Producer `i` starts at block `i`, so producers whose first block lies past
/// the end of the range are never spawned.
pub fn active_producers(length: usize, block_size: usize, producers: usize) -> usize {
    producers.max(1).min(block_count(length, block_size))
}

/// Block indices owned by `worker`: `worker, worker + stride, worker + 2·stride, …`
pub fn striped_blocks(
    worker: usize,
    stride: usize,
    length: usize,
    block_size: usize,
) -> impl Iterator<Item = usize> {
    (worker..block_count(length, block_size)).step_by(stride.max(1))
}
