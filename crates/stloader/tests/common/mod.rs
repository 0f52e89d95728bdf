#![allow(dead_code)]

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use stloader::{LoaderConfig, ReadStrategy};
use tempfile::NamedTempFile;

pub const TEST_SEED: u64 = 7;

/// Deterministic pseudo-random bytes.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

/// Writes `bytes` to a fresh temporary file.
pub fn temp_file(bytes: &[u8]) -> Result<NamedTempFile> {
    let tmp = NamedTempFile::new()?;
    fs::write(tmp.path(), bytes)?;
    Ok(tmp)
}

/// Plain single-threaded read of `[offset, offset+len)`, the reference result.
pub fn read_sequential(path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// A spread of thread counts, block sizes and strategies, small enough that
/// kilobyte-sized files still produce many blocks.
pub fn config_matrix() -> Vec<LoaderConfig> {
    let mut configs = Vec::new();
    for (readers, copiers) in [(1, 1), (2, 3), (4, 2), (8, 4), (13, 5)] {
        for block_size in [1, 97, 4096] {
            for strategy in [ReadStrategy::TwoPass, ReadStrategy::Fused] {
                configs.push(
                    LoaderConfig::builder()
                        .reader_threads(readers)
                        .copy_threads(copiers)
                        .block_size(block_size)
                        .read_strategy(strategy)
                        .build(),
                );
            }
        }
    }
    configs
}
