//! End-to-end correctness of host and device loads.
//!
//! Tests cover:
//! - Byte equality with a sequential read (host and emulated device)
//! - Thread count / block size / strategy combinations
//! - Idempotence of repeated loads
//! - Split loads concatenating to a whole load
//! - Locating a tensor with a safetensors header, then loading its range

mod common;
use common::{config_matrix, random_bytes, read_sequential, temp_file, TEST_SEED};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use stloader::{Destination, EmulatedDevice, Loader, LoaderConfig, TransferRequest};

const MIB: usize = 1024 * 1024;

// ============================================================================
// 1. Equality with sequential reads
// ============================================================================

#[test]
fn host_and_device_match_sequential_read() -> Result<()> {
    let bytes = random_bytes(64 * 1024 + 13, TEST_SEED);
    let tmp = temp_file(&bytes)?;
    let mut rng = StdRng::seed_from_u64(TEST_SEED);

    for config in config_matrix() {
        let loader = Loader::new(config.clone())?;
        for _ in 0..3 {
            let offset = rng.random_range(0..bytes.len() - 1);
            let length = rng.random_range(1..=(bytes.len() - offset).min(8_000));
            let expected = read_sequential(tmp.path(), offset as u64, length)?;

            let mut host = vec![0u8; length];
            loader.load_into_host(tmp.path(), offset as u64, &mut host)?;
            assert_eq!(host, expected, "host mismatch for {:?}", config);

            let device = EmulatedDevice::new(0, length);
            loader.load_into_device(tmp.path(), offset as u64, length, &device)?;
            assert_eq!(device.read_back()?, expected, "device mismatch for {:?}", config);
            assert_eq!(device.copies_abandoned(), 0);
        }
    }
    Ok(())
}

#[test]
fn single_byte_and_whole_file_ranges() -> Result<()> {
    let bytes = random_bytes(10_000, TEST_SEED + 1);
    let tmp = temp_file(&bytes)?;
    let loader = Loader::new(LoaderConfig::builder().block_size(512).build())?;

    let mut one = [0u8; 1];
    loader.load_into_host(tmp.path(), 9_999, &mut one)?;
    assert_eq!(one[0], bytes[9_999]);

    let device = EmulatedDevice::new(2, bytes.len());
    loader.load_into_device(tmp.path(), 0, bytes.len(), &device)?;
    assert_eq!(device.read_back()?, bytes);
    Ok(())
}

#[test]
fn every_copy_thread_gets_its_own_stream() -> Result<()> {
    let bytes = random_bytes(32 * 1024, TEST_SEED + 2);
    let tmp = temp_file(&bytes)?;
    let loader = Loader::new(
        LoaderConfig::builder()
            .reader_threads(4)
            .copy_threads(6)
            .block_size(256)
            .build(),
    )?;

    let device = EmulatedDevice::new(0, bytes.len());
    loader.load_into_device(tmp.path(), 0, bytes.len(), &device)?;

    assert_eq!(device.streams_created(), 6);
    assert_eq!(device.copies_completed(), bytes.len() / 256);
    assert_eq!(device.device_syncs(), 1);
    Ok(())
}

#[test]
fn bounded_queue_loads_the_same_bytes() -> Result<()> {
    let bytes = random_bytes(100_000, TEST_SEED + 3);
    let tmp = temp_file(&bytes)?;

    for capacity in [1, 2, 16] {
        let loader = Loader::new(
            LoaderConfig::builder()
                .reader_threads(8)
                .copy_threads(2)
                .block_size(1000)
                .queue_capacity(capacity)
                .build(),
        )?;
        let device = EmulatedDevice::new(0, 90_000);
        loader.load_into_device(tmp.path(), 5_000, 90_000, &device)?;
        assert_eq!(device.read_back()?, &bytes[5_000..95_000]);
    }
    Ok(())
}

// ============================================================================
// 2. Idempotence and splitting
// ============================================================================

#[test]
fn repeated_loads_are_identical() -> Result<()> {
    let bytes = random_bytes(50_000, TEST_SEED + 4);
    let tmp = temp_file(&bytes)?;
    let loader = Loader::new(LoaderConfig::builder().block_size(333).build())?;

    let mut first = vec![0u8; 40_000];
    loader.load_into_host(tmp.path(), 1_234, &mut first)?;
    let mut second = vec![0u8; 40_000];
    loader.load_into_host(tmp.path(), 1_234, &mut second)?;
    assert_eq!(first, second);

    let a = EmulatedDevice::new(0, 40_000);
    let b = EmulatedDevice::new(0, 40_000);
    loader.load_into_device(tmp.path(), 1_234, 40_000, &a)?;
    loader.load_into_device(tmp.path(), 1_234, 40_000, &b)?;
    assert_eq!(a.read_back()?, b.read_back()?);
    assert_eq!(a.read_back()?, first);
    Ok(())
}

#[test]
fn two_halves_equal_whole_sixteen_mib_file() -> Result<()> {
    let bytes = random_bytes(16 * MIB, TEST_SEED + 5);
    let tmp = temp_file(&bytes)?;
    let loader = Loader::default();

    let mut whole = vec![0u8; 16 * MIB];
    loader.load_into_host(tmp.path(), 0, &mut whole)?;

    let mut low = vec![0u8; 8 * MIB];
    let mut high = vec![0u8; 8 * MIB];
    loader.load_into_host(tmp.path(), 0, &mut low)?;
    loader.load_into_host(tmp.path(), (8 * MIB) as u64, &mut high)?;
    low.extend_from_slice(&high);
    assert_eq!(low, whole);
    assert_eq!(whole, bytes);

    let low = EmulatedDevice::new(0, 8 * MIB);
    let high = EmulatedDevice::new(0, 8 * MIB);
    loader.load_into_device(tmp.path(), 0, 8 * MIB, &low)?;
    loader.load_into_device(tmp.path(), (8 * MIB) as u64, 8 * MIB, &high)?;
    let mut joined = low.read_back()?;
    joined.extend_from_slice(&high.read_back()?);
    assert_eq!(joined, whole);
    Ok(())
}

#[test]
fn concurrent_calls_share_one_loader() -> Result<()> {
    let bytes = random_bytes(200_000, TEST_SEED + 6);
    let tmp = temp_file(&bytes)?;
    let loader = Loader::new(LoaderConfig::builder().block_size(4096).build())?;

    std::thread::scope(|s| -> Result<()> {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let loader = &loader;
                let path = tmp.path();
                s.spawn(move || -> Result<Vec<u8>> {
                    let device = EmulatedDevice::new(i, 50_000);
                    loader.load_into_device(path, (i * 50_000) as u64, 50_000, &device)?;
                    device.read_back()
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let loaded = handle.join().expect("load thread panicked")?;
            assert_eq!(loaded, &bytes[i * 50_000..(i + 1) * 50_000]);
        }
        Ok(())
    })
}

// ============================================================================
// 3. Caller-side layout lookup
// ============================================================================

#[test]
fn loads_tensor_located_by_safetensors_header() -> Result<()> {
    // Two U8 tensors; the caller parses the header, the loader moves bytes.
    let first: Vec<u8> = (0u8..16).collect();
    let second: Vec<u8> = (100u8..164).collect();

    let header_json = r#"{
        "first": {"dtype": "U8", "shape": [16], "data_offsets": [0, 16]},
        "second": {"dtype": "U8", "shape": [8, 8], "data_offsets": [16, 80]}
    }"#;
    let header_bytes = header_json.as_bytes();

    let mut file_bytes = Vec::new();
    file_bytes.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
    file_bytes.extend_from_slice(header_bytes);
    file_bytes.extend_from_slice(&first);
    file_bytes.extend_from_slice(&second);

    let tmp = temp_file(&file_bytes)?;
    let on_disk = fs::read(tmp.path())?;
    let parsed = safetensors::SafeTensors::deserialize(&on_disk)?;
    let view = parsed.tensor("second")?;
    let offset = view.data().as_ptr() as usize - on_disk.as_ptr() as usize;
    let length = view.data().len();

    let loader = Loader::new(LoaderConfig::builder().block_size(7).build())?;
    let device = EmulatedDevice::new(0, length);
    loader.load(TransferRequest {
        path: tmp.path(),
        offset: offset as u64,
        length,
        destination: Destination::Device(&device),
    })?;
    assert_eq!(device.read_back()?, second);
    Ok(())
}
