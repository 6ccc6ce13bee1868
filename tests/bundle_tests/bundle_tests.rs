//! Tests for BundleWriter and BundleReader
//!
//! These tests verify:
//! - Append/read round trip and logical offsets
//! - Segment rotation at the break, with records never spanning segments
//! - Allocation filled out of order
//! - Write buffering and the block read cache
//! - Header validation and record corruption detection
//! - Manifest contents

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use packstore::bundle::{segment_file_name, BundleReader, BundleWriter, HEADER_FILE_NAME};
use packstore::{CacheStats, Config, FilePool, FileRole, StoreError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, PathBuf, Arc<FilePool>) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().canonicalize().unwrap();
    let pool = FilePool::new(8).unwrap();
    (temp_dir, path, pool)
}

fn segment_len(dir: &PathBuf, n: u32) -> u64 {
    std::fs::metadata(dir.join(segment_file_name(n))).unwrap().len()
}

/// Write 20 records of 10 bytes (14 framed), record `i` filled with `i`
fn write_small_records(pool: &Arc<FilePool>, dir: &PathBuf, segment_break: u64) -> Vec<u64> {
    let mut writer = BundleWriter::create(pool, dir, segment_break, 0o644).unwrap();
    let offsets = (0..20u8).map(|i| writer.append(&[i; 10]).unwrap()).collect();
    writer.close().unwrap();
    offsets
}

// =============================================================================
// Basic Tests
// =============================================================================

#[test]
fn test_append_and_read_back() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    let a = writer.append(b"first").unwrap();
    let b = writer.append(b"second").unwrap();
    assert_eq!(a, 0);
    assert_eq!(b, 5 + 4);
    assert_eq!(writer.read_at(b, 6).unwrap(), b"second");
    writer.close().unwrap();

    let reader = BundleReader::open(&pool, &dir).unwrap();
    assert_eq!(reader.read_at(a, 5).unwrap(), b"first");
    assert_eq!(reader.read_at(b, 6).unwrap(), b"second");
    assert_eq!(reader.data_size(), 9 + 10);
    assert_eq!(reader.segment_count(), 1);
}

#[test]
fn test_empty_bundle() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    writer.close().unwrap();

    let reader = BundleReader::open(&pool, &dir).unwrap();
    assert_eq!(reader.data_size(), 0);
    assert_eq!(reader.segment_count(), 1);
}

#[test]
fn test_write_after_close_fails() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    writer.close().unwrap();

    assert!(matches!(writer.append(b"x"), Err(StoreError::AlreadyClosed)));
    assert!(matches!(writer.close(), Err(StoreError::AlreadyClosed)));
}

// =============================================================================
// Segment Rotation Tests
// =============================================================================

#[test]
fn test_rotation_at_segment_break() {
    let (_temp, dir, pool) = setup();

    // Each framed record is 14 bytes; two fit in a 32-byte segment
    let mut writer = BundleWriter::create(&pool, &dir, 32, 0o644).unwrap();
    let offsets: Vec<u64> = (0..5u8)
        .map(|i| writer.append(&[i; 10]).unwrap())
        .collect();
    writer.close().unwrap();

    assert_eq!(offsets, vec![0, 14, 32, 46, 64]);
    assert_eq!(writer.segment_count(), 3);

    for n in 0..3 {
        assert!(dir.join(segment_file_name(n)).exists());
    }
    assert_eq!(std::fs::metadata(dir.join("bundle.0000")).unwrap().len(), 28);
    assert_eq!(std::fs::metadata(dir.join("bundle.0002")).unwrap().len(), 14);

    let reader = BundleReader::open(&pool, &dir).unwrap();
    for (i, offset) in offsets.iter().enumerate() {
        assert_eq!(reader.read_at(*offset, 10).unwrap(), vec![i as u8; 10]);
    }
}

#[test]
fn test_record_larger_than_break_rejected() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 16, 0o644).unwrap();
    let result = writer.append(&[0u8; 13]);
    assert!(matches!(
        result,
        Err(StoreError::RecordTooLarge { size: 17, limit: 16 })
    ));
    writer.close().unwrap();
}

#[test]
fn test_tiny_break_rejected() {
    let (_temp, dir, pool) = setup();
    let result = BundleWriter::create(&pool, &dir, 4, 0o644);
    assert!(matches!(result, Err(StoreError::Config(_))));
}

// =============================================================================
// Allocation Tests
// =============================================================================

#[test]
fn test_allocations_filled_in_reverse_match_appends() {
    let (_temp, dir, pool) = setup();
    let payloads: Vec<Vec<u8>> = (0..6u8).map(|i| vec![i; i as usize + 3]).collect();

    let allocated = dir.join("allocated");
    std::fs::create_dir(&allocated).unwrap();
    let mut writer = BundleWriter::create(&pool, &allocated, 32, 0o644).unwrap();
    let handles: Vec<_> = payloads
        .iter()
        .map(|p| writer.allocate(p.len() as u32).unwrap())
        .collect();
    for (handle, payload) in handles.iter().zip(&payloads).rev() {
        writer.write_at(*handle, payload).unwrap();
    }
    writer.close().unwrap();

    let appended = dir.join("appended");
    std::fs::create_dir(&appended).unwrap();
    let mut writer = BundleWriter::create(&pool, &appended, 32, 0o644).unwrap();
    let offsets: Vec<u64> = payloads.iter().map(|p| writer.append(p).unwrap()).collect();
    writer.close().unwrap();

    let allocated_offsets: Vec<u64> = handles.iter().map(|h| h.offset()).collect();
    assert_eq!(allocated_offsets, offsets);

    let left = BundleReader::open(&pool, &allocated).unwrap();
    let right = BundleReader::open(&pool, &appended).unwrap();
    assert_eq!(left.data_size(), right.data_size());
    assert_eq!(left.segment_count(), right.segment_count());
    assert!(left.segment_count() > 1);

    for (offset, payload) in offsets.iter().zip(&payloads) {
        let size = payload.len() as u32;
        assert_eq!(left.read_at(*offset, size).unwrap(), *payload);
        assert_eq!(left.read_at(*offset, size).unwrap(), right.read_at(*offset, size).unwrap());
    }

    for n in 0..left.segment_count() as u32 {
        let name = segment_file_name(n);
        assert_eq!(
            std::fs::read(allocated.join(&name)).unwrap(),
            std::fs::read(appended.join(&name)).unwrap()
        );
    }
}

#[test]
fn test_fill_with_wrong_size_rejected() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    let handle = writer.allocate(8).unwrap();
    let result = writer.write_at(handle, b"short");
    assert!(matches!(
        result,
        Err(StoreError::AllocationSize { expected: 8, actual: 5 })
    ));
    writer.close().unwrap();
}

#[test]
fn test_unfilled_allocation_reads_as_corrupt() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    writer.append(b"before").unwrap();
    let handle = writer.allocate(8).unwrap();
    writer.close().unwrap();

    let reader = BundleReader::open(&pool, &dir).unwrap();
    let result = reader.read_at(handle.offset(), handle.size());
    assert!(matches!(result, Err(StoreError::CorruptRecord { .. })));
}

// =============================================================================
// Write Buffer Tests
// =============================================================================

#[test]
fn test_buffered_writes_held_until_flush() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    writer.buffer_writes(64).unwrap();
    let offsets: Vec<u64> = (0..3u8).map(|i| writer.append(&[i; 10]).unwrap()).collect();

    assert_eq!(writer.buffered_bytes(), 42);
    assert_eq!(segment_len(&dir, 0), 0);
    // Reads see buffered records
    assert_eq!(writer.read_at(offsets[1], 10).unwrap(), vec![1u8; 10]);

    writer.flush_write_buffer().unwrap();
    assert_eq!(writer.buffered_bytes(), 0);
    assert_eq!(segment_len(&dir, 0), 42);
    writer.close().unwrap();
}

#[test]
fn test_full_buffer_is_written_out() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    writer.buffer_writes(64).unwrap();
    for i in 0..5u8 {
        writer.append(&[i; 10]).unwrap();
    }

    // Four records fit; the fifth starts a new run
    assert_eq!(segment_len(&dir, 0), 56);
    assert_eq!(writer.buffered_bytes(), 14);
    writer.close().unwrap();
    assert_eq!(segment_len(&dir, 0), 70);
}

#[test]
fn test_record_larger_than_buffer_bypasses_it() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    writer.buffer_writes(8).unwrap();
    let offset = writer.append(b"0123456789").unwrap();

    assert_eq!(writer.buffered_bytes(), 0);
    assert_eq!(segment_len(&dir, 0), 14);
    assert_eq!(writer.read_at(offset, 10).unwrap(), b"0123456789");
    writer.close().unwrap();
}

#[test]
fn test_buffered_bundle_matches_unbuffered() {
    let (_temp, dir, pool) = setup();

    let write = |sub: &str, buffer: usize| {
        let target = dir.join(sub);
        std::fs::create_dir(&target).unwrap();
        let mut writer = BundleWriter::create(&pool, &target, 48, 0o644).unwrap();
        writer.buffer_writes(buffer).unwrap();

        let mut handles = Vec::new();
        for i in 0..12u8 {
            if i % 3 == 0 {
                handles.push((i, writer.allocate(6).unwrap()));
            } else {
                writer.append(&[i; 6]).unwrap();
            }
        }
        for (i, handle) in handles.into_iter().rev() {
            writer.write_at(handle, &[i; 6]).unwrap();
        }
        writer.close().unwrap();
        target
    };

    let buffered = write("buffered", 32);
    let plain = write("plain", 0);

    let reader = BundleReader::open(&pool, &buffered).unwrap();
    assert!(reader.segment_count() > 1);
    for n in 0..reader.segment_count() as u32 {
        let name = segment_file_name(n);
        assert_eq!(
            std::fs::read(buffered.join(&name)).unwrap(),
            std::fs::read(plain.join(&name)).unwrap()
        );
    }
    for i in 0..12u8 {
        let (segment, slot) = (i as u64 / 4, i as u64 % 4);
        assert_eq!(reader.read_at(segment * 48 + slot * 10, 6).unwrap(), vec![i; 6]);
    }
}

// =============================================================================
// Read Cache Tests
// =============================================================================

#[test]
fn test_read_cache_loads_each_block_once() {
    let (_temp, dir, pool) = setup();
    let offsets = write_small_records(&pool, &dir, 1024);

    let mut reader = BundleReader::open(&pool, &dir).unwrap();
    assert!(reader.cache_stats().is_none());
    reader.enable_read_cache(4, 64).unwrap();

    for (i, offset) in offsets.iter().enumerate() {
        assert_eq!(reader.read_at(*offset, 10).unwrap(), vec![i as u8; 10]);
    }

    // 280 bytes in 64-byte blocks
    let stats = reader.cache_stats().unwrap();
    assert_eq!(stats.misses, 5);
    assert!(stats.hits > 0);
    assert!(stats.blocks <= 4);

    // Re-reading the tail hits the cache
    assert_eq!(reader.read_at(offsets[19], 10).unwrap(), vec![19u8; 10]);
    assert_eq!(reader.cache_stats().unwrap().misses, 5);
}

#[test]
fn test_read_cache_across_segments() {
    let (_temp, dir, pool) = setup();
    // Two records per 32-byte segment, 28 bytes used in each
    let offsets = write_small_records(&pool, &dir, 32);

    let mut reader = BundleReader::open(&pool, &dir).unwrap();
    reader.enable_read_cache(3, 16).unwrap();

    for (i, offset) in offsets.iter().enumerate().rev() {
        assert_eq!(reader.read_at(*offset, 10).unwrap(), vec![i as u8; 10]);
    }
    assert!(matches!(
        reader.read_at(offsets[1], 20),
        Err(StoreError::CorruptRecord { .. })
    ));
}

#[test]
fn test_read_cache_still_checks_crc() {
    let (_temp, dir, pool) = setup();
    let offsets = write_small_records(&pool, &dir, 1024);

    let seg = dir.join("bundle.0000");
    let mut raw = std::fs::read(&seg).unwrap();
    raw[offsets[7] as usize] ^= 0xFF;
    std::fs::write(&seg, raw).unwrap();

    let mut reader = BundleReader::open(&pool, &dir).unwrap();
    reader.enable_read_cache(2, 128).unwrap();
    assert_eq!(reader.read_at(offsets[6], 10).unwrap(), vec![6u8; 10]);
    assert!(matches!(
        reader.read_at(offsets[7], 10),
        Err(StoreError::CorruptRecord { offset }) if offset == offsets[7]
    ));
}

#[test]
fn test_read_cache_settings() {
    let (_temp, dir, pool) = setup();
    write_small_records(&pool, &dir, 1024);

    let mut reader = BundleReader::open(&pool, &dir).unwrap();
    reader.enable_read_cache(1, 64).unwrap();
    assert!(reader.cache_stats().is_none());

    assert!(matches!(
        reader.enable_read_cache(4, 0),
        Err(StoreError::Config(_))
    ));

    let config = Config::builder().read_cache(8, 256).build();
    let reader = BundleReader::open_with_config(&pool, &dir, &config).unwrap();
    assert_eq!(reader.cache_stats(), Some(CacheStats::default()));
}

#[test]
fn test_read_cache_shared_across_threads() {
    let (_temp, dir, pool) = setup();
    let offsets = write_small_records(&pool, &dir, 64);

    let mut reader = BundleReader::open(&pool, &dir).unwrap();
    reader.enable_read_cache(2, 32).unwrap();
    let reader = Arc::new(reader);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let reader = Arc::clone(&reader);
            let offsets = offsets.clone();
            thread::spawn(move || {
                for round in 0..100 {
                    let i = (t * 5 + round) % offsets.len();
                    assert_eq!(reader.read_at(offsets[i], 10).unwrap(), vec![i as u8; 10]);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(reader.cache_stats().unwrap().blocks <= 2);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_corrupt_record_detected() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    writer.append(b"good").unwrap();
    let bad = writer.append(b"damaged").unwrap();
    writer.close().unwrap();

    let seg = dir.join("bundle.0000");
    let mut raw = std::fs::read(&seg).unwrap();
    raw[bad as usize + 2] ^= 0x01;
    std::fs::write(&seg, raw).unwrap();

    let reader = BundleReader::open(&pool, &dir).unwrap();
    assert_eq!(reader.read_at(0, 4).unwrap(), b"good");
    let err = reader.read_at(bad, 7).unwrap_err();
    assert!(err.is_corruption());
    assert!(matches!(err, StoreError::CorruptRecord { offset } if offset == bad));
}

#[test]
fn test_read_out_of_bounds_is_corrupt() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    writer.append(b"only").unwrap();
    writer.close().unwrap();

    let reader = BundleReader::open(&pool, &dir).unwrap();
    assert!(matches!(
        reader.read_at(0, 100),
        Err(StoreError::CorruptRecord { offset: 0 })
    ));
    assert!(matches!(
        reader.read_at(5000, 1),
        Err(StoreError::CorruptRecord { offset: 5000 })
    ));
}

#[test]
fn test_corrupt_header_detected() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
    writer.append(b"data").unwrap();
    writer.close().unwrap();

    let hdr = dir.join(HEADER_FILE_NAME);
    let mut raw = std::fs::read(&hdr).unwrap();
    raw[3] ^= 0x40;
    std::fs::write(&hdr, raw).unwrap();

    let result = BundleReader::open(&pool, &dir);
    assert!(matches!(result, Err(StoreError::CorruptBundleHeader { .. })));
}

#[test]
fn test_unclosed_bundle_has_no_header() {
    let (_temp, dir, pool) = setup();

    {
        let mut writer = BundleWriter::create(&pool, &dir, 1024, 0o644).unwrap();
        writer.append(b"lost").unwrap();
    }

    assert!(!dir.join(HEADER_FILE_NAME).exists());
    assert!(BundleReader::open(&pool, &dir).is_err());
}

// =============================================================================
// Manifest Tests
// =============================================================================

#[test]
fn test_manifest_lists_header_and_segments() {
    let (_temp, dir, pool) = setup();

    let mut writer = BundleWriter::create(&pool, &dir, 32, 0o644).unwrap();
    for i in 0..3u8 {
        writer.append(&[i; 20]).unwrap();
    }
    writer.close().unwrap();

    let reader = BundleReader::open(&pool, &dir).unwrap();
    let manifest = reader.manifest().unwrap();

    assert_eq!(manifest.len(), 4);
    assert_eq!(manifest[0].role, FileRole::BundleHeader);
    for n in 0..3 {
        let entry = &manifest[n + 1];
        assert_eq!(entry.role, FileRole::BundleSegment(n as u32));
        assert_eq!(entry.size, 24);
        assert!(!entry.is_relocated());
    }
}
