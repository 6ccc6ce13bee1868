//! Tests for IndexWriter and IndexReader
//!
//! These tests verify:
//! - Every sort strategy yields the same key-ordered index
//! - Equal keys keep insertion order
//! - Header and entry corruption are reported separately
//! - Truncation, key width and read-past-end checks
//! - Temporary files are cleaned up

use std::path::{Path, PathBuf};
use std::sync::Arc;

use packstore::index::{
    entry_size, probe_header, IndexEntry, IndexReader, IndexWriter, SortStrategy,
    INDEX_FILE_NAME, SORT_FILE_NAME, SPOOL_FILE_NAME,
};
use packstore::{FilePool, StoreError};
use proptest::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, PathBuf, Arc<FilePool>) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    let pool = FilePool::new(8).unwrap();
    (temp_dir, path, pool)
}

/// Write `keys` in order, using the position as offset and tag
fn write_index(pool: &Arc<FilePool>, dir: &Path, keys: &[u64], budget: usize) -> SortStrategy {
    let mut writer = IndexWriter::<u64>::create(pool, dir, 0o644).unwrap();
    for (i, key) in keys.iter().enumerate() {
        writer
            .push(IndexEntry::new(*key, i as u64 * 100, 10, i as u32))
            .unwrap();
    }
    let summary = writer.close(budget).unwrap();
    assert_eq!(summary.entry_count, keys.len() as u64);
    summary.strategy
}

fn read_all(pool: &Arc<FilePool>, dir: &Path) -> Vec<IndexEntry<u64>> {
    let mut reader = IndexReader::<u64>::open(pool, &dir.join(INDEX_FILE_NAME)).unwrap();
    reader.entries().collect::<Result<Vec<_>, _>>().unwrap()
}

/// Stable sort of (key, insertion position) pairs
fn expected_order(keys: &[u64]) -> Vec<(u64, u32)> {
    let mut expected: Vec<(u64, u32)> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (*k, i as u32))
        .collect();
    expected.sort_by_key(|(k, _)| *k);
    expected
}

fn key_tag_pairs(entries: &[IndexEntry<u64>]) -> Vec<(u64, u32)> {
    entries.iter().map(|e| (e.key, e.tag)).collect()
}

// =============================================================================
// Strategy Tests
// =============================================================================

#[test]
fn test_presorted_input_uses_fast_path() {
    let (_temp, dir, pool) = setup();

    let strategy = write_index(&pool, &dir, &[1, 2, 2, 5, 9], 1024);
    assert_eq!(strategy, SortStrategy::Presorted);

    let entries = read_all(&pool, &dir);
    assert_eq!(key_tag_pairs(&entries), expected_order(&[1, 2, 2, 5, 9]));
    assert!(!dir.join(SPOOL_FILE_NAME).exists());
}

#[test]
fn test_in_memory_sort() {
    let (_temp, dir, pool) = setup();
    let keys = [3, 1, 2];

    let strategy = write_index(&pool, &dir, &keys, 1024 * 1024);
    assert_eq!(strategy, SortStrategy::InMemory);

    let entries = read_all(&pool, &dir);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0], IndexEntry::new(1, 100, 10, 1));
    assert_eq!(entries[1], IndexEntry::new(2, 200, 10, 2));
    assert_eq!(entries[2], IndexEntry::new(3, 0, 10, 0));
}

#[test]
fn test_external_merge_sort() {
    let (_temp, dir, pool) = setup();
    let keys: Vec<u64> = (0..1000u64).map(|i| (i * 7919) % 1000).collect();

    // Room for 64 entries per run
    let budget = 64 * entry_size::<u64>();
    let strategy = write_index(&pool, &dir, &keys, budget);
    assert_eq!(strategy, SortStrategy::ExternalMerge { runs: 16 });

    let entries = read_all(&pool, &dir);
    assert_eq!(key_tag_pairs(&entries), expected_order(&keys));
    assert!(!dir.join(SORT_FILE_NAME).exists());
    assert!(!dir.join(SPOOL_FILE_NAME).exists());
}

#[test]
fn test_external_merge_keeps_equal_keys_in_call_order() {
    let (_temp, dir, pool) = setup();
    let keys: Vec<u64> = (0..200u64).map(|i| (199 - i) % 5).collect();

    let budget = 8 * entry_size::<u64>();
    let strategy = write_index(&pool, &dir, &keys, budget);
    assert!(matches!(strategy, SortStrategy::ExternalMerge { .. }));

    let entries = read_all(&pool, &dir);
    assert_eq!(key_tag_pairs(&entries), expected_order(&keys));
}

#[test]
fn test_budget_below_one_entry_still_sorts() {
    let (_temp, dir, pool) = setup();
    let keys = [5, 4, 3, 2, 1];

    let strategy = write_index(&pool, &dir, &keys, 1);
    assert_eq!(strategy, SortStrategy::ExternalMerge { runs: 5 });

    let entries = read_all(&pool, &dir);
    assert_eq!(key_tag_pairs(&entries), expected_order(&keys));
}

#[test]
fn test_empty_index() {
    let (_temp, dir, pool) = setup();

    write_index(&pool, &dir, &[], 1024);

    let mut reader = IndexReader::<u64>::open(&pool, &dir.join(INDEX_FILE_NAME)).unwrap();
    assert_eq!(reader.count(), 0);
    assert!(matches!(
        reader.read_next(),
        Err(StoreError::ReadPastEnd { count: 0 })
    ));
}

#[test]
fn test_double_close_and_push_after_close() {
    let (_temp, dir, pool) = setup();

    let mut writer = IndexWriter::<u64>::create(&pool, &dir, 0o644).unwrap();
    writer.push(IndexEntry::new(1, 0, 1, 0)).unwrap();
    writer.close(1024).unwrap();

    assert!(matches!(writer.close(1024), Err(StoreError::AlreadyClosed)));
    assert!(matches!(
        writer.push(IndexEntry::new(2, 0, 1, 0)),
        Err(StoreError::AlreadyClosed)
    ));
}

#[test]
fn test_unclosed_writer_leaves_no_index() {
    let (_temp, dir, pool) = setup();
    write_index(&pool, &dir, &[1, 2], 1024);

    {
        let mut writer = IndexWriter::<u64>::create(&pool, &dir, 0o644).unwrap();
        writer.push(IndexEntry::new(7, 0, 1, 0)).unwrap();
    }

    assert!(!dir.join(INDEX_FILE_NAME).exists());
}

// =============================================================================
// Reader Tests
// =============================================================================

#[test]
fn test_reader_position_and_seek() {
    let (_temp, dir, pool) = setup();
    write_index(&pool, &dir, &[10, 20, 30, 40], 1024);

    let mut reader = IndexReader::<u64>::open(&pool, &dir.join(INDEX_FILE_NAME)).unwrap();
    assert_eq!(reader.count(), 4);
    assert_eq!(reader.read_next().unwrap().key, 10);
    assert_eq!(reader.position(), 1);
    assert_eq!(reader.remaining(), 3);

    reader.seek(3).unwrap();
    assert_eq!(reader.read_next().unwrap().key, 40);
    assert!(matches!(
        reader.read_next(),
        Err(StoreError::ReadPastEnd { count: 4 })
    ));

    reader.seek(0).unwrap();
    assert_eq!(reader.read_next().unwrap().key, 10);
    assert!(matches!(reader.seek(5), Err(StoreError::ReadPastEnd { .. })));
}

#[test]
fn test_key_width_mismatch() {
    let (_temp, dir, pool) = setup();
    write_index(&pool, &dir, &[1], 1024);

    let result = IndexReader::<u32>::open(&pool, &dir.join(INDEX_FILE_NAME));
    assert!(matches!(
        result,
        Err(StoreError::KeyWidthMismatch { expected: 4, found: 8 })
    ));

    let header = probe_header(&pool, &dir.join(INDEX_FILE_NAME)).unwrap();
    assert_eq!(header.key_width, 8);
    assert_eq!(header.entry_count, 1);
    assert!(header.data_has_crc());
}

#[test]
fn test_byte_array_keys() {
    let (_temp, dir, pool) = setup();

    let mut writer = IndexWriter::<[u8; 3]>::create(&pool, &dir, 0o644).unwrap();
    for (i, key) in [*b"cab", *b"abc", *b"bca"].iter().enumerate() {
        writer.push(IndexEntry::new(*key, i as u64, 1, 0)).unwrap();
    }
    writer.close(1024).unwrap();

    let mut reader = IndexReader::<[u8; 3]>::open(&pool, &dir.join(INDEX_FILE_NAME)).unwrap();
    let keys: Vec<[u8; 3]> = reader.entries().map(|e| e.unwrap().key).collect();
    assert_eq!(keys, vec![*b"abc", *b"bca", *b"cab"]);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_header_corruption_fails_open() {
    let (_temp, dir, pool) = setup();
    write_index(&pool, &dir, &[3, 1, 2], 1024);

    let path = dir.join(INDEX_FILE_NAME);
    let mut raw = std::fs::read(&path).unwrap();
    raw[9] ^= 0x01; // inside entry_count
    std::fs::write(&path, raw).unwrap();

    let err = IndexReader::<u64>::open(&pool, &path).err().unwrap();
    assert!(matches!(err, StoreError::CorruptHeader { .. }));
    assert!(err.is_corruption());
}

#[test]
fn test_entry_corruption_is_isolated() {
    let (_temp, dir, pool) = setup();
    write_index(&pool, &dir, &[3, 1, 2], 1024);

    let path = dir.join(INDEX_FILE_NAME);
    let mut raw = std::fs::read(&path).unwrap();
    let second_entry = 24 + entry_size::<u64>();
    raw[second_entry + 9] ^= 0x80; // inside the offset field
    std::fs::write(&path, raw).unwrap();

    let mut reader = IndexReader::<u64>::open(&pool, &path).unwrap();
    assert_eq!(reader.count(), 3);
    assert_eq!(reader.read_next().unwrap().key, 1);
    assert!(matches!(
        reader.read_next(),
        Err(StoreError::CorruptEntry { index: 1, .. })
    ));
    assert_eq!(reader.read_next().unwrap().key, 3);
}

#[test]
fn test_truncated_index_fails_open() {
    let (_temp, dir, pool) = setup();
    write_index(&pool, &dir, &[3, 1, 2], 1024);

    let path = dir.join(INDEX_FILE_NAME);
    let raw = std::fs::read(&path).unwrap();
    std::fs::write(&path, &raw[..raw.len() - 5]).unwrap();

    let result = IndexReader::<u64>::open(&pool, &path);
    assert!(matches!(result, Err(StoreError::TruncatedIndex { .. })));
}

#[test]
fn test_unaddressable_entry_count_is_truncated() {
    let (_temp, dir, pool) = setup();
    write_index(&pool, &dir, &[3, 1, 2], 1024);

    // Rewrite the count with a valid checksum
    let path = dir.join(INDEX_FILE_NAME);
    let mut raw = std::fs::read(&path).unwrap();
    raw[8..16].copy_from_slice(&u64::MAX.to_le_bytes());
    packstore::codec::frame_in_place(&mut raw[..24]);
    std::fs::write(&path, &raw).unwrap();

    assert_eq!(probe_header(&pool, &path).unwrap().entry_count, u64::MAX);
    let result = IndexReader::<u64>::open(&pool, &path);
    assert!(matches!(
        result,
        Err(StoreError::TruncatedIndex { expected: u64::MAX, found, .. }) if found == raw.len() as u64
    ));
}

#[test]
fn test_short_file_is_corrupt_header() {
    let (_temp, dir, pool) = setup();
    let path = dir.join(INDEX_FILE_NAME);
    std::fs::write(&path, b"PKIX").unwrap();

    let result = IndexReader::<u64>::open(&pool, &path);
    assert!(matches!(result, Err(StoreError::CorruptHeader { .. })));
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_strategies_agree(
        keys in prop::collection::vec(0u64..50, 0..300),
        run_entries in 1usize..40,
    ) {
        let (_a, in_memory_dir, pool) = setup();
        let (_b, external_dir, _) = setup();

        write_index(&pool, &in_memory_dir, &keys, usize::MAX);
        write_index(&pool, &external_dir, &keys, run_entries * entry_size::<u64>());

        let in_memory = key_tag_pairs(&read_all(&pool, &in_memory_dir));
        let external = key_tag_pairs(&read_all(&pool, &external_dir));

        prop_assert_eq!(&in_memory, &external);
        prop_assert_eq!(in_memory, expected_order(&keys));
    }
}
