//! Tests for LocalFsStore
//!
//! These tests verify:
//! - On-disk layout (one file per key, 16 hex digit names)
//! - Sweeping of staged files left by interrupted creates
//! - Key listing
//! - Non-file entries under a key's name are not blobs
//! - Racing creates on the same key

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use blobstore::{BlobError, BlobStore, Config, Key, LocalFsStore, SyncStrategy};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store() -> (TempDir, LocalFsStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = LocalFsStore::connect(temp_dir.path()).unwrap();
    (temp_dir, store)
}

fn dir_entries(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(path)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_connect_creates_root() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("nested").join("blobs");

    assert!(!root.exists());

    let store = LocalFsStore::connect(&root).unwrap();

    assert!(root.is_dir());
    assert_eq!(store.root(), root.as_path());
}

#[test]
fn test_one_file_per_key_with_hex_name() {
    let (temp, store) = setup_store();

    store.create(Key(0x2a), b"abc").unwrap();
    store.create(Key(u64::MAX), b"").unwrap();

    assert_eq!(
        dir_entries(temp.path()),
        vec!["000000000000002a".to_string(), "ffffffffffffffff".to_string()]
    );
    assert_eq!(fs::read(store.blob_path(Key(0x2a))).unwrap(), b"abc");
    assert_eq!(fs::metadata(store.blob_path(Key(u64::MAX))).unwrap().len(), 0);
}

#[test]
fn test_create_leaves_no_staged_files() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(temp_dir.path())
        .sync_strategy(SyncStrategy::EveryWrite)
        .build();
    let store = LocalFsStore::connect_with(&config).unwrap();

    store.create(Key(1), b"one").unwrap();
    assert!(store.create(Key(1), b"dup").is_err());
    store.create(Key(2), b"two").unwrap();

    assert_eq!(
        dir_entries(temp_dir.path()),
        vec!["0000000000000001".to_string(), "0000000000000002".to_string()]
    );
}

#[test]
fn test_remove_deletes_file() {
    let (_temp, store) = setup_store();

    store.create(Key(3), b"gone soon").unwrap();
    let path = store.blob_path(Key(3));
    assert!(path.exists());

    store.remove(Key(3)).unwrap();
    assert!(!path.exists());
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_connect_sweeps_staged_files() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = LocalFsStore::connect(temp_dir.path()).unwrap();
        store.create(Key(1), b"kept").unwrap();
    }

    // Simulate a create interrupted between staging and publish
    fs::write(temp_dir.path().join(".tmp-abc123"), b"half written").unwrap();

    let store = LocalFsStore::connect(temp_dir.path()).unwrap();

    assert!(!temp_dir.path().join(".tmp-abc123").exists());
    assert_eq!(store.get_owned(Key(1)).unwrap(), b"kept");
}

#[test]
fn test_foreign_files_are_not_keys() {
    let (temp, store) = setup_store();

    store.create(Key(10), b"x").unwrap();
    fs::write(temp.path().join("README"), b"not a blob").unwrap();
    fs::write(temp.path().join("000000000000000G"), b"not hex").unwrap();
    fs::create_dir(temp.path().join("000000000000000b")).unwrap();

    assert_eq!(store.keys().unwrap(), vec![Key(10)]);
    assert!(!store.contains(Key(11)));
}

#[test]
fn test_directory_under_key_name_is_not_found() {
    let (temp, store) = setup_store();
    let key = Key(0xb);
    fs::create_dir(temp.path().join("000000000000000b")).unwrap();

    assert!(!store.contains(key));
    assert!(store.meta(key).unwrap_err().is_not_found());
    assert!(store.blob_size(key).unwrap_err().is_not_found());
    assert!(store.get_owned(key).unwrap_err().is_not_found());
    assert!(store.get_all(key, &mut []).unwrap_err().is_not_found());
    assert!(store.get_offset(key, &mut [], 0).unwrap_err().is_not_found());
    assert!(store.put_at(key, &[], 0).unwrap_err().is_not_found());
    assert!(store.remove(key).unwrap_err().is_not_found());

    // The name is still taken, so create refuses and the directory survives
    assert!(matches!(store.create(key, b"x"), Err(BlobError::AlreadyExists(_))));
    assert!(temp.path().join("000000000000000b").is_dir());
}

#[test]
fn test_keys_lists_all_blobs() {
    let (_temp, store) = setup_store();

    for i in 0..20u64 {
        store.create(Key(i * 1000), &[i as u8]).unwrap();
    }
    store.remove(Key(5000)).unwrap();

    let mut keys = store.keys().unwrap();
    keys.sort();

    let expected: Vec<Key> = (0..20u64).filter(|&i| i != 5).map(|i| Key(i * 1000)).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_external_truncation_changes_size() {
    let (_temp, store) = setup_store();

    store.create(Key(4), &[1u8; 100]).unwrap();
    fs::write(store.blob_path(Key(4)), [2u8; 10]).unwrap();

    assert_eq!(store.blob_size(Key(4)).unwrap(), 10);
    let mut buf = [0u8; 100];
    assert!(matches!(
        store.get_all(Key(4), &mut buf),
        Err(BlobError::SizeMismatch { expected: 10, actual: 100, .. })
    ));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_racing_creates_single_winner() {
    let (_temp, store) = setup_store();
    let winners = AtomicUsize::new(0);
    let losers = AtomicUsize::new(0);

    crossbeam::thread::scope(|s| {
        for t in 0..8u8 {
            let store = &store;
            let winners = &winners;
            let losers = &losers;
            s.spawn(move |_| match store.create(Key(77), &[t; 4096]) {
                Ok(()) => {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
                Err(BlobError::AlreadyExists(_)) => {
                    losers.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => panic!("unexpected error: {:?}", e),
            });
        }
    })
    .unwrap();

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert_eq!(losers.load(Ordering::SeqCst), 7);

    // Winner's payload is intact, not a mix of writers
    let data = store.get_owned(Key(77)).unwrap();
    assert_eq!(data.len(), 4096);
    assert!(data.iter().all(|&b| b == data[0]));
}
