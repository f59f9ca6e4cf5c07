//! Tests for concurrent access through a shared store
//!
//! These tests verify:
//! - Parallel creates on disjoint keys all land intact
//! - Readers see whole, correct blobs while writers grow the store
//! - Racing creates on one key produce exactly one winner
//! - Reads racing a remove see either the blob or NotFound
//! - Owned reads racing a remove + recreate never mix two blobs

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use blobstore::{BackendKind, BlobError, BlobStore, Config, Key, Store};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const BACKENDS: [BackendKind; 2] = [BackendKind::LocalFs, BackendKind::MemMap];

fn setup_store(kind: BackendKind) -> (TempDir, Store) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(temp_dir.path())
        .backend(kind)
        // Small arena so writers force remaps while readers run
        .initial_arena_size(16 * 1024)
        .growth_granularity(16 * 1024)
        .build();
    let store = Store::connect(&config).unwrap();
    (temp_dir, store)
}

/// Deterministic payload whose bytes all encode the key
fn payload_for(key: u64, len: usize) -> Vec<u8> {
    vec![(key % 251) as u8; len]
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_parallel_creates_disjoint_keys() {
    for kind in BACKENDS {
        let (_temp, store) = setup_store(kind);

        crossbeam::thread::scope(|s| {
            for t in 0..4u64 {
                let store = &store;
                s.spawn(move |_| {
                    for i in 0..100u64 {
                        let key = t * 1000 + i;
                        store.create(Key(key), &payload_for(key, 512 + i as usize)).unwrap();
                    }
                });
            }
        })
        .unwrap();

        for t in 0..4u64 {
            for i in 0..100u64 {
                let key = t * 1000 + i;
                assert_eq!(
                    store.get_owned(Key(key)).unwrap(),
                    payload_for(key, 512 + i as usize),
                    "{:?}: key {}",
                    kind,
                    key
                );
            }
        }
    }
}

#[test]
fn test_readers_during_growth() {
    for kind in BACKENDS {
        let (_temp, store) = setup_store(kind);
        for key in 0..16u64 {
            store.create(Key(key), &payload_for(key, 1024)).unwrap();
        }

        let done = AtomicBool::new(false);
        let reads = AtomicUsize::new(0);

        crossbeam::thread::scope(|s| {
            for _ in 0..4 {
                let store = &store;
                let done = &done;
                let reads = &reads;
                s.spawn(move |_| {
                    let mut buf = vec![0u8; 1024];
                    loop {
                        let finished = done.load(Ordering::Acquire);
                        for key in 0..16u64 {
                            store.get_all(Key(key), &mut buf).unwrap();
                            assert_eq!(buf, payload_for(key, 1024));

                            let mut part = [0u8; 100];
                            store.get_offset(Key(key), &mut part, 900).unwrap();
                            assert!(part.iter().all(|&b| b == (key % 251) as u8));
                        }
                        reads.fetch_add(1, Ordering::Relaxed);
                        if finished {
                            break;
                        }
                    }
                });
            }

            let store = &store;
            let done = &done;
            s.spawn(move |_| {
                for key in 100..400u64 {
                    store.create(Key(key), &payload_for(key, 2048)).unwrap();
                    if key % 3 == 0 {
                        store.remove(Key(key)).unwrap();
                    }
                }
                done.store(true, Ordering::Release);
            });
        })
        .unwrap();

        assert!(reads.load(Ordering::Relaxed) >= 4);
        for key in 100..400u64 {
            assert_eq!(store.contains(Key(key)), key % 3 != 0, "{:?}: key {}", kind, key);
        }
    }
}

#[test]
fn test_racing_creates_one_winner() {
    for kind in BACKENDS {
        let (_temp, store) = setup_store(kind);
        let winners = AtomicUsize::new(0);

        crossbeam::thread::scope(|s| {
            for t in 0..8u8 {
                let store = &store;
                let winners = &winners;
                s.spawn(move |_| match store.create(Key(1), &[t; 2048]) {
                    Ok(()) => {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(BlobError::AlreadyExists(_)) => {}
                    Err(e) => panic!("unexpected error: {:?}", e),
                });
            }
        })
        .unwrap();

        assert_eq!(winners.load(Ordering::SeqCst), 1, "{:?}", kind);
        let data = store.get_owned(Key(1)).unwrap();
        assert_eq!(data.len(), 2048);
        assert!(data.iter().all(|&b| b == data[0]));
    }
}

#[test]
fn test_reads_racing_remove() {
    for kind in BACKENDS {
        let (_temp, store) = setup_store(kind);
        for key in 0..200u64 {
            store.create(Key(key), &payload_for(key, 4096)).unwrap();
        }

        crossbeam::thread::scope(|s| {
            let reader_store = &store;
            s.spawn(move |_| {
                for key in 0..200u64 {
                    match reader_store.get_owned(Key(key)) {
                        Ok(data) => assert_eq!(data, payload_for(key, 4096)),
                        Err(e) => assert!(e.is_not_found(), "unexpected error: {:?}", e),
                    }
                }
            });

            let writer_store = &store;
            s.spawn(move |_| {
                for key in 0..200u64 {
                    writer_store.remove(Key(key)).unwrap();
                }
            });
        })
        .unwrap();

        for key in 0..200u64 {
            assert!(!store.contains(Key(key)));
        }
    }
}

#[test]
fn test_owned_reads_racing_recreate() {
    for kind in BACKENDS {
        let (_temp, store) = setup_store(kind);
        let short = vec![0x11u8; 100];
        let long = vec![0x22u8; 5000];
        store.create(Key(9), &short).unwrap();

        let done = AtomicBool::new(false);

        crossbeam::thread::scope(|s| {
            let reader_store = &store;
            let done_flag = &done;
            let (short_ref, long_ref) = (&short, &long);
            s.spawn(move |_| {
                while !done_flag.load(Ordering::Acquire) {
                    match reader_store.get_owned(Key(9)) {
                        Ok(data) => assert!(
                            data == *short_ref || data == *long_ref,
                            "{:?}: torn read of {} bytes",
                            kind,
                            data.len()
                        ),
                        Err(e) => assert!(e.is_not_found(), "unexpected error: {:?}", e),
                    }
                }
            });

            let writer_store = &store;
            let done_flag = &done;
            let (short_ref, long_ref) = (&short, &long);
            s.spawn(move |_| {
                for i in 0..300 {
                    writer_store.remove(Key(9)).unwrap();
                    let next = if i % 2 == 0 { long_ref } else { short_ref };
                    writer_store.create(Key(9), next).unwrap();
                }
                done_flag.store(true, Ordering::Release);
            });
        })
        .unwrap();

        assert_eq!(store.get_owned(Key(9)).unwrap(), short);
    }
}
