//! Tests for the SQLite result store on disk.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use scan_worker::protocol::WorkerId;
use scan_worker::store::{ResultStore, SqliteStore};

fn db_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

#[test]
fn test_records_survive_reopen() {
    let dir = db_dir();
    let path = dir.path().join("api.db");
    let worker = WorkerId::generate();

    {
        let store = SqliteStore::open(&path).unwrap();
        store.record(&worker, "abc", r#"{"score":42}"#).unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let record = store.get(&worker, "abc").unwrap().unwrap();
    assert_eq!(record.result, r#"{"score":42}"#);
    assert_eq!(record.worker_id, worker.to_string());
}

#[test]
fn test_workers_share_one_database() {
    let dir = db_dir();
    let path = dir.path().join("api.db");
    let store = SqliteStore::open(&path).unwrap();

    // One store per simulated worker process, all on the same file.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let store = SqliteStore::open(&path).unwrap();
                let worker = WorkerId::generate();
                for job in 0..25 {
                    store
                        .record(&worker, &format!("job-{job}"), "{}")
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.count().unwrap(), 100);
}

#[test]
fn test_store_shared_between_threads() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let worker = WorkerId::generate();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .record(&worker, &format!("job-{i}"), r#"{"ok":true}"#)
                    .unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.count().unwrap(), 8);
}
