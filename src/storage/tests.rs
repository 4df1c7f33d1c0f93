use super::{FileStore, StoreError, lock_key};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    name: String,
    tags: Vec<String>,
    weight: Option<f64>,
}

fn open_temp() -> (TempDir, FileStore) {
    let dir = TempDir::new().expect("tempdir");
    let store = FileStore::open(dir.path()).expect("open store");
    (dir, store)
}

#[test]
fn open_fails_for_missing_or_non_directory_base() {
    let dir = TempDir::new().expect("tempdir");
    let missing = dir.path().join("missing");
    assert!(matches!(
        FileStore::open(&missing),
        Err(StoreError::BasePath { .. })
    ));

    let file = dir.path().join("plain");
    std::fs::write(&file, b"x").expect("write");
    assert!(matches!(
        FileStore::open(&file),
        Err(StoreError::BasePath { .. })
    ));
}

#[test]
fn open_indexes_files_and_skips_directories() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("ch-a"), b"not json at all").expect("write");
    std::fs::write(dir.path().join("up-a"), b"").expect("write");
    std::fs::create_dir(dir.path().join("nested")).expect("mkdir");

    let store = FileStore::open(dir.path()).expect("open store");

    assert_eq!(store.keys(), vec!["ch-a".to_string(), "up-a".to_string()]);
    assert!(!store.contains("nested"));
}

#[test]
fn create_rejects_existing_key() {
    let (dir, store) = open_temp();
    store.create("alpha").expect("create");
    assert!(dir.path().join("alpha").exists());

    let err = store.create("alpha").expect_err("duplicate");
    assert!(matches!(err, StoreError::AlreadyExists { key } if key == "alpha"));
}

#[test]
fn create_rejects_unindexed_file_on_disk() {
    let (dir, store) = open_temp();
    std::fs::write(dir.path().join("late"), b"{}").expect("write");

    let err = store.create("late").expect_err("file exists");
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
}

#[test]
fn concurrent_creates_of_one_key_admit_exactly_one() {
    let (_dir, store) = open_temp();
    let store = Arc::new(store);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.create("contested").is_ok())
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .filter(|ok| *ok)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn delete_removes_file_and_key() {
    let (dir, store) = open_temp();
    store.write_json("gone", &vec![1, 2, 3]).expect("write");

    store.delete("gone").expect("delete");

    assert!(!dir.path().join("gone").exists());
    assert!(!store.contains("gone"));
    assert!(store.read_json::<Vec<i32>>("gone").expect_err("read").is_not_found());
    assert!(store.delete("gone").expect_err("second delete").is_not_found());
}

#[test]
fn json_round_trip_and_full_overwrite() {
    let (_dir, store) = open_temp();
    let long = Record {
        name: "a-rather-long-name".to_string(),
        tags: vec!["x".to_string(), "y".to_string(), "z".to_string()],
        weight: Some(1.5),
    };
    let short = Record {
        name: "b".to_string(),
        tags: Vec::new(),
        weight: None,
    };

    store.write_json("rec", &long).expect("write long");
    assert_eq!(store.read_json::<Record>("rec").expect("read"), long);

    store.write_json("rec", &short).expect("write short");
    assert_eq!(store.read_json::<Record>("rec").expect("read"), short);
}

#[test]
fn read_json_errors() {
    let (dir, store) = open_temp();
    assert!(store.read_json::<Record>("absent").expect_err("absent").is_not_found());

    std::fs::write(dir.path().join("broken"), b"{\"name\":").expect("write");
    let store = FileStore::open(dir.path()).expect("reopen");
    assert!(matches!(
        store.read_json::<Record>("broken"),
        Err(StoreError::Json { .. })
    ));
}

#[test]
fn append_then_scan_in_order() {
    let (_dir, store) = open_temp();
    store.append("log", "a").expect("append a");
    store.append("log", "b").expect("append b");

    let mut seen = Vec::new();
    store
        .scan_lines("log", |line| {
            seen.push(line.to_string());
            true
        })
        .expect("scan");
    assert_eq!(seen, vec!["a", "b"]);
}

#[test]
fn scan_stops_when_visitor_returns_false() {
    let (_dir, store) = open_temp();
    for line in ["first", "second", "third"] {
        store.append("log", line).expect("append");
    }

    let mut visited = 0;
    store
        .scan_lines("log", |_| {
            visited += 1;
            false
        })
        .expect("scan");
    assert_eq!(visited, 1);
}

#[test]
fn scan_missing_key_is_not_found() {
    let (_dir, store) = open_temp();
    let err = store.scan_lines("nothing", |_| true).expect_err("missing");
    assert!(err.is_not_found());
}

#[test]
fn invalid_keys_are_rejected() {
    let (_dir, store) = open_temp();
    for key in ["", ".", "..", "../escape", "a/b", "a\\b"] {
        assert!(
            matches!(store.append(key, "x"), Err(StoreError::InvalidKey { .. })),
            "key {key:?}"
        );
        assert!(matches!(store.create(key), Err(StoreError::InvalidKey { .. })));
    }
}

#[test]
fn held_key_does_not_block_other_keys() {
    let (_dir, store) = open_temp();
    let store = Arc::new(store);
    store.write_json("busy", &1).expect("write");

    let busy = store.lookup("busy").expect("registered");
    let _held = lock_key(&busy);

    let (tx, rx) = mpsc::channel();
    let other = Arc::clone(&store);
    thread::spawn(move || {
        let result = other
            .write_json("free", &2)
            .and_then(|_| other.read_json::<i32>("free"));
        let _ = tx.send(result.ok());
    });

    let value = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("other key must not wait on busy key");
    assert_eq!(value, Some(2));
}

#[test]
fn same_key_writers_never_interleave_bytes() {
    let (_dir, store) = open_temp();
    let store = Arc::new(store);
    let payload_a = vec!["a".repeat(64); 512];
    let payload_b = vec!["b".repeat(32); 2048];
    store.write_json("shared", &payload_a).expect("seed");

    let writers: Vec<_> = [payload_a.clone(), payload_b.clone()]
        .into_iter()
        .map(|payload| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    store.write_json("shared", &payload).expect("write");
                }
            })
        })
        .collect();

    for _ in 0..100 {
        let read: Vec<String> = store.read_json("shared").expect("decode whole payload");
        assert!(read == payload_a || read == payload_b);
    }
    for writer in writers {
        writer.join().expect("join");
    }
}

#[test]
fn create_json_writes_contents_exclusively() {
    let (_dir, store) = open_temp();
    let first = Record {
        name: "first".to_string(),
        tags: vec!["a".to_string()],
        weight: None,
    };
    store.create_json("rec", &first).expect("create");
    assert_eq!(store.read_json::<Record>("rec").expect("read"), first);

    let second = Record {
        name: "second".to_string(),
        tags: Vec::new(),
        weight: Some(2.0),
    };
    let err = store.create_json("rec", &second).expect_err("duplicate");
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
    assert_eq!(store.read_json::<Record>("rec").expect("read"), first);
}

#[test]
fn create_json_encode_failure_leaves_no_file() {
    let (dir, store) = open_temp();
    let mut unencodable = std::collections::HashMap::new();
    unencodable.insert((1, 2), "tuple keys are not JSON object keys");

    let err = store.create_json("bad", &unencodable).expect_err("encode");

    assert!(matches!(err, StoreError::Json { .. }));
    assert!(!store.contains("bad"));
    assert!(!dir.path().join("bad").exists());
}
