//! Build Atomicity Tests
//!
//! Tests for invariants:
//! - A store is either fully built or not built at all
//! - A failed or crashed build never leaves a finalized marker
//! - A store built for another schema is detected, never served
//!
//! Crash tests re-run this test binary as a child process with
//! `DOCSTORE_CRASH_POINT` set; the child aborts mid-build and the parent
//! inspects what is left on disk.

use std::fs;
use std::path::Path;
use std::process::Command;

use docstore::crash_point::points;
use docstore::schema::{Field, Record, Schema, Value};
use docstore::storage::{
    records_source, CompressedRecordStore, RecordIter, StoreError, StoreErrorCode, StoreStatus,
};
use docstore::StoreConfig;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

const CHILD_DIR_ENV: &str = "DOCSTORE_TEST_CHILD_DIR";

fn schema() -> Schema {
    Schema::new("Pair", vec![Field::string("id"), Field::string("text")])
}

fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record::new(vec![Value::from(format!("k{}", i)), Value::from(format!("text {}", i))]))
        .collect()
}

fn store_at(dir: &Path, records: Vec<Record>) -> CompressedRecordStore {
    CompressedRecordStore::new(dir.join("pairs"), schema(), "id", &[], records_source(records))
        .unwrap()
        .with_config(StoreConfig::with_checkpoint_interval(4))
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// =============================================================================
// Failed Builds
// =============================================================================

#[test]
fn test_source_failure_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let failing = || {
        let items = records(10)
            .into_iter()
            .map(Ok)
            .chain(std::iter::once(Err(StoreError::source_failed("network dropped"))));
        Ok(Box::new(items) as RecordIter)
    };
    let store = CompressedRecordStore::new(dir.path().join("pairs"), schema(), "id", &[], failing).unwrap();

    let err = store.build().unwrap_err();
    assert_eq!(err.code(), StoreErrorCode::SourceFailed);
    assert_eq!(store.status().unwrap(), StoreStatus::Absent);
    assert!(!store.built());
    assert_eq!(store.count(), None);
    assert!(file_names(dir.path()).is_empty(), "left: {:?}", file_names(dir.path()));
}

#[test]
fn test_duplicate_key_fails_build() {
    let dir = TempDir::new().unwrap();
    let mut rows = records(5);
    rows.push(rows[2].clone());
    let store = store_at(dir.path(), rows);

    let err = store.build().unwrap_err();
    assert_eq!(err.code(), StoreErrorCode::DuplicateKey);
    assert!(!store.built());
}

#[test]
fn test_orphaned_files_without_marker_are_rebuilt() {
    let dir = TempDir::new().unwrap();
    let store = store_at(dir.path(), records(12));
    store.build().unwrap();

    // Simulate a crash after the data rename: everything but the marker
    fs::remove_file(dir.path().join("pairs.meta")).unwrap();
    fs::write(dir.path().join("pairs.data.tmp"), b"torn").unwrap();
    assert!(!store.built());
    assert_eq!(store.count(), None);

    store.build().unwrap();
    assert_eq!(store.count(), Some(12));
    assert_eq!(store.get(&"k11".into()).unwrap(), records(12)[11]);
}

// =============================================================================
// Schema Invalidation
// =============================================================================

#[test]
fn test_schema_change_is_stale_until_cleared() {
    let dir = TempDir::new().unwrap();
    store_at(dir.path(), records(6)).build().unwrap();

    let widened = Schema::new(
        "Pair",
        vec![Field::string("id"), Field::string("text"), Field::int("len")],
    );
    let rows: Vec<Record> = (0..6)
        .map(|i| Record::new(vec![Value::from(format!("k{}", i)), Value::from("t"), Value::Int(1)]))
        .collect();
    let store = CompressedRecordStore::new(dir.path().join("pairs"), widened, "id", &[], records_source(rows)).unwrap();

    assert!(matches!(store.status().unwrap(), StoreStatus::Stale { .. }));
    assert!(!store.built());
    assert_eq!(store.count(), None);
    assert!(store.build().unwrap_err().is_schema_mismatch());
    assert!(store.get(&"k1".into()).unwrap_err().is_schema_mismatch());

    store.clear().unwrap();
    assert_eq!(store.status().unwrap(), StoreStatus::Absent);
    store.build().unwrap();
    assert_eq!(store.get(&"k1".into()).unwrap().get(2), Some(&Value::Int(1)));
}

#[test]
fn test_index_layout_change_is_stale() {
    let dir = TempDir::new().unwrap();
    store_at(dir.path(), records(3)).build().unwrap();
    let indexed = CompressedRecordStore::new(dir.path().join("pairs"), schema(), "id", &["text"], records_source(records(3)))
        .unwrap();
    assert!(matches!(indexed.status().unwrap(), StoreStatus::Stale { .. }));
}

// =============================================================================
// Crash Points
// =============================================================================

/// Child side of the crash tests; a no-op unless spawned by one
#[test]
fn crash_child_build() {
    let dir = match std::env::var(CHILD_DIR_ENV) {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let _ = store_at(Path::new(&dir), records(50)).build();
}

fn crash_during_build(point: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let status = Command::new(std::env::current_exe().unwrap())
        .args(["crash_child_build", "--exact", "--nocapture", "--test-threads=1"])
        .env("DOCSTORE_CRASH_POINT", point)
        .env(CHILD_DIR_ENV, dir.path())
        .status()
        .unwrap();
    assert!(!status.success(), "child should abort at {}", point);
    dir
}

#[test]
fn test_crash_before_data_rename() {
    let dir = crash_during_build(points::BUILD_BEFORE_DATA_RENAME);
    let names = file_names(dir.path());
    assert!(!names.contains(&"pairs.meta".to_string()), "left: {:?}", names);
    assert!(!names.contains(&"pairs.data".to_string()), "left: {:?}", names);

    let store = store_at(dir.path(), records(50));
    assert_eq!(store.status().unwrap(), StoreStatus::Absent);
    store.build().unwrap();
    assert_eq!(store.count(), Some(50));
}

#[test]
fn test_crash_before_marker_rename() {
    let dir = crash_during_build(points::BUILD_BEFORE_META_RENAME);
    let names = file_names(dir.path());
    assert!(names.contains(&"pairs.data".to_string()), "left: {:?}", names);
    assert!(!names.contains(&"pairs.meta".to_string()), "left: {:?}", names);

    let store = store_at(dir.path(), records(50));
    assert!(!store.built());
    assert_eq!(store.count(), None);
    store.build().unwrap();
    assert_eq!(store.get(&"k49".into()).unwrap(), records(50)[49]);
}
