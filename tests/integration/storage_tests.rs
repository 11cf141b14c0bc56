use std::fs;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use drivedupe::duplicates::{Grouper, GrouperConfig};
use drivedupe::hasher::{HashAlgorithm, HashBatchConfig, HashEngine};
use drivedupe::progress::{
    operation_types, OperationStatus, OperationTracker, ThrottleConfig, TrackerConfig,
    TrackerReporter,
};
use drivedupe::storage::{LocalStorage, StorageError, StorageReader};
use tempfile::tempdir;

#[test]
fn test_nested_catalog_records() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("photos/2024")).unwrap();
    fs::write(dir.path().join("readme.md"), b"# hi").unwrap();
    fs::write(dir.path().join("photos/2024/beach.jpg"), b"jpeg bytes").unwrap();

    let files = LocalStorage::new(dir.path()).catalog().unwrap();
    assert_eq!(files.len(), 2);

    let beach = &files[0];
    assert_eq!(beach.id, "photos/2024/beach.jpg");
    assert_eq!(beach.name, "beach.jpg");
    assert_eq!(beach.size, 10);
    assert_eq!(beach.mime_type, "image/jpeg");
    assert_eq!(beach.parents(), ["photos/2024".to_string()]);
    assert_eq!(beach.path, "/photos/2024/beach.jpg");
    assert!(!beach.is_hash_calculated());

    let readme = &files[1];
    assert_eq!(readme.id, "readme.md");
    assert!(readme.is_in_folder("root"));
}

#[test]
fn test_open_content_streams_file_bytes() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub/data.bin"), [9u8; 70_000]).unwrap();

    let storage = LocalStorage::new(dir.path());
    let mut content = Vec::new();
    storage
        .open_content("sub/data.bin")
        .unwrap()
        .read_to_end(&mut content)
        .unwrap();
    assert_eq!(content.len(), 70_000);
    assert!(content.iter().all(|&b| b == 9));

    let err = storage.open_content("sub/missing.bin").err().unwrap();
    assert_eq!(err, StorageError::NotFound("sub/missing.bin".into()));
}

#[test]
fn test_shutdown_flag_stops_walk() {
    let dir = tempdir().unwrap();
    for i in 0..10 {
        fs::write(dir.path().join(format!("f{i}.txt")), b"x").unwrap();
    }
    let flag = Arc::new(AtomicBool::new(false));
    flag.store(true, Ordering::SeqCst);

    let files = LocalStorage::new(dir.path())
        .with_shutdown_flag(flag)
        .catalog()
        .unwrap();
    assert!(files.is_empty());
}

#[test]
fn test_catalog_of_a_file_is_rejected() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("plain.txt");
    fs::write(&file, b"x").unwrap();

    let err = LocalStorage::new(&file).catalog().unwrap_err();
    assert!(!err.is_retryable());
    assert!(matches!(err, StorageError::Permanent { .. }));
}

#[test]
fn test_hashing_local_tree_finds_duplicates() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("backup")).unwrap();
    let payload = vec![42u8; 5_000];
    fs::write(dir.path().join("report.pdf"), &payload).unwrap();
    fs::write(dir.path().join("backup/report.pdf"), &payload).unwrap();
    fs::write(dir.path().join("notes.txt"), b"unrelated").unwrap();

    let storage = Arc::new(LocalStorage::new(dir.path()));
    let mut files = storage.catalog().unwrap();
    let report = HashEngine::new(storage, HashAlgorithm::Sha256)
        .compute_hashes(&mut files, &HashBatchConfig::default().with_worker_count(2))
        .unwrap();
    assert_eq!(report.hashed, 3);
    assert_eq!(report.bytes_hashed, 10_009);

    let outcome = Grouper::new(GrouperConfig::default()).group(files);
    assert_eq!(outcome.groups.len(), 1);
    let group = &outcome.groups[0];
    assert!(group.contains("report.pdf") && group.contains("backup/report.pdf"));
    assert_eq!(group.wasted_space(), 5_000);
}

#[test]
fn test_walk_advances_tracked_scan() {
    let dir = tempdir().unwrap();
    for i in 0..7 {
        fs::write(dir.path().join(format!("f{i}.txt")), b"x").unwrap();
    }
    let tracker = Arc::new(OperationTracker::new(TrackerConfig::default().with_throttle(
        ThrottleConfig {
            min_percentage_delta: 0.0,
            max_notifications_per_second: 0,
        },
    )));
    let id = tracker.start(operation_types::FILE_SCAN, 0).unwrap();
    let subscription = tracker.subscribe(id).unwrap();

    let files = LocalStorage::new(dir.path())
        .with_progress_interval(3)
        .with_progress_callback(Arc::new(TrackerReporter::new(
            Arc::clone(&tracker),
            id,
            "walking",
        )))
        .catalog()
        .unwrap();
    assert_eq!(files.len(), 7);
    assert_eq!(tracker.get(id).unwrap().processed_items, 7);
    assert_eq!(tracker.get(id).unwrap().current_step, "walking");

    tracker.complete(id).unwrap();
    let seen: Vec<u64> = subscription.iter().map(|u| u.processed_items).collect();
    assert!(seen.contains(&3));
    assert!(seen.contains(&6));
    assert_eq!(seen.last(), Some(&7));
    assert_eq!(tracker.get(id).unwrap().status, OperationStatus::Completed);
}
