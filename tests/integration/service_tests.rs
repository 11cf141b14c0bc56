use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use drivedupe::catalog::RemoteFile;
use drivedupe::error::DedupeError;
use drivedupe::gateway::{MemoryGateway, PersistenceGateway};
use drivedupe::hasher::{HashAlgorithm, HashEngine};
use drivedupe::progress::{
    operation_types, OperationStatus, OperationTracker, ThrottleConfig, TrackerConfig,
};
use drivedupe::service::{DedupeService, Scope, ServiceSettings};
use drivedupe::storage::MemoryStorage;

/// Files `f00..f{count}` in folder `docs`, with every third sharing content.
fn setup(
    count: u8,
    read_delay: Option<Duration>,
) -> (Arc<DedupeService>, Arc<MemoryGateway>, Arc<OperationTracker>) {
    let mut storage = MemoryStorage::new();
    if let Some(delay) = read_delay {
        storage = storage.with_read_delay(delay);
    }
    let gateway = Arc::new(MemoryGateway::new());
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    let mut records = Vec::new();
    for i in 0..count {
        let id = format!("f{i:02}");
        let content = if i % 3 == 0 { vec![0xAB; 64] } else { vec![i; 64] };
        storage.insert(id.clone(), content);
        records.push(
            RemoteFile::new(id.clone(), format!("{id}.bin"), 64, "application/octet-stream", base)
                .with_parent("docs")
                .with_path(format!("/docs/{id}.bin")),
        );
    }
    gateway.upsert_files(&records).unwrap();

    // Deliver every update so streams can be checked step by step
    let tracker = Arc::new(
        OperationTracker::new(TrackerConfig::default().with_throttle(ThrottleConfig {
            min_percentage_delta: 0.0,
            max_notifications_per_second: 0,
        }))
        .with_gateway(gateway.clone()),
    );
    let engine = HashEngine::new(Arc::new(storage), HashAlgorithm::Blake3);
    let service = Arc::new(DedupeService::new(
        gateway.clone(),
        Arc::clone(&tracker),
        Arc::new(engine),
        ServiceSettings::default().with_worker_count(2),
    ));
    (service, gateway, tracker)
}

#[test]
fn test_hash_then_search_end_to_end() {
    let (service, gateway, tracker) = setup(9, None);

    let hashed = service.hash_scope(&Scope::All, false).unwrap();
    assert_eq!(hashed.report.hashed, 9);
    assert!(gateway.files_without_hash().unwrap().is_empty());

    let found = service.find_duplicates(&Scope::All).unwrap();
    assert_eq!(found.outcome.groups.len(), 1);
    let group = &found.outcome.groups[0];
    assert_eq!(group.count(), 3);
    assert!(group.contains("f00") && group.contains("f03") && group.contains("f06"));
    assert_eq!(group.wasted_space(), 128);
    assert_eq!(gateway.groups().unwrap().len(), 1);

    let search = tracker.get(found.operation_id).unwrap();
    assert_eq!(search.status, OperationStatus::Completed);
    assert_eq!(
        tracker
            .metadata_value(found.operation_id, "groups")
            .unwrap()
            .and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        tracker
            .metadata_value(hashed.operation_id, "algorithm")
            .unwrap()
            .and_then(|v| v.as_str().map(str::to_string)),
        Some("blake3".to_string())
    );
}

#[test]
fn test_progress_is_persisted_to_gateway() {
    let (service, gateway, _tracker) = setup(6, None);

    let hashed = service.hash_scope(&Scope::Folder("docs".into()), false).unwrap();

    let stored = gateway.progress(hashed.operation_id).unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Completed);
    assert_eq!(stored.operation_type, operation_types::HASH_CALCULATION);
    assert_eq!(stored.processed_items, 6);
    assert!(gateway
        .progress_records()
        .unwrap()
        .iter()
        .any(|p| p.id == hashed.operation_id));
}

#[test]
fn test_subscription_is_monotonic_and_ends_terminal() {
    let (service, _gateway, tracker) = setup(12, Some(Duration::from_millis(5)));

    let running = service.spawn_hash_scope(Scope::All, false).unwrap();
    let id = running.id();
    let subscription = tracker.subscribe(id).unwrap();
    let updates: Vec<_> = subscription.iter().collect();
    running.join().unwrap();

    assert!(!updates.is_empty());
    for pair in updates.windows(2) {
        assert!(pair[0].processed_items <= pair[1].processed_items);
        assert!(pair[0].percentage <= pair[1].percentage);
    }
    let last = updates.last().unwrap();
    assert!(last.is_terminal());
    assert_eq!(last.status, OperationStatus::Completed);
    assert_eq!(last.processed_items, 12);
    assert_eq!(tracker.subscriber_count(id).unwrap(), 0);
}

#[test]
fn test_paused_hash_makes_no_progress_until_resumed() {
    let (service, gateway, tracker) = setup(20, Some(Duration::from_millis(20)));

    let running = service.spawn_hash_scope(Scope::All, false).unwrap();
    let id = running.id();
    tracker.pause(id).unwrap();

    // Let in-flight reads drain
    thread::sleep(Duration::from_millis(150));
    let paused_at = tracker.get(id).unwrap().processed_items;
    assert_eq!(tracker.get(id).unwrap().status, OperationStatus::Paused);

    thread::sleep(Duration::from_millis(200));
    assert_eq!(tracker.get(id).unwrap().processed_items, paused_at);
    assert!(!running.is_finished());

    tracker.resume(id).unwrap();
    let outcome = running.join().unwrap();

    assert_eq!(outcome.report.hashed, 20);
    assert_eq!(tracker.get(id).unwrap().status, OperationStatus::Completed);
    assert!(gateway.files_without_hash().unwrap().is_empty());
}

#[test]
fn test_cancel_while_paused() {
    let (service, _gateway, tracker) = setup(20, Some(Duration::from_millis(20)));

    let running = service.spawn_hash_scope(Scope::All, false).unwrap();
    let id = running.id();
    tracker.pause(id).unwrap();
    tracker.cancel(id).unwrap();

    let result = running.join();
    assert!(matches!(result, Err(DedupeError::Cancelled)));
    assert_eq!(tracker.get(id).unwrap().status, OperationStatus::Cancelled);
}

#[test]
fn test_files_scope_rehash_and_refresh() {
    let (service, gateway, _tracker) = setup(6, None);
    service.hash_scope(&Scope::All, false).unwrap();
    service.find_duplicates(&Scope::All).unwrap();
    assert_eq!(gateway.groups().unwrap()[0].count(), 2);

    // f03 drifts away from f00's content
    let mut drifted = gateway.file("f03").unwrap().unwrap();
    drifted.set_hash("0".repeat(64));
    gateway.upsert_files(&[drifted]).unwrap();

    let report = service
        .refresh_groups(&Scope::Files(vec!["f00".into()]))
        .unwrap();
    assert_eq!(report.removed, 1);
    assert!(gateway.groups().unwrap().is_empty());

    // Forced rehash of the scoped file restores the real digest
    let rehashed = service
        .hash_scope(&Scope::Files(vec!["f03".into(), "f03".into()]), true)
        .unwrap();
    assert_eq!(rehashed.report.hashed, 1);
    let found = service.find_duplicates(&Scope::All).unwrap();
    assert_eq!(found.outcome.groups.len(), 1);
}

#[test]
fn test_empty_files_scope_is_rejected() {
    let (service, _gateway, tracker) = setup(2, None);
    let err = service.hash_scope(&Scope::Files(Vec::new()), false).unwrap_err();
    assert!(matches!(err, DedupeError::InvalidInput(_)));
    assert!(tracker.is_empty());
}

#[test]
fn test_spawned_folder_comparison_completes() {
    let (service, gateway, tracker) = setup(6, None);
    service.hash_scope(&Scope::All, false).unwrap();

    let original = gateway.file("f03").unwrap().unwrap();
    let mut copy =
        RemoteFile::new("a01", "f03.bin", 64, "application/octet-stream", original.modified)
            .with_parent("archive");
    copy.set_hash(original.hash().unwrap());
    gateway.upsert_files(&[copy]).unwrap();

    let running = service
        .spawn_compare_folders("docs".into(), "archive".into())
        .unwrap();
    let id = running.id();
    let outcome = running.join().unwrap();

    assert_eq!(outcome.operation_id, id);
    assert_eq!(outcome.result.duplicate_ids(), ["a01"]);
    assert!(outcome.result.can_delete_target);
    let progress = tracker.get(id).unwrap();
    assert_eq!(progress.operation_type, operation_types::FOLDER_COMPARISON);
    assert_eq!(progress.status, OperationStatus::Completed);
    assert_eq!(progress.processed_items, 7);
}
