//! Push engine behavior through the public engine API.

use std::sync::Arc;

use parking_lot::Mutex;

use fieldsync::{SyncError, SyncStatus};
use fieldsync_core::{EntityKind, RecordId};
use fieldsync_store::{LocalStore, LocalStoreExt, RemoteError};
use fieldsync_sync::{RetryPolicy, SyncConfig, SyncOperation};
use fieldsync_testkit::{FlakyRemote, TestFixture, TEST_OWNER};

#[tokio::test]
async fn test_150_records_push_in_three_batches() {
    let fixture = TestFixture::with_config(SyncConfig::new(TEST_OWNER).with_push_batch_size(50));
    fixture.seed_dirty(EntityKind::Contact, 150).await.unwrap();

    let engine = fixture.engine();
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let _sub = engine.subscribe(move |state| {
        if let Some(p) = &state.progress {
            let mut seen = sink.lock();
            if p.operation == "push:contacts" && seen.last() != Some(&p.current) {
                seen.push(p.current);
            }
        }
    });

    let report = engine.sync_push().await.unwrap();
    let contacts = report.kind(EntityKind::Contact).unwrap();
    assert_eq!(contacts.pushed, 150);
    assert!(contacts.errors.is_empty());
    assert_eq!(fixture.remote.row_count("contacts"), 150);

    // One progress report per batch.
    assert_eq!(*progress.lock(), vec![50, 100, 150]);
}

#[tokio::test]
async fn test_pending_count_drops_by_pushed_records() {
    let fixture = TestFixture::new();
    fixture.seed_dirty(EntityKind::Project, 4).await.unwrap();
    fixture.seed_dirty(EntityKind::Budget, 3).await.unwrap();

    let engine = fixture.engine();
    assert_eq!(engine.refresh_pending_count().await.unwrap(), 7);

    let report = engine.sync_push().await.unwrap();
    assert_eq!(report.total_pushed(), 7);
    assert_eq!(engine.state().current().pending_push, 0);
    assert!(fixture
        .local
        .list_by_marker(EntityKind::Budget, fieldsync_core::SyncMarker::Clean)
        .await
        .unwrap()
        .iter()
        .all(|r| !r.is_pending()));
}

#[tokio::test]
async fn test_validation_failure_stays_dirty_and_others_push() {
    let fixture = TestFixture::new();
    let ids = fixture.seed_dirty(EntityKind::Contact, 3).await.unwrap();

    let flaky = Arc::new(FlakyRemote::new(fixture.remote.clone()));
    flaky.fail_record(ids[1].as_str(), RemoteError::Validation("email invalid".into()));
    let engine = fixture.engine_with_remote(flaky.clone());

    let report = engine.sync_push().await.unwrap();
    let contacts = report.kind(EntityKind::Contact).unwrap();
    assert_eq!(contacts.pushed, 2);
    assert_eq!(contacts.errors.len(), 1);
    assert_eq!(contacts.errors[0].record_id, ids[1].to_string());

    // Non-retryable: one attempt only.
    assert_eq!(flaky.injected_failures(), 1);

    let failed = fixture.local.get(EntityKind::Contact, &ids[1]).await.unwrap().unwrap();
    assert!(failed.is_dirty());
    assert_eq!(engine.state().current().pending_push, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let fixture = TestFixture::new();
    fixture.seed_dirty(EntityKind::Project, 1).await.unwrap();

    let flaky = Arc::new(FlakyRemote::new(fixture.remote.clone()));
    flaky.fail_next(2, RemoteError::from_status(503, "unavailable"));
    let engine = fixture.engine_with_remote(flaky.clone());

    let report = engine.sync_push().await.unwrap();
    assert_eq!(report.total_pushed(), 1);
    assert_eq!(flaky.calls(), 3);
    assert_eq!(fixture.remote.row_count("projects"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_kind_is_abandoned_and_others_continue() {
    let fixture = TestFixture::with_config(
        SyncConfig::new(TEST_OWNER)
            .with_push_batch_size(2)
            .with_network_retry(RetryPolicy::network().with_max_attempts(2)),
    );
    fixture.seed_dirty(EntityKind::Project, 2).await.unwrap();
    fixture.seed_dirty(EntityKind::Contact, 6).await.unwrap();
    fixture.seed_dirty(EntityKind::Budget, 2).await.unwrap();

    let flaky = Arc::new(FlakyRemote::new(fixture.remote.clone()));
    flaky.fail_table("contacts", RemoteError::Network("connection reset".into()));
    let engine = fixture.engine_with_remote(flaky.clone());

    let err = engine.sync_push().await.unwrap_err();
    match &err {
        SyncError::Incomplete { operation, failures } => {
            assert_eq!(*operation, SyncOperation::Push);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].kind, EntityKind::Contact);
        }
        other => panic!("unexpected error: {other}"),
    }

    // First contact batch only: 2 records x 2 attempts.
    assert_eq!(flaky.injected_failures(), 4);
    assert_eq!(fixture.remote.row_count("projects"), 2);
    assert_eq!(fixture.remote.row_count("budgets"), 2);
    assert_eq!(fixture.local.count_pending(EntityKind::Contact).await.unwrap(), 6);

    let state = engine.state().current();
    assert_eq!(state.status, SyncStatus::Error);
    assert_eq!(state.pending_push, 6);
    assert!(state.last_error.unwrap().contains("contacts"));
}

#[tokio::test]
async fn test_tombstones_are_purged_after_remote_delete() {
    let fixture = TestFixture::new();
    let ids = fixture.seed_dirty(EntityKind::Installation, 2).await.unwrap();
    let engine = fixture.engine();
    engine.sync_push().await.unwrap();
    assert_eq!(fixture.remote.row_count("installations"), 2);

    fixture
        .local
        .tombstone(EntityKind::Installation, &ids[0], fixture.now() + 1)
        .await
        .unwrap();
    assert_eq!(engine.refresh_pending_count().await.unwrap(), 1);

    let report = engine.sync_push().await.unwrap();
    assert_eq!(report.total_deleted(), 1);
    assert_eq!(fixture.remote.row_count("installations"), 1);
    assert!(fixture.remote.row("installations", ids[0].as_str()).is_none());
    assert!(fixture
        .local
        .get(EntityKind::Installation, &ids[0])
        .await
        .unwrap()
        .is_none());
    assert!(fixture
        .local
        .get(EntityKind::Installation, &RecordId::new("installations-0001"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_staged_file_uploads_then_pushes_metadata() {
    let fixture = TestFixture::new();
    let id = RecordId::new("files-0000");
    fixture
        .local
        .stage_file(
            id.clone(),
            fieldsync_testkit::staged_file("site.jpg"),
            bytes::Bytes::from_static(b"jpeg bytes"),
            fixture.now(),
        )
        .await
        .unwrap();

    let report = fixture.engine().sync_push().await.unwrap();
    assert_eq!(report.uploads.uploaded, 1);
    assert_eq!(report.total_pushed(), 1);

    let path = format!("{TEST_OWNER}/projects-0000/files-0000-site.jpg");
    assert_eq!(
        fixture.blobs.get(&path),
        Some(bytes::Bytes::from_static(b"jpeg bytes"))
    );

    let stored = fixture.local.get(fieldsync_core::EntityKind::File, &id).await.unwrap().unwrap();
    let meta = stored.as_file().unwrap();
    assert!(!meta.pending_upload);
    assert_eq!(meta.storage_path.as_deref(), Some(path.as_str()));
    assert!(!stored.is_pending());
    assert!(fixture.remote.row("files", "files-0000").is_some());
    assert!(fixture.local.staged_blob(&id).await.unwrap().is_none());
}
