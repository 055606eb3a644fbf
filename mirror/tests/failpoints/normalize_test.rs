use mirror::error::ErrorKind;
use mirror::failpoints::{NORMALIZE_BEFORE_CURSOR_UPDATE, NORMALIZE_BEFORE_MERGE, SYNC_BEFORE_COMMIT};
use mirror::normalize::Normalizer;
use mirror::store::both::MemoryStore;
use mirror::store::metadata::MetadataStore;
use mirror::sync::{LogHeartbeat, RawLogWriter};
use mirror::test_utils::change::{insert_at, partial_update_at, payload};
use mirror::test_utils::failpoints::CustomFailScenario;
use mirror::test_utils::schema::{items_table, test_registry};
use mirror::types::{JobCursors, NormalizeOutcome, SyncOutcome};
use mirror_config::shared::SyncConfig;
use mirror_telemetry::init_test_tracing;
use serde_json::json;

async fn synced_job(
    job_name: &str,
) -> (MemoryStore, RawLogWriter<MemoryStore, LogHeartbeat>, Normalizer<MemoryStore>) {
    let store = MemoryStore::new();
    let writer = RawLogWriter::new(job_name, store.clone(), LogHeartbeat, SyncConfig::default());
    writer.setup().await.unwrap();

    let normalizer = Normalizer::new(job_name, store.clone(), test_registry());
    normalizer.setup_destination_tables().await.unwrap();

    let items = items_table();
    writer
        .sync(vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 2}))], 1)
        .await
        .unwrap();
    normalizer.normalize().await.unwrap();
    writer
        .sync(
            vec![partial_update_at(&items, 2, json!({"pk": 1, "a": 9}), &["b"])],
            2,
        )
        .await
        .unwrap();

    (store, writer, normalizer)
}

async fn assert_window_retried(failpoint: &str, job_name: &str) {
    let (store, _writer, normalizer) = synced_job(job_name).await;
    let items = items_table();

    let scenario = CustomFailScenario::setup(&[(failpoint, "return")]);

    let err = normalizer.normalize().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InjectedFailure);

    // Neither the destination nor the cursor moved.
    assert_eq!(
        store.table_rows(&items).await.unwrap(),
        vec![payload(json!({"pk": 1, "a": 1, "b": 2}))]
    );
    assert_eq!(
        store.get_cursors(job_name).await.unwrap().normalize_batch_id,
        1
    );

    scenario.disable();

    let outcome = normalizer.normalize().await.unwrap();
    assert!(matches!(outcome, NormalizeOutcome::Applied { .. }));
    assert_eq!(
        store.table_rows(&items).await.unwrap(),
        vec![payload(json!({"pk": 1, "a": 9, "b": 2}))]
    );
    assert_eq!(
        store.get_cursors(job_name).await.unwrap(),
        JobCursors {
            source_offset: 2,
            sync_batch_id: 2,
            normalize_batch_id: 2,
        }
    );

    scenario.teardown();
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_before_merge_is_retried_from_same_window() {
    init_test_tracing();

    assert_window_retried(NORMALIZE_BEFORE_MERGE, "before_merge").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_before_cursor_update_rolls_back_merge() {
    init_test_tracing();

    assert_window_retried(NORMALIZE_BEFORE_CURSOR_UPDATE, "before_cursor_update").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_before_sync_commit_leaves_no_rows() {
    init_test_tracing();

    let store = MemoryStore::new();
    let writer = RawLogWriter::new("before_commit", store.clone(), LogHeartbeat, SyncConfig::default());
    writer.setup().await.unwrap();
    let changes = vec![insert_at(&items_table(), 1, json!({"pk": 1, "a": 1, "b": 1}))];

    let scenario = CustomFailScenario::setup(&[(SYNC_BEFORE_COMMIT, "return")]);

    let err = writer.sync(changes.clone(), 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InjectedFailure);
    assert!(err.is_retryable());
    assert!(store.raw_records("before_commit").await.is_empty());
    assert_eq!(
        store.get_cursors("before_commit").await.unwrap(),
        JobCursors::default()
    );

    scenario.disable();

    // The retry reuses the batch id the failed attempt would have taken.
    let outcome = writer.sync(changes, 10).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Committed { batch_id: 1, records: 1 });
    assert_eq!(store.raw_records("before_commit").await.len(), 1);

    scenario.teardown();
}
