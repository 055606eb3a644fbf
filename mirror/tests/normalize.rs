#![cfg(feature = "test-utils")]

use mirror::error::ErrorKind;
use mirror::normalize::{Normalizer, build_merge_plans};
use mirror::schema::SchemaRegistry;
use mirror::store::both::MemoryStore;
use mirror::store::merge::MergeStore;
use mirror::store::metadata::MetadataStore;
use mirror::store::raw_log::RawLogStore;
use mirror::sync::RawLogWriter;
use mirror::test_utils::change::{delete_at, insert_at, partial_update_at, payload, update_at};
use mirror::test_utils::heartbeat::RecordingHeartbeat;
use mirror::test_utils::schema::{documents_table, items_schema, items_table, test_registry};
use mirror::types::{BatchWindow, JobCursors, NormalizeOutcome, SyncOutcome};
use mirror_config::shared::SyncConfig;
use mirror_telemetry::init_test_tracing;
use serde_json::json;

struct TestJob {
    store: MemoryStore,
    writer: RawLogWriter<MemoryStore, RecordingHeartbeat>,
    normalizer: Normalizer<MemoryStore>,
    heartbeat: RecordingHeartbeat,
}

async fn setup_job(job_name: &str, registry: SchemaRegistry, config: SyncConfig) -> TestJob {
    let store = MemoryStore::new();
    let heartbeat = RecordingHeartbeat::new();

    let writer = RawLogWriter::new(job_name, store.clone(), heartbeat.clone(), config);
    writer.setup().await.unwrap();

    let normalizer = Normalizer::new(job_name, store.clone(), registry);
    normalizer.setup_destination_tables().await.unwrap();

    TestJob {
        store,
        writer,
        normalizer,
        heartbeat,
    }
}

async fn assert_cursor_invariant(store: &MemoryStore, job_name: &str) {
    let cursors = store.get_cursors(job_name).await.unwrap();
    assert!(
        cursors.normalize_batch_id <= cursors.sync_batch_id,
        "normalize cursor {} is past sync cursor {}",
        cursors.normalize_batch_id,
        cursors.sync_batch_id
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_update_keeps_unchanged_wide_columns() {
    init_test_tracing();

    let job = setup_job("j1", test_registry(), SyncConfig::default()).await;
    let items = items_table();

    let outcome = job
        .writer
        .sync(vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 2}))], 10)
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Committed { batch_id: 1, records: 1 });

    let outcome = job.normalizer.normalize().await.unwrap();
    assert_eq!(
        outcome,
        NormalizeOutcome::Applied {
            window: BatchWindow::new(0, 1).unwrap(),
            tables: vec![items.clone()],
            rows_affected: 1,
        }
    );
    assert_eq!(
        job.store.table_rows(&items).await.unwrap(),
        vec![payload(json!({"pk": 1, "a": 1, "b": 2}))]
    );

    let outcome = job
        .writer
        .sync(
            vec![partial_update_at(&items, 2, json!({"pk": 1, "a": 9}), &["b"])],
            20,
        )
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Committed { batch_id: 2, records: 1 });

    job.normalizer.normalize().await.unwrap();
    assert_eq!(
        job.store.table_rows(&items).await.unwrap(),
        vec![payload(json!({"pk": 1, "a": 9, "b": 2}))]
    );

    assert_eq!(
        job.store.get_cursors("j1").await.unwrap(),
        JobCursors {
            source_offset: 20,
            sync_batch_id: 2,
            normalize_batch_id: 2,
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn latest_update_in_window_wins() {
    init_test_tracing();

    let job = setup_job("latest_wins", test_registry(), SyncConfig::default()).await;
    let items = items_table();

    job.writer
        .sync(vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 2}))], 1)
        .await
        .unwrap();
    job.normalizer.normalize().await.unwrap();

    // Both updates land in the same window, the second one is captured later.
    job.writer
        .sync(
            vec![
                update_at(&items, 3, json!({"pk": 1, "a": 3, "b": 30})),
                partial_update_at(&items, 4, json!({"pk": 1, "a": 4}), &["b"]),
            ],
            2,
        )
        .await
        .unwrap();
    job.normalizer.normalize().await.unwrap();

    assert_eq!(
        job.store.table_rows(&items).await.unwrap(),
        vec![payload(json!({"pk": 1, "a": 4, "b": 2}))]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_time_decides_over_arrival_order() {
    init_test_tracing();

    let job = setup_job("capture_order", test_registry(), SyncConfig::default()).await;
    let items = items_table();

    job.writer
        .sync(
            vec![
                update_at(&items, 9, json!({"pk": 7, "a": 9, "b": 9})),
                insert_at(&items, 2, json!({"pk": 7, "a": 2, "b": 2})),
            ],
            1,
        )
        .await
        .unwrap();
    job.normalizer.normalize().await.unwrap();

    assert_eq!(
        job.store.table_rows(&items).await.unwrap(),
        vec![payload(json!({"pk": 7, "a": 9, "b": 9}))]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn highest_ranked_delete_removes_row() {
    init_test_tracing();

    let job = setup_job("deletes", test_registry(), SyncConfig::default()).await;
    let items = items_table();

    job.writer
        .sync(
            vec![
                insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1})),
                insert_at(&items, 1, json!({"pk": 3, "a": 3, "b": 3})),
            ],
            1,
        )
        .await
        .unwrap();
    job.normalizer.normalize().await.unwrap();

    job.writer
        .sync(
            vec![
                update_at(&items, 2, json!({"pk": 1, "a": 10, "b": 10})),
                delete_at(&items, 3, json!({"pk": 1})),
                insert_at(&items, 4, json!({"pk": 2, "a": 2, "b": 2})),
                update_at(&items, 5, json!({"pk": 2, "a": 20, "b": 20})),
                delete_at(&items, 6, json!({"pk": 2})),
            ],
            2,
        )
        .await
        .unwrap();
    job.normalizer.normalize().await.unwrap();

    assert_eq!(
        job.store.table_rows(&items).await.unwrap(),
        vec![payload(json!({"pk": 3, "a": 3, "b": 3}))]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn normalizing_again_changes_nothing() {
    init_test_tracing();

    let job = setup_job("idempotent", test_registry(), SyncConfig::default()).await;
    let items = items_table();

    job.writer
        .sync(
            vec![
                insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1})),
                insert_at(&items, 2, json!({"pk": 2, "a": 2, "b": 2})),
            ],
            1,
        )
        .await
        .unwrap();
    job.normalizer.normalize().await.unwrap();
    let rows = job.store.table_rows(&items).await.unwrap();

    let outcome = job.normalizer.normalize().await.unwrap();
    assert_eq!(outcome, NormalizeOutcome::UpToDate { batch_id: 1 });
    assert_eq!(job.store.table_rows(&items).await.unwrap(), rows);
    assert_cursor_invariant(&job.store, "idempotent").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn windows_spanning_several_batches_merge_once() {
    init_test_tracing();

    let job = setup_job("multi_batch", test_registry(), SyncConfig::default()).await;
    let items = items_table();
    let documents = documents_table();

    job.writer
        .sync(vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1}))], 1)
        .await
        .unwrap();
    job.writer
        .sync(
            vec![insert_at(
                &documents,
                2,
                json!({"id": 5, "title": "draft", "body": "long text", "meta": {"tags": ["x"]}}),
            )],
            2,
        )
        .await
        .unwrap();
    job.writer
        .sync(
            vec![
                update_at(&items, 3, json!({"pk": 1, "a": 2, "b": 2})),
                partial_update_at(&documents, 4, json!({"id": 5, "title": "final", "meta": null}), &["body"]),
            ],
            3,
        )
        .await
        .unwrap();
    assert_cursor_invariant(&job.store, "multi_batch").await;

    let outcome = job.normalizer.normalize().await.unwrap();
    let NormalizeOutcome::Applied { window, tables, .. } = outcome else {
        panic!("expected the window to be applied, got {outcome:?}");
    };
    assert_eq!(window, BatchWindow::new(0, 3).unwrap());
    assert_eq!(tables, vec![documents.clone(), items.clone()]);

    assert_eq!(
        job.store.table_rows(&items).await.unwrap(),
        vec![payload(json!({"pk": 1, "a": 2, "b": 2}))]
    );
    // The insert and the partial update are in the same window, so only the update is
    // applied and the body is never written.
    assert_eq!(
        job.store.table_rows(&documents).await.unwrap(),
        vec![payload(json!({"id": 5, "title": "final", "body": null, "meta": null}))]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_sync_uses_no_batch_id() {
    init_test_tracing();

    let job = setup_job("empty", test_registry(), SyncConfig::default()).await;

    let outcome = job.writer.sync(vec![], 42).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Empty);
    assert_eq!(job.store.get_cursors("empty").await.unwrap(), JobCursors::default());
    assert!(job.store.raw_records("empty").await.is_empty());

    let outcome = job.normalizer.normalize().await.unwrap();
    assert_eq!(outcome, NormalizeOutcome::UpToDate { batch_id: 0 });
}

#[tokio::test(flavor = "multi_thread")]
async fn resubmitted_offset_is_skipped() {
    init_test_tracing();

    let job = setup_job("dedup", test_registry(), SyncConfig::default()).await;
    let items = items_table();

    let changes = vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1}))];
    job.writer.sync(changes.clone(), 100).await.unwrap();

    let outcome = job.writer.sync(changes, 100).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::StaleOffset {
            stored_offset: 100,
            offered_offset: 100,
        }
    );

    let cursors = job.store.get_cursors("dedup").await.unwrap();
    assert_eq!(cursors.sync_batch_id, 1);
    assert_eq!(job.store.raw_records("dedup").await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeats_do_not_split_batches() {
    init_test_tracing();

    let job = setup_job(
        "heartbeats",
        test_registry(),
        SyncConfig {
            records_per_heartbeat: 2,
        },
    )
    .await;
    let items = items_table();

    let changes = (0..5)
        .map(|pk| insert_at(&items, pk, json!({"pk": pk, "a": pk, "b": pk})))
        .collect::<Vec<_>>();
    let outcome = job.writer.sync(changes, 5).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Committed { batch_id: 1, records: 5 });

    let processed = job
        .heartbeat
        .heartbeats()
        .iter()
        .map(|heartbeat| heartbeat.processed)
        .collect::<Vec<_>>();
    assert_eq!(processed, vec![2, 4, 5]);

    let records = job.store.raw_records("heartbeats").await;
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|record| record.batch_id == 1));
}

#[tokio::test(flavor = "multi_thread")]
async fn normalize_cursor_requires_a_synced_job() {
    init_test_tracing();

    let store = MemoryStore::new();

    let err = store.record_normalize("ghost", 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::JobNotFound);
    assert!(!err.is_retryable());
}

#[tokio::test(flavor = "multi_thread")]
async fn normalize_cursor_cannot_pass_sync_cursor() {
    init_test_tracing();

    let job = setup_job("bounded", test_registry(), SyncConfig::default()).await;
    let items = items_table();

    job.writer
        .sync(vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1}))], 1)
        .await
        .unwrap();

    let err = job.store.record_normalize("bounded", 2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_cursor_invariant(&job.store, "bounded").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_window_cannot_move_normalize_cursor_backwards() {
    init_test_tracing();

    let job = setup_job("stale", test_registry(), SyncConfig::default()).await;
    let items = items_table();

    job.writer
        .sync(vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1}))], 1)
        .await
        .unwrap();
    job.normalizer.normalize().await.unwrap();
    job.writer
        .sync(vec![update_at(&items, 2, json!({"pk": 1, "a": 5, "b": 1}))], 2)
        .await
        .unwrap();
    job.normalizer.normalize().await.unwrap();

    // A normalizer that read the cursors before the first run finished.
    let stale = BatchWindow::new(0, 1).unwrap();
    let groups = job.store.window_unchanged_groups("stale", stale).await.unwrap();
    let plans = build_merge_plans(groups, &test_registry()).unwrap();
    let err = job
        .store
        .merge_window("stale", stale, &plans)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = job.store.record_normalize("stale", 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    assert_eq!(
        job.store.get_cursors("stale").await.unwrap(),
        JobCursors {
            source_offset: 2,
            sync_batch_id: 2,
            normalize_batch_id: 2,
        }
    );
    assert_eq!(
        job.store.table_rows(&items).await.unwrap(),
        vec![payload(json!({"pk": 1, "a": 5, "b": 1}))]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_destination_table_fails_without_moving_cursor() {
    init_test_tracing();

    // Only the items table is registered.
    let job = setup_job(
        "unknown_table",
        SchemaRegistry::new([items_schema()]),
        SyncConfig::default(),
    )
    .await;

    job.writer
        .sync(
            vec![insert_at(&documents_table(), 1, json!({"id": 1, "title": "t"}))],
            1,
        )
        .await
        .unwrap();

    let err = job.normalizer.normalize().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingTableSchema);
    assert_eq!(
        job.store.get_cursors("unknown_table").await.unwrap().normalize_batch_id,
        0
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn teardown_removes_raw_log_and_cursors() {
    init_test_tracing();

    let job = setup_job("teardown", test_registry(), SyncConfig::default()).await;
    let items = items_table();

    job.writer
        .sync(vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1}))], 1)
        .await
        .unwrap();
    job.writer.teardown().await.unwrap();

    assert!(job.store.raw_records("teardown").await.is_empty());
    assert_eq!(job.store.get_cursors("teardown").await.unwrap(), JobCursors::default());
}
