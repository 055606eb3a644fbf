use mirror::error::ErrorKind;
use mirror::normalize::{Normalizer, build_merge_plans};
use mirror::schema::{ColumnSchema, ColumnType, DestinationTableSchema, SchemaRegistry, TableName};
use mirror::store::both::PostgresStore;
use mirror::store::merge::MergeStore;
use mirror::store::metadata::MetadataStore;
use mirror::store::raw_log::RawLogStore;
use mirror::sync::{LogHeartbeat, RawLogWriter};
use mirror::test_utils::change::{delete_at, insert_at, partial_update_at, update_at};
use mirror::test_utils::database::TestDestinationDatabase;
use mirror::test_utils::schema::{items_table, test_registry};
use mirror::types::{BatchWindow, JobCursors, NormalizeOutcome, SyncOutcome};
use mirror_config::shared::SyncConfig;
use mirror_postgres::version::POSTGRES_15;
use mirror_telemetry::init_test_tracing;
use rand::random;
use serde_json::json;
use sqlx::PgPool;

type ItemRow = (i64, Option<i64>, Option<i64>);

async fn items_rows(pool: &PgPool) -> Vec<ItemRow> {
    sqlx::query_as::<_, ItemRow>("select pk, a, b from public.items order by pk")
        .fetch_all(pool)
        .await
        .unwrap()
}

async fn setup_job(
    store: &PostgresStore,
) -> (
    String,
    RawLogWriter<PostgresStore, LogHeartbeat>,
    Normalizer<PostgresStore>,
) {
    let job_name = format!("job_{}", random::<u32>());

    let writer = RawLogWriter::new(&job_name, store.clone(), LogHeartbeat, SyncConfig::default());
    writer.setup().await.unwrap();

    let normalizer = Normalizer::new(&job_name, store.clone(), test_registry());
    normalizer.setup_destination_tables().await.unwrap();

    (job_name, writer, normalizer)
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_preserves_unchanged_wide_columns() {
    init_test_tracing();

    let database = TestDestinationDatabase::new().await;
    let store = database.store();
    let (job_name, writer, normalizer) = setup_job(&store).await;
    let items = items_table();

    writer
        .sync(vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 2}))], 10)
        .await
        .unwrap();
    let outcome = normalizer.normalize().await.unwrap();
    assert_eq!(
        outcome,
        NormalizeOutcome::Applied {
            window: BatchWindow::new(0, 1).unwrap(),
            tables: vec![items.clone()],
            rows_affected: 1,
        }
    );
    assert_eq!(items_rows(&database.pool).await, vec![(1, Some(1), Some(2))]);

    writer
        .sync(
            vec![partial_update_at(&items, 2, json!({"pk": 1, "a": 9}), &["b"])],
            20,
        )
        .await
        .unwrap();
    normalizer.normalize().await.unwrap();
    assert_eq!(items_rows(&database.pool).await, vec![(1, Some(9), Some(2))]);

    assert_eq!(
        store.get_cursors(&job_name).await.unwrap(),
        JobCursors {
            source_offset: 20,
            sync_batch_id: 2,
            normalize_batch_id: 2,
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_applies_only_the_latest_change_per_key() {
    init_test_tracing();

    let database = TestDestinationDatabase::new().await;
    let store = database.store();
    let (_job_name, writer, normalizer) = setup_job(&store).await;
    let items = items_table();

    writer
        .sync(
            vec![
                insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1})),
                insert_at(&items, 1, json!({"pk": 2, "a": 2, "b": 2})),
            ],
            1,
        )
        .await
        .unwrap();
    normalizer.normalize().await.unwrap();

    writer
        .sync(
            vec![
                update_at(&items, 2, json!({"pk": 1, "a": 10, "b": 10})),
                delete_at(&items, 3, json!({"pk": 1})),
                update_at(&items, 3, json!({"pk": 2, "a": 3, "b": 30})),
                partial_update_at(&items, 4, json!({"pk": 2, "a": 4}), &["b"]),
                insert_at(&items, 5, json!({"pk": 3, "a": 5, "b": 5})),
            ],
            2,
        )
        .await
        .unwrap();
    normalizer.normalize().await.unwrap();

    assert_eq!(
        items_rows(&database.pool).await,
        vec![(2, Some(4), Some(2)), (3, Some(5), Some(5))]
    );

    // Nothing is pending anymore, so running again is a no-op.
    let outcome = normalizer.normalize().await.unwrap();
    assert_eq!(outcome, NormalizeOutcome::UpToDate { batch_id: 2 });
    assert_eq!(
        items_rows(&database.pool).await,
        vec![(2, Some(4), Some(2)), (3, Some(5), Some(5))]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn raw_log_round_trips_records() {
    init_test_tracing();

    let database = TestDestinationDatabase::new().await;
    let store = database.store();
    let (job_name, writer, _normalizer) = setup_job(&store).await;
    let items = items_table();

    writer
        .sync(vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1}))], 1)
        .await
        .unwrap();
    writer
        .sync(
            vec![
                partial_update_at(&items, 2, json!({"pk": 1, "a": 2}), &["b"]),
                delete_at(&items, 3, json!({"pk": 1})),
            ],
            2,
        )
        .await
        .unwrap();

    let window = BatchWindow::new(1, 2).unwrap();
    let records = store.load_window(&job_name, window).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| record.batch_id == 2));
    assert_eq!(
        records[0].unchanged_wide_columns.iter().collect::<Vec<_>>(),
        vec!["b"]
    );
    assert_eq!(records[1].key_value("pk"), Some(&json!(1)));

    let groups = store.window_unchanged_groups(&job_name, window).await.unwrap();
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|group| group.destination_table == items));
}

#[tokio::test(flavor = "multi_thread")]
async fn cursors_follow_commits() {
    init_test_tracing();

    let database = TestDestinationDatabase::new().await;
    let store = database.store();
    let (job_name, writer, _normalizer) = setup_job(&store).await;
    let items = items_table();

    assert_eq!(store.get_cursors(&job_name).await.unwrap(), JobCursors::default());
    assert_eq!(writer.sync(vec![], 5).await.unwrap(), SyncOutcome::Empty);
    assert_eq!(store.get_cursors(&job_name).await.unwrap(), JobCursors::default());

    let changes = vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1}))];
    writer.sync(changes.clone(), 5).await.unwrap();
    assert_eq!(
        writer.sync(changes, 5).await.unwrap(),
        SyncOutcome::StaleOffset {
            stored_offset: 5,
            offered_offset: 5,
        }
    );

    let err = store.record_normalize(&job_name, 2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = store.record_normalize("missing_job", 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::JobNotFound);

    store.record_offset(&job_name, 9).await.unwrap();
    assert_eq!(
        store.get_cursors(&job_name).await.unwrap(),
        JobCursors {
            source_offset: 9,
            sync_batch_id: 1,
            normalize_batch_id: 0,
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn teardown_drops_raw_log_and_cursors() {
    init_test_tracing();

    let database = TestDestinationDatabase::new().await;
    let store = database.store();
    let (job_name, writer, _normalizer) = setup_job(&store).await;

    writer
        .sync(vec![insert_at(&items_table(), 1, json!({"pk": 1, "a": 1, "b": 1}))], 1)
        .await
        .unwrap();
    writer.teardown().await.unwrap();

    assert_eq!(store.get_cursors(&job_name).await.unwrap(), JobCursors::default());
    assert!(!store.delete_job(&job_name).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn destination_server_supports_merge() {
    init_test_tracing();

    let database = TestDestinationDatabase::new().await;
    let store = database.store();

    let server_version = store.server_version().await.unwrap().unwrap();
    assert!(server_version.get() >= POSTGRES_15);
    store.ensure_merge_supported().await.unwrap();

    // The version is read once and shared by clones of the store.
    let clone = store.clone();
    assert_eq!(clone.server_version().await.unwrap(), Some(server_version));
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_window_is_rejected_after_normalize() {
    init_test_tracing();

    let database = TestDestinationDatabase::new().await;
    let store = database.store();
    let (job_name, writer, normalizer) = setup_job(&store).await;
    let items = items_table();

    writer
        .sync(vec![insert_at(&items, 1, json!({"pk": 1, "a": 1, "b": 1}))], 1)
        .await
        .unwrap();
    normalizer.normalize().await.unwrap();
    writer
        .sync(vec![update_at(&items, 2, json!({"pk": 1, "a": 5, "b": 1}))], 2)
        .await
        .unwrap();
    normalizer.normalize().await.unwrap();

    let stale = BatchWindow::new(0, 1).unwrap();
    let groups = store.window_unchanged_groups(&job_name, stale).await.unwrap();
    let plans = build_merge_plans(groups, &test_registry()).unwrap();
    let err = store.merge_window(&job_name, stale, &plans).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = store.record_normalize(&job_name, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    assert_eq!(
        store.get_cursors(&job_name).await.unwrap().normalize_batch_id,
        2
    );
    assert_eq!(items_rows(store.pool()).await, vec![(1, Some(5), Some(1))]);
}

#[tokio::test(flavor = "multi_thread")]
async fn numeric_keys_equal_after_cast_rank_together() {
    init_test_tracing();

    let database = TestDestinationDatabase::new().await;
    let store = database.store();
    let ledger = TableName::new("public", "ledger");
    let registry = SchemaRegistry::new([DestinationTableSchema::new(
        ledger.clone(),
        vec![
            ColumnSchema::new("id", ColumnType::Numeric, false),
            ColumnSchema::new("amount", ColumnType::Int8, true),
        ],
        "id",
    )
    .unwrap()]);

    let job_name = format!("job_{}", random::<u32>());
    let writer = RawLogWriter::new(&job_name, store.clone(), LogHeartbeat, SyncConfig::default());
    writer.setup().await.unwrap();
    let normalizer = Normalizer::new(&job_name, store.clone(), registry);
    normalizer.setup_destination_tables().await.unwrap();

    writer
        .sync(
            vec![
                insert_at(&ledger, 1, json!({"id": 1, "amount": 1})),
                update_at(&ledger, 2, json!({"id": 1.0, "amount": 2})),
            ],
            1,
        )
        .await
        .unwrap();
    normalizer.normalize().await.unwrap();

    let amounts = sqlx::query_scalar::<_, i64>("select amount from public.ledger")
        .fetch_all(&database.pool)
        .await
        .unwrap();
    assert_eq!(amounts, vec![2]);
}
