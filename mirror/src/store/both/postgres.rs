use std::num::NonZeroI32;
use std::sync::Arc;

use mirror_config::shared::PgConnectionConfig;
use mirror_postgres::replication::{
    connect_to_destination_database, destination, jobs, raw_log,
};
use mirror_postgres::version::{self, POSTGRES_15, meets_version};
use sqlx::{PgConnection, PgPool};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::failpoints::{NORMALIZE_BEFORE_CURSOR_UPDATE, SYNC_BEFORE_COMMIT, mirror_fail_point};
use crate::normalize::MergePlan;
use crate::normalize::statement::build_merge_statement;
use crate::schema::DestinationTableSchema;
use crate::store::merge::MergeStore;
use crate::store::metadata::MetadataStore;
use crate::store::raw_log::{RawLogStore, UnchangedColumnsGroup};
use crate::types::{
    BatchId, BatchWindow, JobCursors, RawChangeRecord, SourceOffset, SyncCommit, TableName,
};

/// Maximum number of connections the store keeps to the destination database.
const MAX_POOL_CONNECTIONS: u32 = 4;

/// Keeps cursors, raw logs and destination tables in the destination Postgres database.
///
/// Cursors live in `_mirror_internal.mirror_jobs` and each job gets its own raw table in the
/// same schema. Every multi-step write runs in a single transaction.
///
/// Destination tables are merged with the `merge` statement, so the server must run
/// Postgres 15 or newer.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    server_version: Arc<OnceCell<Option<NonZeroI32>>>,
}

impl PostgresStore {
    /// Creates a store with a lazily connected pool to `config`.
    pub fn new(config: &PgConnectionConfig) -> Self {
        let pool = connect_to_destination_database(config, MAX_POOL_CONNECTIONS);

        Self::from_pool(pool)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            server_version: Arc::new(OnceCell::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the `server_version_num` of the destination, read once per store.
    pub async fn server_version(&self) -> MirrorResult<Option<NonZeroI32>> {
        let server_version = self
            .server_version
            .get_or_try_init(|| version::server_version(&self.pool))
            .await?;

        Ok(*server_version)
    }

    /// Fails with [`ErrorKind::ConfigError`] when the destination can't run `merge`.
    pub async fn ensure_merge_supported(&self) -> MirrorResult<()> {
        let server_version = self.server_version().await?;

        check_merge_support(server_version)
    }
}

impl MetadataStore for PostgresStore {
    async fn get_cursors(&self, job_name: &str) -> MirrorResult<JobCursors> {
        let row = jobs::get_job(&self.pool, job_name).await?;

        Ok(row.map(JobCursors::from).unwrap_or_default())
    }

    async fn record_normalize(&self, job_name: &str, normalize_batch_id: BatchId) -> MirrorResult<()> {
        let mut tx = self.pool.begin().await?;

        let cursors = locked_cursors(&mut *tx, job_name).await?;
        cursors.ensure_normalize_reachable(job_name, normalize_batch_id)?;
        jobs::update_normalize_cursor(&mut *tx, job_name, normalize_batch_id).await?;

        tx.commit().await?;

        Ok(())
    }

    async fn record_offset(&self, job_name: &str, source_offset: SourceOffset) -> MirrorResult<()> {
        jobs::upsert_source_offset(&self.pool, job_name, source_offset).await?;

        Ok(())
    }

    async fn delete_job(&self, job_name: &str) -> MirrorResult<bool> {
        let deleted = jobs::delete_job(&self.pool, job_name).await?;

        Ok(deleted > 0)
    }
}

impl RawLogStore for PostgresStore {
    async fn setup_raw_log(&self, job_name: &str) -> MirrorResult<()> {
        let mut tx = self.pool.begin().await?;

        jobs::create_jobs_table(&mut *tx).await?;
        raw_log::create_raw_table(&mut *tx, job_name).await?;

        tx.commit().await?;

        info!(job_name, table = %raw_log::raw_table_name(job_name), "raw log ready");

        Ok(())
    }

    async fn commit_sync_batch(&self, job_name: &str, commit: SyncCommit) -> MirrorResult<JobCursors> {
        let rows = commit
            .records
            .iter()
            .map(RawChangeRecord::to_row)
            .collect::<MirrorResult<Vec<_>>>()?;

        let mut tx = self.pool.begin().await?;

        let mut cursors = jobs::get_job_for_update(&mut *tx, job_name)
            .await?
            .map(JobCursors::from)
            .unwrap_or_default();
        if commit.batch_id != cursors.sync_batch_id + 1 {
            bail!(
                ErrorKind::InvalidState,
                "Batch id does not follow the sync cursor",
                format!(
                    "job `{job_name}` is at batch {} but batch {} was committed",
                    cursors.sync_batch_id, commit.batch_id
                )
            );
        }

        raw_log::insert_raw_rows(&mut *tx, job_name, &rows).await?;

        mirror_fail_point(SYNC_BEFORE_COMMIT)?;

        jobs::upsert_sync_cursor(&mut *tx, job_name, commit.source_offset, commit.batch_id).await?;
        tx.commit().await?;

        cursors.source_offset = commit.source_offset;
        cursors.sync_batch_id = commit.batch_id;

        debug!(job_name, batch_id = commit.batch_id, records = rows.len(), "raw records appended");

        Ok(cursors)
    }

    async fn load_window(&self, job_name: &str, window: BatchWindow) -> MirrorResult<Vec<RawChangeRecord>> {
        let rows =
            raw_log::select_window_rows(&self.pool, job_name, window.after(), window.up_to())
                .await?;

        rows.into_iter().map(RawChangeRecord::try_from).collect()
    }

    async fn window_unchanged_groups(
        &self,
        job_name: &str,
        window: BatchWindow,
    ) -> MirrorResult<Vec<UnchangedColumnsGroup>> {
        let rows = raw_log::select_window_unchanged_groups(
            &self.pool,
            job_name,
            window.after(),
            window.up_to(),
        )
        .await?;

        let mut groups = rows
            .into_iter()
            .map(|row| {
                Ok(UnchangedColumnsGroup {
                    destination_table: TableName::parse(&row.destination_table)?,
                    unchanged_wide_columns: row.unchanged_wide_columns.into_iter().collect(),
                })
            })
            .collect::<MirrorResult<Vec<_>>>()?;
        // Database collation may order text differently than Rust does.
        groups.sort();
        groups.dedup();

        Ok(groups)
    }

    async fn drop_raw_log(&self, job_name: &str) -> MirrorResult<()> {
        raw_log::drop_raw_table(&self.pool, job_name).await?;

        info!(job_name, "raw log dropped");

        Ok(())
    }
}

impl MergeStore for PostgresStore {
    async fn setup_normalized_table(&self, schema: &DestinationTableSchema) -> MirrorResult<bool> {
        self.ensure_merge_supported().await?;

        let mut tx = self.pool.begin().await?;

        let existed = destination::table_exists(&mut *tx, schema).await?;
        if !existed {
            destination::create_schema_if_missing(&mut *tx, schema).await?;
            sqlx::query(&destination::create_table_statement(schema))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(existed)
    }

    async fn merge_window(
        &self,
        job_name: &str,
        window: BatchWindow,
        plans: &[MergePlan],
    ) -> MirrorResult<u64> {
        self.ensure_merge_supported().await?;

        let raw_table = raw_log::raw_table_identifier(job_name);
        let mut tx = self.pool.begin().await?;

        let cursors = locked_cursors(&mut *tx, job_name).await?;
        cursors.ensure_window_pending(job_name, window)?;

        let mut affected = 0;
        for plan in plans {
            let statement = build_merge_statement(plan, &raw_table);
            let result = sqlx::query(&statement)
                .bind(window.after())
                .bind(window.up_to())
                .bind(plan.table().to_string())
                .execute(&mut *tx)
                .await?;

            debug!(
                job_name,
                table = %plan.table(),
                rows = result.rows_affected(),
                "merged table"
            );
            affected += result.rows_affected();
        }

        mirror_fail_point(NORMALIZE_BEFORE_CURSOR_UPDATE)?;

        jobs::update_normalize_cursor(&mut *tx, job_name, window.up_to()).await?;
        tx.commit().await?;

        Ok(affected)
    }
}

/// Locks the job row for the rest of the transaction and returns its cursors.
async fn locked_cursors(conn: &mut PgConnection, job_name: &str) -> MirrorResult<JobCursors> {
    match jobs::get_job_for_update(&mut *conn, job_name).await? {
        Some(row) => Ok(row.into()),
        None => bail!(
            ErrorKind::JobNotFound,
            "Job has no cursors yet",
            format!("job `{job_name}` must sync before it can be normalized")
        ),
    }
}

fn check_merge_support(server_version: Option<NonZeroI32>) -> MirrorResult<()> {
    if !meets_version(server_version, POSTGRES_15) {
        let found = server_version.map_or_else(|| "unknown".to_owned(), |v| v.get().to_string());
        bail!(
            ErrorKind::ConfigError,
            "Destination server does not support merge",
            format!("merge needs server version {POSTGRES_15} or newer, found {found}")
        );
    }

    Ok(())
}
