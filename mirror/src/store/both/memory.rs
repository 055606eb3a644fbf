use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::failpoints::{NORMALIZE_BEFORE_CURSOR_UPDATE, SYNC_BEFORE_COMMIT, mirror_fail_point};
use crate::normalize::MergePlan;
use crate::normalize::fold::{TableRows, apply_winners, rank_window};
use crate::schema::DestinationTableSchema;
use crate::store::merge::MergeStore;
use crate::store::metadata::MetadataStore;
use crate::store::raw_log::{RawLogStore, UnchangedColumnsGroup};
use crate::types::{
    BatchId, BatchWindow, JobCursors, Payload, RawChangeRecord, SourceOffset, SyncCommit,
    TableName,
};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, JobCursors>,
    raw_logs: HashMap<String, Vec<RawChangeRecord>>,
    tables: HashMap<TableName, TableRows>,
}

impl Inner {
    fn cursors_mut(&mut self, job_name: &str) -> MirrorResult<&mut JobCursors> {
        match self.jobs.get_mut(job_name) {
            Some(cursors) => Ok(cursors),
            None => bail!(
                ErrorKind::JobNotFound,
                "Job has no cursors yet",
                format!("job `{job_name}` must sync before it can be normalized")
            ),
        }
    }

    fn record_normalize(&mut self, job_name: &str, normalize_batch_id: BatchId) -> MirrorResult<()> {
        let cursors = self.cursors_mut(job_name)?;
        cursors.ensure_normalize_reachable(job_name, normalize_batch_id)?;
        cursors.normalize_batch_id = normalize_batch_id;

        Ok(())
    }

    fn raw_log(&self, job_name: &str) -> MirrorResult<&Vec<RawChangeRecord>> {
        match self.raw_logs.get(job_name) {
            Some(raw_log) => Ok(raw_log),
            None => bail!(
                ErrorKind::InvalidState,
                "Raw log is not set up",
                format!("no raw log exists for job `{job_name}`")
            ),
        }
    }
}

/// Keeps cursors, raw logs and destination tables in process memory.
///
/// Every operation holds one lock for its whole duration and stages its changes before
/// applying them, which gives the same all-or-nothing behavior as the Postgres store. Data
/// is lost when the process exits.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rows of a destination table in primary key order.
    pub async fn table_rows(&self, table: &TableName) -> Option<Vec<Payload>> {
        let inner = self.inner.lock().await;

        inner
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
    }

    /// Returns every raw record of a job in append order.
    pub async fn raw_records(&self, job_name: &str) -> Vec<RawChangeRecord> {
        let inner = self.inner.lock().await;

        inner.raw_logs.get(job_name).cloned().unwrap_or_default()
    }
}

impl MetadataStore for MemoryStore {
    async fn get_cursors(&self, job_name: &str) -> MirrorResult<JobCursors> {
        let inner = self.inner.lock().await;

        Ok(inner.jobs.get(job_name).copied().unwrap_or_default())
    }

    async fn record_normalize(&self, job_name: &str, normalize_batch_id: BatchId) -> MirrorResult<()> {
        let mut inner = self.inner.lock().await;

        inner.record_normalize(job_name, normalize_batch_id)
    }

    async fn record_offset(&self, job_name: &str, source_offset: SourceOffset) -> MirrorResult<()> {
        let mut inner = self.inner.lock().await;

        inner.jobs.entry(job_name.to_owned()).or_default().source_offset = source_offset;

        Ok(())
    }

    async fn delete_job(&self, job_name: &str) -> MirrorResult<bool> {
        let mut inner = self.inner.lock().await;

        Ok(inner.jobs.remove(job_name).is_some())
    }
}

impl RawLogStore for MemoryStore {
    async fn setup_raw_log(&self, job_name: &str) -> MirrorResult<()> {
        let mut inner = self.inner.lock().await;

        inner.raw_logs.entry(job_name.to_owned()).or_default();

        Ok(())
    }

    async fn commit_sync_batch(&self, job_name: &str, commit: SyncCommit) -> MirrorResult<JobCursors> {
        let mut inner = self.inner.lock().await;

        inner.raw_log(job_name)?;
        let mut cursors = inner.jobs.get(job_name).copied().unwrap_or_default();
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

        mirror_fail_point(SYNC_BEFORE_COMMIT)?;

        let records = commit.records.len();
        inner
            .raw_logs
            .entry(job_name.to_owned())
            .or_default()
            .extend(commit.records);

        cursors.source_offset = commit.source_offset;
        cursors.sync_batch_id = commit.batch_id;
        inner.jobs.insert(job_name.to_owned(), cursors);

        debug!(job_name, batch_id = commit.batch_id, records, "raw records appended");

        Ok(cursors)
    }

    async fn load_window(&self, job_name: &str, window: BatchWindow) -> MirrorResult<Vec<RawChangeRecord>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .raw_log(job_name)?
            .iter()
            .filter(|record| window.contains(record.batch_id))
            .cloned()
            .collect())
    }

    async fn window_unchanged_groups(
        &self,
        job_name: &str,
        window: BatchWindow,
    ) -> MirrorResult<Vec<UnchangedColumnsGroup>> {
        let inner = self.inner.lock().await;

        let groups = inner
            .raw_log(job_name)?
            .iter()
            .filter(|record| window.contains(record.batch_id))
            .map(|record| UnchangedColumnsGroup {
                destination_table: record.destination_table.clone(),
                unchanged_wide_columns: record.unchanged_wide_columns.clone(),
            })
            .collect::<BTreeSet<_>>();

        Ok(groups.into_iter().collect())
    }

    async fn drop_raw_log(&self, job_name: &str) -> MirrorResult<()> {
        let mut inner = self.inner.lock().await;

        inner.raw_logs.remove(job_name);

        Ok(())
    }
}

impl MergeStore for MemoryStore {
    async fn setup_normalized_table(&self, schema: &DestinationTableSchema) -> MirrorResult<bool> {
        let mut inner = self.inner.lock().await;

        if inner.tables.contains_key(&schema.name) {
            return Ok(true);
        }
        inner.tables.insert(schema.name.clone(), TableRows::new());

        Ok(false)
    }

    async fn merge_window(
        &self,
        job_name: &str,
        window: BatchWindow,
        plans: &[MergePlan],
    ) -> MirrorResult<u64> {
        let mut inner = self.inner.lock().await;

        inner.cursors_mut(job_name)?.ensure_window_pending(job_name, window)?;

        let raw_log = inner.raw_log(job_name)?;
        let mut staged = Vec::with_capacity(plans.len());
        let mut affected = 0;

        for plan in plans {
            let Some(rows) = inner.tables.get(plan.table()) else {
                bail!(
                    ErrorKind::InvalidState,
                    "Destination table does not exist",
                    format!("table {} was not set up", plan.table())
                );
            };

            let records = raw_log.iter().filter(|record| {
                window.contains(record.batch_id) && &record.destination_table == plan.table()
            });
            let winners = rank_window(records, plan.schema.primary_key())?;

            let mut rows = rows.clone();
            affected += apply_winners(&mut rows, &winners, plan);
            staged.push((plan.table().clone(), rows));
        }

        mirror_fail_point(NORMALIZE_BEFORE_CURSOR_UPDATE)?;

        inner.record_normalize(job_name, window.up_to())?;
        inner.tables.extend(staged);

        debug!(job_name, %window, affected, "window merged in memory");

        Ok(affected)
    }
}
