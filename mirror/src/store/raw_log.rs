use std::collections::BTreeSet;
use std::future::Future;

use crate::error::MirrorResult;
use crate::types::{BatchWindow, JobCursors, RawChangeRecord, SyncCommit, TableName};

/// A destination table together with one unchanged wide column set used by its rows in a
/// window.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnchangedColumnsGroup {
    pub destination_table: TableName,
    pub unchanged_wide_columns: BTreeSet<String>,
}

/// Append-only per-job log of captured changes.
pub trait RawLogStore {
    /// Creates whatever the job needs before its first sync. Safe to call repeatedly.
    fn setup_raw_log(&self, job_name: &str) -> impl Future<Output = MirrorResult<()>> + Send;

    /// Appends `commit.records` and records the sync cursor in one atomic step.
    ///
    /// Either every record and the new `source_offset` and `batch_id` become visible, or
    /// nothing does. Fails with [`crate::error::ErrorKind::InvalidState`] when `batch_id` does
    /// not directly follow the stored sync cursor, which means another writer got there first.
    fn commit_sync_batch(
        &self,
        job_name: &str,
        commit: SyncCommit,
    ) -> impl Future<Output = MirrorResult<JobCursors>> + Send;

    /// Returns the records whose batch id falls in `window`.
    fn load_window(
        &self,
        job_name: &str,
        window: BatchWindow,
    ) -> impl Future<Output = MirrorResult<Vec<RawChangeRecord>>> + Send;

    /// Returns the distinct destination table and unchanged column set pairs of `window`,
    /// sorted.
    fn window_unchanged_groups(
        &self,
        job_name: &str,
        window: BatchWindow,
    ) -> impl Future<Output = MirrorResult<Vec<UnchangedColumnsGroup>>> + Send;

    /// Removes the raw log of a job with all of its records.
    fn drop_raw_log(&self, job_name: &str) -> impl Future<Output = MirrorResult<()>> + Send;
}
