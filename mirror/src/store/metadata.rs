use std::future::Future;

use crate::error::MirrorResult;
use crate::types::{BatchId, JobCursors, SourceOffset};

/// Durable per-job progress cursors.
///
/// The sync cursor is only ever moved together with the raw rows it covers, see
/// [`crate::store::raw_log::RawLogStore::commit_sync_batch`]. Jobs are independent of each
/// other, so calls for distinct jobs may run concurrently.
pub trait MetadataStore {
    /// Returns the cursors of `job_name`, all zero when the job has not synced yet.
    fn get_cursors(&self, job_name: &str) -> impl Future<Output = MirrorResult<JobCursors>> + Send;

    /// Moves the normalize cursor of an existing job.
    ///
    /// Fails with [`crate::error::ErrorKind::JobNotFound`] when the job never synced and with
    /// [`crate::error::ErrorKind::InvalidState`] when `normalize_batch_id` is past the sync
    /// cursor.
    fn record_normalize(
        &self,
        job_name: &str,
        normalize_batch_id: BatchId,
    ) -> impl Future<Output = MirrorResult<()>> + Send;

    /// Stores the source offset alone, creating the job if needed.
    ///
    /// Used by destinations without a raw log, which never move the batch cursors.
    fn record_offset(
        &self,
        job_name: &str,
        source_offset: SourceOffset,
    ) -> impl Future<Output = MirrorResult<()>> + Send;

    /// Removes the cursors of `job_name` and returns whether they existed.
    fn delete_job(&self, job_name: &str) -> impl Future<Output = MirrorResult<bool>> + Send;
}
