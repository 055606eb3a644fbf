use std::future::Future;

use crate::error::MirrorResult;
use crate::normalize::MergePlan;
use crate::schema::DestinationTableSchema;
use crate::types::BatchWindow;

/// Destination tables that raw log windows are merged into.
pub trait MergeStore {
    /// Creates the destination table if missing and returns whether it already existed.
    fn setup_normalized_table(
        &self,
        schema: &DestinationTableSchema,
    ) -> impl Future<Output = MirrorResult<bool>> + Send;

    /// Merges the raw rows of `window` into the tables of `plans` and moves the normalize
    /// cursor of `job_name` to `window.up_to()`, atomically.
    ///
    /// For every primary key only the highest ranked row of the window is applied. Deletes
    /// remove the row, inserts and updates upsert it while leaving the row's unchanged wide
    /// columns untouched. Returns the number of destination rows affected.
    fn merge_window(
        &self,
        job_name: &str,
        window: BatchWindow,
        plans: &[MergePlan],
    ) -> impl Future<Output = MirrorResult<u64>> + Send;
}
