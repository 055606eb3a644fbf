use tracing::{debug, info};

use crate::error::MirrorResult;
use crate::failpoints::{NORMALIZE_BEFORE_MERGE, mirror_fail_point};
use crate::normalize::build_merge_plans;
use crate::schema::SchemaRegistry;
use crate::store::merge::MergeStore;
use crate::store::metadata::MetadataStore;
use crate::store::raw_log::RawLogStore;
use crate::types::{NormalizeOutcome, TableName};

/// Folds the pending raw log window of one job into its destination tables.
///
/// Only one normalizer may run per job at a time, since two runs would race on the normalize
/// cursor. Runs for different jobs are independent.
#[derive(Debug, Clone)]
pub struct Normalizer<S> {
    job_name: String,
    store: S,
    schemas: SchemaRegistry,
}

impl<S> Normalizer<S>
where
    S: MetadataStore + RawLogStore + MergeStore,
{
    pub fn new(job_name: impl Into<String>, store: S, schemas: SchemaRegistry) -> Self {
        Self {
            job_name: job_name.into(),
            store,
            schemas,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Creates every registered destination table that is missing.
    ///
    /// Returns, per table, whether it already existed.
    pub async fn setup_destination_tables(&self) -> MirrorResult<Vec<(TableName, bool)>> {
        let mut tables = Vec::with_capacity(self.schemas.len());
        for schema in self.schemas.tables() {
            let existed = self.store.setup_normalized_table(schema).await?;
            info!(
                job_name = %self.job_name,
                table = %schema.name,
                existed,
                "destination table ready"
            );
            tables.push((schema.name.clone(), existed));
        }
        tables.sort();

        Ok(tables)
    }

    /// Merges the window `(normalize_batch_id, sync_batch_id]` and moves the normalize cursor
    /// to `sync_batch_id`.
    ///
    /// Any failure leaves the cursor where it was, so the same window is merged again on the
    /// next call. Merging a window twice yields the same destination state.
    pub async fn normalize(&self) -> MirrorResult<NormalizeOutcome> {
        let cursors = self.store.get_cursors(&self.job_name).await?;
        let Some(window) = cursors.pending_window()? else {
            debug!(
                job_name = %self.job_name,
                batch_id = cursors.sync_batch_id,
                "nothing to normalize"
            );
            return Ok(NormalizeOutcome::UpToDate {
                batch_id: cursors.sync_batch_id,
            });
        };

        info!(job_name = %self.job_name, %window, "normalizing window");

        let groups = self
            .store
            .window_unchanged_groups(&self.job_name, window)
            .await?;
        let plans = build_merge_plans(groups, &self.schemas)?;

        if plans.is_empty() {
            // The window holds no rows, only the cursor has to move.
            self.store
                .record_normalize(&self.job_name, window.up_to())
                .await?;

            return Ok(NormalizeOutcome::Applied {
                window,
                tables: vec![],
                rows_affected: 0,
            });
        }

        mirror_fail_point(NORMALIZE_BEFORE_MERGE)?;

        let rows_affected = self
            .store
            .merge_window(&self.job_name, window, &plans)
            .await?;
        let tables = plans
            .iter()
            .map(|plan| plan.table().clone())
            .collect::<Vec<_>>();

        info!(
            job_name = %self.job_name,
            %window,
            tables = tables.len(),
            rows_affected,
            "window normalized"
        );

        Ok(NormalizeOutcome::Applied {
            window,
            tables,
            rows_affected,
        })
    }
}
