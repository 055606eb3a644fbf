use mirror_config::shared::SyncConfig;
use tracing::{info, warn};

use crate::error::MirrorResult;
use crate::store::metadata::MetadataStore;
use crate::store::raw_log::RawLogStore;
use crate::sync::{Heartbeat, HeartbeatReporter};
use crate::types::{Change, RawChangeRecord, SourceOffset, SyncCommit, SyncOutcome};

/// Appends batches of captured changes to the raw log of one job.
///
/// A single writer is expected per job. Concurrent writers of the same job are detected when
/// committing and the later one fails, but they are not coordinated.
#[derive(Debug)]
pub struct RawLogWriter<S, H> {
    job_name: String,
    store: S,
    heartbeat: H,
    config: SyncConfig,
}

impl<S, H> RawLogWriter<S, H>
where
    S: MetadataStore + RawLogStore,
    H: HeartbeatReporter,
{
    pub fn new(job_name: impl Into<String>, store: S, heartbeat: H, config: SyncConfig) -> Self {
        Self {
            job_name: job_name.into(),
            store,
            heartbeat,
            config,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Prepares the raw log of the job. Safe to call before every run.
    pub async fn setup(&self) -> MirrorResult<()> {
        self.store.setup_raw_log(&self.job_name).await?;
        info!(job_name = %self.job_name, "raw log ready");

        Ok(())
    }

    /// Commits `changes`, which end at `source_offset`, as the next batch of the job.
    ///
    /// The batch gets the id following the stored sync cursor. The records and the advanced
    /// cursor become visible together or not at all. Empty input leaves the cursors alone
    /// and does not use up a batch id, as does an offset already covered by a committed
    /// batch, so a caller re-submitting the same offset range gets a no-op.
    pub async fn sync(
        &self,
        changes: Vec<Change>,
        source_offset: SourceOffset,
    ) -> MirrorResult<SyncOutcome> {
        if changes.is_empty() {
            info!(job_name = %self.job_name, "no changes to sync");
            return Ok(SyncOutcome::Empty);
        }

        let cursors = self.store.get_cursors(&self.job_name).await?;
        if cursors.sync_batch_id > 0 && source_offset <= cursors.source_offset {
            warn!(
                job_name = %self.job_name,
                stored_offset = cursors.source_offset,
                offered_offset = source_offset,
                "skipping sync of an offset that is already committed"
            );
            return Ok(SyncOutcome::StaleOffset {
                stored_offset: cursors.source_offset,
                offered_offset: source_offset,
            });
        }

        let batch_id = cursors.sync_batch_id + 1;
        let total = changes.len();
        let chunk_size = self.config.records_per_heartbeat.max(1);

        // Chunks only pace the heartbeats, every record gets the same batch id.
        let mut records = Vec::with_capacity(total);
        let mut changes = changes.into_iter().peekable();
        while changes.peek().is_some() {
            records.extend(
                changes
                    .by_ref()
                    .take(chunk_size)
                    .map(|change| RawChangeRecord::from_change(change, batch_id)),
            );
            self.heartbeat.record_heartbeat(Heartbeat {
                job_name: self.job_name.clone(),
                processed: records.len(),
                total,
            });
        }

        let commit = SyncCommit {
            source_offset,
            batch_id,
            records,
        };
        let cursors = self.store.commit_sync_batch(&self.job_name, commit).await?;

        info!(
            job_name = %self.job_name,
            batch_id,
            records = total,
            source_offset = cursors.source_offset,
            "batch committed to raw log"
        );

        Ok(SyncOutcome::Committed {
            batch_id,
            records: total,
        })
    }

    /// Drops the raw log and the cursors of the job.
    ///
    /// This is the only way raw records and job metadata are ever deleted.
    pub async fn teardown(self) -> MirrorResult<()> {
        self.store.drop_raw_log(&self.job_name).await?;
        let existed = self.store.delete_job(&self.job_name).await?;

        info!(job_name = %self.job_name, existed, "job torn down");

        Ok(())
    }
}
