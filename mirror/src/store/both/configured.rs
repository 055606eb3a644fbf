use mirror_config::shared::{MetadataStoreConfig, MirrorConfig};
use tracing::info;

use crate::error::MirrorResult;
use crate::normalize::MergePlan;
use crate::schema::DestinationTableSchema;
use crate::store::both::{MemoryStore, PostgresStore};
use crate::store::merge::MergeStore;
use crate::store::metadata::MetadataStore;
use crate::store::raw_log::{RawLogStore, UnchangedColumnsGroup};
use crate::types::{BatchId, BatchWindow, JobCursors, RawChangeRecord, SourceOffset, SyncCommit};

/// The store backend a job was configured with.
#[derive(Debug, Clone)]
pub enum ConfiguredStore {
    Memory(MemoryStore),
    Postgres(PostgresStore),
}

impl ConfiguredStore {
    /// Builds the backend named by `metadata_store`. The Postgres backend connects lazily to
    /// the destination database of `config`.
    pub fn from_config(config: &MirrorConfig) -> Self {
        let store = match config.metadata_store {
            MetadataStoreConfig::Memory => ConfiguredStore::Memory(MemoryStore::new()),
            MetadataStoreConfig::Postgres => {
                ConfiguredStore::Postgres(PostgresStore::new(&config.destination))
            }
        };

        info!(
            job_name = %config.job_name,
            backend = ?config.metadata_store,
            "store configured"
        );

        store
    }
}

impl MetadataStore for ConfiguredStore {
    async fn get_cursors(&self, job_name: &str) -> MirrorResult<JobCursors> {
        match self {
            ConfiguredStore::Memory(store) => store.get_cursors(job_name).await,
            ConfiguredStore::Postgres(store) => store.get_cursors(job_name).await,
        }
    }

    async fn record_normalize(&self, job_name: &str, normalize_batch_id: BatchId) -> MirrorResult<()> {
        match self {
            ConfiguredStore::Memory(store) => store.record_normalize(job_name, normalize_batch_id).await,
            ConfiguredStore::Postgres(store) => {
                store.record_normalize(job_name, normalize_batch_id).await
            }
        }
    }

    async fn record_offset(&self, job_name: &str, source_offset: SourceOffset) -> MirrorResult<()> {
        match self {
            ConfiguredStore::Memory(store) => store.record_offset(job_name, source_offset).await,
            ConfiguredStore::Postgres(store) => store.record_offset(job_name, source_offset).await,
        }
    }

    async fn delete_job(&self, job_name: &str) -> MirrorResult<bool> {
        match self {
            ConfiguredStore::Memory(store) => store.delete_job(job_name).await,
            ConfiguredStore::Postgres(store) => store.delete_job(job_name).await,
        }
    }
}

impl RawLogStore for ConfiguredStore {
    async fn setup_raw_log(&self, job_name: &str) -> MirrorResult<()> {
        match self {
            ConfiguredStore::Memory(store) => store.setup_raw_log(job_name).await,
            ConfiguredStore::Postgres(store) => store.setup_raw_log(job_name).await,
        }
    }

    async fn commit_sync_batch(&self, job_name: &str, commit: SyncCommit) -> MirrorResult<JobCursors> {
        match self {
            ConfiguredStore::Memory(store) => store.commit_sync_batch(job_name, commit).await,
            ConfiguredStore::Postgres(store) => store.commit_sync_batch(job_name, commit).await,
        }
    }

    async fn load_window(&self, job_name: &str, window: BatchWindow) -> MirrorResult<Vec<RawChangeRecord>> {
        match self {
            ConfiguredStore::Memory(store) => store.load_window(job_name, window).await,
            ConfiguredStore::Postgres(store) => store.load_window(job_name, window).await,
        }
    }

    async fn window_unchanged_groups(
        &self,
        job_name: &str,
        window: BatchWindow,
    ) -> MirrorResult<Vec<UnchangedColumnsGroup>> {
        match self {
            ConfiguredStore::Memory(store) => store.window_unchanged_groups(job_name, window).await,
            ConfiguredStore::Postgres(store) => {
                store.window_unchanged_groups(job_name, window).await
            }
        }
    }

    async fn drop_raw_log(&self, job_name: &str) -> MirrorResult<()> {
        match self {
            ConfiguredStore::Memory(store) => store.drop_raw_log(job_name).await,
            ConfiguredStore::Postgres(store) => store.drop_raw_log(job_name).await,
        }
    }
}

impl MergeStore for ConfiguredStore {
    async fn setup_normalized_table(&self, schema: &DestinationTableSchema) -> MirrorResult<bool> {
        match self {
            ConfiguredStore::Memory(store) => store.setup_normalized_table(schema).await,
            ConfiguredStore::Postgres(store) => store.setup_normalized_table(schema).await,
        }
    }

    async fn merge_window(
        &self,
        job_name: &str,
        window: BatchWindow,
        plans: &[MergePlan],
    ) -> MirrorResult<u64> {
        match self {
            ConfiguredStore::Memory(store) => store.merge_window(job_name, window, plans).await,
            ConfiguredStore::Postgres(store) => store.merge_window(job_name, window, plans).await,
        }
    }
}
