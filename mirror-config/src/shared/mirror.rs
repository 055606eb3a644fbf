use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{
    FanoutConfig, MetadataStoreConfig, PgConnectionConfig, PublicationConfig, SyncConfig,
    ValidationError,
};

/// Complete configuration of one mirror job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MirrorConfig {
    /// Unique name of the job, used as the key of its cursors.
    pub job_name: String,
    /// Database the changes are captured from.
    pub source: PgConnectionConfig,
    /// Database holding the raw log, the job cursors and the destination tables.
    pub destination: PgConnectionConfig,
    pub publication: PublicationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub metadata_store: MetadataStoreConfig,
}

impl MirrorConfig {
    /// Validates every section, returning the first failure.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.job_name.trim().is_empty() {
            return Err(ValidationError::EmptyName("job_name".to_owned()));
        }

        self.source.validate()?;
        self.destination.validate()?;
        self.publication.validate()?;
        self.sync.validate()?;
        self.fanout.validate()
    }
}

impl Config for MirrorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["publication.source_tables"];
}
