use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the raw log writer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Number of records written between two heartbeats reported to the scheduler.
    #[serde(default = "default_records_per_heartbeat")]
    pub records_per_heartbeat: usize,
}

impl SyncConfig {
    pub const DEFAULT_RECORDS_PER_HEARTBEAT: usize = 1_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.records_per_heartbeat == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "sync.records_per_heartbeat".to_owned(),
                constraint: "must be greater than 0".to_owned(),
            });
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            records_per_heartbeat: default_records_per_heartbeat(),
        }
    }
}

fn default_records_per_heartbeat() -> usize {
    SyncConfig::DEFAULT_RECORDS_PER_HEARTBEAT
}
