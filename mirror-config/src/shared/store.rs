use serde::{Deserialize, Serialize};

/// Backend holding job cursors, raw logs and destination tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStoreConfig {
    /// Everything is kept in process memory and lost on restart.
    #[default]
    Memory,
    /// Everything is kept in the destination Postgres database.
    Postgres,
}
