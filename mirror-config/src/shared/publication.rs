use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Source-side replication objects owned by a mirror job.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PublicationConfig {
    pub publication_name: String,
    pub slot_name: String,
    /// Schema qualified source tables (`schema.table`) covered by the publication.
    pub source_tables: Vec<String>,
}

impl PublicationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.publication_name.is_empty() {
            return Err(ValidationError::EmptyName(
                "publication.publication_name".to_owned(),
            ));
        }
        if self.slot_name.is_empty() {
            return Err(ValidationError::EmptyName("publication.slot_name".to_owned()));
        }

        for table in &self.source_tables {
            let mut parts = table.split('.');
            let qualified = matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(schema), Some(name), None) if !schema.is_empty() && !name.is_empty()
            );
            if !qualified {
                return Err(ValidationError::UnqualifiedSourceTable(table.clone()));
            }
        }

        Ok(())
    }
}
