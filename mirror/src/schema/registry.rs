use std::collections::HashMap;
use std::sync::Arc;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::schema::{DestinationTableSchema, TableName};

/// Read-only mapping from destination table names to their schemas.
///
/// Cloning is cheap and clones share the same schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: Arc<HashMap<TableName, Arc<DestinationTableSchema>>>,
}

impl SchemaRegistry {
    pub fn new<I>(schemas: I) -> SchemaRegistry
    where
        I: IntoIterator<Item = DestinationTableSchema>,
    {
        let schemas = schemas
            .into_iter()
            .map(|schema| (schema.name.clone(), Arc::new(schema)))
            .collect();

        Self {
            schemas: Arc::new(schemas),
        }
    }

    /// Returns the schema of `table`.
    ///
    /// Fails with [`ErrorKind::MissingTableSchema`] when the table is unknown, since rows for
    /// it can't be merged without a primary key.
    pub fn get(&self, table: &TableName) -> MirrorResult<Arc<DestinationTableSchema>> {
        match self.schemas.get(table) {
            Some(schema) => Ok(schema.clone()),
            None => bail!(
                ErrorKind::MissingTableSchema,
                "No schema registered for destination table",
                format!("table {table} is not in the schema registry")
            ),
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<DestinationTableSchema>> + '_ {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl FromIterator<DestinationTableSchema> for SchemaRegistry {
    fn from_iter<T: IntoIterator<Item = DestinationTableSchema>>(iter: T) -> Self {
        SchemaRegistry::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, ColumnType};

    #[test]
    fn unknown_table_is_missing_schema() {
        let schema = DestinationTableSchema::new(
            TableName::new("public", "users"),
            vec![ColumnSchema::new("id", ColumnType::Int8, false)],
            "id",
        )
        .unwrap();
        let registry: SchemaRegistry = [schema].into_iter().collect();

        assert!(registry.get(&TableName::new("public", "users")).is_ok());
        let err = registry
            .get(&TableName::new("public", "orders"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingTableSchema);
    }
}
