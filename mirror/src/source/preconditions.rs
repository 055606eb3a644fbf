use std::collections::BTreeMap;
use std::future::Future;

use mirror_config::shared::PublicationConfig;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::schema::{DestinationTableSchema, TableName};

/// Catalog operations a source database must offer to be mirrored.
pub trait ReplicationSource {
    fn table_exists(&self, table: &TableName) -> impl Future<Output = MirrorResult<bool>> + Send;

    /// Returns the single primary key column of `table`.
    ///
    /// Fails with [`ErrorKind::MissingPrimaryKey`] when the table has no primary key or a
    /// composite one.
    fn get_primary_key_column(
        &self,
        table: &TableName,
    ) -> impl Future<Output = MirrorResult<String>> + Send;

    /// Returns the columns of `table` in ordinal order together with its primary key.
    fn get_destination_schema(
        &self,
        table: &TableName,
    ) -> impl Future<Output = MirrorResult<DestinationTableSchema>> + Send;

    fn publication_exists(&self, publication: &str) -> impl Future<Output = MirrorResult<bool>> + Send;

    fn create_publication(
        &self,
        publication: &str,
        tables: &[TableName],
    ) -> impl Future<Output = MirrorResult<()>> + Send;

    fn slot_exists(&self, slot_name: &str) -> impl Future<Output = MirrorResult<bool>> + Send;

    fn create_slot(&self, slot_name: &str) -> impl Future<Output = MirrorResult<()>> + Send;
}

/// What [`ensure_pullability`] found or created on the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullabilityReport {
    pub publication_created: bool,
    pub slot_created: bool,
    /// Primary key column of every configured table.
    pub primary_keys: BTreeMap<TableName, String>,
}

/// Makes sure the source can be pulled from for the job described by `config`.
///
/// Every configured table must be schema qualified, exist and have a single column primary
/// key. The publication is then created if missing, and only after that the replication
/// slot, since a slot created ahead of its publication can miss changes. Objects that already
/// exist are left as they are, so this can run on every job start.
pub async fn ensure_pullability<S>(
    source: &S,
    config: &PublicationConfig,
) -> MirrorResult<PullabilityReport>
where
    S: ReplicationSource,
{
    if config.source_tables.is_empty() {
        bail!(
            ErrorKind::ConfigError,
            "No source tables configured",
            format!("publication `{}` must cover at least one table", config.publication_name)
        );
    }

    let mut tables = Vec::with_capacity(config.source_tables.len());
    for table in &config.source_tables {
        let table = TableName::parse(table)?;
        if !tables.contains(&table) {
            tables.push(table);
        }
    }

    let mut primary_keys = BTreeMap::new();
    for table in &tables {
        if !source.table_exists(table).await? {
            bail!(
                ErrorKind::InvalidTableIdentifier,
                "Source table does not exist",
                format!("table {table} was not found on the source")
            );
        }

        let primary_key = source.get_primary_key_column(table).await?;
        primary_keys.insert(table.clone(), primary_key);
    }

    let publication_created = if source.publication_exists(&config.publication_name).await? {
        info!(publication = %config.publication_name, "publication already exists, skipping");
        false
    } else {
        source
            .create_publication(&config.publication_name, &tables)
            .await?;
        info!(
            publication = %config.publication_name,
            tables = tables.len(),
            "publication created"
        );
        true
    };

    let slot_created = if source.slot_exists(&config.slot_name).await? {
        info!(slot = %config.slot_name, "replication slot already exists, skipping");
        false
    } else {
        source.create_slot(&config.slot_name).await?;
        info!(slot = %config.slot_name, "replication slot created");
        true
    };

    Ok(PullabilityReport {
        publication_created,
        slot_created,
        primary_keys,
    })
}
