use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::schema::{ColumnSchema, ColumnType, DestinationTableSchema, TableName};
use crate::source::ReplicationSource;

/// A change made to a [`FakeSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    CreatePublication { name: String, tables: Vec<TableName> },
    CreateSlot(String),
}

#[derive(Debug, Default)]
struct State {
    publications: BTreeMap<String, Vec<TableName>>,
    slots: BTreeSet<String>,
    calls: Vec<SourceCall>,
}

/// A scripted source database.
///
/// Tables are declared up front together with their primary key, publications and slots
/// may pre-exist, and every create call is recorded in order.
#[derive(Debug, Default)]
pub struct FakeSource {
    tables: BTreeMap<TableName, Option<String>>,
    state: Mutex<State>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `table`, with `primary_key` as its only primary key column when given.
    pub fn with_table(mut self, table: TableName, primary_key: Option<&str>) -> Self {
        self.tables.insert(table, primary_key.map(str::to_owned));
        self
    }

    pub fn with_publication(mut self, name: &str) -> Self {
        self.state
            .get_mut()
            .publications
            .insert(name.to_owned(), Vec::new());
        self
    }

    pub fn with_slot(mut self, name: &str) -> Self {
        self.state.get_mut().slots.insert(name.to_owned());
        self
    }

    pub async fn calls(&self) -> Vec<SourceCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn has_publication(&self, name: &str) -> bool {
        self.state.lock().await.publications.contains_key(name)
    }

    pub async fn has_slot(&self, name: &str) -> bool {
        self.state.lock().await.slots.contains(name)
    }
}

impl ReplicationSource for FakeSource {
    async fn table_exists(&self, table: &TableName) -> MirrorResult<bool> {
        Ok(self.tables.contains_key(table))
    }

    async fn get_primary_key_column(&self, table: &TableName) -> MirrorResult<String> {
        match self.tables.get(table) {
            Some(Some(primary_key)) => Ok(primary_key.clone()),
            Some(None) => bail!(
                ErrorKind::MissingPrimaryKey,
                "Source table has no primary key",
                format!("table {table} must have a single column primary key")
            ),
            None => bail!(
                ErrorKind::InvalidTableIdentifier,
                "Source table does not exist",
                format!("table {table} was not found on the source")
            ),
        }
    }

    async fn get_destination_schema(&self, table: &TableName) -> MirrorResult<DestinationTableSchema> {
        let primary_key = self.get_primary_key_column(table).await?;
        let columns = vec![ColumnSchema::new(primary_key.clone(), ColumnType::Int8, false)];

        Ok(DestinationTableSchema::new(table.clone(), columns, primary_key)?)
    }

    async fn publication_exists(&self, publication: &str) -> MirrorResult<bool> {
        Ok(self.state.lock().await.publications.contains_key(publication))
    }

    async fn create_publication(&self, publication: &str, tables: &[TableName]) -> MirrorResult<()> {
        let mut state = self.state.lock().await;
        if state.publications.contains_key(publication) {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Publication already exists",
                format!("publication `{publication}` already exists")
            );
        }

        state
            .publications
            .insert(publication.to_owned(), tables.to_vec());
        state.calls.push(SourceCall::CreatePublication {
            name: publication.to_owned(),
            tables: tables.to_vec(),
        });

        Ok(())
    }

    async fn slot_exists(&self, slot_name: &str) -> MirrorResult<bool> {
        Ok(self.state.lock().await.slots.contains(slot_name))
    }

    async fn create_slot(&self, slot_name: &str) -> MirrorResult<()> {
        let mut state = self.state.lock().await;
        if !state.slots.insert(slot_name.to_owned()) {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Replication slot already exists",
                format!("slot `{slot_name}` already exists")
            );
        }
        state.calls.push(SourceCall::CreateSlot(slot_name.to_owned()));

        Ok(())
    }
}
