use std::io::BufReader;
use std::sync::Arc;

use mirror_config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::{quote_identifier, quote_literal};
use rustls::ClientConfig;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, SimpleQueryMessage, SimpleQueryRow, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{error, info};

use crate::error::{ErrorKind, MirrorResult};
use crate::schema::{ColumnSchema, ColumnType, DestinationTableSchema, TableName};
use crate::source::ReplicationSource;
use crate::{bail, mirror_error};

/// Output plugin of the replication slots created for mirror jobs.
const OUTPUT_PLUGIN: &str = "pgoutput";

/// Spawns a task driving a Postgres connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    // The client closes the connection when dropped, so the handle is not kept.
    tokio::spawn(async move {
        match connection.await {
            Err(err) => error!("an error occurred during the source connection: {}", err),
            Ok(()) => info!("source connection terminated successfully"),
        }
    });
}

/// Catalog client for the source database of a mirror job.
#[derive(Debug, Clone)]
pub struct PgSourceClient {
    client: Arc<Client>,
}

impl PgSourceClient {
    /// Connects to the source, using TLS when enabled in `config`.
    pub async fn connect(config: PgConnectionConfig) -> MirrorResult<Self> {
        match config.tls.enabled {
            true => Self::connect_tls(config).await,
            false => Self::connect_no_tls(config).await,
        }
    }

    async fn connect_no_tls(pg_connection_config: PgConnectionConfig) -> MirrorResult<Self> {
        let config: Config = pg_connection_config.with_db();

        let (client, connection) = config.connect(NoTls).await?;
        spawn_postgres_connection::<NoTls>(connection);

        info!("connected to source without tls");

        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn connect_tls(pg_connection_config: PgConnectionConfig) -> MirrorResult<Self> {
        let config: Config = pg_connection_config.with_db();

        let mut root_store = rustls::RootCertStore::empty();
        let mut root_certs_reader =
            BufReader::new(pg_connection_config.tls.trusted_root_certs.as_bytes());
        for cert in rustls_pemfile::certs(&mut root_certs_reader) {
            root_store.add(cert?)?;
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let (client, connection) = config.connect(MakeRustlsConnect::new(tls_config)).await?;
        spawn_postgres_connection::<MakeRustlsConnect>(connection);

        info!("connected to source with tls");

        Ok(Self {
            client: Arc::new(client),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    async fn query_rows(&self, query: &str) -> MirrorResult<Vec<SimpleQueryRow>> {
        let rows = self
            .client
            .simple_query(query)
            .await?
            .into_iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(row),
                _ => None,
            })
            .collect();

        Ok(rows)
    }

    async fn has_rows(&self, query: &str) -> MirrorResult<bool> {
        Ok(!self.query_rows(query).await?.is_empty())
    }
}

fn row_value<'a>(row: &'a SimpleQueryRow, column: &str, table: &TableName) -> MirrorResult<&'a str> {
    row.try_get(column)?.ok_or_else(|| {
        mirror_error!(
            ErrorKind::InvalidData,
            "Catalog column is null",
            format!("column `{column}` is null in the catalog row of {table}")
        )
    })
}

/// Returns the literal `'"schema"."table"'::regclass`.
fn regclass(table: &TableName) -> String {
    format!("{}::regclass", quote_literal(&table.as_quoted_identifier()))
}

impl ReplicationSource for PgSourceClient {
    async fn table_exists(&self, table: &TableName) -> MirrorResult<bool> {
        let query = format!(
            "select 1 from pg_tables where schemaname = {} and tablename = {};",
            quote_literal(&table.schema),
            quote_literal(&table.name)
        );

        self.has_rows(&query).await
    }

    async fn get_primary_key_column(&self, table: &TableName) -> MirrorResult<String> {
        let query = format!(
            r#"
            select a.attname
            from pg_index i
            join pg_attribute a on a.attrelid = i.indrelid and a.attnum = any(i.indkey)
            where i.indrelid = {} and i.indisprimary;
            "#,
            regclass(table)
        );

        let rows = self.query_rows(&query).await?;
        match rows.as_slice() {
            [row] => Ok(row_value(row, "attname", table)?.to_owned()),
            [] => bail!(
                ErrorKind::MissingPrimaryKey,
                "Source table has no primary key",
                format!("table {table} must have a single column primary key")
            ),
            _ => bail!(
                ErrorKind::MissingPrimaryKey,
                "Source table has a composite primary key",
                format!(
                    "table {table} has a primary key over {} columns, only one is supported",
                    rows.len()
                )
            ),
        }
    }

    async fn get_destination_schema(&self, table: &TableName) -> MirrorResult<DestinationTableSchema> {
        let primary_key = self.get_primary_key_column(table).await?;

        let query = format!(
            r#"
            select a.attname, format_type(a.atttypid, a.atttypmod) as type_name, a.attnotnull
            from pg_attribute a
            where a.attrelid = {} and a.attnum > 0 and not a.attisdropped
            order by a.attnum;
            "#,
            regclass(table)
        );

        let mut columns = Vec::new();
        for row in self.query_rows(&query).await? {
            let name = row_value(&row, "attname", table)?;
            let type_name = row_value(&row, "type_name", table)?;
            let not_null = row_value(&row, "attnotnull", table)? == "t";

            columns.push(ColumnSchema::new(
                name,
                ColumnType::from_pg_type(type_name),
                !not_null,
            ));
        }

        Ok(DestinationTableSchema::new(table.clone(), columns, primary_key)?)
    }

    async fn publication_exists(&self, publication: &str) -> MirrorResult<bool> {
        let query = format!(
            "select 1 from pg_publication where pubname = {};",
            quote_literal(publication)
        );

        self.has_rows(&query).await
    }

    async fn create_publication(&self, publication: &str, tables: &[TableName]) -> MirrorResult<()> {
        let tables = tables
            .iter()
            .map(TableName::as_quoted_identifier)
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "create publication {} for table {tables};",
            quote_identifier(publication)
        );

        self.client.simple_query(&query).await?;

        Ok(())
    }

    async fn slot_exists(&self, slot_name: &str) -> MirrorResult<bool> {
        let query = format!(
            "select 1 from pg_replication_slots where slot_name = {};",
            quote_literal(slot_name)
        );

        self.has_rows(&query).await
    }

    async fn create_slot(&self, slot_name: &str) -> MirrorResult<()> {
        let query = format!(
            "select pg_create_logical_replication_slot({}, {});",
            quote_literal(slot_name),
            quote_literal(OUTPUT_PLUGIN)
        );

        self.client.simple_query(&query).await?;

        Ok(())
    }
}
