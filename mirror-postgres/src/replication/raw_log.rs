use pg_escape::quote_identifier;
use sqlx::{FromRow, PgConnection, PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::replication::internal_table_identifier;

/// Prefix of the per-job raw change log tables.
pub const RAW_TABLE_PREFIX: &str = "_mirror_raw_";

/// Values bound per inserted raw row.
const BINDS_PER_ROW: usize = 8;

/// Maximum number of bind parameters of a single Postgres statement.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Maximum number of rows inserted by one statement.
const MAX_ROWS_PER_INSERT: usize = MAX_BIND_PARAMS / BINDS_PER_ROW;

/// A row of a raw change log table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct RawLogRow {
    pub id: Uuid,
    /// Capture time in nanoseconds since the Unix epoch.
    pub captured_at: i64,
    /// Destination table as `schema.table`.
    pub destination_table: String,
    /// 0 for inserts, 1 for updates and 2 for deletes.
    pub kind: i16,
    pub payload: serde_json::Value,
    pub match_payload: Option<serde_json::Value>,
    pub batch_id: i64,
    /// Sorted names of the wide columns left out of `payload`.
    pub unchanged_wide_columns: Vec<String>,
}

/// Distinct combination of destination table and unchanged column set found in a window.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UnchangedColumnsGroup {
    pub destination_table: String,
    pub unchanged_wide_columns: Vec<String>,
}

/// Returns the raw table name of a job.
///
/// Runs of characters other than ASCII letters and digits become a single `_` and the result
/// is lowercased, so `Orders-Mirror.v2` maps to `_mirror_raw_orders_mirror_v2`.
pub fn raw_table_name(job_name: &str) -> String {
    let mut sanitized = String::with_capacity(job_name.len());
    let mut previous_was_separator = false;

    for c in job_name.chars() {
        if c.is_ascii_alphanumeric() {
            sanitized.push(c.to_ascii_lowercase());
            previous_was_separator = false;
        } else if !previous_was_separator {
            sanitized.push('_');
            previous_was_separator = true;
        }
    }

    format!("{RAW_TABLE_PREFIX}{sanitized}")
}

/// Returns the quoted, schema qualified raw table of a job.
pub fn raw_table_identifier(job_name: &str) -> String {
    internal_table_identifier(&raw_table_name(job_name))
}

/// Creates the raw table of a job and its batch index if they are missing.
pub async fn create_raw_table(conn: &mut PgConnection, job_name: &str) -> sqlx::Result<()> {
    let table = raw_table_identifier(job_name);

    let create_table = format!(
        r#"
        create table if not exists {table} (
            id uuid primary key,
            captured_at bigint not null,
            destination_table text not null,
            kind smallint not null,
            payload jsonb not null,
            match_payload jsonb,
            batch_id bigint not null,
            unchanged_wide_columns text[] not null default '{{}}'
        )
        "#
    );
    sqlx::query(&create_table).execute(&mut *conn).await?;

    let index_name = format!("{}_batch_id_idx", raw_table_name(job_name));
    let index_name = quote_identifier(&index_name);
    let create_index =
        format!("create index if not exists {index_name} on {table} (batch_id, destination_table)");
    sqlx::query(&create_index).execute(&mut *conn).await?;

    Ok(())
}

/// Drops the raw table of a job together with every row it holds.
pub async fn drop_raw_table<'c, E>(executor: E, job_name: &str) -> sqlx::Result<()>
where
    E: PgExecutor<'c>,
{
    let query = format!("drop table if exists {}", raw_table_identifier(job_name));
    sqlx::query(&query).execute(executor).await?;

    Ok(())
}

/// Appends rows to the raw table of a job.
///
/// Rows are split over as many statements as needed to stay below the bind parameter limit.
pub async fn insert_raw_rows(
    conn: &mut PgConnection,
    job_name: &str,
    rows: &[RawLogRow],
) -> sqlx::Result<()> {
    let table = raw_table_identifier(job_name);

    for chunk in rows.chunks(MAX_ROWS_PER_INSERT) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "insert into {table} (id, captured_at, destination_table, kind, payload, match_payload, batch_id, unchanged_wide_columns) "
        ));
        builder.push_values(chunk, |mut values, row| {
            values
                .push_bind(row.id)
                .push_bind(row.captured_at)
                .push_bind(&row.destination_table)
                .push_bind(row.kind)
                .push_bind(&row.payload)
                .push_bind(&row.match_payload)
                .push_bind(row.batch_id)
                .push_bind(&row.unchanged_wide_columns);
        });

        builder.build().execute(&mut *conn).await?;
    }

    Ok(())
}

/// Returns the rows of the half-open batch window `(after_batch_id, up_to_batch_id]`.
pub async fn select_window_rows<'c, E>(
    executor: E,
    job_name: &str,
    after_batch_id: i64,
    up_to_batch_id: i64,
) -> sqlx::Result<Vec<RawLogRow>>
where
    E: PgExecutor<'c>,
{
    let query = format!(
        r#"
        select id, captured_at, destination_table, kind, payload, match_payload, batch_id, unchanged_wide_columns
        from {}
        where batch_id > $1 and batch_id <= $2
        order by batch_id, captured_at, id
        "#,
        raw_table_identifier(job_name)
    );

    sqlx::query_as::<_, RawLogRow>(&query)
        .bind(after_batch_id)
        .bind(up_to_batch_id)
        .fetch_all(executor)
        .await
}

/// Returns each distinct `(destination_table, unchanged_wide_columns)` pair of a window.
pub async fn select_window_unchanged_groups<'c, E>(
    executor: E,
    job_name: &str,
    after_batch_id: i64,
    up_to_batch_id: i64,
) -> sqlx::Result<Vec<UnchangedColumnsGroup>>
where
    E: PgExecutor<'c>,
{
    let query = format!(
        r#"
        select distinct destination_table, unchanged_wide_columns
        from {}
        where batch_id > $1 and batch_id <= $2
        order by destination_table, unchanged_wide_columns
        "#,
        raw_table_identifier(job_name)
    );

    sqlx::query_as::<_, UnchangedColumnsGroup>(&query)
        .bind(after_batch_id)
        .bind(up_to_batch_id)
        .fetch_all(executor)
        .await
}
