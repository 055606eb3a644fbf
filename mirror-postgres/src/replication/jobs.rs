use pg_escape::quote_identifier;
use sqlx::{FromRow, PgConnection, PgExecutor};

use crate::replication::{INTERNAL_SCHEMA, internal_table_identifier};

/// Table holding one row of progress cursors per mirror job.
pub const JOBS_TABLE: &str = "mirror_jobs";

/// A row of the jobs table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MirrorJobRow {
    pub job_name: String,
    pub source_offset: i64,
    pub sync_batch_id: i64,
    pub normalize_batch_id: i64,
}

/// Creates the internal schema and the jobs table if they are missing.
pub async fn create_jobs_table(conn: &mut PgConnection) -> sqlx::Result<()> {
    let create_schema = format!(
        "create schema if not exists {}",
        quote_identifier(INTERNAL_SCHEMA)
    );
    sqlx::query(&create_schema).execute(&mut *conn).await?;

    let create_table = format!(
        r#"
        create table if not exists {} (
            job_name text primary key,
            source_offset bigint not null default 0,
            sync_batch_id bigint not null default 0,
            normalize_batch_id bigint not null default 0,
            check (normalize_batch_id <= sync_batch_id)
        )
        "#,
        internal_table_identifier(JOBS_TABLE)
    );
    sqlx::query(&create_table).execute(&mut *conn).await?;

    Ok(())
}

/// Returns the row of `job_name`, if any.
pub async fn get_job<'c, E>(executor: E, job_name: &str) -> sqlx::Result<Option<MirrorJobRow>>
where
    E: PgExecutor<'c>,
{
    let query = format!(
        "select job_name, source_offset, sync_batch_id, normalize_batch_id from {} where job_name = $1",
        internal_table_identifier(JOBS_TABLE)
    );

    sqlx::query_as::<_, MirrorJobRow>(&query)
        .bind(job_name)
        .fetch_optional(executor)
        .await
}

/// Returns the row of `job_name` locked until the end of the surrounding transaction.
///
/// Used to serialize concurrent writers of the same job.
pub async fn get_job_for_update<'c, E>(
    executor: E,
    job_name: &str,
) -> sqlx::Result<Option<MirrorJobRow>>
where
    E: PgExecutor<'c>,
{
    let query = format!(
        "select job_name, source_offset, sync_batch_id, normalize_batch_id from {} where job_name = $1 for update",
        internal_table_identifier(JOBS_TABLE)
    );

    sqlx::query_as::<_, MirrorJobRow>(&query)
        .bind(job_name)
        .fetch_optional(executor)
        .await
}

/// Inserts the job with the given sync cursor, or updates only `source_offset` and
/// `sync_batch_id` of an existing row.
pub async fn upsert_sync_cursor<'c, E>(
    executor: E,
    job_name: &str,
    source_offset: i64,
    sync_batch_id: i64,
) -> sqlx::Result<()>
where
    E: PgExecutor<'c>,
{
    let query = format!(
        r#"
        insert into {} (job_name, source_offset, sync_batch_id, normalize_batch_id)
        values ($1, $2, $3, 0)
        on conflict (job_name) do update
        set source_offset = excluded.source_offset, sync_batch_id = excluded.sync_batch_id
        "#,
        internal_table_identifier(JOBS_TABLE)
    );

    sqlx::query(&query)
        .bind(job_name)
        .bind(source_offset)
        .bind(sync_batch_id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Inserts the job with the given offset, or updates only `source_offset` of an existing row.
pub async fn upsert_source_offset<'c, E>(
    executor: E,
    job_name: &str,
    source_offset: i64,
) -> sqlx::Result<()>
where
    E: PgExecutor<'c>,
{
    let query = format!(
        r#"
        insert into {} (job_name, source_offset)
        values ($1, $2)
        on conflict (job_name) do update
        set source_offset = excluded.source_offset
        "#,
        internal_table_identifier(JOBS_TABLE)
    );

    sqlx::query(&query)
        .bind(job_name)
        .bind(source_offset)
        .execute(executor)
        .await?;

    Ok(())
}

/// Sets `normalize_batch_id` of an existing job and returns the number of updated rows.
///
/// Zero means the job has no row yet.
pub async fn update_normalize_cursor<'c, E>(
    executor: E,
    job_name: &str,
    normalize_batch_id: i64,
) -> sqlx::Result<u64>
where
    E: PgExecutor<'c>,
{
    let query = format!(
        "update {} set normalize_batch_id = $2 where job_name = $1",
        internal_table_identifier(JOBS_TABLE)
    );

    let result = sqlx::query(&query)
        .bind(job_name)
        .bind(normalize_batch_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Deletes the row of `job_name` and returns the number of deleted rows.
pub async fn delete_job<'c, E>(executor: E, job_name: &str) -> sqlx::Result<u64>
where
    E: PgExecutor<'c>,
{
    let query = format!(
        "delete from {} where job_name = $1",
        internal_table_identifier(JOBS_TABLE)
    );

    let result = sqlx::query(&query)
        .bind(job_name)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
