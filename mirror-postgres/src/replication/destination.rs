use pg_escape::{quote_identifier, quote_literal};
use sqlx::PgExecutor;

use crate::schema::DestinationTableSchema;

/// Returns the `create table if not exists` statement of a destination table.
///
/// Only the designated primary key column gets a constraint, every other column keeps the
/// nullability of its schema.
pub fn create_table_statement(schema: &DestinationTableSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|column| {
            let mut definition = format!(
                "{} {}",
                quote_identifier(&column.name),
                column.typ.as_pg_type()
            );
            if column.name == schema.primary_key() {
                definition.push_str(" primary key");
            } else if !column.nullable {
                definition.push_str(" not null");
            }
            definition
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "create table if not exists {} ({columns})",
        schema.name.as_quoted_identifier()
    )
}

/// Returns whether the destination table already exists.
pub async fn table_exists<'c, E>(executor: E, schema: &DestinationTableSchema) -> sqlx::Result<bool>
where
    E: PgExecutor<'c>,
{
    let query = format!(
        "select to_regclass({}) is not null",
        quote_literal(&schema.name.as_quoted_identifier())
    );

    sqlx::query_scalar::<_, bool>(&query)
        .fetch_one(executor)
        .await
}

/// Creates the schema of the destination table if it is missing.
pub async fn create_schema_if_missing<'c, E>(
    executor: E,
    schema: &DestinationTableSchema,
) -> sqlx::Result<()>
where
    E: PgExecutor<'c>,
{
    let query = format!(
        "create schema if not exists {}",
        quote_identifier(&schema.name.schema)
    );
    sqlx::query(&query).execute(executor).await?;

    Ok(())
}
