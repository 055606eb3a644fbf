//! Generation of the Postgres `merge` statement folding a window into one table.
//!
//! The statement binds `$1` to the exclusive lower batch id, `$2` to the inclusive upper
//! batch id and `$3` to the destination table name as stored in the raw log.

use std::collections::BTreeSet;

use pg_escape::{quote_identifier, quote_literal};

use crate::normalize::MergePlan;
use crate::schema::{ColumnSchema, ColumnType};
use crate::types::RecordKind;

const KIND_COLUMN: &str = "_mirror_kind";
const UNCHANGED_COLUMN: &str = "_mirror_unchanged";
const RANK_COLUMN: &str = "_mirror_rank";

/// Builds the `merge` statement of `plan` reading from the raw table `raw_table`, which
/// must already be a quoted identifier.
///
/// The newest row per primary key is selected with `row_number()` ordered by capture time,
/// batch id and record id, all descending. The matched branch then has one delete clause
/// followed by one update clause per distinct unchanged column set of the plan.
pub fn build_merge_statement(plan: &MergePlan, raw_table: &str) -> String {
    let schema = &plan.schema;
    let primary_key = quote_identifier(schema.primary_key());
    let key_column = schema.primary_key_column();
    let delete_code = RecordKind::Delete.code();

    let source_columns = schema
        .columns
        .iter()
        .map(|column| {
            let expression = if column.name == schema.primary_key() {
                key_value(key_column, "ranked.")
            } else {
                extract_payload_value(column)
            };
            format!("{expression} as {}", quote_identifier(&column.name))
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut clauses = vec![format!(
        "when matched and src.{KIND_COLUMN} = {delete_code} then delete"
    )];
    for unchanged in &plan.unchanged_sets {
        let assignments = plan
            .updated_columns(unchanged)
            .map(|column| {
                let column = quote_identifier(column);
                format!("{column} = src.{column}")
            })
            .collect::<Vec<_>>();

        // Nothing to write when every non key column is unchanged.
        if assignments.is_empty() {
            continue;
        }

        clauses.push(format!(
            "when matched and src.{UNCHANGED_COLUMN} = {} then update set {}",
            text_array_literal(unchanged),
            assignments.join(", ")
        ));
    }

    let all_columns = schema
        .column_names()
        .map(|column| quote_identifier(column).to_string())
        .collect::<Vec<_>>();
    let insert_values = all_columns
        .iter()
        .map(|column| format!("src.{column}"))
        .collect::<Vec<_>>();
    clauses.push(format!(
        "when not matched and src.{KIND_COLUMN} <> {delete_code} then insert ({}) values ({})",
        all_columns.join(", "),
        insert_values.join(", ")
    ));

    format!(
        r#"merge into {destination} as dst
using (
    select {source_columns}, ranked.kind as {KIND_COLUMN}, ranked.unchanged_wide_columns as {UNCHANGED_COLUMN}
    from (
        select payload, match_payload, kind, unchanged_wide_columns,
            row_number() over (
                partition by {partition_key}
                order by captured_at desc, batch_id desc, id desc
            ) as {RANK_COLUMN}
        from {raw_table}
        where batch_id > $1 and batch_id <= $2 and destination_table = $3
    ) as ranked
    where ranked.{RANK_COLUMN} = 1
) as src
on dst.{primary_key} = src.{primary_key}
{clauses}"#,
        destination = schema.name.as_quoted_identifier(),
        partition_key = key_value(key_column, ""),
        clauses = clauses.join("\n"),
    )
}

/// Returns the primary key of a raw row cast to the key column type, read from the payload
/// or, for deletes, from the match payload. `qualifier` prefixes the raw columns.
///
/// Rows are partitioned by this typed value, so keys spelled differently in JSON but equal
/// in the column type, such as `1` and `1.0`, rank together.
fn key_value(key_column: &ColumnSchema, qualifier: &str) -> String {
    let key = quote_literal(&key_column.name);
    cast_text(
        &format!("coalesce({qualifier}payload->>{key}, {qualifier}match_payload->>{key})"),
        key_column,
    )
}

/// Returns the expression reading `column` from the ranked payload.
///
/// JSON columns keep the JSON value, `bytea` values are expected as base64 text and every
/// other type is cast from its text form.
fn extract_payload_value(column: &ColumnSchema) -> String {
    let key = quote_literal(&column.name);
    match column.typ {
        ColumnType::Json | ColumnType::Jsonb => {
            format!("(ranked.payload->{key})::{}", column.typ.as_pg_type())
        }
        ColumnType::Bytea => format!("decode(ranked.payload->>{key}, 'base64')"),
        _ => cast_text(&format!("ranked.payload->>{key}"), column),
    }
}

fn cast_text(expression: &str, column: &ColumnSchema) -> String {
    match column.typ {
        ColumnType::Text => format!("({expression})"),
        ColumnType::Bytea => format!("decode({expression}, 'base64')"),
        _ => format!("({expression})::{}", column.typ.as_pg_type()),
    }
}

fn text_array_literal(values: &BTreeSet<String>) -> String {
    if values.is_empty() {
        return "'{}'::text[]".to_owned();
    }

    let elements = values
        .iter()
        .map(|value| quote_literal(value).to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("array[{elements}]::text[]")
}
