//! In-process rank and merge.
//!
//! This is the same fold the Postgres `merge` statement performs, for stores that can't
//! express it server side: pick the highest ranked row per primary key, then apply the
//! winners in primary key order.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::normalize::MergePlan;
use crate::types::{Payload, RawChangeRecord, RecordKind};

/// Rows of a destination table keyed by the text form of their primary key.
pub type TableRows = BTreeMap<String, Payload>;

/// Renders a key value so that keys equal after the cast to the key column type render the
/// same: strings lose their quotes and integral floats like `1.0` render as `1`.
pub fn key_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) if number.is_f64() => match number.as_f64() {
            Some(float) if float.fract() == 0.0 && float.abs() < i64::MAX as f64 => {
                (float as i64).to_string()
            }
            _ => number.to_string(),
        },
        other => other.to_string(),
    }
}

/// Returns the highest ranked record per primary key among `records`.
///
/// Records are ranked by capture time, then batch id, then record id, so exactly one record
/// wins per key. Fails with [`ErrorKind::InvalidData`] when a record carries no value for the
/// primary key.
pub fn rank_window<'a, I>(
    records: I,
    primary_key: &str,
) -> MirrorResult<BTreeMap<String, &'a RawChangeRecord>>
where
    I: IntoIterator<Item = &'a RawChangeRecord>,
{
    let mut winners: BTreeMap<String, &'a RawChangeRecord> = BTreeMap::new();

    for record in records {
        let Some(key) = record.key_value(primary_key).filter(|value| !value.is_null()) else {
            bail!(
                ErrorKind::InvalidData,
                "Raw record has no primary key value",
                format!(
                    "record {} for table {} has no value for `{primary_key}`",
                    record.id, record.destination_table
                )
            );
        };

        let key = key_text(key);
        let outranks = winners
            .get(&key)
            .is_none_or(|current| current.rank_key() < record.rank_key());
        if outranks {
            winners.insert(key, record);
        }
    }

    Ok(winners)
}

/// Applies the winners of [`rank_window`] to `rows` in primary key order and returns how
/// many rows were inserted, updated or deleted.
pub fn apply_winners(
    rows: &mut TableRows,
    winners: &BTreeMap<String, &RawChangeRecord>,
    plan: &MergePlan,
) -> u64 {
    let primary_key = plan.schema.primary_key();
    let mut affected = 0;

    for (key, record) in winners {
        match record.kind {
            RecordKind::Delete => {
                if rows.remove(key).is_some() {
                    affected += 1;
                }
            }
            RecordKind::Insert | RecordKind::Update => match rows.get_mut(key) {
                Some(row) => {
                    let mut updated = false;
                    for column in plan.updated_columns(&record.unchanged_wide_columns) {
                        let value = record.payload.get(column).cloned().unwrap_or(Value::Null);
                        row.insert(column.to_owned(), value);
                        updated = true;
                    }
                    if updated {
                        affected += 1;
                    }
                }
                None => {
                    let row = plan
                        .schema
                        .column_names()
                        .map(|column| {
                            let value = if column == primary_key {
                                record.key_value(column).cloned()
                            } else {
                                record.payload.get(column).cloned()
                            };
                            (column.to_owned(), value.unwrap_or(Value::Null))
                        })
                        .collect();
                    rows.insert(key.clone(), row);
                    affected += 1;
                }
            },
        }
    }

    affected
}
