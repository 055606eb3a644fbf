use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{Change, Payload, TableName};

/// Converts a JSON object literal into a [`Payload`].
///
/// # Panics
/// Panics if `value` is not an object.
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Returns a capture time `seconds` after a fixed epoch, so tests control ordering.
pub fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + seconds, 0).expect("capture time is in range")
}

pub fn insert_at(table: &TableName, seconds: i64, value: Value) -> Change {
    Change::insert(table.clone(), payload(value)).captured_at(at(seconds))
}

pub fn update_at(table: &TableName, seconds: i64, value: Value) -> Change {
    Change::update(table.clone(), payload(value)).captured_at(at(seconds))
}

/// An update leaving `unchanged` wide columns out of its payload.
pub fn partial_update_at(
    table: &TableName,
    seconds: i64,
    value: Value,
    unchanged: &[&str],
) -> Change {
    update_at(table, seconds, value).with_unchanged_wide_columns(unchanged.iter().copied())
}

/// A delete whose key is only known through its match payload.
pub fn delete_at(table: &TableName, seconds: i64, key: Value) -> Change {
    Change::delete(table.clone(), Payload::new())
        .with_match_payload(payload(key))
        .captured_at(at(seconds))
}
