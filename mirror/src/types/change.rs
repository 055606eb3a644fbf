use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use mirror_postgres::replication::raw_log::RawLogRow;
use mirror_postgres::schema::TableName;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, MirrorError, MirrorResult};
use crate::types::BatchId;

/// Column values of a change, keyed by column name.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Kind of a captured mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Insert,
    Update,
    Delete,
}

impl RecordKind {
    /// Returns the code stored in the raw log.
    pub fn code(&self) -> i16 {
        match self {
            RecordKind::Insert => 0,
            RecordKind::Update => 1,
            RecordKind::Delete => 2,
        }
    }

    pub fn from_code(code: i16) -> MirrorResult<RecordKind> {
        match code {
            0 => Ok(RecordKind::Insert),
            1 => Ok(RecordKind::Update),
            2 => Ok(RecordKind::Delete),
            other => bail!(
                ErrorKind::InvalidData,
                "Unknown record kind in raw log",
                format!("record kind code {other} is not one of 0, 1 or 2")
            ),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Insert => write!(f, "insert"),
            RecordKind::Update => write!(f, "update"),
            RecordKind::Delete => write!(f, "delete"),
        }
    }
}

/// A captured mutation handed to the raw log writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub destination_table: TableName,
    pub kind: RecordKind,
    /// New column values. For deletes, at least the primary key of the removed row.
    pub payload: Payload,
    /// Key values before the change, for updates and deletes.
    pub match_payload: Option<Payload>,
    /// Wide columns whose value did not change and which are missing from `payload`.
    pub unchanged_wide_columns: BTreeSet<String>,
    pub captured_at: DateTime<Utc>,
}

impl Change {
    pub fn new(destination_table: TableName, kind: RecordKind, payload: Payload) -> Change {
        Self {
            destination_table,
            kind,
            payload,
            match_payload: None,
            unchanged_wide_columns: BTreeSet::new(),
            captured_at: Utc::now(),
        }
    }

    pub fn insert(destination_table: TableName, payload: Payload) -> Change {
        Change::new(destination_table, RecordKind::Insert, payload)
    }

    pub fn update(destination_table: TableName, payload: Payload) -> Change {
        Change::new(destination_table, RecordKind::Update, payload)
    }

    pub fn delete(destination_table: TableName, payload: Payload) -> Change {
        Change::new(destination_table, RecordKind::Delete, payload)
    }

    pub fn with_match_payload(mut self, match_payload: Payload) -> Change {
        self.match_payload = Some(match_payload);
        self
    }

    pub fn with_unchanged_wide_columns<I, S>(mut self, columns: I) -> Change
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unchanged_wide_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn captured_at(mut self, captured_at: DateTime<Utc>) -> Change {
        self.captured_at = captured_at;
        self
    }
}

/// A change as stored in the raw log of a job.
///
/// Records are immutable once written and only removed when the job is torn down.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChangeRecord {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub destination_table: TableName,
    pub kind: RecordKind,
    pub payload: Payload,
    pub match_payload: Option<Payload>,
    pub batch_id: BatchId,
    pub unchanged_wide_columns: BTreeSet<String>,
}

impl RawChangeRecord {
    /// Assigns a fresh id and `batch_id` to `change`.
    pub fn from_change(change: Change, batch_id: BatchId) -> RawChangeRecord {
        Self {
            id: Uuid::new_v4(),
            captured_at: change.captured_at,
            destination_table: change.destination_table,
            kind: change.kind,
            payload: change.payload,
            match_payload: change.match_payload,
            batch_id,
            unchanged_wide_columns: change.unchanged_wide_columns,
        }
    }

    /// Returns the value of `column`, looking at the payload first and the match payload
    /// second.
    pub fn key_value(&self, column: &str) -> Option<&serde_json::Value> {
        self.payload
            .get(column)
            .filter(|value| !value.is_null())
            .or_else(|| {
                self.match_payload
                    .as_ref()
                    .and_then(|match_payload| match_payload.get(column))
            })
    }

    /// Ordering key of records touching the same primary key. The greatest one wins.
    pub fn rank_key(&self) -> (DateTime<Utc>, BatchId, Uuid) {
        (self.captured_at, self.batch_id, self.id)
    }

    pub fn to_row(&self) -> MirrorResult<RawLogRow> {
        let Some(captured_at) = self.captured_at.timestamp_nanos_opt() else {
            bail!(
                ErrorKind::InvalidData,
                "Capture timestamp is out of range",
                format!("capture time {} cannot be stored in nanoseconds", self.captured_at)
            );
        };

        Ok(RawLogRow {
            id: self.id,
            captured_at,
            destination_table: self.destination_table.to_string(),
            kind: self.kind.code(),
            payload: serde_json::Value::Object(self.payload.clone()),
            match_payload: self.match_payload.clone().map(serde_json::Value::Object),
            batch_id: self.batch_id,
            unchanged_wide_columns: self.unchanged_wide_columns.iter().cloned().collect(),
        })
    }
}

impl TryFrom<RawLogRow> for RawChangeRecord {
    type Error = MirrorError;

    fn try_from(row: RawLogRow) -> Result<Self, Self::Error> {
        let payload = into_payload(row.payload, "payload")?;
        let match_payload = row
            .match_payload
            .map(|value| into_payload(value, "match_payload"))
            .transpose()?;

        Ok(Self {
            id: row.id,
            captured_at: DateTime::from_timestamp_nanos(row.captured_at),
            destination_table: TableName::parse(&row.destination_table)?,
            kind: RecordKind::from_code(row.kind)?,
            payload,
            match_payload,
            batch_id: row.batch_id,
            unchanged_wide_columns: row.unchanged_wide_columns.into_iter().collect(),
        })
    }
}

fn into_payload(value: serde_json::Value, column: &str) -> MirrorResult<Payload> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(Payload::new()),
        other => bail!(
            ErrorKind::InvalidData,
            "Raw log payload is not a JSON object",
            format!("column `{column}` holds {other}")
        ),
    }
}
