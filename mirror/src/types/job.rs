use std::fmt;

use mirror_postgres::replication::jobs::MirrorJobRow;
use mirror_postgres::schema::TableName;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::types::RawChangeRecord;

/// Monotonic identifier of a committed raw log batch. Zero means no batch yet.
pub type BatchId = i64;

/// Opaque source position, such as a log sequence number.
pub type SourceOffset = i64;

/// Progress of a mirror job.
///
/// `normalize_batch_id <= sync_batch_id` holds for every stored job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCursors {
    pub source_offset: SourceOffset,
    pub sync_batch_id: BatchId,
    pub normalize_batch_id: BatchId,
}

impl JobCursors {
    /// Returns the window of synced batches that still need normalizing, if any.
    pub fn pending_window(&self) -> MirrorResult<Option<BatchWindow>> {
        if self.normalize_batch_id == self.sync_batch_id {
            return Ok(None);
        }

        BatchWindow::new(self.normalize_batch_id, self.sync_batch_id).map(Some)
    }

    /// Checks that the normalize cursor may move to `normalize_batch_id`.
    ///
    /// The cursor only moves forward and never past the sync cursor.
    pub fn ensure_normalize_reachable(
        &self,
        job_name: &str,
        normalize_batch_id: BatchId,
    ) -> MirrorResult<()> {
        if normalize_batch_id > self.sync_batch_id {
            bail!(
                ErrorKind::InvalidState,
                "Normalize cursor cannot pass the sync cursor",
                format!(
                    "job `{job_name}` synced up to batch {} but normalize batch {normalize_batch_id} was requested",
                    self.sync_batch_id
                )
            );
        }

        if normalize_batch_id < self.normalize_batch_id {
            bail!(
                ErrorKind::InvalidState,
                "Normalize cursor cannot move backwards",
                format!(
                    "job `{job_name}` is normalized up to batch {} but normalize batch {normalize_batch_id} was requested",
                    self.normalize_batch_id
                )
            );
        }

        Ok(())
    }

    /// Checks that `window` is the pending window: it starts at the normalize cursor and ends
    /// within the synced batches.
    pub fn ensure_window_pending(&self, job_name: &str, window: BatchWindow) -> MirrorResult<()> {
        if window.after() != self.normalize_batch_id {
            bail!(
                ErrorKind::InvalidState,
                "Window does not start at the normalize cursor",
                format!(
                    "job `{job_name}` is normalized up to batch {} but window {window} was merged",
                    self.normalize_batch_id
                )
            );
        }

        self.ensure_normalize_reachable(job_name, window.up_to())
    }
}

impl From<MirrorJobRow> for JobCursors {
    fn from(row: MirrorJobRow) -> Self {
        Self {
            source_offset: row.source_offset,
            sync_batch_id: row.sync_batch_id,
            normalize_batch_id: row.normalize_batch_id,
        }
    }
}

/// The half-open batch interval `(after, up_to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    after: BatchId,
    up_to: BatchId,
}

impl BatchWindow {
    /// Fails with [`ErrorKind::InvalidState`] when `after > up_to`, which means the normalize
    /// cursor overtook the sync cursor.
    pub fn new(after: BatchId, up_to: BatchId) -> MirrorResult<BatchWindow> {
        if after > up_to {
            bail!(
                ErrorKind::InvalidState,
                "Normalize cursor is ahead of the sync cursor",
                format!("normalize batch id {after} is greater than sync batch id {up_to}")
            );
        }

        Ok(Self { after, up_to })
    }

    /// Exclusive lower bound.
    pub fn after(&self) -> BatchId {
        self.after
    }

    /// Inclusive upper bound.
    pub fn up_to(&self) -> BatchId {
        self.up_to
    }

    pub fn contains(&self, batch_id: BatchId) -> bool {
        batch_id > self.after && batch_id <= self.up_to
    }

    pub fn is_empty(&self) -> bool {
        self.after == self.up_to
    }
}

impl fmt::Display for BatchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.after, self.up_to)
    }
}

/// Rows of one raw log append, together with the cursor values it commits.
#[derive(Debug, Clone)]
pub struct SyncCommit {
    pub source_offset: SourceOffset,
    /// Must be exactly one more than the stored sync batch id.
    pub batch_id: BatchId,
    pub records: Vec<RawChangeRecord>,
}

/// Result of a sync call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The records were appended under `batch_id`.
    Committed { batch_id: BatchId, records: usize },
    /// Nothing was handed in, cursors are unchanged.
    Empty,
    /// The offset was already covered by a committed batch, cursors are unchanged.
    StaleOffset {
        stored_offset: SourceOffset,
        offered_offset: SourceOffset,
    },
}

/// Result of a normalize call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// The normalize cursor already matched the sync cursor.
    UpToDate { batch_id: BatchId },
    /// The window was merged and the normalize cursor moved to its upper bound.
    Applied {
        window: BatchWindow,
        tables: Vec<TableName>,
        rows_affected: u64,
    },
}
