//! Change data capture batching and normalization.
//!
//! Captured changes are appended to a per-job raw log under monotonically increasing batch
//! ids by the [`sync::RawLogWriter`]. The [`normalize::Normalizer`] later folds the window of
//! batches between the normalize and sync cursors into primary-key indexed destination
//! tables. Progress of both steps lives in a [`store::metadata::MetadataStore`], so either
//! step can be re-run from its last committed cursor.
//!
//! Destinations without merge semantics are served by the [`sink::FanoutSink`], which
//! delivers batches to topics in parallel. [`source::ensure_pullability`] prepares the
//! publication and replication slot on the source before capture starts.

mod macros;

pub mod error;
pub mod failpoints;
pub mod normalize;
pub mod schema;
pub mod sink;
pub mod source;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
