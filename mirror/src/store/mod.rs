//! Storage of job cursors, raw change logs and destination tables.
//!
//! The three concerns are split into traits so that components only ask for what they use.
//! [`both`] holds implementations covering all of them at once.

pub mod both;
pub mod merge;
pub mod metadata;
pub mod raw_log;
