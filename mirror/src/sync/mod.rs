//! Appending captured changes to the raw log.

mod heartbeat;
mod writer;

pub use heartbeat::*;
pub use writer::*;
