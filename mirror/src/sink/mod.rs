//! Append-only delivery of change events to named topics.

mod base;
mod cache;
mod fanout;
pub mod memory;

pub use base::*;
pub use cache::*;
pub use fanout::*;
