//! Source-side preparation of a mirror job.

mod client;
mod preconditions;

pub use client::*;
pub use preconditions::*;
