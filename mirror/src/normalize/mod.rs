//! Folding raw log windows into destination tables.

pub mod fold;
mod normalizer;
mod plan;
pub mod statement;

pub use normalizer::*;
pub use plan::*;
