//! Tracing setup for mirror services and tests.

pub mod tracing;

pub use crate::tracing::{TracingError, init_test_tracing, init_tracing};
