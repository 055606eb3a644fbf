//! Postgres building blocks shared by the mirror crates.
//!
//! [`schema`] describes destination tables and [`replication`] owns the SQL of the internal
//! metadata schema and the per-job raw change logs. [`version`] reads the server version
//! that features are gated on.

pub mod replication;
pub mod schema;
#[cfg(feature = "test-utils")]
pub mod sqlx;
pub mod version;
