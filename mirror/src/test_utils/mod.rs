//! Helpers shared by the unit and integration tests of the crate.
//!
//! - [`change`] builds captured changes with controlled capture times.
//! - [`schema`] holds the destination schemas used across tests.
//! - [`source`] is a scripted [`crate::source::ReplicationSource`].
//! - [`sink`] wraps the in-memory topics to inject slow or failing deliveries.
//! - [`heartbeat`] records heartbeats for later inspection.
//! - [`failpoints`] configures failpoints for the lifetime of a guard.
//! - [`database`] creates and drops throwaway Postgres databases.

pub mod change;
#[cfg(feature = "test-utils")]
pub mod database;
pub mod failpoints;
pub mod heartbeat;
pub mod schema;
pub mod sink;
pub mod source;
