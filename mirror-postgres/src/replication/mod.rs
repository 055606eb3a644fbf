use std::time::Duration;

use mirror_config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::quote_identifier;
use sqlx::{PgPool, postgres::PgPoolOptions};

pub mod destination;
pub mod jobs;
pub mod raw_log;

/// Schema on the destination holding the job metadata table and the raw change logs.
pub const INTERNAL_SCHEMA: &str = "_mirror_internal";

/// Duration after which idle store connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a lazily connected pool to the destination database.
///
/// No connection is opened until the first query runs.
pub fn connect_to_destination_database(
    config: &PgConnectionConfig,
    max_connections: u32,
) -> PgPool {
    let options = config.with_db();

    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(max_connections)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(options)
}

/// Returns `"_mirror_internal"."<table>"`.
pub(crate) fn internal_table_identifier(table: &str) -> String {
    format!(
        "{}.{}",
        quote_identifier(INTERNAL_SCHEMA),
        quote_identifier(table)
    )
}
