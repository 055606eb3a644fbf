use mirror_config::shared::{PgConnectionConfig, TlsConfig};
use mirror_postgres::sqlx::test_utils::{create_pg_database, drop_pg_database};
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::both::PostgresStore;

/// Connection settings of a fresh, uniquely named test database.
///
/// The server is read from `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`,
/// `TESTS_DATABASE_USERNAME` and the optional `TESTS_DATABASE_PASSWORD`.
pub fn test_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        },
    }
}

/// A destination database that is dropped together with this value.
///
/// Dropping blocks on the cleanup, so it must happen inside a multi-threaded runtime.
pub struct TestDestinationDatabase {
    pub config: PgConnectionConfig,
    pub pool: PgPool,
}

impl TestDestinationDatabase {
    pub async fn new() -> Self {
        let config = test_pg_connection_config();
        let pool = create_pg_database(&config).await;

        Self { config, pool }
    }

    pub fn store(&self) -> PostgresStore {
        PostgresStore::from_pool(self.pool.clone())
    }
}

impl Drop for TestDestinationDatabase {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let config = self.config.clone();

        tokio::task::block_in_place(move || {
            tokio::runtime::Handle::current().block_on(async move {
                pool.close().await;
                drop_pg_database(&config).await;
            });
        });
    }
}
