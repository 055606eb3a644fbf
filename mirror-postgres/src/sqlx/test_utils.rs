use mirror_config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::{quote_identifier, quote_literal};
use sqlx::{Connection, Executor, PgConnection, PgPool};

/// Creates the database named in `config` and returns a pool connected to it.
///
/// # Panics
/// Panics if the server is unreachable or the database cannot be created.
pub async fn create_pg_database(config: &PgConnectionConfig) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!("create database {}", quote_identifier(&config.name)))
        .await
        .expect("Failed to create database");

    PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to the test database")
}

/// Terminates the connections to the database named in `config` and drops it.
///
/// Failures are printed and ignored so that cleanup never fails a test.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let mut connection = match PgConnection::connect_with(&config.without_db()).await {
        Ok(connection) => connection,
        Err(err) => {
            eprintln!("warning: failed to connect to Postgres for cleanup: {err}");
            return;
        }
    };

    let terminate = format!(
        "select pg_terminate_backend(pid) from pg_stat_activity where datname = {} and pid <> pg_backend_pid()",
        quote_literal(&config.name)
    );
    if let Err(err) = connection.execute(&*terminate).await {
        eprintln!(
            "warning: failed to terminate connections to database {}: {err}",
            config.name
        );
    }

    let drop = format!("drop database if exists {}", quote_identifier(&config.name));
    if let Err(err) = connection.execute(&*drop).await {
        eprintln!("warning: failed to drop database {}: {err}", config.name);
    }
}
