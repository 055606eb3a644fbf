use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions as SqlxConnectOptions, PgSslMode as SqlxSslMode};
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Session settings applied to every connection so that values are rendered the same way
/// regardless of server defaults.
const SESSION_SETTINGS: &[(&str, &str)] = &[
    ("datestyle", "ISO"),
    ("intervalstyle", "postgres"),
    ("extra_float_digits", "3"),
    ("client_encoding", "UTF8"),
];

/// Application name reported to Postgres by mirror connections.
pub const MIRROR_APPLICATION_NAME: &str = "mirror";

/// Renders [`SESSION_SETTINGS`] as a tokio-postgres `options` string.
pub fn session_options_string() -> String {
    SESSION_SETTINGS
        .iter()
        .map(|(key, value)| format!("-c {key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Connection parameters of a Postgres database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Database name.
    pub name: String,
    pub username: String,
    /// Redacted in debug output.
    pub password: Option<SerializableSecretString>,
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::EmptyName("host".to_owned()));
        }
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName("name".to_owned()));
        }

        self.tls.validate()
    }
}

/// TLS settings of a Postgres connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    pub trusted_root_certs: String,
    pub enabled: bool,
}

impl TlsConfig {
    /// Fails with [`ValidationError::MissingTrustedRootCerts`] when TLS is enabled without
    /// any root certificate.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Conversion of [`PgConnectionConfig`] into the connect options of a specific driver.
///
/// sqlx is used for the metadata and raw log stores, tokio-postgres for the source client,
/// so both get an implementation.
pub trait IntoConnectOptions<Output> {
    /// Options for the server without selecting a database, used to create or drop databases.
    fn without_db(&self) -> Output;

    /// Options for the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<SqlxConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> SqlxConnectOptions {
        let ssl_mode = match self.tls.enabled {
            true => SqlxSslMode::VerifyFull,
            false => SqlxSslMode::Prefer,
        };
        let settings = SESSION_SETTINGS
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()));

        let options = SqlxConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .application_name(MIRROR_APPLICATION_NAME)
            .ssl_mode(ssl_mode)
            .ssl_root_cert_from_pem(self.tls.trusted_root_certs.clone().into_bytes())
            .options(settings);

        match &self.password {
            Some(password) => options.password(password.expose_secret()),
            None => options,
        }
    }

    fn with_db(&self) -> SqlxConnectOptions {
        let options: SqlxConnectOptions = self.without_db();
        options.database(&self.name)
    }
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> TokioPgConnectOptions {
        let ssl_mode = match self.tls.enabled {
            true => TokioPgSslMode::VerifyFull,
            false => TokioPgSslMode::Prefer,
        };

        let mut config = TokioPgConnectOptions::new();
        // Certificates are handed to rustls when connecting, only the mode is set here.
        config
            .host(self.host.clone())
            .port(self.port)
            .user(self.username.clone())
            .application_name(MIRROR_APPLICATION_NAME)
            .options(session_options_string())
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        config
    }

    fn with_db(&self) -> TokioPgConnectOptions {
        let mut config: TokioPgConnectOptions = self.without_db();
        config.dbname(self.name.clone());
        config
    }
}
