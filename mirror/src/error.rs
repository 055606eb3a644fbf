//! Error type shared by every mirror component.
//!
//! [`MirrorError`] carries an [`ErrorKind`], a static description, optional dynamic detail,
//! an optional source, the callsite [`Location`] and a captured [`Backtrace`]. Several errors
//! can be aggregated into one, which is how concurrent deliveries and cache teardown report
//! all of their failures.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use mirror_config::load::LoadConfigError;
use mirror_config::shared::ValidationError;
use mirror_postgres::schema::SchemaError;

/// Result type of mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Error returned by mirror operations.
///
/// Use [`MirrorError::kind`] to branch on the failure category and
/// [`MirrorError::is_retryable`] to decide whether the failed step can be re-run.
#[derive(Debug, Clone)]
pub struct MirrorError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    Many {
        errors: Vec<MirrorError>,
        location: &'static Location<'static>,
    },
}

/// Failure categories.
///
/// Kinds fall in four families: configuration problems that no retry can fix, transient
/// store or source failures after which the whole step can be re-run, a normalize request
/// for a job that never synced, and fan-out delivery failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration
    ConfigError,
    InvalidTableIdentifier,
    MissingPrimaryKey,
    MissingTableSchema,

    // Transient store and source failures
    StoreConnectionFailed,
    StoreQueryFailed,
    StoreLockTimeout,
    StoreIoError,
    SourceConnectionFailed,
    SourceQueryFailed,

    // Job lifecycle
    JobNotFound,

    // Fan-out delivery
    SinkConnectionFailed,
    SinkDeliveryFailed,
    SinkTimeout,

    // Data and state
    InvalidData,
    InvalidState,
    SerializationError,
    DeserializationError,
    EncryptionError,

    Unknown,

    #[cfg(feature = "failpoints")]
    InjectedFailure,
}

impl ErrorKind {
    /// Returns whether a step failing with this kind can be re-run as a whole.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::StoreConnectionFailed
            | ErrorKind::StoreQueryFailed
            | ErrorKind::StoreLockTimeout
            | ErrorKind::StoreIoError
            | ErrorKind::SourceConnectionFailed
            | ErrorKind::SourceQueryFailed
            | ErrorKind::SinkConnectionFailed
            | ErrorKind::SinkDeliveryFailed
            | ErrorKind::SinkTimeout => true,
            #[cfg(feature = "failpoints")]
            ErrorKind::InjectedFailure => true,
            _ => false,
        }
    }
}

impl MirrorError {
    /// Returns the kind of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.kind,
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every kind contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match &self.repr {
            ErrorRepr::Single(payload) => vec![payload.kind],
            ErrorRepr::Many { errors, .. } => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the dynamic detail, or the first one found among aggregated errors.
    pub fn detail(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.detail.as_deref(),
            ErrorRepr::Many { errors, .. } => errors.iter().find_map(|err| err.detail()),
        }
    }

    /// Returns the static description of a single error.
    pub fn description(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::Single(payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the backtrace captured when a single error was created.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match &self.repr {
            ErrorRepr::Single(payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns where the error was created.
    pub fn location(&self) -> &'static Location<'static> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns whether the failed step can be re-run.
    ///
    /// An aggregate is retryable only when every error it holds is.
    pub fn is_retryable(&self) -> bool {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.kind.is_retryable(),
            ErrorRepr::Many { errors, .. } => {
                !errors.is_empty() && errors.iter().all(|err| err.is_retryable())
            }
        }
    }

    /// Attaches the error that caused this one. Ignored on aggregates.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(payload) = &mut self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn single(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        MirrorError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    #[track_caller]
    fn from_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        MirrorError::single(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for MirrorError {
    fn eq(&self, other: &MirrorError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail:", detail)?;
                }

                if payload.backtrace.status() == BacktraceStatus::Captured {
                    write_indented(f, "Backtrace:", &payload.backtrace.to_string())?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} errors @ {}:{}",
                    errors.len(),
                    location.file(),
                    location.line()
                )?;

                for (index, err) in errors.iter().enumerate() {
                    let rendered = err.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|err| err as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes `body` under `heading`, indenting every line.
fn write_indented(f: &mut fmt::Formatter<'_>, heading: &str, body: &str) -> fmt::Result {
    write!(f, "\n  {heading}")?;
    if body.trim().is_empty() {
        return write!(f, " <empty>");
    }
    for line in body.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for MirrorError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> MirrorError {
        MirrorError::single(kind, Cow::Borrowed(description), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for MirrorError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, D)) -> MirrorError {
        MirrorError::single(kind, Cow::Borrowed(description), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned as is.
impl<E> From<Vec<E>> for MirrorError
where
    E: Into<MirrorError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> MirrorError {
        let location = Location::caller();
        let mut errors: Vec<MirrorError> = errors.into_iter().map(Into::into).collect();

        match errors.pop() {
            Some(err) if errors.is_empty() => err,
            Some(last) => {
                errors.push(last);
                MirrorError {
                    repr: ErrorRepr::Many { errors, location },
                }
            }
            None => MirrorError {
                repr: ErrorRepr::Many { errors, location },
            },
        }
    }
}

impl From<std::io::Error> for MirrorError {
    #[track_caller]
    fn from(err: std::io::Error) -> MirrorError {
        MirrorError::from_source(ErrorKind::StoreIoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for MirrorError {
    #[track_caller]
    fn from(err: serde_json::Error) -> MirrorError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::StoreIoError, "JSON I/O failed"),
            _ if err.is_data() || err.is_syntax() || err.is_eof() => {
                (ErrorKind::DeserializationError, "JSON decoding failed")
            }
            _ => (ErrorKind::SerializationError, "JSON encoding failed"),
        };

        MirrorError::from_source(kind, description, err)
    }
}

/// Maps sqlx failures, which only come from the metadata, raw log and destination store.
impl From<sqlx::Error> for MirrorError {
    #[track_caller]
    fn from(err: sqlx::Error) -> MirrorError {
        let kind = match &err {
            sqlx::Error::Io(_) => ErrorKind::StoreIoError,
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_) => {
                ErrorKind::StoreConnectionFailed
            }
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // lock_not_available, deadlock_detected, serialization_failure
                Some("55P03") | Some("40P01") | Some("40001") => ErrorKind::StoreLockTimeout,
                Some(code) if code.starts_with("08") => ErrorKind::StoreConnectionFailed,
                _ => ErrorKind::StoreQueryFailed,
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                ErrorKind::DeserializationError
            }
            _ => ErrorKind::StoreQueryFailed,
        };

        MirrorError::from_source(kind, "Store operation failed", err)
    }
}

/// Maps tokio-postgres failures, which only come from the source database client.
impl From<tokio_postgres::Error> for MirrorError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> MirrorError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            None => (ErrorKind::SourceConnectionFailed, "Source connection failed"),
            Some(code) => match *code {
                SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                    ErrorKind::ConfigError,
                    "Source authentication failed",
                ),
                SqlState::UNDEFINED_TABLE | SqlState::UNDEFINED_SCHEMA => (
                    ErrorKind::InvalidTableIdentifier,
                    "Source table or schema does not exist",
                ),
                SqlState::INSUFFICIENT_PRIVILEGE => {
                    (ErrorKind::ConfigError, "Source permissions are missing")
                }
                SqlState::TOO_MANY_CONNECTIONS
                | SqlState::ADMIN_SHUTDOWN
                | SqlState::CRASH_SHUTDOWN
                | SqlState::CANNOT_CONNECT_NOW => (
                    ErrorKind::SourceConnectionFailed,
                    "Source database is unavailable",
                ),
                _ if code.code().starts_with("08") => {
                    (ErrorKind::SourceConnectionFailed, "Source connection failed")
                }
                _ => (ErrorKind::SourceQueryFailed, "Source query failed"),
            },
        };

        MirrorError::from_source(kind, description, err)
    }
}

impl From<rustls::Error> for MirrorError {
    #[track_caller]
    fn from(err: rustls::Error) -> MirrorError {
        MirrorError::from_source(ErrorKind::EncryptionError, "TLS setup failed", err)
    }
}

impl From<uuid::Error> for MirrorError {
    #[track_caller]
    fn from(err: uuid::Error) -> MirrorError {
        MirrorError::from_source(ErrorKind::InvalidData, "UUID parsing failed", err)
    }
}

impl From<SchemaError> for MirrorError {
    #[track_caller]
    fn from(err: SchemaError) -> MirrorError {
        let (kind, description) = match &err {
            SchemaError::InvalidTableName(_) => {
                (ErrorKind::InvalidTableIdentifier, "Table identifier is invalid")
            }
            SchemaError::UnknownPrimaryKey { .. } => (
                ErrorKind::MissingPrimaryKey,
                "Primary key is not a column of the table",
            ),
            SchemaError::DuplicateColumn { .. } => {
                (ErrorKind::ConfigError, "Table schema has duplicate columns")
            }
        };

        MirrorError::from_source(kind, description, err)
    }
}

impl From<ValidationError> for MirrorError {
    #[track_caller]
    fn from(err: ValidationError) -> MirrorError {
        let kind = match &err {
            ValidationError::UnqualifiedSourceTable(_) => ErrorKind::InvalidTableIdentifier,
            _ => ErrorKind::ConfigError,
        };

        MirrorError::from_source(kind, "Configuration is invalid", err)
    }
}

impl From<LoadConfigError> for MirrorError {
    #[track_caller]
    fn from(err: LoadConfigError) -> MirrorError {
        MirrorError::from_source(ErrorKind::ConfigError, "Configuration could not be loaded", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror_error;

    #[test]
    fn aggregate_of_one_is_the_error_itself() {
        let err = MirrorError::from(vec![mirror_error!(
            ErrorKind::SinkTimeout,
            "Delivery timed out"
        )]);

        assert_eq!(err.kind(), ErrorKind::SinkTimeout);
        assert_eq!(err.description(), Some("Delivery timed out"));
    }

    #[test]
    fn aggregate_reports_all_kinds_in_order() {
        let err = MirrorError::from(vec![
            mirror_error!(ErrorKind::SinkDeliveryFailed, "Delivery failed", "topic a"),
            mirror_error!(ErrorKind::SinkConnectionFailed, "Connection failed"),
        ]);

        assert_eq!(
            err.kinds(),
            vec![ErrorKind::SinkDeliveryFailed, ErrorKind::SinkConnectionFailed]
        );
        assert_eq!(err.kind(), ErrorKind::SinkDeliveryFailed);
        assert_eq!(err.detail(), Some("topic a"));
        assert!(err.to_string().starts_with("[Many] 2 errors"));
    }

    #[test]
    fn retryability_follows_taxonomy() {
        assert!(mirror_error!(ErrorKind::StoreLockTimeout, "Lock").is_retryable());
        assert!(!mirror_error!(ErrorKind::MissingPrimaryKey, "No pk").is_retryable());
        assert!(!mirror_error!(ErrorKind::JobNotFound, "No job").is_retryable());

        let mixed = MirrorError::from(vec![
            mirror_error!(ErrorKind::StoreQueryFailed, "Query"),
            mirror_error!(ErrorKind::ConfigError, "Config"),
        ]);
        assert!(!mixed.is_retryable());
    }

    #[test]
    fn schema_errors_map_to_config_family() {
        let err: MirrorError = SchemaError::InvalidTableName("users".to_owned()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidTableIdentifier);
        assert!(!err.is_retryable());
        assert!(error::Error::source(&err).is_some());
    }

    #[test]
    fn display_includes_detail() {
        let err = mirror_error!(ErrorKind::JobNotFound, "Job not found", "job `j1`");
        let rendered = err.to_string();

        assert!(rendered.starts_with("[JobNotFound] Job not found @ "));
        assert!(rendered.contains("Detail:\n    job `j1`"));
    }
}
