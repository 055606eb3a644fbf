use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// A required name is empty.
    #[error("`{0}` cannot be empty")]
    EmptyName(String),
    /// A source table is not written as `schema.table`.
    #[error("source table `{0}` must be schema qualified as `schema.table`")]
    UnqualifiedSourceTable(String),
    /// A field holds a value outside of its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
