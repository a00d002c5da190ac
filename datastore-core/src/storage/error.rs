//! Storage and configuration errors.

use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result alias for backend resolution.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A failure of the storage medium.
///
/// A missing key is never an error: `get` returns `None` and `has` returns
/// `false`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Key is empty or longer than the key column allows
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// What is wrong with the key
        reason: String,
    },

    /// Medium unreachable, pool exhausted or closed
    #[error("connection error: {0}")]
    Connection(String),

    /// Read statement failed
    #[error("read error: {0}")]
    Read(String),

    /// Write statement failed
    #[error("write error: {0}")]
    Write(String),

    /// Value could not be converted to or from JSON
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Anything else (schema creation, unexpected driver state)
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Invalid key.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Connection failure.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Read failure.
    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    /// Write failure.
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    /// Internal failure.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify a driver error.
    ///
    /// Pool and transport failures are connection errors regardless of the
    /// statement; everything else is attributed to the statement via
    /// `fallback`.
    pub(crate) fn from_sqlx(
        context: &str,
        err: sqlx::Error,
        fallback: fn(String) -> Self,
    ) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Connection(format!("{context}: {err}")),
            other => fallback(format!("{context}: {other}")),
        }
    }

    /// Whether the failure is on the connection path rather than a statement.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Malformed or missing backend configuration.
///
/// Raised while resolving a backend, before any I/O happens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Relational backend requested without connection parameters
    #[error("PostgreSQL configuration is required for PostgreSQL backend")]
    MissingPostgresConfig,

    /// Backend selector not recognised
    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),

    /// A configuration field has an unusable value
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// An environment variable could not be parsed
    #[error("invalid environment variable {var}: {reason}")]
    Env {
        /// Variable name
        var: String,
        /// Parse failure
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_connection_errors() {
        let err = StorageError::from_sqlx("get", sqlx::Error::PoolTimedOut, StorageError::Read);
        assert!(err.is_connection());

        let err = StorageError::from_sqlx("set", sqlx::Error::PoolClosed, StorageError::Write);
        assert!(err.is_connection());
    }

    #[test]
    fn test_statement_errors_use_fallback() {
        let err = StorageError::from_sqlx("get", sqlx::Error::RowNotFound, StorageError::Read);
        assert!(matches!(err, StorageError::Read(msg) if msg.starts_with("get: ")));
    }

    #[test]
    fn test_serde_error_is_serialization() {
        let err: StorageError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn test_missing_config_message() {
        assert_eq!(
            ConfigError::MissingPostgresConfig.to_string(),
            "PostgreSQL configuration is required for PostgreSQL backend"
        );
        assert_eq!(
            ConfigError::UnknownBackend("bogus".into()).to_string(),
            "unknown storage backend: bogus"
        );
    }
}
