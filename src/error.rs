//! Error types for scoped MySQL sessions.
//!
//! `SessionError` covers everything a session, cursor or provider can report.
//! Driver failures are carried unchanged inside `SessionError::Database` so the
//! classification helpers in [`crate::db::classify`] can still inspect them.
//! `ConfigError` is reserved for configuration validation, which stops startup.

use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// A cursor-bearing operation was attempted while a previous cursor is still open.
    #[error("rows were not closed on active connection (opened on {origin})")]
    RowsNotClosed { origin: String },

    /// Commit, rollback or partial commit without an open transaction.
    /// Callers that do not track transaction state may ignore it.
    #[error("no active transaction is present")]
    NoActiveTransaction,

    #[error("transaction has already started")]
    TransactionAlreadyStarted,

    #[error("mysql did not shut down cleanly within {budget_ms}ms")]
    ShutdownIncomplete { budget_ms: u64 },

    #[error("request scope was cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The task streaming a cursor inside a transaction ended without handing
    /// the transaction back to its session.
    #[error("transaction was lost: {message}")]
    TransactionLost { message: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Database(Arc<sqlx::Error>),
}

impl SessionError {
    /// Create a rows-not-closed error for a cursor opened at `origin`.
    pub fn rows_not_closed(origin: impl Into<String>) -> Self {
        Self::RowsNotClosed {
            origin: origin.into(),
        }
    }

    /// Create a transaction-lost error.
    pub fn transaction_lost(message: impl Into<String>) -> Self {
        Self::TransactionLost {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The wrapped driver error, if this is one.
    pub fn as_sqlx(&self) -> Option<&sqlx::Error> {
        match self {
            Self::Database(err) => Some(err),
            _ => None,
        }
    }

    /// True for conditions callers may safely ignore.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NoActiveTransaction)
    }

    /// True when the request scope ended the operation.
    pub fn is_scope_ended(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Check if the failed operation is worth retrying on a fresh session.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(err) => matches!(
                **err,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)
            ) || crate::db::classify::is_deadlocked(self),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(Arc::new(err))
    }
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Configuration validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid database username provided")]
    InvalidUserName,

    #[error("invalid database password provided")]
    InvalidPassword,

    #[error("invalid database host provided")]
    InvalidHost,

    #[error("unreachable database host provided: {host}")]
    UnreachableHost { host: String },

    #[error("invalid database port provided: {port:?}")]
    InvalidPort { port: String },

    #[error("invalid database schema name provided")]
    InvalidSchemaName,

    #[error("invalid max packet size provided: {value:?}")]
    InvalidMaxPacket { value: String },

    #[error("invalid sql mode provided: {value:?}")]
    InvalidSqlMode { value: String },

    #[error("invalid transaction isolation provided: {value:?}")]
    InvalidIsolation { value: String },

    #[error("TLS requires a CA bundle")]
    NoCaBundle,

    #[error("TLS requires a valid CA bundle: {reason}")]
    InvalidCaBundle { reason: String },

    #[error("invalid pool options: {message}")]
    InvalidPoolOptions { message: String },

    #[error("cannot load configuration file {path}: {reason}")]
    InvalidFile { path: String, reason: String },
}

impl ConfigError {
    /// Create an invalid CA bundle error.
    pub fn invalid_ca_bundle(reason: impl Into<String>) -> Self {
        Self::InvalidCaBundle {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_not_closed_mentions_origin() {
        let err = SessionError::rows_not_closed("src/handler.rs:42:9");
        assert!(err.to_string().contains("src/handler.rs:42:9"));
        assert!(err.to_string().starts_with("rows were not closed"));
    }

    #[test]
    fn test_no_active_transaction_is_benign() {
        assert!(SessionError::NoActiveTransaction.is_benign());
        assert!(!SessionError::TransactionAlreadyStarted.is_benign());
        assert!(!SessionError::Cancelled.is_benign());
    }

    #[test]
    fn test_database_error_display_is_unchanged() {
        let err = SessionError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.to_string(), sqlx::Error::RowNotFound.to_string());
        assert!(err.as_sqlx().is_some());
    }

    #[test]
    fn test_error_retryable() {
        assert!(SessionError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!SessionError::from(sqlx::Error::RowNotFound).is_retryable());
        assert!(!SessionError::NoActiveTransaction.is_retryable());
    }

    #[test]
    fn test_scope_errors() {
        assert!(SessionError::Cancelled.is_scope_ended());
        assert!(SessionError::DeadlineExceeded.is_scope_ended());
        assert!(!SessionError::ShutdownIncomplete { budget_ms: 3000 }.is_scope_ended());
    }

    #[test]
    fn test_config_error_converts() {
        let err: SessionError = ConfigError::InvalidHost.into();
        assert!(matches!(err, SessionError::Config(ConfigError::InvalidHost)));
        assert_eq!(
            err.to_string(),
            "invalid configuration: invalid database host provided"
        );
    }
}
