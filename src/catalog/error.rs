//! Error types for catalog operations.

use std::fmt;

use thiserror::Error;

use crate::retry::{Classify, FailureType};

/// What a database failure means for the item that hit it.
///
/// Every catalog write is lookup-before-insert keyed on a natural key, so a
/// uniqueness conflict only happens when a concurrent writer stored the same
/// key first. The next attempt finds that row, which makes conflicts
/// retryable here rather than data errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// Another writer held the database: busy, locked, pool exhausted or I/O.
    Contended,
    /// A unique, foreign-key or check constraint rejected the write.
    Conflict,
    /// Closed pool, driver or schema failure; retrying will not help.
    Fatal,
}

impl DbErrorKind {
    /// Classifies a driver error.
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Self::Contended,
            sqlx::Error::Database(database_error) => {
                // Extended result codes keep the primary code in the low byte;
                // 5 is SQLITE_BUSY and 6 is SQLITE_LOCKED.
                let primary = database_error
                    .code()
                    .and_then(|code| code.parse::<u32>().ok())
                    .map(|code| code & 0xff);
                if matches!(primary, Some(5 | 6)) {
                    Self::Contended
                } else if database_error.is_unique_violation()
                    || database_error.is_foreign_key_violation()
                    || database_error.is_check_violation()
                {
                    Self::Conflict
                } else {
                    Self::Fatal
                }
            }
            _ => Self::Fatal,
        }
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Contended => "contended",
            Self::Conflict => "conflict",
            Self::Fatal => "fatal",
        })
    }
}

/// Errors that can occur during catalog operations.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification used for retry decisions.
        kind: DbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// A row that an insert conflicted with could not be read back.
    #[error("{entity} vanished after conflicting insert: {key}")]
    Vanished {
        /// Table involved.
        entity: &'static str,
        /// Natural key that was looked up.
        key: String,
    },
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: DbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl CatalogError {
    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<DbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            Self::Vanished { .. } => None,
        }
    }
}

impl Classify for CatalogError {
    /// Rolled-back work is retried; a broken pool or schema is not.
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Database { kind, .. } => match kind {
                DbErrorKind::Contended | DbErrorKind::Conflict => FailureType::Transient,
                DbErrorKind::Fatal => FailureType::Permanent,
            },
            // A concurrent writer deleted the row; another attempt re-inserts it.
            Self::Vanished { .. } => FailureType::Transient,
        }
    }
}
