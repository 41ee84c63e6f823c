//! Error types for the SQLite store.

use crosspost_scheduler::StoreError;
use thiserror::Error;

/// Errors raised while talking to the database.
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite reported an error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The database directory could not be created.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A column holds a value outside its domain.
    #[error("corrupt {column} value: {value:?}")]
    Corrupt { column: &'static str, value: String },

    /// An update targeted a row that does not exist.
    #[error("{0} does not exist")]
    Missing(String),

    /// The file was written by a newer build.
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
}

impl DbError {
    pub(crate) fn corrupt(column: &'static str, value: impl Into<String>) -> Self {
        Self::Corrupt {
            column,
            value: value.into(),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Json(e) => StoreError::Serialization(e),
            DbError::Corrupt { .. } => StoreError::Corrupt(err.to_string()),
            DbError::Sqlite(rusqlite::Error::SqliteFailure(code, message))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Corrupt(message.unwrap_or_else(|| code.to_string()))
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}
