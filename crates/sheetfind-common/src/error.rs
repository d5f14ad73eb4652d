//! Error types for sheetfind

use thiserror::Error;

/// Result type alias for sheetfind operations
pub type Result<T> = std::result::Result<T, SheetFindError>;

/// Unified error type for all sheetfind operations
#[derive(Error, Debug, Clone)]
pub enum SheetFindError {
    /// Source document cannot be opened, a sheet cannot be enumerated or a cell cannot be read.
    /// Fatal to the ingestion run.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Row-storage insert failed inside a batch; the batch was rolled back.
    #[error("Batch transaction error: {0}")]
    BatchTransaction(String),

    /// An index entry could not be written for an already committed row.
    #[error("Index insert error for row {row_id}: {message}")]
    IndexInsert { row_id: i64, message: String },

    /// Malformed or unsafe compiled search expression.
    #[error("Query error: {0}")]
    Query(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Unique constraint violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Foreign key constraint violation
    #[error("Foreign key constraint violation: {0}")]
    ForeignKey(String),

    /// SQLITE_BUSY / SQLITE_LOCKED - retryable
    #[error("Database busy: {0}")]
    Busy(String),

    /// Pool acquire timeout - retryable
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SheetFindError {
    /// Returns true if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, SheetFindError::Busy(_) | SheetFindError::Timeout(_))
    }

    /// Returns true if this is a constraint violation error
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            SheetFindError::Conflict(_) | SheetFindError::ForeignKey(_)
        )
    }
}

impl From<serde_json::Error> for SheetFindError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            SheetFindError::Deserialization(err.to_string())
        } else {
            SheetFindError::Serialization(err.to_string())
        }
    }
}

impl From<std::io::Error> for SheetFindError {
    fn from(err: std::io::Error) -> Self {
        SheetFindError::Io(err.to_string())
    }
}

// SQLite-specific error conversions (when sqlite-errors feature is enabled)
#[cfg(feature = "sqlite-errors")]
impl From<sqlx::Error> for SheetFindError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;
        use sqlx::Error;
        match &err {
            Error::Configuration(_) => SheetFindError::Configuration(err.to_string()),
            Error::Database(db_err) => {
                match db_err.kind() {
                    ErrorKind::UniqueViolation => return SheetFindError::Conflict(err.to_string()),
                    ErrorKind::ForeignKeyViolation => {
                        return SheetFindError::ForeignKey(err.to_string())
                    }
                    ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                        return SheetFindError::Validation(err.to_string())
                    }
                    _ => {}
                }
                // Primary and extended SQLite result codes
                // See: https://www.sqlite.org/rescode.html
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        // SQLITE_BUSY, SQLITE_LOCKED and their extended forms
                        "5" | "6" | "261" | "262" | "517" => {
                            return SheetFindError::Busy(err.to_string())
                        }
                        _ => {}
                    }
                }
                SheetFindError::Database(err.to_string())
            }
            Error::Io(_) => SheetFindError::Connection(err.to_string()),
            Error::Protocol(_) => SheetFindError::Connection(err.to_string()),
            Error::RowNotFound => SheetFindError::NotFound("Row not found".to_string()),
            Error::TypeNotFound { .. } => SheetFindError::Deserialization(err.to_string()),
            Error::ColumnIndexOutOfBounds { .. } => SheetFindError::Query(err.to_string()),
            Error::ColumnNotFound(_) => SheetFindError::Query(err.to_string()),
            Error::ColumnDecode { .. } => SheetFindError::Deserialization(err.to_string()),
            Error::Decode(_) => SheetFindError::Deserialization(err.to_string()),
            Error::PoolTimedOut => SheetFindError::Timeout("Connection pool timed out".to_string()),
            Error::PoolClosed => SheetFindError::Connection("Connection pool closed".to_string()),
            Error::WorkerCrashed => SheetFindError::Internal("Worker thread crashed".to_string()),
            _ => SheetFindError::Database(err.to_string()),
        }
    }
}
