//! Infrastructure error types shared by the services

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Error raised by the PostgreSQL layer
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The pool could not be established
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// A statement failed while executing
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Schema bootstrap failed
    #[error("Database schema error: {0}")]
    Schema(#[source] SqlxError),

    /// A stored row could not be mapped back into a domain value
    #[error("Corrupt row in {table}: {detail}")]
    CorruptRow {
        table: &'static str,
        detail: String,
    },

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;
