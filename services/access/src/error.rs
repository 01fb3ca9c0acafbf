//! Error types for the access core
//!
//! Policy denials are not errors: they travel as [`crate::models::DenialReason`]
//! values. Everything here is either a configuration problem caught at
//! startup or an infrastructure failure that surfaces to operators as a
//! retryable `Failed` scan.

use common::error::DatabaseError;
use thiserror::Error;

use crate::token::EncodeError;

/// Failure of a storage port
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Backend unreachable or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Infrastructure failure inside the access service
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("token encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Startup configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("key configuration error: {0}")]
    Key(#[from] crate::keys::KeyError),
}

/// Type alias for access core results
pub type AccessResult<T> = Result<T, AccessError>;
