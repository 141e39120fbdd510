//! Error taxonomy for the hub.
//!
//! Only authentication failures, mute/ban notices and not-found replies ever
//! reach a client. Store and sink failures are logged where they happen.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Malformed or missing fields in an inbound message.
    #[error("invalid message: {0}")]
    Validation(String),

    /// The session's role does not allow the operation.
    #[error("not authorized")]
    Authorization,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("notification sink unavailable: {0}")]
    SinkUnavailable(#[from] SinkError),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("duplicate {0}")]
    Duplicate(&'static str),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("stored timestamp out of range: {0}")]
    Timestamp(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook answered {0}")]
    Status(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
