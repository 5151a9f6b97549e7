//! Error taxonomy for the order engine.
//!
//! Every coordinator operation returns exactly one of these; anything that
//! fails inside a transaction is rolled back and surfaced as `Transaction`.
//! Notification failures are logged at the dispatch site and never returned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    /// Malformed or empty input, rejected before any transaction opens.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown order id, rejected after a read and before any write.
    #[error("order not found: {0}")]
    NotFound(i64),

    /// Status code outside the five recognized values.
    #[error("invalid status code: {0}")]
    InvalidStatus(String),

    /// Database failure during an atomic operation; the whole operation
    /// was rolled back.
    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl From<rusqlite::Error> for OrderError {
    fn from(e: rusqlite::Error) -> Self {
        OrderError::Transaction(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrderError>;
