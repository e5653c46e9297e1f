//! Error types for the whatsapp-journey library.
//!
//! This module provides custom error types using `thiserror`. The conversation
//! state machine and the scheduler never fail; errors originate at the
//! persistence and delivery boundaries only.

use thiserror::Error;

/// Errors that can occur in the whatsapp-journey application.
#[derive(Error, Debug)]
pub enum JourneyError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A persisted row could not be turned back into a contact
    #[error("Invalid contact record: {0}")]
    InvalidRecord(String),

    /// Operation on a contact the ledger has never seen
    #[error("Unknown contact: {0}")]
    ContactNotFound(String),

    /// Timeslot code not present in the catalog
    #[error("Unknown timeslot code: {0}")]
    UnknownTimeslot(String),

    /// Outbound delivery failed
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading or writing failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Result of a call on the messaging provider.
///
/// Transient failures may be retried; permanent ones never are.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network trouble, timeouts, throttling or provider-side 5xx
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The provider rejected the request and will keep rejecting it
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    /// True when the failure is worth another attempt.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Convenience type alias for Result with JourneyError
pub type Result<T> = std::result::Result<T, JourneyError>;

impl From<anyhow::Error> for JourneyError {
    fn from(err: anyhow::Error) -> Self {
        JourneyError::Other(err.to_string())
    }
}
