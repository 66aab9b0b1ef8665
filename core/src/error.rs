use thiserror::Error;

/// Failure reported by an upstream source client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, connection resets, rate limiting. Retryable.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Authentication, malformed request. Never retried.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Concurrent write on divergence {entity}/{period}/{rate}")]
    PersistenceConflict {
        entity: String,
        period: String,
        rate: String,
    },

    #[error("Divergence store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Monetary amount overflow")]
    AmountOverflow,

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Reconciliation run cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReconError {
    /// True when the underlying cause was a retryable upstream failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconError::Fetch(e) if e.is_retryable())
    }
}

pub type ReconResult<T> = Result<T, ReconError>;
