//! Error taxonomy for the monitoring pipeline.
//!
//! `ObsrvError` gives the error kinds of the component contracts concrete,
//! matchable variants. Orchestration code (the scheduler, the baseline
//! crawler) generally works in `anyhow::Result` and attaches `.context(...)`,
//! converting into this type only where a caller needs to branch on kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObsrvError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("network timeout after {timeout_secs}s fetching {url}")]
    NetworkTimeout { url: String, timeout_secs: u64 },

    #[error("network error fetching {url}: {message}")]
    NetworkError { url: String, message: String },

    #[error("http {status} fetching {url}")]
    Http4xx { url: String, status: u16 },

    #[error("http {status} fetching {url} after retries exhausted")]
    Http5xxExhausted { url: String, status: u16 },

    #[error("failed to parse product page: {0}")]
    ParseFailure(String),

    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("webhook delivery failed: {0}")]
    WebhookDeliveryFailed(String),

    #[error("webhook replay rejected: timestamp differs from now by {diff_seconds}s")]
    WebhookReplayRejected { diff_seconds: i64 },

    #[error("webhook signature mismatch")]
    SignatureMismatch,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl ObsrvError {
    /// HTTP status code the original management-API layer would have
    /// rendered this as. Kept as documentation on the variant since that
    /// layer itself is out of scope for this crate.
    pub fn status_code_hint(&self) -> u16 {
        match self {
            ObsrvError::InvalidUrl(_) => 400,
            ObsrvError::NetworkTimeout { .. } => 504,
            ObsrvError::NetworkError { .. } => 502,
            ObsrvError::Http4xx { status, .. } => *status,
            ObsrvError::Http5xxExhausted { .. } => 502,
            ObsrvError::ParseFailure(_) => 422,
            ObsrvError::DuplicateResource(_) => 409,
            ObsrvError::ResourceNotFound(_) => 404,
            ObsrvError::Validation(_) => 422,
            ObsrvError::WebhookDeliveryFailed(_) => 502,
            ObsrvError::WebhookReplayRejected { .. } => 400,
            ObsrvError::SignatureMismatch => 401,
            ObsrvError::Database(_) => 500,
        }
    }
}
