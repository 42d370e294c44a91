//! The error taxonomy shared by the whole synchronization pipeline.
//!
//! Every provider and store failure is folded into one of five kinds:
//! - `NotFound` drives classification (an absent event is data, not a fault)
//! - `Transient` failures are retried with backoff
//! - `Permanent` failures mark the affected event broken without retry
//! - `Unsupported` means classification produced no actionable state
//! - `Inconsistent` means the relation store detected a lost update

use thiserror::Error;

use calbridge_convert::ConvertError;

/// Result alias used across the calbridge crates.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The provider reports the resource absent. Never fatal by itself.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network trouble, timeouts, throttling, or a 5xx-equivalent answer.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Authentication or validation failures. Retrying cannot help.
    #[error("permanent provider failure: {0}")]
    Permanent(String),

    /// Classification fell through every defined state.
    #[error("unsupported change for event '{event_id}': {reason}")]
    Unsupported { event_id: String, reason: String },

    /// A store update or delete touched an unexpected number of rows.
    #[error("relation store drift: {0}")]
    Inconsistent(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl SyncError {
    /// Whether the failure is worth a backoff retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }

    /// Stable kind label for structured logs. Raw provider payloads stay
    /// out of anything user-visible; this is what gets reported instead.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NotFound(_) => "not_found",
            SyncError::Transient(_) => "transient",
            SyncError::Permanent(_) => "permanent",
            SyncError::Unsupported { .. } => "unsupported",
            SyncError::Inconsistent(_) => "inconsistent",
            SyncError::Database(_) => "database",
        }
    }

    pub fn unsupported(event_id: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Unsupported {
            event_id: event_id.into(),
            reason: reason.into(),
        }
    }
}

/// A malformed payload cannot become valid by retrying.
impl From<ConvertError> for SyncError {
    fn from(err: ConvertError) -> Self {
        SyncError::Permanent(err.to_string())
    }
}

/// Map an HTTP status (plus response detail) into the taxonomy.
pub fn classify_status(status: reqwest::StatusCode, detail: String) -> SyncError {
    use reqwest::StatusCode;

    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => SyncError::NotFound(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Permanent(format!("{}: {}", status, detail))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SyncError::Transient(format!("{}: {}", status, detail))
        }
        s if s.is_server_error() => SyncError::Transient(format!("{}: {}", s, detail)),
        s => SyncError::Permanent(format!("{}: {}", s, detail)),
    }
}

/// Extension trait for converting transport-level reqwest errors.
pub trait ReqwestErrorExt {
    fn into_sync_error(self) -> SyncError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_sync_error(self) -> SyncError {
        if self.is_timeout() {
            return SyncError::Transient(format!("request timed out: {}", self));
        }
        if self.is_connect() {
            return SyncError::Transient(format!("connection failed: {}", self));
        }
        if self.is_decode() {
            return SyncError::Permanent(format!("invalid response body: {}", self));
        }
        if let Some(status) = self.status() {
            return classify_status(status, self.to_string());
        }
        SyncError::Transient(self.to_string())
    }
}
