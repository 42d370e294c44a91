//! Conversion error types.

use thiserror::Error;

/// Errors produced while mapping between provider event shapes.
///
/// Every failure is explicit and typed; the engine never panics on a
/// malformed or incomplete source.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("required field '{tag}' is missing from the source")]
    MissingField { tag: String },

    #[error("field '{tag}' expected {expected}, found {found}")]
    TypeMismatch {
        tag: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("field '{tag}' has an invalid date/time value: {reason}")]
    InvalidTime { tag: String, reason: String },
}

impl ConvertError {
    pub fn missing(tag: &str) -> Self {
        ConvertError::MissingField { tag: tag.to_string() }
    }

    pub fn invalid_time(tag: &str, reason: impl Into<String>) -> Self {
        ConvertError::InvalidTime {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }
}
