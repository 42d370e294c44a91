//! Canonical date/time representation and the per-provider codec hook.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::ConvertError;
use crate::value::FieldValue;

/// Provider-neutral moment in time.
///
/// Providers encode event times in incompatible wire shapes (RFC3339 with
/// offset, naive local time plus zone name, bare dates for all-day events).
/// All of them normalize to this type inside a field map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moment {
    /// A specific instant.
    At(DateTime<Utc>),
    /// An all-day date with no time component.
    AllDay(NaiveDate),
}

impl Moment {
    /// Extract a moment from a mapped field value.
    ///
    /// Date/time fields are required on conversion: a missing or mistyped
    /// value is an error, never a silent default.
    pub fn required(tag: &str, value: Option<&FieldValue>) -> Result<Moment, ConvertError> {
        match value {
            Some(FieldValue::Moment(m)) => Ok(*m),
            Some(other) => Err(ConvertError::TypeMismatch {
                tag: tag.to_string(),
                expected: "moment",
                found: other.kind(),
            }),
            None => Err(ConvertError::missing(tag)),
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, Moment::AllDay(_))
    }
}

/// Custom conversion hook for provider date/time wire types.
///
/// A field whose type implements this trait is not walked structurally by
/// the engine; the codec owns both directions of the mapping.
pub trait TimeCodec: Sized {
    /// Encode this wire value as the canonical moment.
    fn to_moment(&self, tag: &str) -> Result<Moment, ConvertError>;

    /// Build the wire value from a mapped field.
    fn from_field(tag: &str, value: Option<&FieldValue>) -> Result<Self, ConvertError>;
}
