//! Field values and the flat tag -> value map exchanged between providers.

use crate::error::ConvertError;
use crate::time::Moment;

/// A single converted field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Moment(Moment),
    /// A list of plain identifiers (attendee mail addresses).
    List(Vec<String>),
}

impl FieldValue {
    /// Short kind name used in mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Moment(_) => "moment",
            FieldValue::List(_) => "list",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Extract a text value, failing with a typed error on mismatch.
pub fn text(tag: &str, value: &FieldValue) -> Result<String, ConvertError> {
    value
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| ConvertError::TypeMismatch {
            tag: tag.to_string(),
            expected: "text",
            found: value.kind(),
        })
}

/// Extract a list value, failing with a typed error on mismatch.
pub fn list(tag: &str, value: &FieldValue) -> Result<Vec<String>, ConvertError> {
    value
        .as_list()
        .map(<[String]>::to_vec)
        .ok_or_else(|| ConvertError::TypeMismatch {
            tag: tag.to_string(),
            expected: "list",
            found: value.kind(),
        })
}

/// Insertion-ordered flat mapping of cross-provider tag to value.
///
/// All tags live in one flat namespace: nested composites contribute their
/// tagged sub-fields here directly. Two fields carrying the same tag
/// anywhere in one type's tree is an annotation bug on that type, not a
/// condition this map checks for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, FieldValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, value: FieldValue) {
        self.entries.push((tag.into(), value));
    }

    pub fn get(&self, tag: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tags in insertion order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(t, _)| t.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(t, v)| (t.as_str(), v))
    }
}
