//! Persisted record types.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use calbridge_core::{ProviderKind, TokenSet};

/// A provider identity with its current token state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub mail: String,
    pub provider: ProviderKind,
    pub tokens: TokenSet,
}

/// A provider calendar with its process-wide correlation key.
///
/// The provider-native id is only meaningful together with the owning
/// account; everything internal keys off `uuid`, so provider id churn
/// never invalidates relation edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarRecord {
    pub uuid: Uuid,
    pub provider: ProviderKind,
    pub provider_id: String,
    pub account_mail: String,
    /// Correlation key of the principal calendar; `None` marks a principal.
    pub principal: Option<Uuid>,
}

impl CalendarRecord {
    pub fn is_principal(&self) -> bool {
        self.principal.is_none()
    }
}

/// Sync status of an event relation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Synced,
    /// Permanently failed; fan-out stopped for this event.
    Broken,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Synced => "synced",
            EventStatus::Broken => "broken",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(EventStatus::Synced),
            "broken" => Some(EventStatus::Broken),
            _ => None,
        }
    }
}

/// One event relation record.
///
/// A record without a parent is a principal event; fan-out children point
/// at their originating record's internal id. The graph is a forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub internal_id: i64,
    pub calendar_uuid: Uuid,
    pub provider_event_id: String,
    pub parent: Option<i64>,
    pub status: EventStatus,
    /// Last provider revision marker (etag / changeKey) this bridge saw.
    pub revision: Option<String>,
}

/// A provider push-notification registration bound to one calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    /// Locally generated correlation key carried in provider notifications.
    pub correlation: Uuid,
    pub calendar_uuid: Uuid,
    pub provider_sub_id: String,
    pub expires_at: DateTime<Utc>,
}
