//! Provider capability traits.
//!
//! The synchronization engine never talks to a calendar API directly; it
//! goes through these object-safe traits. Each provider crate implements
//! them for its own account/calendar family, and tests substitute mocks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use calbridge_convert::FieldMap;

use crate::error::SyncResult;
use crate::token::TokenSet;

/// The calendar backends calbridge can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Outlook,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::Outlook => "outlook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(ProviderKind::Google),
            "outlook" => Some(ProviderKind::Outlook),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event fetched from a provider, already deconverted into the flat
/// cross-provider field map. The provider-native id and revision marker
/// (etag / changeKey) travel alongside but never inside the map.
#[derive(Debug, Clone)]
pub struct FetchedEvent {
    pub id: String,
    pub revision: Option<String>,
    pub fields: FieldMap,
}

/// The provider's answer to a create or update call.
#[derive(Debug, Clone)]
pub struct RemoteEvent {
    pub id: String,
    pub revision: Option<String>,
}

/// A push-notification registration created on a provider.
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub provider_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Account capability: identity, credentials, token refresh.
#[async_trait]
pub trait AccountApi: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Mail-like identity, unique per provider.
    fn mail(&self) -> String;

    /// Current Authorization header value.
    fn authorization(&self) -> String;

    /// Refresh the access token if it is near expiry.
    ///
    /// Returns the rotated token set when a refresh actually happened so
    /// the caller can persist it.
    async fn refresh(&self) -> SyncResult<Option<TokenSet>>;
}

/// Calendar capability: event CRUD plus subscription management for one
/// provider-native calendar.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// Process-wide stable correlation key. Survives provider id churn.
    fn uuid(&self) -> Uuid;

    fn kind(&self) -> ProviderKind;

    fn account(&self) -> Arc<dyn AccountApi>;

    /// Fetch one event; `Ok(None)` when the provider reports it absent.
    async fn get_event(&self, event_id: &str) -> SyncResult<Option<FetchedEvent>>;

    /// List every event currently on the calendar.
    async fn list_events(&self) -> SyncResult<Vec<FetchedEvent>>;

    /// Create an event from converted fields; returns the new native id.
    async fn create_event(&self, fields: &FieldMap) -> SyncResult<RemoteEvent>;

    async fn update_event(&self, event_id: &str, fields: &FieldMap) -> SyncResult<RemoteEvent>;

    async fn delete_event(&self, event_id: &str) -> SyncResult<()>;

    /// Register a push subscription delivering to `callback_url`, carrying
    /// `correlation` so inbound notifications can be matched to a calendar.
    async fn subscribe(
        &self,
        callback_url: &str,
        correlation: Uuid,
    ) -> SyncResult<ProviderSubscription>;

    /// Whether the provider can extend a subscription in place.
    fn supports_renewal(&self) -> bool;

    /// Extend the subscription; only called when `supports_renewal()`.
    async fn renew_subscription(&self, provider_sub_id: &str) -> SyncResult<DateTime<Utc>>;

    async fn unsubscribe(&self, provider_sub_id: &str) -> SyncResult<()>;
}
