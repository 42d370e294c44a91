//! `CalendarApi` implementation for one Google calendar.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use calbridge_convert::{convert, deconvert, FieldMap};
use calbridge_core::{
    AccountApi, CalendarApi, FetchedEvent, ProviderKind, ProviderSubscription, RemoteEvent,
    SyncError, SyncResult,
};

use crate::account::GoogleAccount;
use crate::client::GoogleCalendarClient;
use crate::types::GoogleEvent;

/// A Google calendar bound to its owning account and correlation key.
pub struct GoogleCalendar {
    uuid: Uuid,
    client: GoogleCalendarClient,
    account: Arc<GoogleAccount>,
}

impl GoogleCalendar {
    pub fn new(uuid: Uuid, provider_id: &str, account: Arc<GoogleAccount>) -> SyncResult<Self> {
        Ok(Self {
            uuid,
            client: GoogleCalendarClient::new(provider_id)?,
            account,
        })
    }

    #[cfg(test)]
    pub fn new_with_client(
        uuid: Uuid,
        client: GoogleCalendarClient,
        account: Arc<GoogleAccount>,
    ) -> Self {
        Self { uuid, client, account }
    }

    fn to_fetched(&self, event: GoogleEvent) -> SyncResult<FetchedEvent> {
        let id = event
            .id
            .clone()
            .ok_or_else(|| SyncError::Permanent("google event without id".to_string()))?;
        let revision = event.etag.clone();
        let fields = deconvert(&event)?;
        Ok(FetchedEvent { id, revision, fields })
    }

    fn to_remote(event: GoogleEvent) -> SyncResult<RemoteEvent> {
        let id = event
            .id
            .ok_or_else(|| SyncError::Permanent("google answer carried no event id".to_string()))?;
        Ok(RemoteEvent { id, revision: event.etag })
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendar {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn account(&self) -> Arc<dyn AccountApi> {
        self.account.clone()
    }

    async fn get_event(&self, event_id: &str) -> SyncResult<Option<FetchedEvent>> {
        let auth = self.account.authorization();
        match self.client.get_event(&auth, event_id).await? {
            Some(event) => Ok(Some(self.to_fetched(event)?)),
            None => Ok(None),
        }
    }

    async fn list_events(&self) -> SyncResult<Vec<FetchedEvent>> {
        let auth = self.account.authorization();
        let events = self.client.list_events(&auth).await?;
        events.into_iter().map(|e| self.to_fetched(e)).collect()
    }

    async fn create_event(&self, fields: &FieldMap) -> SyncResult<RemoteEvent> {
        // Start from an empty placeholder and let the conversion engine
        // fill in everything that carries a cross-provider tag.
        let mut event = GoogleEvent::default();
        convert(&mut event, fields)?;

        let auth = self.account.authorization();
        let created = self.client.insert_event(&auth, &event).await?;
        Self::to_remote(created)
    }

    async fn update_event(&self, event_id: &str, fields: &FieldMap) -> SyncResult<RemoteEvent> {
        let mut event = GoogleEvent::default();
        convert(&mut event, fields)?;

        let auth = self.account.authorization();
        let updated = self.client.patch_event(&auth, event_id, &event).await?;
        Self::to_remote(updated)
    }

    async fn delete_event(&self, event_id: &str) -> SyncResult<()> {
        let auth = self.account.authorization();
        self.client.delete_event(&auth, event_id).await
    }

    async fn subscribe(
        &self,
        callback_url: &str,
        correlation: Uuid,
    ) -> SyncResult<ProviderSubscription> {
        let auth = self.account.authorization();
        let watch = self.client.watch(&auth, correlation, callback_url).await?;

        let expiration_ms: i64 = watch.expiration.parse().map_err(|_| {
            SyncError::Permanent(format!("unparseable channel expiration '{}'", watch.expiration))
        })?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(expiration_ms).ok_or_else(|| {
            SyncError::Permanent(format!("channel expiration out of range: {}", expiration_ms))
        })?;

        // Stopping a channel later needs both the channel id and the
        // resource id, so the stored subscription id carries both.
        Ok(ProviderSubscription {
            provider_id: format!("{}:{}", correlation, watch.resource_id),
            expires_at,
        })
    }

    fn supports_renewal(&self) -> bool {
        false
    }

    async fn renew_subscription(&self, _provider_sub_id: &str) -> SyncResult<DateTime<Utc>> {
        Err(SyncError::Permanent(
            "google push channels cannot be renewed in place".to_string(),
        ))
    }

    async fn unsubscribe(&self, provider_sub_id: &str) -> SyncResult<()> {
        let (channel_id, resource_id) = provider_sub_id.split_once(':').ok_or_else(|| {
            SyncError::Permanent(format!("malformed channel subscription id '{}'", provider_sub_id))
        })?;

        let auth = self.account.authorization();
        self.client.stop_channel(&auth, channel_id, resource_id).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use calbridge_convert::FieldValue;
    use calbridge_core::TokenSet;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account() -> Arc<GoogleAccount> {
        Arc::new(GoogleAccount::new_with_token_url(
            "user@example.com",
            "cid",
            "csecret",
            TokenSet {
                access_token: "tok".into(),
                refresh_token: None,
                token_type: "Bearer".into(),
                expires_at: chrono::Utc::now().timestamp() + 3600,
            },
            "http://localhost/unused",
        ))
    }

    fn calendar(server: &MockServer) -> GoogleCalendar {
        GoogleCalendar::new_with_client(
            Uuid::new_v4(),
            GoogleCalendarClient::new_with_base_url("primary", &server.uri()),
            account(),
        )
    }

    #[tokio::test]
    async fn fetched_events_carry_deconverted_fields_and_revision() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/calendars/primary/events/ev-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "ev-1",
                "summary": "Standup",
                "start": {"dateTime": "2024-03-05T09:00:00Z"},
                "end": {"dateTime": "2024-03-05T09:15:00Z"},
                "etag": "\"7\""
            })))
            .mount(&server)
            .await;

        let fetched = calendar(&server).get_event("ev-1").await.unwrap().unwrap();

        assert_eq!(fetched.id, "ev-1");
        assert_eq!(fetched.revision.as_deref(), Some("\"7\""));
        assert_eq!(
            fetched.fields.get("title").and_then(FieldValue::as_text),
            Some("Standup")
        );
        // Provider-private data never enters the field map.
        assert!(!fetched.fields.contains("etag"));
    }

    #[tokio::test]
    async fn create_converts_fields_into_a_new_event() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "created-1",
                "etag": "\"1\""
            })))
            .mount(&server)
            .await;

        let mut fields = FieldMap::new();
        fields.insert("title", FieldValue::Text("Review".into()));
        fields.insert(
            "start",
            FieldValue::Moment(calbridge_convert::Moment::At(
                chrono::Utc::now(),
            )),
        );
        fields.insert(
            "end",
            FieldValue::Moment(calbridge_convert::Moment::At(
                chrono::Utc::now() + chrono::Duration::hours(1),
            )),
        );

        let remote = calendar(&server).create_event(&fields).await.unwrap();
        assert_eq!(remote.id, "created-1");
        assert_eq!(remote.revision.as_deref(), Some("\"1\""));
    }

    #[tokio::test]
    async fn renewal_is_not_supported() {
        let server = MockServer::start().await;
        let cal = calendar(&server);

        assert!(!cal.supports_renewal());
        let err = cal.renew_subscription("chan:res").await.unwrap_err();
        assert!(matches!(err, SyncError::Permanent(_)));
    }
}
