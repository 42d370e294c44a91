//! Microsoft Graph REST client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use calbridge_core::{classify_status, ReqwestErrorExt, SyncError, SyncResult};

use crate::types::OutlookEvent;

const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ask Graph to express every date/time in UTC, matching what the
/// conversion codec expects.
const PREFER_UTC: &str = "outlook.timezone=\"UTC\"";

/// Thin client for one Outlook calendar's event collection.
pub struct OutlookCalendarClient {
    http: reqwest::Client,
    base_url: String,
    calendar_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct EventListResponse {
    #[serde(default)]
    value: Vec<OutlookEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Answer to subscription create/renew calls.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub id: String,
    pub expiration_date_time: DateTime<Utc>,
}

impl OutlookCalendarClient {
    pub fn new(calendar_id: &str) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ReqwestErrorExt::into_sync_error)?;

        Ok(Self {
            http,
            base_url: GRAPH_API_BASE.to_string(),
            calendar_id: calendar_id.to_string(),
        })
    }

    #[cfg(test)]
    pub fn new_with_base_url(calendar_id: &str, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            calendar_id: calendar_id.to_string(),
        }
    }

    fn events_url(&self) -> String {
        format!(
            "{}/me/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id),
        )
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(event_id))
    }

    /// Fetch one event; `Ok(None)` when Graph reports it gone.
    #[instrument(skip(self, auth), level = "debug")]
    pub async fn get_event(&self, auth: &str, event_id: &str) -> SyncResult<Option<OutlookEvent>> {
        let response = self
            .http
            .get(self.event_url(event_id))
            .header("Authorization", auth)
            .header("Prefer", PREFER_UTC)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        match self.handle_response::<OutlookEvent>(response).await {
            Ok(event) => Ok(Some(event)),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List every event on the calendar, following `@odata.nextLink`.
    #[instrument(skip(self, auth), level = "debug")]
    pub async fn list_events(&self, auth: &str) -> SyncResult<Vec<OutlookEvent>> {
        let mut events = Vec::new();
        let mut url = format!("{}?$top=100", self.events_url());

        loop {
            let response = self
                .http
                .get(&url)
                .header("Authorization", auth)
                .header("Prefer", PREFER_UTC)
                .send()
                .await
                .map_err(ReqwestErrorExt::into_sync_error)?;

            let page: EventListResponse = self.handle_response(response).await?;
            events.extend(page.value);

            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(events)
    }

    #[instrument(skip(self, auth, event), level = "debug")]
    pub async fn create_event(&self, auth: &str, event: &OutlookEvent) -> SyncResult<OutlookEvent> {
        let response = self
            .http
            .post(self.events_url())
            .header("Authorization", auth)
            .header("Prefer", PREFER_UTC)
            .json(event)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        self.handle_response(response).await
    }

    #[instrument(skip(self, auth, event), level = "debug")]
    pub async fn update_event(
        &self,
        auth: &str,
        event_id: &str,
        event: &OutlookEvent,
    ) -> SyncResult<OutlookEvent> {
        let response = self
            .http
            .patch(self.event_url(event_id))
            .header("Authorization", auth)
            .header("Prefer", PREFER_UTC)
            .json(event)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        self.handle_response(response).await
    }

    #[instrument(skip(self, auth), level = "debug")]
    pub async fn delete_event(&self, auth: &str, event_id: &str) -> SyncResult<()> {
        let response = self
            .http
            .delete(self.event_url(event_id))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        self.expect_success(response).await
    }

    /// Create a change-notification subscription for this calendar.
    #[instrument(skip(self, auth), level = "info")]
    pub async fn create_subscription(
        &self,
        auth: &str,
        notification_url: &str,
        client_state: Uuid,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<SubscriptionResponse> {
        let body = serde_json::json!({
            "changeType": "created,updated,deleted",
            "notificationUrl": notification_url,
            "resource": format!("/me/calendars/{}/events", self.calendar_id),
            "expirationDateTime": expires_at.to_rfc3339(),
            "clientState": client_state.to_string(),
        });

        let response = self
            .http
            .post(format!("{}/subscriptions", self.base_url))
            .header("Authorization", auth)
            .json(&body)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        self.handle_response(response).await
    }

    /// Extend an existing subscription in place.
    #[instrument(skip(self, auth), level = "info")]
    pub async fn renew_subscription(
        &self,
        auth: &str,
        subscription_id: &str,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<SubscriptionResponse> {
        let body = serde_json::json!({
            "expirationDateTime": expires_at.to_rfc3339(),
        });

        let response = self
            .http
            .patch(format!(
                "{}/subscriptions/{}",
                self.base_url,
                urlencoding::encode(subscription_id)
            ))
            .header("Authorization", auth)
            .json(&body)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        self.handle_response(response).await
    }

    #[instrument(skip(self, auth), level = "info")]
    pub async fn delete_subscription(&self, auth: &str, subscription_id: &str) -> SyncResult<()> {
        let response = self
            .http
            .delete(format!(
                "{}/subscriptions/{}",
                self.base_url,
                urlencoding::encode(subscription_id)
            ))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        self.expect_success(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> SyncResult<T> {
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| SyncError::Permanent(format!("invalid response body: {}", e)))
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(classify_status(status, detail))
        }
    }

    async fn expect_success(&self, response: reqwest::Response) -> SyncResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(classify_status(status, detail))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_event_requests_utc_and_maps_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/me/calendars/cal-1/events/ev-1"))
            .and(header("Prefer", PREFER_UTC))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "ev-1",
                "subject": "Standup",
                "start": {"dateTime": "2024-03-05T09:00:00.0000000", "timeZone": "UTC"},
                "end": {"dateTime": "2024-03-05T09:15:00.0000000", "timeZone": "UTC"},
                "changeKey": "ck-7"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/calendars/cal-1/events/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = OutlookCalendarClient::new_with_base_url("cal-1", &server.uri());

        let event = client.get_event("Bearer tok", "ev-1").await.unwrap().unwrap();
        assert_eq!(event.subject.as_deref(), Some("Standup"));
        assert_eq!(event.change_key.as_deref(), Some("ck-7"));

        assert!(client.get_event("Bearer tok", "gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscription_lifecycle_calls() {
        let server = MockServer::start().await;
        let state = Uuid::new_v4();
        let expiry = Utc::now() + chrono::Duration::days(2);

        Mock::given(method("POST"))
            .and(path("/subscriptions"))
            .and(body_partial_json(serde_json::json!({
                "changeType": "created,updated,deleted",
                "clientState": state.to_string(),
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "sub-1",
                "expirationDateTime": expiry.to_rfc3339(),
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/subscriptions/sub-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "sub-1",
                "expirationDateTime": (expiry + chrono::Duration::days(2)).to_rfc3339(),
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/subscriptions/sub-1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = OutlookCalendarClient::new_with_base_url("cal-1", &server.uri());

        let created = client
            .create_subscription("Bearer tok", "https://bridge.example.com/hooks", state, expiry)
            .await
            .unwrap();
        assert_eq!(created.id, "sub-1");

        let renewed = client
            .renew_subscription("Bearer tok", "sub-1", expiry + chrono::Duration::days(2))
            .await
            .unwrap();
        assert!(renewed.expiration_date_time > created.expiration_date_time);

        client.delete_subscription("Bearer tok", "sub-1").await.unwrap();
    }

    #[tokio::test]
    async fn throttling_classifies_as_transient() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/me/calendars/cal-1/events"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = OutlookCalendarClient::new_with_base_url("cal-1", &server.uri());
        let err = client
            .create_event("Bearer tok", &OutlookEvent::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
