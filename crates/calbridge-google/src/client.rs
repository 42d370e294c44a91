//! Google Calendar v3 REST client.

use std::time::Duration;

use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use calbridge_core::{classify_status, ReqwestErrorExt, SyncError, SyncResult};

use crate::types::GoogleEvent;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin client for one Google calendar's event collection.
pub struct GoogleCalendarClient {
    http: reqwest::Client,
    base_url: String,
    calendar_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EventListResponse {
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
}

/// Answer to an events.watch call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    pub resource_id: String,
    /// Expiration as epoch milliseconds (Google sends it as a string).
    pub expiration: String,
}

impl GoogleCalendarClient {
    pub fn new(calendar_id: &str) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ReqwestErrorExt::into_sync_error)?;

        Ok(Self {
            http,
            base_url: CALENDAR_API_BASE.to_string(),
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
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id),
        )
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(event_id))
    }

    /// Fetch one event; `Ok(None)` when Google reports it gone.
    #[instrument(skip(self, auth), level = "debug")]
    pub async fn get_event(&self, auth: &str, event_id: &str) -> SyncResult<Option<GoogleEvent>> {
        let response = self
            .http
            .get(self.event_url(event_id))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        match self.handle_response::<GoogleEvent>(response).await {
            Ok(event) => Ok(Some(event)),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List every event on the calendar, following pagination.
    #[instrument(skip(self, auth), level = "debug")]
    pub async fn list_events(&self, auth: &str) -> SyncResult<Vec<GoogleEvent>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!("{}?singleEvents=true&maxResults=250", self.events_url());
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let response = self
                .http
                .get(&url)
                .header("Authorization", auth)
                .send()
                .await
                .map_err(ReqwestErrorExt::into_sync_error)?;

            let page: EventListResponse = self.handle_response(response).await?;
            events.extend(page.items);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(events)
    }

    #[instrument(skip(self, auth, event), level = "debug")]
    pub async fn insert_event(&self, auth: &str, event: &GoogleEvent) -> SyncResult<GoogleEvent> {
        let response = self
            .http
            .post(self.events_url())
            .header("Authorization", auth)
            .json(event)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        self.handle_response(response).await
    }

    #[instrument(skip(self, auth, event), level = "debug")]
    pub async fn patch_event(
        &self,
        auth: &str,
        event_id: &str,
        event: &GoogleEvent,
    ) -> SyncResult<GoogleEvent> {
        let response = self
            .http
            .patch(self.event_url(event_id))
            .header("Authorization", auth)
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

    /// Open a push channel for this calendar's events.
    #[instrument(skip(self, auth), level = "info")]
    pub async fn watch(
        &self,
        auth: &str,
        channel_id: Uuid,
        address: &str,
    ) -> SyncResult<WatchResponse> {
        let body = serde_json::json!({
            "id": channel_id.to_string(),
            "type": "web_hook",
            "address": address,
        });

        let response = self
            .http
            .post(format!("{}/watch", self.events_url()))
            .header("Authorization", auth)
            .json(&body)
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        self.handle_response(response).await
    }

    /// Close a push channel. Channels cannot be renewed, only replaced.
    #[instrument(skip(self, auth), level = "info")]
    pub async fn stop_channel(
        &self,
        auth: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> SyncResult<()> {
        let body = serde_json::json!({
            "id": channel_id,
            "resourceId": resource_id,
        });

        let response = self
            .http
            .post(format!("{}/channels/stop", self.base_url))
            .header("Authorization", auth)
            .json(&body)
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
