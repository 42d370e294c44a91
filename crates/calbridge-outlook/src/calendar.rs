//! `CalendarApi` implementation for one Outlook calendar.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use calbridge_convert::{convert, deconvert, FieldMap};
use calbridge_core::{
    AccountApi, CalendarApi, FetchedEvent, ProviderKind, ProviderSubscription, RemoteEvent,
    SyncError, SyncResult,
};

use crate::account::OutlookAccount;
use crate::client::OutlookCalendarClient;
use crate::types::OutlookEvent;

/// How long a fresh Graph subscription is asked to live. Graph caps
/// calendar subscriptions at roughly three days, so two keeps a margin.
const SUBSCRIPTION_TTL_DAYS: i64 = 2;

/// An Outlook calendar bound to its owning account and correlation key.
pub struct OutlookCalendar {
    uuid: Uuid,
    client: OutlookCalendarClient,
    account: Arc<OutlookAccount>,
}

impl OutlookCalendar {
    pub fn new(uuid: Uuid, provider_id: &str, account: Arc<OutlookAccount>) -> SyncResult<Self> {
        Ok(Self {
            uuid,
            client: OutlookCalendarClient::new(provider_id)?,
            account,
        })
    }

    #[cfg(test)]
    pub fn new_with_client(
        uuid: Uuid,
        client: OutlookCalendarClient,
        account: Arc<OutlookAccount>,
    ) -> Self {
        Self { uuid, client, account }
    }

    fn to_fetched(&self, event: OutlookEvent) -> SyncResult<FetchedEvent> {
        let id = event
            .id
            .clone()
            .ok_or_else(|| SyncError::Permanent("graph event without id".to_string()))?;
        let revision = event.change_key.clone();
        let fields = deconvert(&event)?;
        Ok(FetchedEvent { id, revision, fields })
    }

    fn to_remote(event: OutlookEvent) -> SyncResult<RemoteEvent> {
        let id = event
            .id
            .ok_or_else(|| SyncError::Permanent("graph answer carried no event id".to_string()))?;
        Ok(RemoteEvent { id, revision: event.change_key })
    }
}

#[async_trait]
impl CalendarApi for OutlookCalendar {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Outlook
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
        let mut event = OutlookEvent::default();
        convert(&mut event, fields)?;

        let auth = self.account.authorization();
        let created = self.client.create_event(&auth, &event).await?;
        Self::to_remote(created)
    }

    async fn update_event(&self, event_id: &str, fields: &FieldMap) -> SyncResult<RemoteEvent> {
        let mut event = OutlookEvent::default();
        convert(&mut event, fields)?;

        let auth = self.account.authorization();
        let updated = self.client.update_event(&auth, event_id, &event).await?;
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
        let expires_at = Utc::now() + Duration::days(SUBSCRIPTION_TTL_DAYS);
        let created = self
            .client
            .create_subscription(&auth, callback_url, correlation, expires_at)
            .await?;

        Ok(ProviderSubscription {
            provider_id: created.id,
            expires_at: created.expiration_date_time,
        })
    }

    fn supports_renewal(&self) -> bool {
        true
    }

    async fn renew_subscription(&self, provider_sub_id: &str) -> SyncResult<DateTime<Utc>> {
        let auth = self.account.authorization();
        let expires_at = Utc::now() + Duration::days(SUBSCRIPTION_TTL_DAYS);
        let renewed = self
            .client
            .renew_subscription(&auth, provider_sub_id, expires_at)
            .await?;
        Ok(renewed.expiration_date_time)
    }

    async fn unsubscribe(&self, provider_sub_id: &str) -> SyncResult<()> {
        let auth = self.account.authorization();
        self.client.delete_subscription(&auth, provider_sub_id).await
    }
}
