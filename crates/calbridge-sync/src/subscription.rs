//! Subscription lifecycle: start, renew, stop.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use calbridge_core::{CalendarApi, SyncError, SyncResult};
use calbridge_store::{CalendarRecord, RelationStore, SubscriptionRecord};

use crate::registry::ProviderRegistry;

/// Creates, renews, and tears down provider push subscriptions, keeping
/// their expiry tracked in the relation store.
pub struct SubscriptionManager {
    store: Arc<RelationStore>,
    registry: Arc<ProviderRegistry>,
    callback_url: String,
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<RelationStore>,
        registry: Arc<ProviderRegistry>,
        callback_url: &str,
    ) -> Self {
        Self {
            store,
            registry,
            callback_url: callback_url.to_string(),
        }
    }

    fn handle_for(&self, calendar_uuid: Uuid) -> SyncResult<Arc<dyn CalendarApi>> {
        self.registry.get(calendar_uuid).ok_or_else(|| {
            SyncError::unsupported(
                String::new(),
                format!("no provider handle registered for calendar {}", calendar_uuid),
            )
        })
    }

    async fn refresh_account(&self, handle: &Arc<dyn CalendarApi>) -> SyncResult<()> {
        let account = handle.account();
        if let Some(rotated) = account.refresh().await? {
            self.store
                .update_account_tokens(&account.mail(), account.kind(), &rotated)?;
        }
        Ok(())
    }

    /// Subscribe the principal calendar and every linked calendar.
    pub async fn start_sync(&self, principal: Uuid) -> SyncResult<()> {
        let Some(principal_calendar) = self.store.calendar(principal)? else {
            return Err(SyncError::NotFound(format!("calendar {}", principal)));
        };

        let mut calendars = vec![principal_calendar];
        calendars.extend(self.store.linked_calendars(principal)?);

        for calendar in &calendars {
            self.subscribe_calendar(calendar).await?;
        }
        Ok(())
    }

    async fn subscribe_calendar(&self, calendar: &CalendarRecord) -> SyncResult<()> {
        // A calendar holds at most one active subscription.
        if self.store.subscription_for_calendar(calendar.uuid)?.is_some() {
            tracing::debug!("calendar {} already has an active subscription", calendar.uuid);
            return Ok(());
        }

        let handle = self.handle_for(calendar.uuid)?;
        self.refresh_account(&handle).await?;

        let correlation = Uuid::new_v4();
        let created = handle.subscribe(&self.callback_url, correlation).await?;

        self.store.save_subscription(&SubscriptionRecord {
            correlation,
            calendar_uuid: calendar.uuid,
            provider_sub_id: created.provider_id,
            expires_at: created.expires_at,
        })?;

        tracing::info!(
            "subscribed calendar {} (correlation {}) until {}",
            calendar.uuid,
            correlation,
            created.expires_at
        );
        Ok(())
    }

    /// Renew every subscription expiring within the lead window. One
    /// failing subscription does not stop the others; the count of
    /// successful renewals is returned.
    pub async fn renew_due(&self, lead: Duration) -> SyncResult<usize> {
        let due = self.store.subscriptions_expiring_before(Utc::now() + lead)?;
        let mut renewed = 0;

        for subscription in &due {
            match self.renew_subscription(subscription).await {
                Ok(()) => renewed += 1,
                Err(e) => tracing::error!(
                    "failed to renew subscription {} for calendar {}: {} ({})",
                    subscription.correlation,
                    subscription.calendar_uuid,
                    e,
                    e.kind()
                ),
            }
        }

        Ok(renewed)
    }

    /// Renew one subscription.
    ///
    /// Providers with in-place renewal get their expiry extended. For the
    /// rest this is an explicit two-phase delete-then-recreate: between
    /// the delete and the recreate there is a window with no provider
    /// subscription. If the recreate fails, the stale record is dropped so
    /// the lapse is visible, and the error is surfaced for the caller to
    /// re-start synchronization.
    pub async fn renew_subscription(&self, subscription: &SubscriptionRecord) -> SyncResult<()> {
        let handle = self.handle_for(subscription.calendar_uuid)?;
        self.refresh_account(&handle).await?;

        if handle.supports_renewal() {
            let expires_at = handle
                .renew_subscription(&subscription.provider_sub_id)
                .await?;
            self.store
                .update_subscription_expiry(subscription.correlation, expires_at)?;
            tracing::info!(
                "renewed subscription {} until {}",
                subscription.correlation,
                expires_at
            );
            return Ok(());
        }

        match handle.unsubscribe(&subscription.provider_sub_id).await {
            Ok(()) | Err(SyncError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        match handle.subscribe(&self.callback_url, subscription.correlation).await {
            Ok(created) => {
                // New provider id overwrites the old record atomically,
                // keeping the correlation key stable.
                self.store.replace_subscription(
                    subscription.correlation,
                    &created.provider_id,
                    created.expires_at,
                )?;
                tracing::info!(
                    "recreated subscription {} as {} until {}",
                    subscription.correlation,
                    created.provider_id,
                    created.expires_at
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "subscription {} lapsed: old registration deleted, recreate failed: {}",
                    subscription.correlation,
                    e
                );
                self.store.delete_subscription(subscription.correlation)?;
                Err(e)
            }
        }
    }

    /// Tear down synchronization for a principal calendar: delete every
    /// provider subscription of the graph, then remove the event relation
    /// records and subscription records in one store transaction. A remote
    /// failure aborts before anything is persisted, leaving the pre-stop
    /// state fully intact.
    pub async fn stop_sync(&self, principal: Uuid) -> SyncResult<()> {
        let subscriptions = self.store.subscriptions_for_graph(principal)?;

        for subscription in &subscriptions {
            let handle = self.handle_for(subscription.calendar_uuid)?;
            match handle.unsubscribe(&subscription.provider_sub_id).await {
                Ok(()) | Err(SyncError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.store.purge_sync_graph(principal)
    }
}
