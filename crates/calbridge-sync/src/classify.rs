//! Change classification.
//!
//! A provider notification only says "something happened to this event"
//! (or, for delta-style providers, "something happened on this calendar").
//! Classification cross-references live provider state with the relation
//! store to derive a definite Created/Updated/Deleted state, or to drop
//! the notification as a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use calbridge_convert::FieldMap;
use calbridge_core::{CalendarApi, FetchedEvent, SyncError, SyncResult};
use calbridge_store::{CalendarRecord, EventRecord, RelationStore};

use crate::registry::ProviderRegistry;

/// What a notification turned out to mean. Transient: lives only while
/// one notification is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Created,
    Updated,
    Deleted,
    /// Never produced by the classification table; reported, not fanned out.
    Unsupported,
}

/// An inbound change notification, already authenticated and parsed by the
/// transport layer. Delta-style providers leave `event_id` empty.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    /// Correlation key of the subscription that fired.
    pub subscription: Uuid,
    /// Provider-native id of the changed event, when the provider names it.
    pub event_id: Option<String>,
}

/// A classified event, ready for fan-out.
#[derive(Debug, Clone)]
pub struct ClassifiedEvent {
    pub state: SyncState,
    /// The calendar the change originated on.
    pub calendar: CalendarRecord,
    /// Provider-native id of the changed event.
    pub event_id: String,
    /// Existing relation record for the source event, when one exists.
    pub source: Option<EventRecord>,
    /// Existing relation edges to fan out over (Updated/Deleted).
    pub related: Vec<EventRecord>,
    /// Deconverted fields of the provider event (Created/Updated).
    pub fields: Option<FieldMap>,
    /// Provider revision marker of the fetched event.
    pub revision: Option<String>,
}

pub struct Classifier {
    store: Arc<RelationStore>,
    registry: Arc<ProviderRegistry>,
}

impl Classifier {
    pub fn new(store: Arc<RelationStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self { store, registry }
    }

    /// Classify one notification into zero or more events to fan out.
    ///
    /// Runs on a separate task so a panic inside classification (or token
    /// refresh) is caught at this boundary and reported as an error
    /// instead of taking the caller down.
    pub async fn classify(
        &self,
        notification: ChangeNotification,
    ) -> SyncResult<Vec<ClassifiedEvent>> {
        let store = self.store.clone();
        let registry = self.registry.clone();
        let event_tag = notification
            .event_id
            .clone()
            .unwrap_or_else(|| format!("calendar sub {}", notification.subscription));

        let outcome =
            tokio::spawn(async move { classify_inner(store, registry, notification).await }).await;

        match outcome {
            Ok(result) => result,
            Err(join_err) => Err(SyncError::unsupported(
                event_tag,
                format!("classification panicked: {}", join_err),
            )),
        }
    }
}

async fn classify_inner(
    store: Arc<RelationStore>,
    registry: Arc<ProviderRegistry>,
    notification: ChangeNotification,
) -> SyncResult<Vec<ClassifiedEvent>> {
    // A notification for a subscription we no longer track is stale, e.g.
    // it raced a teardown. Not an error.
    let Some(calendar) = store.calendar_from_subscription(notification.subscription)? else {
        tracing::debug!(
            "dropping stale notification for unknown subscription {}",
            notification.subscription
        );
        return Ok(Vec::new());
    };

    let Some(handle) = registry.get(calendar.uuid) else {
        return Err(SyncError::unsupported(
            notification.event_id.unwrap_or_default(),
            format!("no provider handle registered for calendar {}", calendar.uuid),
        ));
    };

    // Refresh the owning account before the remote batch; a failure here
    // fails the whole notification and is surfaced, not queued.
    let account = handle.account();
    if let Some(rotated) = account.refresh().await? {
        store.update_account_tokens(&account.mail(), account.kind(), &rotated)?;
    }

    match &notification.event_id {
        Some(event_id) => {
            let fetched = handle.get_event(event_id).await?;
            Ok(classify_event(&store, &calendar, event_id, fetched)?
                .into_iter()
                .collect())
        }
        None => reconcile_calendar(&store, &calendar, handle.as_ref()).await,
    }
}

/// One pass over the classification table for a single event id.
fn classify_event(
    store: &RelationStore,
    calendar: &CalendarRecord,
    event_id: &str,
    fetched: Option<FetchedEvent>,
) -> SyncResult<Option<ClassifiedEvent>> {
    let on_cloud = fetched.is_some();
    let source = store.find_event(calendar.uuid, event_id)?;
    let on_db = source.is_some();
    let already_applied = store.event_already_applied(
        calendar.uuid,
        event_id,
        fetched.as_ref().and_then(|f| f.revision.as_deref()),
    )?;

    let state = match (on_cloud, on_db) {
        // Gone on both sides: nothing left to do.
        (false, false) => {
            tracing::debug!("event {} already deleted on both sides", event_id);
            return Ok(None);
        }
        // Idempotent redelivery of an applied change.
        (true, true) if already_applied => {
            tracing::debug!("event {} already applied, dropping redelivery", event_id);
            return Ok(None);
        }
        (true, false) => SyncState::Created,
        (true, true) if !already_applied => SyncState::Updated,
        (false, true) => SyncState::Deleted,
        // Unreachable over two booleans; reported rather than assumed.
        (on_cloud, on_db) => {
            return Err(SyncError::unsupported(
                event_id,
                format!("no classification for on_cloud={} on_db={}", on_cloud, on_db),
            ));
        }
    };

    let related = match &source {
        Some(record) => store.related_events(record)?,
        None => Vec::new(),
    };
    let (fields, revision) = match fetched {
        Some(f) => (Some(f.fields), f.revision),
        None => (None, None),
    };

    tracing::info!(
        "classified event {} on calendar {} as {:?}",
        event_id,
        calendar.uuid,
        state
    );

    Ok(Some(ClassifiedEvent {
        state,
        calendar: calendar.clone(),
        event_id: event_id.to_string(),
        source,
        related,
        fields,
        revision,
    }))
}

/// Delta reconciliation for providers whose notifications carry no event
/// id: union the ids currently on the calendar with the ids the store
/// tracks, then classify each one. Additions, deletions, and updates all
/// fall out of the same pass.
async fn reconcile_calendar(
    store: &RelationStore,
    calendar: &CalendarRecord,
    handle: &dyn CalendarApi,
) -> SyncResult<Vec<ClassifiedEvent>> {
    let listed = handle.list_events().await?;

    let mut order: Vec<String> = listed.iter().map(|e| e.id.clone()).collect();
    let mut by_id: HashMap<String, FetchedEvent> =
        listed.into_iter().map(|e| (e.id.clone(), e)).collect();

    for tracked in store.tracked_event_ids(calendar.uuid)? {
        if !by_id.contains_key(&tracked) {
            order.push(tracked);
        }
    }

    let mut classified = Vec::new();
    for event_id in order {
        // One bad event must not sink the rest of the reconciliation pass.
        match classify_event(store, calendar, &event_id, by_id.remove(&event_id)) {
            Ok(Some(event)) => classified.push(event),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                "skipping event {} during reconciliation: {} ({})",
                event_id,
                e,
                e.kind()
            ),
        }
    }

    tracing::info!(
        "reconciled calendar {}: {} events to sync",
        calendar.uuid,
        classified.len()
    );
    Ok(classified)
}
