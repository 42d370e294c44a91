//! Mock provider implementations for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use calbridge_convert::{FieldMap, FieldValue, Moment};
use calbridge_core::{
    AccountApi, CalendarApi, FetchedEvent, ProviderKind, ProviderSubscription, RemoteEvent,
    SyncError, SyncResult, TokenSet,
};

/// A minimal field map with a title and a one-hour time range.
pub fn fields_with_title(title: &str) -> FieldMap {
    let start = Utc::now();
    let mut fields = FieldMap::new();
    fields.insert("title", FieldValue::Text(title.to_string()));
    fields.insert("start", FieldValue::Moment(Moment::At(start)));
    fields.insert("end", FieldValue::Moment(Moment::At(start + Duration::hours(1))));
    fields
}

/// Scriptable account mock.
pub struct MockAccount {
    mail: String,
    kind: ProviderKind,
    refresh_calls: AtomicUsize,
    fail: Mutex<Option<SyncError>>,
    rotate: Mutex<Option<TokenSet>>,
}

impl MockAccount {
    fn new(kind: ProviderKind) -> Self {
        Self {
            mail: format!("user@{}.example.com", kind),
            kind,
            refresh_calls: AtomicUsize::new(0),
            fail: Mutex::new(None),
            rotate: Mutex::new(None),
        }
    }

    /// Make the next `refresh()` call fail with the given error.
    pub fn fail_next_refresh(&self, err: SyncError) {
        *self.fail.lock() = Some(err);
    }

    /// Make the next `refresh()` call report a rotated token set.
    pub fn rotate_on_next_refresh(&self, tokens: TokenSet) {
        *self.rotate.lock() = Some(tokens);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Inherent mirror of the trait method, so tests don't need the trait
    /// in scope.
    pub fn mail(&self) -> String {
        self.mail.clone()
    }
}

#[async_trait]
impl AccountApi for MockAccount {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn mail(&self) -> String {
        self.mail.clone()
    }

    fn authorization(&self) -> String {
        "Bearer mock".to_string()
    }

    async fn refresh(&self) -> SyncResult<Option<TokenSet>> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail.lock().take() {
            return Err(err);
        }
        Ok(self.rotate.lock().take())
    }
}

/// Scriptable calendar mock with an in-memory "cloud" event set.
pub struct MockCalendar {
    uuid: Uuid,
    kind: ProviderKind,
    account: Arc<MockAccount>,
    renewable: bool,
    cloud: Mutex<HashMap<String, (FieldMap, Option<String>)>>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, VecDeque<SyncError>>>,
    panic_next: AtomicBool,
    counter: AtomicU64,
}

impl MockCalendar {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind,
            account: Arc::new(MockAccount::new(kind)),
            // Mirrors the real providers: Graph renews, Google recreates.
            renewable: matches!(kind, ProviderKind::Outlook),
            cloud: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            panic_next: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }

    /// Inherent mirror of the trait method, so tests don't need the trait
    /// in scope.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn account(&self) -> Arc<MockAccount> {
        self.account.clone()
    }

    /// Seed an event into the mock provider's state.
    pub fn put_event(&self, id: &str, fields: FieldMap, revision: Option<&str>) {
        self.cloud
            .lock()
            .insert(id.to_string(), (fields, revision.map(str::to_string)));
    }

    pub fn has_event(&self, id: &str) -> bool {
        self.cloud.lock().contains_key(id)
    }

    pub fn event_count(&self) -> usize {
        self.cloud.lock().len()
    }

    /// Queue a failure for the next call of the given operation
    /// ("get", "list", "create", "update", "delete", "subscribe",
    /// "renew", "unsubscribe").
    pub fn inject_failure(&self, op: &'static str, err: SyncError) {
        self.failures.lock().entry(op).or_default().push_back(err);
    }

    /// Make the next remote call panic (boundary-recovery tests).
    pub fn panic_on_next_call(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls whose label starts with `op`.
    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(op)).count()
    }

    fn guard(&self, op: &'static str, detail: &str) -> SyncResult<()> {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("injected provider panic during {}", op);
        }
        if detail.is_empty() {
            self.calls.lock().push(op.to_string());
        } else {
            self.calls.lock().push(format!("{}:{}", op, detail));
        }
        if let Some(err) = self.failures.lock().get_mut(op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarApi for MockCalendar {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn account(&self) -> Arc<dyn AccountApi> {
        self.account.clone()
    }

    async fn get_event(&self, event_id: &str) -> SyncResult<Option<FetchedEvent>> {
        self.guard("get", event_id)?;
        Ok(self.cloud.lock().get(event_id).map(|(fields, revision)| FetchedEvent {
            id: event_id.to_string(),
            revision: revision.clone(),
            fields: fields.clone(),
        }))
    }

    async fn list_events(&self) -> SyncResult<Vec<FetchedEvent>> {
        self.guard("list", "")?;
        Ok(self
            .cloud
            .lock()
            .iter()
            .map(|(id, (fields, revision))| FetchedEvent {
                id: id.clone(),
                revision: revision.clone(),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn create_event(&self, fields: &FieldMap) -> SyncResult<RemoteEvent> {
        self.guard("create", "")?;
        let id = format!("{}-ev-{}", self.kind, self.next_id());
        let revision = Some("r1".to_string());
        self.cloud
            .lock()
            .insert(id.clone(), (fields.clone(), revision.clone()));
        Ok(RemoteEvent { id, revision })
    }

    async fn update_event(&self, event_id: &str, fields: &FieldMap) -> SyncResult<RemoteEvent> {
        self.guard("update", event_id)?;
        let mut cloud = self.cloud.lock();
        let Some(entry) = cloud.get_mut(event_id) else {
            return Err(SyncError::NotFound(format!("event {}", event_id)));
        };
        let revision = Some(format!("r{}", self.next_id() + 2));
        *entry = (fields.clone(), revision.clone());
        Ok(RemoteEvent { id: event_id.to_string(), revision })
    }

    async fn delete_event(&self, event_id: &str) -> SyncResult<()> {
        self.guard("delete", event_id)?;
        if self.cloud.lock().remove(event_id).is_none() {
            return Err(SyncError::NotFound(format!("event {}", event_id)));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _callback_url: &str,
        _correlation: Uuid,
    ) -> SyncResult<ProviderSubscription> {
        self.guard("subscribe", "")?;
        Ok(ProviderSubscription {
            provider_id: format!("sub-{}", self.next_id()),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    fn supports_renewal(&self) -> bool {
        self.renewable
    }

    async fn renew_subscription(&self, provider_sub_id: &str) -> SyncResult<DateTime<Utc>> {
        self.guard("renew", provider_sub_id)?;
        if !self.renewable {
            return Err(SyncError::Permanent("renewal not supported".to_string()));
        }
        Ok(Utc::now() + Duration::hours(2))
    }

    async fn unsubscribe(&self, provider_sub_id: &str) -> SyncResult<()> {
        self.guard("unsubscribe", provider_sub_id)?;
        Ok(())
    }
}
