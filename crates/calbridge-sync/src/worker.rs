//! The fan-out synchronization worker.
//!
//! One bounded intake queue feeds a single sequential consumer. Each
//! classified event fans out to every related target; a target that fails
//! transiently moves into its own spawned retry task (which owns all of
//! its retry state, so nothing is shared mutably with the consumer), while
//! permanent failures mark the source event broken immediately. Targets
//! never block each other.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use calbridge_convert::FieldMap;
use calbridge_core::{CalendarApi, SyncError, SyncResult};
use calbridge_store::{EventRecord, RelationStore};

use crate::classify::{ClassifiedEvent, SyncState};
use crate::registry::ProviderRegistry;
use crate::retry::RetryConfig;

/// Submission side of the bounded intake queue.
///
/// `submit` waits while the queue is full, which is the backpressure the
/// notification handlers lean on. Distinct events enter the consumer in
/// FIFO order; there is no ordering between retries and fresh events.
#[derive(Clone)]
pub struct SyncIntake {
    tx: mpsc::Sender<ClassifiedEvent>,
}

impl SyncIntake {
    pub async fn submit(&self, event: ClassifiedEvent) -> SyncResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| SyncError::Permanent("sync worker has shut down".to_string()))
    }
}

/// The sequential consumer behind the intake queue.
pub struct SyncWorker {
    rx: mpsc::Receiver<ClassifiedEvent>,
    store: Arc<RelationStore>,
    registry: Arc<ProviderRegistry>,
    retry: RetryConfig,
    tracker: TaskTracker,
}

impl SyncWorker {
    pub fn new(
        store: Arc<RelationStore>,
        registry: Arc<ProviderRegistry>,
        retry: RetryConfig,
        queue_capacity: usize,
    ) -> (SyncIntake, SyncWorker) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let worker = SyncWorker {
            rx,
            store,
            registry,
            retry,
            tracker: TaskTracker::new(),
        };
        (SyncIntake { tx }, worker)
    }

    /// Consume until every intake handle is dropped, then drain what is
    /// already queued and wait for in-flight retry tasks to finish. No
    /// enqueued event is dropped on shutdown, and no retry is cancelled
    /// mid-application.
    pub async fn run(mut self) {
        tracing::info!("sync worker started");
        while let Some(event) = self.rx.recv().await {
            self.process(event).await;
        }
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("sync worker drained and stopped");
    }

    async fn process(&self, event: ClassifiedEvent) {
        tracing::debug!(
            "processing {:?} for event {} on calendar {}",
            event.state,
            event.event_id,
            event.calendar.uuid
        );
        match event.state {
            SyncState::Created => self.fan_out_create(event).await,
            SyncState::Updated => self.fan_out_update(event).await,
            SyncState::Deleted => self.fan_out_delete(event).await,
            SyncState::Unsupported => {
                tracing::error!(
                    "unsupported state reached the worker for event {}",
                    event.event_id
                );
            }
        }
    }

    async fn fan_out_create(&self, event: ClassifiedEvent) {
        let Some(fields) = event.fields else {
            tracing::error!("created event {} arrived without fields", event.event_id);
            return;
        };

        let source_internal = match self.store.insert_event(
            event.calendar.uuid,
            &event.event_id,
            None,
            event.revision.as_deref(),
        ) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("failed to record source event {}: {}", event.event_id, e);
                return;
            }
        };

        let targets = match self.store.related_calendars(&event.calendar) {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!("failed to resolve targets of {}: {}", event.event_id, e);
                return;
            }
        };

        for target in targets {
            let Some(handle) = self.registry.get(target.uuid) else {
                tracing::warn!("no provider handle for linked calendar {}", target.uuid);
                continue;
            };
            let task = TargetTask {
                handle,
                store: self.store.clone(),
                source_internal,
                event_id: event.event_id.clone(),
                action: TargetAction::Create {
                    target_calendar: target.uuid,
                    fields: fields.clone(),
                },
            };
            self.dispatch(task).await;
        }
    }

    async fn fan_out_update(&self, event: ClassifiedEvent) {
        let Some(fields) = event.fields else {
            tracing::error!("updated event {} arrived without fields", event.event_id);
            return;
        };
        let Some(source) = event.source else {
            tracing::error!("updated event {} arrived without a source record", event.event_id);
            return;
        };

        for record in event.related {
            let Some(handle) = self.registry.get(record.calendar_uuid) else {
                tracing::warn!("no provider handle for linked calendar {}", record.calendar_uuid);
                continue;
            };
            let task = TargetTask {
                handle,
                store: self.store.clone(),
                source_internal: source.internal_id,
                event_id: event.event_id.clone(),
                action: TargetAction::Update { record, fields: fields.clone() },
            };
            self.dispatch(task).await;
        }

        // Refresh the idempotence marker so a redelivery of this same
        // change classifies as a no-op.
        if let Err(e) = self
            .store
            .update_event_revision(source.internal_id, event.revision.as_deref())
        {
            tracing::error!("failed to refresh revision of {}: {}", event.event_id, e);
        }
    }

    async fn fan_out_delete(&self, event: ClassifiedEvent) {
        let Some(source) = event.source else {
            tracing::error!("deleted event {} arrived without a source record", event.event_id);
            return;
        };

        let mut all_applied = true;
        for record in event.related {
            let Some(handle) = self.registry.get(record.calendar_uuid) else {
                tracing::warn!("no provider handle for linked calendar {}", record.calendar_uuid);
                all_applied = false;
                continue;
            };
            let task = TargetTask {
                handle,
                store: self.store.clone(),
                source_internal: source.internal_id,
                event_id: event.event_id.clone(),
                action: TargetAction::Delete { record },
            };
            if !self.dispatch(task).await {
                all_applied = false;
            }
        }

        // The source record only goes once every edge is gone; with
        // retries still in flight it stays put, and the next
        // reconciliation pass finishes the job.
        if all_applied {
            if let Err(e) = self.store.delete_event(source.internal_id) {
                tracing::error!("failed to drop source record of {}: {}", event.event_id, e);
            }
        }
    }

    /// Apply one target once; on transient failure hand the task over to
    /// its own retry loop. Returns whether the target was applied now.
    async fn dispatch(&self, task: TargetTask) -> bool {
        match task.run_once().await {
            Ok(()) => true,
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    "transient failure applying event {} to calendar {}: {}; backing off",
                    task.event_id,
                    task.target_calendar(),
                    e
                );
                let _ = self.tracker.spawn(task.retry(self.retry.clone()));
                false
            }
            Err(e) => {
                task.mark_broken(&e);
                false
            }
        }
    }
}

enum TargetAction {
    Create { target_calendar: Uuid, fields: FieldMap },
    Update { record: EventRecord, fields: FieldMap },
    Delete { record: EventRecord },
}

/// One fan-out target of one classified event.
///
/// The task owns everything its retries touch (handle, fields, store
/// references, attempt counter), so retry state is never shared with the
/// consumer loop.
struct TargetTask {
    handle: Arc<dyn CalendarApi>,
    store: Arc<RelationStore>,
    source_internal: i64,
    event_id: String,
    action: TargetAction,
}

impl TargetTask {
    fn target_calendar(&self) -> Uuid {
        match &self.action {
            TargetAction::Create { target_calendar, .. } => *target_calendar,
            TargetAction::Update { record, .. } | TargetAction::Delete { record } => {
                record.calendar_uuid
            }
        }
    }

    /// Convert, apply remotely, and record the relation edge.
    async fn run_once(&self) -> SyncResult<()> {
        match &self.action {
            TargetAction::Create { target_calendar, fields } => {
                let remote = self.handle.create_event(fields).await?;
                self.store.insert_event(
                    *target_calendar,
                    &remote.id,
                    Some(self.source_internal),
                    remote.revision.as_deref(),
                )?;
                Ok(())
            }
            TargetAction::Update { record, fields } => {
                let remote = self
                    .handle
                    .update_event(&record.provider_event_id, fields)
                    .await?;
                self.store
                    .update_event_revision(record.internal_id, remote.revision.as_deref())?;
                Ok(())
            }
            TargetAction::Delete { record } => {
                match self.handle.delete_event(&record.provider_event_id).await {
                    Ok(()) => {}
                    // Already gone on the target: the outcome we wanted.
                    Err(SyncError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                self.store.delete_event(record.internal_id)?;
                Ok(())
            }
        }
    }

    /// Independent retry loop with exponential backoff, bounded by the
    /// configured attempt count. Exhaustion marks the event broken.
    async fn retry(self, retry: RetryConfig) {
        for attempt in 0..retry.max_retries {
            tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            match self.run_once().await {
                Ok(()) => {
                    tracing::info!(
                        "event {} applied to calendar {} after {} retries",
                        self.event_id,
                        self.target_calendar(),
                        attempt + 1
                    );
                    return;
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        "retry {} of {} failed for event {} on calendar {}: {}",
                        attempt + 1,
                        retry.max_retries,
                        self.event_id,
                        self.target_calendar(),
                        e
                    );
                }
                Err(e) => {
                    self.mark_broken(&e);
                    return;
                }
            }
        }
        self.mark_broken(&SyncError::Transient(format!(
            "{} retries exhausted",
            retry.max_retries
        )));
    }

    /// Mark the source event permanently failed. The store guarantees the
    /// mark lands exactly once, no matter how many targets report it.
    fn mark_broken(&self, err: &SyncError) {
        match self.store.mark_event_broken(self.source_internal) {
            Ok(true) => tracing::error!(
                "event {} marked broken after failure on calendar {}: {} ({})",
                self.event_id,
                self.target_calendar(),
                err,
                err.kind()
            ),
            Ok(false) => tracing::debug!(
                "event {} was already marked broken",
                self.event_id
            ),
            Err(store_err) => tracing::error!(
                "failed to mark event {} broken: {}",
                self.event_id,
                store_err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::testing::{fields_with_title, MockCalendar};
    use calbridge_core::ProviderKind;
    use calbridge_store::{CalendarRecord, EventStatus};

    struct Fixture {
        store: Arc<RelationStore>,
        registry: Arc<ProviderRegistry>,
        origin: CalendarRecord,
        targets: Vec<Arc<MockCalendar>>,
    }

    fn fixture(linked: usize) -> Fixture {
        let store = Arc::new(RelationStore::in_memory().unwrap());
        let registry = Arc::new(ProviderRegistry::new());

        let origin_mock = Arc::new(MockCalendar::new(ProviderKind::Outlook));
        let origin = CalendarRecord {
            uuid: origin_mock.uuid(),
            provider: ProviderKind::Outlook,
            provider_id: "cal-origin".into(),
            account_mail: "user@outlook.example.com".into(),
            principal: None,
        };
        store.save_calendar(&origin).unwrap();
        registry.register(origin_mock);

        let mut targets = Vec::new();
        for i in 0..linked {
            let mock = Arc::new(MockCalendar::new(ProviderKind::Google));
            store
                .save_calendar(&CalendarRecord {
                    uuid: mock.uuid(),
                    provider: ProviderKind::Google,
                    provider_id: format!("cal-{}", i),
                    account_mail: "user@google.example.com".into(),
                    principal: Some(origin.uuid),
                })
                .unwrap();
            registry.register(mock.clone());
            targets.push(mock);
        }

        Fixture { store, registry, origin, targets }
    }

    fn created_event(f: &Fixture, event_id: &str) -> ClassifiedEvent {
        ClassifiedEvent {
            state: SyncState::Created,
            calendar: f.origin.clone(),
            event_id: event_id.to_string(),
            source: None,
            related: Vec::new(),
            fields: Some(fields_with_title("fanned out")),
            revision: Some("r1".to_string()),
        }
    }

    async fn run_to_completion(f: &Fixture, retry: RetryConfig, events: Vec<ClassifiedEvent>) {
        let (intake, worker) =
            SyncWorker::new(f.store.clone(), f.registry.clone(), retry, 8);
        let handle = tokio::spawn(worker.run());
        for event in events {
            intake.submit(event).await.unwrap();
        }
        drop(intake);
        handle.await.unwrap();
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(2, 5, 20)
    }

    #[tokio::test]
    async fn created_event_fans_out_to_every_linked_calendar() {
        let f = fixture(2);

        run_to_completion(&f, fast_retry(), vec![created_event(&f, "ev-1")]).await;

        for target in &f.targets {
            assert_eq!(target.event_count(), 1);
            assert_eq!(target.call_count("create"), 1);
        }

        let source = f.store.find_event(f.origin.uuid, "ev-1").unwrap().unwrap();
        assert_eq!(source.status, EventStatus::Synced);
        assert_eq!(source.revision.as_deref(), Some("r1"));
        // Exactly N new relation edges, one per target.
        assert_eq!(f.store.related_events(&source).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn permanent_target_failure_skips_the_edge_and_marks_broken() {
        let f = fixture(2);
        f.targets[0].inject_failure("create", SyncError::Permanent("rejected".into()));

        run_to_completion(&f, fast_retry(), vec![created_event(&f, "ev-1")]).await;

        assert_eq!(f.targets[0].event_count(), 0);
        assert_eq!(f.targets[1].event_count(), 1);

        let source = f.store.find_event(f.origin.uuid, "ev-1").unwrap().unwrap();
        assert_eq!(source.status, EventStatus::Broken);
        // No edge for the failed target, one for the healthy sibling.
        assert_eq!(f.store.related_events(&source).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transient_target_failure_is_retried_to_success() {
        let f = fixture(1);
        f.targets[0].inject_failure("create", SyncError::Transient("503".into()));

        run_to_completion(&f, fast_retry(), vec![created_event(&f, "ev-1")]).await;

        // Initial attempt plus one retry.
        assert_eq!(f.targets[0].call_count("create"), 2);
        assert_eq!(f.targets[0].event_count(), 1);

        let source = f.store.find_event(f.origin.uuid, "ev-1").unwrap().unwrap();
        assert_eq!(source.status, EventStatus::Synced);
        assert_eq!(f.store.related_events(&source).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_the_event_broken() {
        let f = fixture(1);
        for _ in 0..3 {
            f.targets[0].inject_failure("create", SyncError::Transient("503".into()));
        }

        // max_retries = 2, so 1 initial + 2 retries all fail.
        run_to_completion(&f, fast_retry(), vec![created_event(&f, "ev-1")]).await;

        assert_eq!(f.targets[0].call_count("create"), 3);
        assert_eq!(f.targets[0].event_count(), 0);

        let source = f.store.find_event(f.origin.uuid, "ev-1").unwrap().unwrap();
        assert_eq!(source.status, EventStatus::Broken);
        assert!(f.store.related_events(&source).unwrap().is_empty());
    }

    #[tokio::test]
    async fn updated_event_rewrites_every_target_and_the_marker() {
        let f = fixture(1);
        let target = &f.targets[0];

        let source_id =
            f.store.insert_event(f.origin.uuid, "ev-1", None, Some("r1")).unwrap();
        target.put_event("mirror-1", fields_with_title("old title"), Some("r1"));
        f.store
            .insert_event(target.uuid(), "mirror-1", Some(source_id), Some("r1"))
            .unwrap();

        let source = f.store.find_event(f.origin.uuid, "ev-1").unwrap().unwrap();
        let related = f.store.related_events(&source).unwrap();
        let event = ClassifiedEvent {
            state: SyncState::Updated,
            calendar: f.origin.clone(),
            event_id: "ev-1".into(),
            source: Some(source.clone()),
            related,
            fields: Some(fields_with_title("new title")),
            revision: Some("r2".to_string()),
        };

        run_to_completion(&f, fast_retry(), vec![event]).await;

        assert_eq!(target.call_count("update"), 1);
        let source = f.store.find_event(f.origin.uuid, "ev-1").unwrap().unwrap();
        assert_eq!(source.revision.as_deref(), Some("r2"));
        let mirror = f.store.find_event(target.uuid(), "mirror-1").unwrap().unwrap();
        assert_ne!(mirror.revision.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn deleted_event_removes_targets_and_edges() {
        let f = fixture(2);

        let source_id = f.store.insert_event(f.origin.uuid, "ev-1", None, Some("r1")).unwrap();
        for (i, target) in f.targets.iter().enumerate() {
            let mirror_id = format!("mirror-{}", i);
            target.put_event(&mirror_id, fields_with_title("doomed"), Some("r1"));
            f.store
                .insert_event(target.uuid(), &mirror_id, Some(source_id), Some("r1"))
                .unwrap();
        }

        let source = f.store.find_event(f.origin.uuid, "ev-1").unwrap().unwrap();
        let related = f.store.related_events(&source).unwrap();
        let event = ClassifiedEvent {
            state: SyncState::Deleted,
            calendar: f.origin.clone(),
            event_id: "ev-1".into(),
            source: Some(source),
            related,
            fields: None,
            revision: None,
        };

        run_to_completion(&f, fast_retry(), vec![event]).await;

        for target in &f.targets {
            assert_eq!(target.event_count(), 0);
        }
        // Edges and the source record are gone: a redelivery is a no-op.
        assert!(f.store.find_event(f.origin.uuid, "ev-1").unwrap().is_none());
        for (i, target) in f.targets.iter().enumerate() {
            assert!(f
                .store
                .find_event(target.uuid(), &format!("mirror-{}", i))
                .unwrap()
                .is_none());
        }
    }

    #[tokio::test]
    async fn deleting_an_already_gone_target_still_drops_the_edge() {
        let f = fixture(1);
        let target = &f.targets[0];

        let source_id = f.store.insert_event(f.origin.uuid, "ev-1", None, None).unwrap();
        // Edge exists in the store, but the event is not on the provider.
        f.store
            .insert_event(target.uuid(), "mirror-1", Some(source_id), None)
            .unwrap();

        let source = f.store.find_event(f.origin.uuid, "ev-1").unwrap().unwrap();
        let related = f.store.related_events(&source).unwrap();
        let event = ClassifiedEvent {
            state: SyncState::Deleted,
            calendar: f.origin.clone(),
            event_id: "ev-1".into(),
            source: Some(source),
            related,
            fields: None,
            revision: None,
        };

        run_to_completion(&f, fast_retry(), vec![event]).await;

        assert!(f.store.find_event(target.uuid(), "mirror-1").unwrap().is_none());
        assert!(f.store.find_event(f.origin.uuid, "ev-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_drains_everything_already_enqueued() {
        let f = fixture(1);

        let events = (0..5).map(|i| created_event(&f, &format!("ev-{}", i))).collect();
        run_to_completion(&f, fast_retry(), events).await;

        assert_eq!(f.targets[0].event_count(), 5);
    }

    // Notification all the way through: classify, enqueue, fan out.
    #[tokio::test]
    async fn notification_flows_from_classifier_to_mirrored_events() {
        use crate::classify::{ChangeNotification, Classifier};
        use calbridge_store::SubscriptionRecord;
        use uuid::Uuid;

        let f = fixture(2);
        let origin_mock = f.registry.get(f.origin.uuid).unwrap();

        let subscription = Uuid::new_v4();
        f.store
            .save_subscription(&SubscriptionRecord {
                correlation: subscription,
                calendar_uuid: f.origin.uuid,
                provider_sub_id: "sub-1".into(),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            })
            .unwrap();

        // A new event appears on the origin calendar and a notification
        // names it.
        let created = origin_mock
            .create_event(&fields_with_title("board meeting"))
            .await
            .unwrap();
        let origin_event_id = created.id;

        let classifier = Classifier::new(f.store.clone(), f.registry.clone());
        let classified = classifier
            .classify(ChangeNotification {
                subscription,
                event_id: Some(origin_event_id.clone()),
            })
            .await
            .unwrap();
        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].state, SyncState::Created);

        run_to_completion(&f, fast_retry(), classified).await;

        // One mirror per linked calendar, one relation edge each.
        for target in &f.targets {
            assert_eq!(target.event_count(), 1);
        }
        let source = f.store.find_event(f.origin.uuid, &origin_event_id).unwrap().unwrap();
        assert_eq!(f.store.related_events(&source).unwrap().len(), 2);

        // Redelivering the same notification is now a no-op.
        let again = classifier
            .classify(ChangeNotification {
                subscription,
                event_id: Some(origin_event_id),
            })
            .await
            .unwrap();
        assert!(again.is_empty());
    }
}
