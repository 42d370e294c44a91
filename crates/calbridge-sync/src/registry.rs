//! Runtime lookup of provider calendar handles by correlation key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use calbridge_core::CalendarApi;

/// Maps calendar correlation keys to their live provider handles.
///
/// The relation store knows which calendars exist; this registry knows how
/// to talk to them. The application wires both up at startup and whenever
/// an account is connected or removed.
#[derive(Default)]
pub struct ProviderRegistry {
    calendars: RwLock<HashMap<Uuid, Arc<dyn CalendarApi>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Arc<dyn CalendarApi>) {
        self.calendars.write().insert(handle.uuid(), handle);
    }

    pub fn get(&self, uuid: Uuid) -> Option<Arc<dyn CalendarApi>> {
        self.calendars.read().get(&uuid).cloned()
    }

    pub fn remove(&self, uuid: Uuid) -> Option<Arc<dyn CalendarApi>> {
        self.calendars.write().remove(&uuid)
    }

    pub fn len(&self) -> usize {
        self.calendars.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calendars.read().is_empty()
    }
}
