//! The calbridge synchronization engine.
//!
//! Three cooperating pieces keep linked calendars consistent:
//! - the `Classifier` turns an ambiguous provider notification into a
//!   definite Created/Updated/Deleted classification by comparing live
//!   provider state against the relation store
//! - the `SyncWorker` consumes classified events from a bounded queue and
//!   applies each one to every related calendar, retrying transient target
//!   failures with exponential backoff
//! - the `SubscriptionManager` keeps provider push subscriptions alive and
//!   tears them down transactionally

pub mod classify;
pub mod registry;
pub mod retry;
pub mod subscription;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{ChangeNotification, ClassifiedEvent, Classifier, SyncState};
pub use registry::ProviderRegistry;
pub use retry::RetryConfig;
pub use subscription::SubscriptionManager;
pub use worker::{SyncIntake, SyncWorker};
