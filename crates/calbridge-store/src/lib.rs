//! SQLite-backed relation store.
//!
//! Single source of truth for calendar linkage, event correspondence, and
//! subscription bookkeeping. All conflicting writes serialize behind the
//! connection lock; multi-row lifecycle operations run in one transaction.

pub mod store;
pub mod types;

pub use store::RelationStore;
pub use types::{
    AccountRecord, CalendarRecord, EventRecord, EventStatus, SubscriptionRecord,
};
