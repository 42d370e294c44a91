//! Microsoft Outlook (Graph) provider for calbridge.
//!
//! Implements the account and calendar capability traits on top of the
//! Microsoft Graph REST API. Graph notifications name the changed event
//! and subscriptions renew in place, so the sync engine takes the direct
//! classification path for this provider.

pub mod account;
pub mod calendar;
pub mod client;
pub mod types;

pub use account::OutlookAccount;
pub use calendar::OutlookCalendar;
pub use client::OutlookCalendarClient;
pub use types::{GraphAttendee, GraphDateTime, ItemBody, Location, OutlookEvent};
