//! Google Calendar provider for calbridge.
//!
//! Implements the account and calendar capability traits on top of the
//! Calendar v3 REST API. Google push channels carry no per-event payload
//! and cannot be renewed in place, which shapes how the sync engine treats
//! this provider (delta reconciliation, delete-then-recreate renewal).

pub mod account;
pub mod calendar;
pub mod client;
pub mod types;

pub use account::GoogleAccount;
pub use calendar::GoogleCalendar;
pub use client::GoogleCalendarClient;
pub use types::{GoogleAttendee, GoogleEvent, GoogleEventTime};
