//! Shared foundation for the calbridge synchronization engine.
//!
//! This crate provides what every other calbridge crate leans on:
//! - the `SyncError` taxonomy that drives classification and retry policy
//! - OAuth token state with refresh bookkeeping
//! - the provider capability traits implemented by each calendar backend
//! - file-based TOML configuration

pub mod config;
pub mod error;
pub mod provider;
pub mod token;

pub use config::{Config, OAuthClient, SyncSettings};
pub use error::{classify_status, ReqwestErrorExt, SyncError, SyncResult};
pub use provider::{
    AccountApi, CalendarApi, FetchedEvent, ProviderKind, ProviderSubscription, RemoteEvent,
};
pub use token::TokenSet;

use anyhow::Result;

/// Initialize tracing for the synchronization service.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("calbridge core initialized");
    Ok(())
}
