//! OAuth token state for a provider account.

use serde::{Deserialize, Serialize};

/// Token set for OAuth2 authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSet {
    /// Access token for API requests.
    pub access_token: String,

    /// Optional refresh token for token renewal.
    pub refresh_token: Option<String>,

    /// Token type reported by the provider (normally "Bearer").
    pub token_type: String,

    /// Token expiration timestamp (Unix timestamp, seconds).
    pub expires_at: i64,
}

impl TokenSet {
    /// Check if the token needs refresh (within 5 minutes of expiry).
    pub fn needs_refresh(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        now >= self.expires_at - 300
    }

    /// Check if the token is expired.
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        now >= self.expires_at
    }

    /// Value for the Authorization request header.
    pub fn authorization(&self) -> String {
        let token_type = if self.token_type.is_empty() {
            "Bearer"
        } else {
            &self.token_type
        };
        format!("{} {}", token_type, self.access_token)
    }
}
