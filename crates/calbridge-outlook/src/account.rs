//! Microsoft account with OAuth token refresh.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::instrument;

use calbridge_core::{
    AccountApi, ProviderKind, ReqwestErrorExt, SyncError, SyncResult, TokenSet,
};

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default offline_access";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn token_url(tenant: &str) -> String {
    format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", tenant)
}

/// A Microsoft identity with interior-mutable token state.
pub struct OutlookAccount {
    mail: String,
    client_id: String,
    client_secret: String,
    token_url: String,
    http: reqwest::Client,
    tokens: RwLock<TokenSet>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: u64,
    token_type: String,
    refresh_token: Option<String>,
}

impl OutlookAccount {
    pub fn new(
        mail: &str,
        client_id: &str,
        client_secret: &str,
        tenant: &str,
        tokens: TokenSet,
    ) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ReqwestErrorExt::into_sync_error)?;

        Ok(Self {
            mail: mail.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_url: token_url(tenant),
            http,
            tokens: RwLock::new(tokens),
        })
    }

    #[cfg(test)]
    pub fn new_with_token_url(
        mail: &str,
        client_id: &str,
        client_secret: &str,
        tokens: TokenSet,
        token_url: &str,
    ) -> Self {
        Self {
            mail: mail.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_url: token_url.to_string(),
            http: reqwest::Client::new(),
            tokens: RwLock::new(tokens),
        }
    }
}

#[async_trait]
impl AccountApi for OutlookAccount {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Outlook
    }

    fn mail(&self) -> String {
        self.mail.clone()
    }

    fn authorization(&self) -> String {
        self.tokens.read().authorization()
    }

    #[instrument(skip(self), fields(mail = %self.mail), level = "info")]
    async fn refresh(&self) -> SyncResult<Option<TokenSet>> {
        let (needs_refresh, refresh_token) = {
            let tokens = self.tokens.read();
            (tokens.needs_refresh(), tokens.refresh_token.clone())
        };
        if !needs_refresh {
            return Ok(None);
        }

        let refresh_token = refresh_token
            .ok_or_else(|| SyncError::Permanent("account has no refresh token".to_string()))?;

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .map_err(ReqwestErrorExt::into_sync_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(calbridge_core::classify_status(status, detail));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Permanent(format!("invalid token response: {}", e)))?;

        let rotated = TokenSet {
            access_token: refreshed.access_token,
            // Microsoft rotates the refresh token on every grant; fall back
            // to the old one only when the answer omits it.
            refresh_token: refreshed.refresh_token.or(Some(refresh_token)),
            token_type: refreshed.token_type,
            expires_at: chrono::Utc::now().timestamp() + refreshed.expires_in as i64,
        };

        *self.tokens.write() = rotated.clone();
        tracing::info!("refreshed token for {}", self.mail);
        Ok(Some(rotated))
    }
}
