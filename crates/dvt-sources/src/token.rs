//! Process-wide bearer token for the authenticated backend.
//!
//! Reads take the `RwLock` fast path. Refresh is serialized by a separate
//! mutex and re-checks the cache after acquiring it, so sessions starting
//! together trigger one token request between them.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::SourceError;

const DEFAULT_EXPIRES_IN_SECS: u64 = 300;

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

pub struct TokenProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_margin: Duration,
    cached: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("token_url", &self.token_url)
            .field("client_id", &"<REDACTED>")
            .field("client_secret", &"<REDACTED>")
            .finish()
    }
}

impl TokenProvider {
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_margin: Duration,
        accept_invalid_certs: bool,
    ) -> Self {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "token client builder failed; using defaults");
                reqwest::Client::new()
            });
        Self {
            http,
            token_url,
            client_id,
            client_secret,
            refresh_margin,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// A valid bearer token, refreshing if the cached one is missing or expired.
    pub async fn bearer(&self) -> Result<String, SourceError> {
        if let Some(t) = self.cached_valid().await {
            return Ok(t);
        }

        let _guard = self.refresh.lock().await;
        if let Some(t) = self.cached_valid().await {
            return Ok(t);
        }

        let fresh = self.request_token().await?;
        let value = fresh.value.clone();
        *self.cached.write().await = Some(fresh);
        tracing::debug!("bearer token refreshed");
        Ok(value)
    }

    /// Forget the cached token; the next `bearer()` refreshes.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn cached_valid(&self) -> Option<String> {
        let guard = self.cached.read().await;
        guard
            .as_ref()
            .filter(|t| Instant::now() < t.expires_at)
            .map(|t| t.value.clone())
    }

    async fn request_token(&self) -> Result<CachedToken, SourceError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(SourceError::Unauthorized(format!(
                "token endpoint rejected credentials: http {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(SourceError::from_status(status, "token"));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("token: {e}")))?;
        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
            .saturating_sub(self.refresh_margin);
        Ok(CachedToken {
            value: body.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}
