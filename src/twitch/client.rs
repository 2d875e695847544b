use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::error::ApiError;
use super::token::{CachedToken, TokenCache};
use super::types::{ClipQuery, ClipsPage, ClipsResponse, TokenResponse};
use super::ClipsApi;
use crate::retry::{self, RetryAction, RetryConfig};

pub const DEFAULT_API_BASE: &str = "https://api.twitch.tv/helix";
pub const DEFAULT_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Connection settings for [`HelixClient`].
#[derive(Clone)]
pub struct HelixSettings {
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
    pub token_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl std::fmt::Debug for HelixSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelixSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("token_url", &self.token_url)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

/// Helix client authenticated with an app access token.
///
/// The token is fetched on first use and refreshed ahead of its advertised
/// expiry. A 401 from the clips endpoint invalidates it, fetches a new one
/// and repeats the request. That refresh happens at most once per
/// `list_clips` call, backoff retries included.
pub struct HelixClient {
    http: Client,
    settings: HelixSettings,
    tokens: TokenCache,
}

impl std::fmt::Debug for HelixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelixClient")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl HelixClient {
    pub fn new(settings: HelixSettings) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .user_agent(concat!("clipsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            settings,
            tokens: TokenCache::default(),
        })
    }

    /// Return a valid access token, requesting a new one if the cached one
    /// is missing or about to expire.
    async fn access_token(&self) -> Result<String, ApiError> {
        let mut slot = self.tokens.lock().await;
        let now = Utc::now();
        if let Some(token) = slot.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        let token = self.request_token(now).await?;
        let access_token = token.access_token.clone();
        *slot = Some(token);
        Ok(access_token)
    }

    async fn request_token(&self, now: DateTime<Utc>) -> Result<CachedToken, ApiError> {
        tracing::debug!(url = %self.settings.token_url, "Requesting app access token");
        let response = self
            .http
            .post(&self.settings.token_url)
            .form(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::TokenRequest {
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse = decode(&body, "token response")?;
        tracing::info!(expires_in = token.expires_in, "Obtained app access token");
        Ok(CachedToken::new(token.access_token, token.expires_in, now))
    }

    /// One GET against `/clips`. A 401 maps to [`ApiError::AuthExpired`].
    async fn fetch_page(&self, token: &str, query: &ClipQuery<'_>) -> Result<ClipsPage, ApiError> {
        let url = format!("{}/clips", self.settings.api_base.trim_end_matches('/'));
        let first = query.first.to_string();
        let mut params = vec![
            ("broadcaster_id", query.broadcaster_id),
            ("first", first.as_str()),
            ("started_at", query.started_at),
        ];
        if let Some(after) = query.after {
            params.push(("after", after));
        }

        let response = self
            .http
            .get(&url)
            .query(&params)
            .bearer_auth(token)
            .header("Client-Id", &self.settings.client_id)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::AuthExpired(body));
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let page: ClipsResponse = decode(&body, "clips page")?;
        for clip in &page.data {
            if DateTime::parse_from_rfc3339(&clip.created_at).is_err() {
                return Err(ApiError::MalformedResponse(format!(
                    "clip {} has unparseable created_at {:?}",
                    clip.id, clip.created_at
                )));
            }
        }
        Ok(page.into())
    }

    async fn list_clips_once(
        &self,
        query: &ClipQuery<'_>,
        refreshed: &AtomicBool,
    ) -> Result<ClipsPage, ApiError> {
        let token = self.access_token().await?;
        match self.fetch_page(&token, query).await {
            Err(ApiError::AuthExpired(body)) if !refreshed.swap(true, Ordering::SeqCst) => {
                tracing::warn!(
                    response = %body,
                    "Access token rejected, refreshing credentials"
                );
                self.tokens.invalidate().await;
                let token = self.access_token().await?;
                self.fetch_page(&token, query).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl ClipsApi for HelixClient {
    async fn list_clips(&self, query: &ClipQuery<'_>) -> Result<ClipsPage, ApiError> {
        let refreshed = AtomicBool::new(false);
        retry::retry_with_backoff(
            &self.settings.retry,
            "list_clips",
            |e: &ApiError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || self.list_clips_once(query, &refreshed),
        )
        .await
    }
}

fn decode<T: DeserializeOwned>(body: &str, what: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::MalformedResponse(format!("{what}: {e}")))
}
