//! YouTube Data API v3 statistics client
//!
//! Issues `GET {base}/channels?part=statistics&id=..&key=..` and maps failures
//! onto [`ApiError`] so the backoff engine can classify them:
//!
//! - I/O connection reset anywhere in the transport error chain → `ConnectionReset`
//! - 500 / 503 → `ServiceUnavailable`
//! - 403, or 400 with an invalid-key reason → `AuthorizationInvalid`
//! - everything else → `Other`

use super::shared_resources::global_http_client;
use super::{ApiError, ApiResult, ChannelListResponse, StatsApi, StatsClientFactory};
use crate::credentials::Credential;
use crate::ChannelId;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::error::Error as StdError;
use tracing::debug;

/// Production API root
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Statistics client bound to one developer key
pub struct YoutubeStatsClient {
    http: Client,
    base_url: String,
    developer_key: String,
}

impl YoutubeStatsClient {
    /// Create a client
    ///
    /// # Errors
    /// Returns `ApiError::Other` if the developer key is blank
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        developer_key: impl Into<String>,
    ) -> ApiResult<Self> {
        let developer_key = developer_key.into();
        if developer_key.trim().is_empty() {
            return Err(ApiError::Other("developer key is blank".to_string()));
        }
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            developer_key,
        })
    }

    /// Base URL this client targets
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl StatsApi for YoutubeStatsClient {
    async fn fetch_statistics(&self, channel_id: &ChannelId) -> ApiResult<ChannelListResponse> {
        let url = format!("{}/channels", self.base_url);
        debug!(channel_id = %channel_id, "Requesting channel statistics");

        let response = self
            .http
            .get(&url)
            .query(&[
                ("part", "statistics"),
                ("id", channel_id.as_str()),
                ("key", self.developer_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<ChannelListResponse>().await.map_err(|e| {
                match classify_transport(&e) {
                    ApiError::Other(_) => ApiError::Other(format!("failed to decode response: {e}")),
                    reset => reset,
                }
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }
}

/// Builds [`YoutubeStatsClient`]s sharing one HTTP connection pool
#[derive(Clone)]
pub struct YoutubeClientFactory {
    http: Client,
    base_url: String,
}

impl YoutubeClientFactory {
    /// Factory using the process-wide HTTP client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(global_http_client(), base_url)
    }

    /// Factory using a specific HTTP client
    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl StatsClientFactory for YoutubeClientFactory {
    fn build(&self, credential: &Credential) -> ApiResult<Box<dyn StatsApi>> {
        let client = YoutubeStatsClient::new(
            self.http.clone(),
            self.base_url.clone(),
            credential.developer_key.clone(),
        )?;
        Ok(Box::new(client))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Map a non-success HTTP status and body to an [`ApiError`]
pub fn classify_status(status: u16, body: &str) -> ApiError {
    let (message, reason) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let reason = envelope
                .error
                .errors
                .first()
                .map(|d| d.reason.clone())
                .unwrap_or_default();
            (envelope.error.message, reason)
        }
        Err(_) => (body.chars().take(200).collect(), String::new()),
    };

    match status {
        403 => ApiError::AuthorizationInvalid {
            status,
            reason,
            message,
        },
        400 if reason == "keyInvalid" || message.contains("API key not valid") => {
            ApiError::AuthorizationInvalid {
                status,
                reason,
                message,
            }
        }
        500 | 503 => ApiError::ServiceUnavailable { status, message },
        _ => ApiError::Other(format!("HTTP {status}: {message}")),
    }
}

/// Map a transport error to [`ApiError`], detecting connection resets in the source chain
pub fn classify_transport(err: &reqwest::Error) -> ApiError {
    if is_connection_reset(err) {
        ApiError::ConnectionReset(err.to_string())
    } else {
        ApiError::Other(format!("transport error: {err}"))
    }
}

fn is_connection_reset(err: &(dyn StdError + 'static)) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        source = current.source();
    }
    false
}
