//! Statistics API client
//!
//! [`StatsApi`] is the one read operation the harvester needs: list the
//! statistics facet of a single channel. Clients are bound to one credential;
//! [`StatsClientFactory`] builds a fresh client whenever the credential
//! changes, and [`ApiSession`] ties the factory to a worker's
//! [`CredentialPool`].

use crate::credentials::{Credential, CredentialPool, PoolError};
use crate::{ChannelId, ChannelItem};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod shared_resources;
pub mod youtube;

pub use youtube::{YoutubeClientFactory, YoutubeStatsClient, DEFAULT_BASE_URL};

/// Raw API call failures, before classification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Transport-level connection reset
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// Upstream temporarily unavailable or internal error
    #[error("service unavailable ({status}): {message}")]
    ServiceUnavailable {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Upstream rejected the credential
    #[error("authorization rejected ({status}, {reason}): {message}")]
    AuthorizationInvalid {
        /// HTTP status code
        status: u16,
        /// API error reason (e.g. `quotaExceeded`, `keyInvalid`)
        reason: String,
        /// Error message from the API
        message: String,
    },

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Result type for API calls
pub type ApiResult<T> = Result<T, ApiError>;

/// `channels.list` response body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelListResponse {
    /// Resource kind (`youtube#channelListResponse`)
    #[serde(default)]
    pub kind: String,
    /// Entity tag
    #[serde(default)]
    pub etag: String,
    /// Zero or one channel
    #[serde(default)]
    pub items: Vec<ChannelItem>,
}

/// Client bound to a single credential
#[async_trait]
pub trait StatsApi: Send + Sync {
    /// Fetch the statistics facet for one channel
    async fn fetch_statistics(&self, channel_id: &ChannelId) -> ApiResult<ChannelListResponse>;
}

/// Builds clients for a credential
pub trait StatsClientFactory: Send + Sync {
    /// Build a client bound to `credential`
    fn build(&self, credential: &Credential) -> ApiResult<Box<dyn StatsApi>>;
}

/// A worker's credential pool together with the client built from its current credential
pub struct ApiSession {
    pool: CredentialPool,
    factory: Arc<dyn StatsClientFactory>,
    client: Box<dyn StatsApi>,
}

impl ApiSession {
    /// Build a session on the first credential the factory accepts
    pub fn new(
        mut pool: CredentialPool,
        factory: Arc<dyn StatsClientFactory>,
    ) -> Result<Self, SessionError> {
        let client = loop {
            let credential = pool.current()?;
            match factory.build(credential) {
                Ok(client) => break client,
                Err(e) => {
                    warn!(credential = %credential.label(), error = %e, "Skipping unusable credential");
                    pool.advance()?;
                }
            }
        };
        info!(
            credential = %pool.current()?.label(),
            pool_size = pool.len(),
            "API session ready"
        );
        Ok(Self {
            pool,
            factory,
            client,
        })
    }

    /// Client bound to the current credential
    pub fn client(&self) -> &dyn StatsApi {
        self.client.as_ref()
    }

    /// Credential pool
    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Rebuild the client with the same credential
    pub fn rebuild(&mut self) -> Result<(), SessionError> {
        let credential = self.pool.current()?;
        debug!(credential = %credential.label(), "Rebuilding API client");
        self.client = self.factory.build(credential)?;
        Ok(())
    }

    /// Invalidate the current credential and rebuild with the next one
    ///
    /// Credentials the factory refuses to build a client for are skipped too.
    pub fn rotate(&mut self) -> Result<&Credential, PoolError> {
        loop {
            let next = self.pool.advance()?;
            match self.factory.build(next) {
                Ok(client) => {
                    self.client = client;
                    break;
                }
                Err(e) => {
                    debug!(credential = %next.label(), error = %e, "Skipping unusable credential");
                }
            }
        }
        self.pool.current()
    }
}

/// Session setup errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Pool has no usable credential
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Client could not be built
    #[error("failed to build API client: {0}")]
    Client(#[from] ApiError),
}
