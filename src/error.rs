//! Crate-level error taxonomy
//!
//! API failures collapse into five kinds. The first three are absorbed by the
//! backoff engine up to their caps; the last two always end the worker run.

use crate::api::SessionError;
use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::credentials::PoolError;
use crate::queue::QueueError;
use crate::sink::SinkError;
use crate::storage::StorageError;

/// Classification of API call failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Low-level connection reset
    TransientNetwork,
    /// Upstream temporarily unavailable or internal error
    TransientUpstream,
    /// Upstream rejected the credential
    AuthorizationInvalid,
    /// Every credential in the pool has been rejected
    CredentialsExhausted,
    /// Anything else
    Unclassified,
}

impl ErrorKind {
    /// Whether the backoff engine handles this kind before surfacing it
    pub fn is_locally_handled(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientNetwork
                | ErrorKind::TransientUpstream
                | ErrorKind::AuthorizationInvalid
        )
    }
}

/// Errors surfaced by producer and worker runs
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Connection resets exceeded their retry cap
    #[error("connection reset persisted after {attempts} attempts for channel {channel_id}: {message}")]
    TransientNetwork {
        /// Channel being fetched
        channel_id: String,
        /// Attempts made before giving up
        attempts: u32,
        /// Last error message
        message: String,
    },

    /// Upstream unavailability exceeded its retry cap
    #[error("service unavailable after {attempts} attempts for channel {channel_id}: {message}")]
    TransientUpstream {
        /// Channel being fetched
        channel_id: String,
        /// Attempts made before giving up
        attempts: u32,
        /// Last error message
        message: String,
    },

    /// Every credential has been rejected
    #[error("all {tried} credentials rejected")]
    CredentialsExhausted {
        /// Number of credentials that were tried
        tried: usize,
    },

    /// Unclassified API failure
    #[error("unclassified API failure for channel {channel_id}: {message}")]
    Unclassified {
        /// Channel being fetched
        channel_id: String,
        /// Error message
        message: String,
    },

    /// Catalog failure
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Queue failure
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Object storage failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Result sink failure
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Configuration failure
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Another producer holds the lock
    #[error("another producer is running (lock held on {0})")]
    ProducerLocked(String),

    /// API client could not be constructed
    #[error("failed to set up API client: {0}")]
    ClientSetup(String),

    /// Malformed queue payload
    #[error("invalid message payload: {0}")]
    InvalidPayload(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl HarvestError {
    /// Taxonomy kind for API-originated errors
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            HarvestError::TransientNetwork { .. } => Some(ErrorKind::TransientNetwork),
            HarvestError::TransientUpstream { .. } => Some(ErrorKind::TransientUpstream),
            HarvestError::CredentialsExhausted { .. } => Some(ErrorKind::CredentialsExhausted),
            HarvestError::Unclassified { .. } => Some(ErrorKind::Unclassified),
            _ => None,
        }
    }
}

impl From<PoolError> for HarvestError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { tried } => HarvestError::CredentialsExhausted { tried },
        }
    }
}

impl From<SessionError> for HarvestError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Pool(pool) => pool.into(),
            SessionError::Client(e) => HarvestError::ClientSetup(e.to_string()),
        }
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(err: std::io::Error) -> Self {
        HarvestError::IoError(err.to_string())
    }
}
