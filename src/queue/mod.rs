//! Work queue interface
//!
//! At-least-once delivery: a received message stays invisible until it is
//! acknowledged, released, or its visibility timeout expires. Nothing here
//! deduplicates redeliveries.

use crate::credentials::Credential;
use crate::ChannelId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod file;
pub mod memory;

pub use file::FileQueue;
pub use memory::MemoryQueue;

/// Queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue name is unusable as a spool directory
    #[error("invalid queue name: {0}")]
    InvalidName(String),

    /// Receipt does not match an in-flight message
    #[error("unknown receipt: {0}")]
    UnknownReceipt(String),

    /// Payload could not be encoded or decoded
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// A received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Handle used to ack or release this delivery
    pub receipt: String,
    /// Stable id assigned at send time, shared by redeliveries
    pub message_id: String,
    /// Message body
    pub body: String,
}

/// At-least-once message queue
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Queue name
    fn name(&self) -> &str;

    /// Drop every message, ready or in flight. Returns how many were dropped.
    async fn purge(&self) -> QueueResult<usize>;

    /// Enqueue a message. Returns its message id.
    async fn send(&self, body: &str) -> QueueResult<String>;

    /// Claim the next ready message, if any
    async fn receive(&self) -> QueueResult<Option<Delivery>>;

    /// Body of the oldest message, ready or in flight, without claiming it
    async fn peek(&self) -> QueueResult<Option<String>>;

    /// Delete a claimed message
    async fn ack(&self, receipt: &str) -> QueueResult<()>;

    /// Return a claimed message to the queue immediately
    async fn release(&self, receipt: &str) -> QueueResult<()>;

    /// Messages waiting to be received
    async fn pending(&self) -> QueueResult<usize>;
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchEntry {
    channel_id: ChannelId,
}

/// Ordered group of channel ids sent as one queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkBatch {
    ids: Vec<ChannelId>,
}

impl WorkBatch {
    /// Wrap ids in arrival order
    pub fn new(ids: Vec<ChannelId>) -> Self {
        Self { ids }
    }

    /// Ids in order
    pub fn ids(&self) -> &[ChannelId] {
        &self.ids
    }

    /// Number of ids
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the batch holds no ids
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Serialize as a JSON array of `{"channel_id": ...}` records
    pub fn encode(&self) -> QueueResult<String> {
        let entries: Vec<BatchEntry> = self
            .ids
            .iter()
            .map(|id| BatchEntry {
                channel_id: id.clone(),
            })
            .collect();
        serde_json::to_string(&entries).map_err(|e| QueueError::InvalidPayload(e.to_string()))
    }

    /// Parse a message body produced by [`WorkBatch::encode`]
    pub fn decode(body: &str) -> QueueResult<Self> {
        let entries: Vec<BatchEntry> =
            serde_json::from_str(body).map_err(|e| QueueError::InvalidPayload(e.to_string()))?;
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = ChannelId::parse(entry.channel_id.as_str())
                .map_err(QueueError::InvalidPayload)?;
            ids.push(id);
        }
        Ok(Self { ids })
    }
}

/// Serialize the credential set for the credentials queue
pub fn encode_credentials(credentials: &[Credential]) -> QueueResult<String> {
    serde_json::to_string(credentials).map_err(|e| QueueError::InvalidPayload(e.to_string()))
}

/// Parse a credentials queue message
pub fn decode_credentials(body: &str) -> QueueResult<Vec<Credential>> {
    serde_json::from_str(body).map_err(|e| QueueError::InvalidPayload(e.to_string()))
}
