//! In-process queue

use super::{Delivery, QueueError, QueueResult, WorkQueue};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    ready: VecDeque<(String, String)>,
    inflight: HashMap<String, (String, String)>,
}

/// Queue held in memory; redelivery is triggered explicitly
#[derive(Debug, Default)]
pub struct MemoryQueue {
    name: String,
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    /// Create an empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> QueueResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| QueueError::IoError(e.to_string()))
    }

    /// Messages currently claimed
    pub fn in_flight(&self) -> usize {
        self.lock().map(|inner| inner.inflight.len()).unwrap_or(0)
    }

    /// Return every claimed message to the front of the queue, as if their
    /// visibility timeouts had all expired
    pub fn expire_in_flight(&self) -> QueueResult<usize> {
        let mut inner = self.lock()?;
        let mut expired: Vec<(String, String)> = inner.inflight.drain().map(|(_, m)| m).collect();
        expired.sort();
        let count = expired.len();
        for message in expired.into_iter().rev() {
            inner.ready.push_front(message);
        }
        Ok(count)
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn purge(&self) -> QueueResult<usize> {
        let mut inner = self.lock()?;
        let purged = inner.ready.len() + inner.inflight.len();
        inner.ready.clear();
        inner.inflight.clear();
        Ok(purged)
    }

    async fn send(&self, body: &str) -> QueueResult<String> {
        let message_id = Uuid::new_v4().simple().to_string();
        self.lock()?
            .ready
            .push_back((message_id.clone(), body.to_string()));
        Ok(message_id)
    }

    async fn receive(&self) -> QueueResult<Option<Delivery>> {
        let mut inner = self.lock()?;
        let Some((message_id, body)) = inner.ready.pop_front() else {
            return Ok(None);
        };
        let receipt = Uuid::new_v4().simple().to_string();
        inner
            .inflight
            .insert(receipt.clone(), (message_id.clone(), body.clone()));
        Ok(Some(Delivery {
            receipt,
            message_id,
            body,
        }))
    }

    async fn peek(&self) -> QueueResult<Option<String>> {
        let inner = self.lock()?;
        if let Some((_, body)) = inner.ready.front() {
            return Ok(Some(body.clone()));
        }
        Ok(inner
            .inflight
            .values()
            .min_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, body)| body.clone()))
    }

    async fn ack(&self, receipt: &str) -> QueueResult<()> {
        self.lock()?
            .inflight
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))
    }

    async fn release(&self, receipt: &str) -> QueueResult<()> {
        let mut inner = self.lock()?;
        let message = inner
            .inflight
            .remove(receipt)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))?;
        inner.ready.push_front(message);
        Ok(())
    }

    async fn pending(&self) -> QueueResult<usize> {
        Ok(self.lock()?.ready.len())
    }
}
