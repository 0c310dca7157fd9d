//! Queue consumer
//!
//! A worker claims one batch at a time, looks up every channel in order
//! through the backoff engine, flushes the results as one object and only
//! then acknowledges the message. Any fatal error returns immediately and
//! leaves the claimed message alone, so the queue redelivers it after its
//! visibility timeout.

use crate::api::ApiSession;
use crate::backoff::{BackoffEngine, BackoffStats};
use crate::config::ConfigError;
use crate::credentials::Credential;
use crate::error::HarvestError;
use crate::queue::{decode_credentials, WorkBatch, WorkQueue};
use crate::sink::{FlushReceipt, ResultSink};
use crate::storage::ObjectStore;
use crate::DayPartition;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Progress is logged every this many channels
pub const LOGGING_INTERVAL: usize = 100;

/// Result of one fully processed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Channel ids looked up
    pub channels: usize,
    /// Records returned by the API
    pub records: usize,
    /// Uploaded object, `None` when no channel returned data
    pub flushed: Option<FlushReceipt>,
}

/// Totals for a worker run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkReport {
    /// Batches processed and acknowledged
    pub batches: usize,
    /// Channel ids looked up
    pub channels: usize,
    /// Records written
    pub records: usize,
    /// Objects uploaded
    pub objects: usize,
}

/// Drains the work queue
pub struct Worker {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn ObjectStore>,
    session: ApiSession,
    engine: BackoffEngine,
    sink: ResultSink,
    day: Option<DayPartition>,
}

impl Worker {
    /// Create a worker writing to `dataset`
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn ObjectStore>,
        session: ApiSession,
        dataset: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            store,
            session,
            engine: BackoffEngine::new(),
            sink: ResultSink::new(dataset),
            day: None,
        }
    }

    /// Write every batch under `day` instead of the UTC date at flush time
    pub fn with_day(mut self, day: DayPartition) -> Self {
        self.day = Some(day);
        self
    }

    /// API session (credential pool and current client)
    pub fn session(&self) -> &ApiSession {
        &self.session
    }

    /// Backoff counters accumulated so far
    pub fn backoff_stats(&self) -> &BackoffStats {
        self.engine.stats()
    }

    /// Look up every channel of `batch` and flush the results
    pub async fn process_batch(&mut self, batch: &WorkBatch) -> Result<BatchOutcome, HarvestError> {
        let total = batch.len();
        let mut records = 0;

        for (processed, channel_id) in batch.ids().iter().enumerate() {
            if processed % LOGGING_INTERVAL == 0 {
                info!("{} out of {} channels processed", processed, total);
            }

            let response = match self.engine.execute(&mut self.session, channel_id).await {
                Ok(response) => response,
                Err(e) => {
                    let dropped = self.sink.discard();
                    match e.kind() {
                        Some(kind) if kind.is_locally_handled() => warn!(
                            channel_id = %channel_id,
                            kind = ?kind,
                            dropped,
                            "Retries used up, abandoning batch"
                        ),
                        _ => error!(
                            channel_id = %channel_id,
                            error = %e,
                            dropped,
                            "Lookup failed, abandoning batch"
                        ),
                    }
                    return Err(e);
                }
            };
            if response.items.is_empty() {
                debug!(channel_id = %channel_id, "No statistics returned");
            }
            for item in response.items {
                self.sink.push_item(item)?;
                records += 1;
            }
        }

        let day = self.day.unwrap_or_else(DayPartition::today);
        let flushed = self.sink.flush(self.store.as_ref(), day).await?;

        Ok(BatchOutcome {
            channels: total,
            records,
            flushed,
        })
    }

    /// Process batches until the queue is empty or `max_batches` were done
    pub async fn run(&mut self, max_batches: Option<usize>) -> Result<WorkReport, HarvestError> {
        let span = info_span!("work", queue = %self.queue.name());
        self.run_inner(max_batches).instrument(span).await
    }

    async fn run_inner(&mut self, max_batches: Option<usize>) -> Result<WorkReport, HarvestError> {
        let mut report = WorkReport::default();
        info!("Start collecting channel stats");

        loop {
            if max_batches.is_some_and(|max| report.batches >= max) {
                info!(batches = report.batches, "Reached batch limit");
                break;
            }

            let Some(delivery) = self.queue.receive().await? else {
                info!("Work queue drained");
                break;
            };

            let span = info_span!("batch", message_id = %delivery.message_id);
            let batch = match WorkBatch::decode(&delivery.body) {
                Ok(batch) => batch,
                Err(e) => {
                    error!(message_id = %delivery.message_id, error = %e, "Undecodable batch");
                    self.queue.release(&delivery.receipt).await?;
                    return Err(HarvestError::InvalidPayload(e.to_string()));
                }
            };

            let outcome = self.process_batch(&batch).instrument(span).await?;
            self.queue.ack(&delivery.receipt).await?;
            crate::metrics::record_batch_processed(outcome.channels);

            report.batches += 1;
            report.channels += outcome.channels;
            report.records += outcome.records;
            if outcome.flushed.is_some() {
                report.objects += 1;
            }
            info!(
                message_id = %delivery.message_id,
                channels = outcome.channels,
                records = outcome.records,
                "Batch complete"
            );
        }

        let stats = self.engine.stats();
        info!(
            batches = report.batches,
            channels = report.channels,
            records = report.records,
            objects = report.objects,
            sleeps = stats.sleeps,
            rotations = stats.rotations,
            "Concluded collecting channel stats"
        );
        Ok(report)
    }
}

/// Read the credential set published by the producer
///
/// The message is only peeked, never claimed, so any number of workers can
/// start at once. Entries with a blank developer key are dropped.
pub async fn receive_credentials(queue: &dyn WorkQueue) -> Result<Vec<Credential>, HarvestError> {
    let Some(body) = queue.peek().await? else {
        return Err(ConfigError::Invalid(format!(
            "no credentials published on queue {}",
            queue.name()
        ))
        .into());
    };

    let decoded =
        decode_credentials(&body).map_err(|e| HarvestError::InvalidPayload(e.to_string()))?;
    let total = decoded.len();
    let credentials: Vec<Credential> = decoded
        .into_iter()
        .filter(|c| !c.developer_key.trim().is_empty())
        .collect();
    if credentials.len() < total {
        warn!(
            queue = %queue.name(),
            dropped = total - credentials.len(),
            "Ignoring credentials with a blank developer key"
        );
    }
    if credentials.is_empty() {
        warn!(queue = %queue.name(), "Credentials message is empty");
    }
    Ok(credentials)
}
