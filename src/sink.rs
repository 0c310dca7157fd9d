//! Result sink: buffers statistics records and flushes them as one object
//!
//! Records are held as newline-delimited JSON. A flush gzip-compresses the
//! buffer and uploads it under
//! `<dataset>/creation_date=<day>/<random-id>-<record-count>.json.gz`.
//! The random id keeps concurrently flushing workers from overwriting each
//! other; the count makes objects auditable without opening them.

use crate::storage::{ObjectStore, StorageError};
use crate::{ChannelItem, ChannelStatsRecord, DayPartition};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{BufRead, BufReader, Write};
use tracing::{debug, info};
use uuid::Uuid;

/// File extension of the compression codec
pub const COMPRESSION_EXT: &str = "gz";

/// Sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Record could not be serialized or parsed
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Compression or decompression failed
    #[error("compression error: {0}")]
    CompressionError(String),

    /// Upload failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Outcome of a successful flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReceipt {
    /// Object key written
    pub key: String,
    /// Records in the object
    pub records: usize,
    /// Compressed size in bytes
    pub compressed_bytes: usize,
}

/// Buffer of records awaiting upload
#[derive(Debug)]
pub struct ResultSink {
    dataset: String,
    buffer: Vec<u8>,
    records: usize,
    last_stamp: Option<DateTime<Utc>>,
}

impl ResultSink {
    /// Create an empty sink for a dataset
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            buffer: Vec::new(),
            records: 0,
            last_stamp: None,
        }
    }

    /// Dataset the sink writes to
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Buffered record count
    pub fn len(&self) -> usize {
        self.records
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Current time, never earlier than the previous stamp
    pub fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    /// Stamp an API item with the retrieval time and buffer it
    pub fn push_item(&mut self, item: ChannelItem) -> SinkResult<()> {
        let retrieved_at = self.stamp();
        self.push(&ChannelStatsRecord::from_item(item, retrieved_at))
    }

    /// Buffer an already stamped record
    pub fn push(&mut self, record: &ChannelStatsRecord) -> SinkResult<()> {
        serde_json::to_writer(&mut self.buffer, record)
            .map_err(|e| SinkError::SerializationError(e.to_string()))?;
        self.buffer.push(b'\n');
        self.records += 1;
        Ok(())
    }

    /// Drop buffered records without uploading. Returns how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.records;
        self.buffer.clear();
        self.records = 0;
        dropped
    }

    /// Key for an object holding `records` records in `day`
    pub fn object_key(&self, day: DayPartition, records: usize) -> String {
        format!(
            "{}/{}-{}.json.{}",
            day.prefix(&self.dataset),
            Uuid::new_v4().simple(),
            records,
            COMPRESSION_EXT
        )
    }

    /// Gzip the buffered records
    pub fn encode(&self) -> SinkResult<Bytes> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&self.buffer)
            .map_err(|e| SinkError::CompressionError(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| SinkError::CompressionError(e.to_string()))?;
        Ok(Bytes::from(compressed))
    }

    /// Compress and upload the buffer under `day`, then clear it
    ///
    /// Returns `None` without uploading when nothing is buffered. On upload
    /// failure the buffer is kept.
    pub async fn flush(
        &mut self,
        store: &dyn ObjectStore,
        day: DayPartition,
    ) -> SinkResult<Option<FlushReceipt>> {
        if self.is_empty() {
            debug!(dataset = %self.dataset, "Nothing to flush");
            return Ok(None);
        }

        let body = self.encode()?;
        let key = self.object_key(day, self.records);
        let receipt = FlushReceipt {
            key: key.clone(),
            records: self.records,
            compressed_bytes: body.len(),
        };

        store.put(&key, body).await?;

        info!(
            key = %receipt.key,
            records = receipt.records,
            compressed_bytes = receipt.compressed_bytes,
            "Uploaded channel statistics"
        );
        crate::metrics::record_flush(receipt.records, receipt.compressed_bytes);

        self.buffer.clear();
        self.records = 0;
        Ok(Some(receipt))
    }
}

/// Decompress and parse an object written by [`ResultSink::flush`]
pub fn decode_object(body: &[u8]) -> SinkResult<Vec<ChannelStatsRecord>> {
    let reader = BufReader::new(GzDecoder::new(body));
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| SinkError::CompressionError(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .map_err(|e| SinkError::SerializationError(format!("{e}: {line}")))?;
        records.push(record);
    }
    Ok(records)
}
