//! Task producer
//!
//! One producer run per day (or per re-run after a failure):
//!
//! 1. note whether the output table exists, then drop, create and repair it
//!    so every partition written so far is registered
//! 2. query the distinct upstream channel ids, minus those already stored in
//!    today's partition when the table existed
//! 3. purge the work queue and enqueue the ids in batches of
//!    [`BATCH_SIZE`](crate::BATCH_SIZE)
//! 4. optionally publish the credential set on its own queue
//!
//! Re-running after a partial day therefore only enqueues the channels that
//! are still missing.

use crate::catalog::{read_candidate_file, CandidateQuery, Catalog, TableDdl, TableDefinition};
use crate::credentials::Credential;
use crate::error::HarvestError;
use crate::queue::{encode_credentials, WorkBatch, WorkQueue};
use crate::{ChannelId, DayPartition, BATCH_SIZE};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

pub mod lock;

pub use lock::ProducerLock;

/// Candidate id download, relative to the scratch directory
pub const CANDIDATE_FILE: &str = "channel_ids.csv";

/// Producer lock file, relative to the scratch directory
pub const LOCK_FILE: &str = "producer.lock";

/// Split ids into consecutive batches of at most `size`, keeping order
///
/// A `size` of zero is treated as one.
pub fn partition_batches(ids: Vec<ChannelId>, size: usize) -> Vec<WorkBatch> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(ids.len().div_ceil(size));
    let mut iter = ids.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(WorkBatch::new(iter.by_ref().take(size).collect()));
    }
    batches
}

/// Outcome of a producer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceReport {
    /// Day the candidates were computed for
    pub day: DayPartition,
    /// Whether the output table existed before recreation
    pub table_existed: bool,
    /// Candidate ids enqueued
    pub candidates: usize,
    /// Count reported by the catalog's count query
    pub reported_count: u64,
    /// Batches sent
    pub batches: usize,
    /// Messages dropped by purging the work queue
    pub purged: usize,
    /// Whether credentials were published
    pub credentials_published: bool,
}

/// Computes the candidate set and fans it out onto the work queue
pub struct TaskProducer {
    catalog: Arc<dyn Catalog>,
    work_queue: Arc<dyn WorkQueue>,
    credentials: Option<(Arc<dyn WorkQueue>, Vec<Credential>)>,
    table: TableDefinition,
    source_table: String,
    tmp_dir: PathBuf,
    batch_size: usize,
}

impl TaskProducer {
    /// Create a producer
    pub fn new(
        catalog: Arc<dyn Catalog>,
        work_queue: Arc<dyn WorkQueue>,
        table: TableDefinition,
        source_table: impl Into<String>,
        tmp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            work_queue,
            credentials: None,
            table,
            source_table: source_table.into(),
            tmp_dir: tmp_dir.into(),
            batch_size: BATCH_SIZE,
        }
    }

    /// Also publish `credentials` on `queue`
    pub fn with_credentials(mut self, queue: Arc<dyn WorkQueue>, credentials: Vec<Credential>) -> Self {
        self.credentials = Some((queue, credentials));
        self
    }

    /// Override the batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Run once for `day`
    pub async fn produce(&self, day: DayPartition) -> Result<ProduceReport, HarvestError> {
        let span = info_span!("produce", day = %day, table = %self.table.name);
        self.produce_inner(day).instrument(span).await
    }

    async fn produce_inner(&self, day: DayPartition) -> Result<ProduceReport, HarvestError> {
        let mut lock = ProducerLock::open(&self.tmp_dir.join(LOCK_FILE))?;
        let _guard = lock.try_hold()?;

        info!("Start producing channel stats work");

        let table_existed = self.catalog.table_exists(&self.table.name).await?;
        self.recreate_table().await?;

        let mut query = CandidateQuery::new(&self.source_table, &self.table.name);
        if table_existed {
            query = query.excluding(day);
        }

        let candidate_file = self.tmp_dir.join(CANDIDATE_FILE);
        self.catalog
            .download_candidates(&query, &candidate_file)
            .await?;
        let reported_count = self.catalog.count_candidates(&query).await?;
        let ids = read_candidate_file(&candidate_file)?;

        if reported_count != ids.len() as u64 {
            warn!(
                reported = reported_count,
                downloaded = ids.len(),
                "Candidate count differs from downloaded ids, using downloaded ids"
            );
        }
        info!(
            channels = ids.len(),
            excluded_day = table_existed,
            "There are {} channels to be processed",
            ids.len()
        );

        let purged = self.work_queue.purge().await?;
        if purged > 0 {
            info!(queue = %self.work_queue.name(), purged, "Purged stale messages");
        }

        let candidates = ids.len();
        let batches = partition_batches(ids, self.batch_size);
        for batch in &batches {
            self.work_queue.send(&batch.encode()?).await?;
            crate::metrics::record_batch_enqueued(batch.len());
        }
        info!(
            queue = %self.work_queue.name(),
            batches = batches.len(),
            "Enqueued work batches"
        );

        let credentials_published = self.publish_credentials().await?;

        Ok(ProduceReport {
            day,
            table_existed,
            candidates,
            reported_count,
            batches: batches.len(),
            purged,
            credentials_published,
        })
    }

    async fn recreate_table(&self) -> Result<(), HarvestError> {
        info!("Recreate table for channel stats");
        let statements = [
            TableDdl::Drop {
                table: self.table.name.clone(),
            },
            TableDdl::Create(self.table.clone()),
            TableDdl::Repair {
                table: self.table.name.clone(),
            },
        ];
        for ddl in &statements {
            self.catalog.execute(ddl).await?;
        }
        Ok(())
    }

    async fn publish_credentials(&self) -> Result<bool, HarvestError> {
        let Some((queue, credentials)) = &self.credentials else {
            return Ok(false);
        };
        queue.purge().await?;
        queue.send(&encode_credentials(credentials)?).await?;
        info!(
            queue = %queue.name(),
            credentials = credentials.len(),
            "Published credentials"
        );
        Ok(true)
    }
}
