//! End-to-end producer and worker runs over local backends
//!
//! The catalog, object store and queue are all local, the statistics API is
//! scripted. Every run uses the same fixed day so re-runs see the partition
//! written by earlier workers.

use crate::support::{credentials, session, ScriptedFactory};
use channel_stats_harvester::catalog::{LocalCatalog, TableDefinition};
use channel_stats_harvester::producer::{ProducerLock, TaskProducer};
use channel_stats_harvester::queue::{decode_credentials, MemoryQueue, WorkQueue};
use channel_stats_harvester::sink::decode_object;
use channel_stats_harvester::storage::{LocalObjectStore, ObjectStore};
use channel_stats_harvester::worker::Worker;
use channel_stats_harvester::{DayPartition, HarvestError};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

const TABLE: &str = "channel_stats";

struct Harness {
    dir: TempDir,
    store: Arc<LocalObjectStore>,
    queue: Arc<MemoryQueue>,
    producer: TaskProducer,
    factory: ScriptedFactory,
    day: DayPartition,
}

impl Harness {
    /// `ids` are written to the upstream source, batches hold two ids
    fn new(ids: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("video_snippet.csv");
        let mut csv = String::from("channel_id\n");
        for id in ids {
            csv.push_str(id);
            csv.push('\n');
        }
        std::fs::write(&source, csv).unwrap();

        let store = Arc::new(LocalObjectStore::new(dir.path().join("objects")));
        let catalog = Arc::new(LocalCatalog::new(
            dir.path().join("metastore"),
            source,
            store.clone(),
        ));
        let queue = Arc::new(MemoryQueue::new("channel-batches"));
        let producer = TaskProducer::new(
            catalog,
            queue.clone(),
            TableDefinition::new(TABLE, TABLE),
            "video_snippet",
            dir.path().join("tmp"),
        )
        .with_batch_size(2);

        Self {
            dir,
            store,
            queue,
            producer,
            factory: ScriptedFactory::new(),
            day: DayPartition::parse("2024-03-01").unwrap(),
        }
    }

    fn worker(&self) -> Worker {
        Worker::new(
            self.queue.clone(),
            self.store.clone(),
            session(&["k1"], &self.factory),
            TABLE,
        )
        .with_day(self.day)
    }

    /// Channel ids stored in the day partition, with duplicates
    async fn stored_ids(&self) -> Vec<String> {
        let prefix = format!("{}/", self.day.prefix(TABLE));
        let mut ids = Vec::new();
        for key in self.store.list(&prefix).await.unwrap() {
            let body = self.store.get(&key).await.unwrap();
            ids.extend(decode_object(&body).unwrap().into_iter().map(|r| r.id));
        }
        ids.sort();
        ids
    }
}

/// First run of the day enqueues every distinct upstream id
#[tokio::test]
async fn test_first_run_enqueues_all_candidates() {
    let harness = Harness::new(&["UC1", "UC2", "UC3", "UC2", "", "UC4", "UC5"]);

    let report = harness.producer.produce(harness.day).await.unwrap();

    assert!(!report.table_existed);
    assert_eq!(report.candidates, 5);
    assert_eq!(report.reported_count, 5);
    assert_eq!(report.batches, 3);
    assert_eq!(report.purged, 0);
    assert!(!report.credentials_published);
    assert_eq!(harness.queue.pending().await.unwrap(), 3);
    assert!(harness.dir.path().join("tmp/channel_ids.csv").is_file());
}

/// After a complete day a re-run has nothing left to do
#[tokio::test]
async fn test_rerun_after_full_day_enqueues_nothing() {
    let harness = Harness::new(&["UC1", "UC2", "UC3", "UC4", "UC5"]);
    harness.producer.produce(harness.day).await.unwrap();

    let report = harness.worker().run(None).await.unwrap();
    assert_eq!(report.batches, 3);
    assert_eq!(report.records, 5);
    assert_eq!(report.objects, 3);

    let rerun = harness.producer.produce(harness.day).await.unwrap();
    assert!(rerun.table_existed);
    assert_eq!(rerun.candidates, 0);
    assert_eq!(rerun.batches, 0);
    assert_eq!(harness.queue.pending().await.unwrap(), 0);
}

/// A partial day is resumed with exactly the missing channels
#[tokio::test]
async fn test_rerun_after_partial_day_enqueues_remainder() {
    let harness = Harness::new(&["UC1", "UC2", "UC3", "UC4", "UC5"]);
    harness.producer.produce(harness.day).await.unwrap();

    let partial = harness.worker().run(Some(1)).await.unwrap();
    assert_eq!(partial.batches, 1);
    assert_eq!(harness.stored_ids().await, vec!["UC1", "UC2"]);

    let rerun = harness.producer.produce(harness.day).await.unwrap();
    assert!(rerun.table_existed);
    assert_eq!(rerun.candidates, 3);
    assert_eq!(rerun.batches, 2);
    // The two batches left over from the first run were dropped
    assert_eq!(rerun.purged, 2);

    harness.worker().run(None).await.unwrap();
    let stored = harness.stored_ids().await;
    assert_eq!(stored, vec!["UC1", "UC2", "UC3", "UC4", "UC5"]);

    let looked_up: HashSet<String> = harness
        .factory
        .calls()
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    assert_eq!(looked_up.len(), 5);
    assert_eq!(harness.factory.calls().len(), 5);
}

/// A redelivered batch writes a second object; the next producer run still
/// sees each channel once
#[tokio::test]
async fn test_duplicate_delivery_is_deduplicated_by_next_run() {
    let harness = Harness::new(&["UC1", "UC2", "UC3"]);
    harness.producer.produce(harness.day).await.unwrap();

    // Process the first batch without acknowledging it, then let it expire
    let delivery = harness.queue.receive().await.unwrap().unwrap();
    let batch = channel_stats_harvester::queue::WorkBatch::decode(&delivery.body).unwrap();
    harness.worker().process_batch(&batch).await.unwrap();
    harness.queue.expire_in_flight().unwrap();

    harness.worker().run(None).await.unwrap();
    assert_eq!(
        harness.stored_ids().await,
        vec!["UC1", "UC1", "UC2", "UC2", "UC3"]
    );

    let rerun = harness.producer.produce(harness.day).await.unwrap();
    assert_eq!(rerun.candidates, 0);
}

/// Credentials are published as one message for workers to read
#[tokio::test]
async fn test_publishes_credentials() {
    let harness = Harness::new(&["UC1"]);
    let creds_queue = Arc::new(MemoryQueue::new("channel-credentials"));
    creds_queue.send("stale").await.unwrap();

    let producer = TaskProducer::new(
        Arc::new(LocalCatalog::new(
            harness.dir.path().join("metastore"),
            harness.dir.path().join("video_snippet.csv"),
            harness.store.clone(),
        )),
        harness.queue.clone(),
        TableDefinition::new(TABLE, TABLE),
        "video_snippet",
        harness.dir.path().join("tmp"),
    )
    .with_credentials(creds_queue.clone(), credentials(&["k1", "k2"]));

    let report = producer.produce(harness.day).await.unwrap();
    assert!(report.credentials_published);
    assert_eq!(creds_queue.pending().await.unwrap(), 1);

    let delivery = creds_queue.receive().await.unwrap().unwrap();
    let published = decode_credentials(&delivery.body).unwrap();
    let keys: Vec<&str> = published.iter().map(|c| c.developer_key.as_str()).collect();
    assert_eq!(keys, vec!["k1", "k2"]);
}

/// A second producer is refused while the lock is held
#[tokio::test]
async fn test_concurrent_producer_is_rejected() {
    let harness = Harness::new(&["UC1"]);
    let mut lock = ProducerLock::open(&harness.dir.path().join("tmp/producer.lock")).unwrap();
    let guard = lock.try_hold().unwrap();

    let err = harness.producer.produce(harness.day).await.unwrap_err();
    assert!(matches!(err, HarvestError::ProducerLocked(_)));
    assert_eq!(harness.queue.pending().await.unwrap(), 0);

    drop(guard);
    harness.producer.produce(harness.day).await.unwrap();
    assert_eq!(harness.queue.pending().await.unwrap(), 1);
}
