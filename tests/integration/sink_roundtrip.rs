//! Integration tests for flushing records into the local object store

use crate::support::item;
use channel_stats_harvester::sink::{decode_object, ResultSink};
use channel_stats_harvester::storage::{LocalObjectStore, ObjectStore};
use channel_stats_harvester::DayPartition;
use tempfile::TempDir;

/// Three records land in one gzip object under today's partition
#[tokio::test]
async fn test_flush_writes_one_object_under_today() {
    let dir = TempDir::new().unwrap();
    let store = LocalObjectStore::new(dir.path());
    let day = DayPartition::today();

    let mut sink = ResultSink::new("youtube_channel_stats");
    for id in ["UCa", "UCb", "UCc"] {
        sink.push_item(item(id)).unwrap();
    }
    let receipt = sink.flush(&store, day).await.unwrap().unwrap();
    assert!(sink.is_empty());
    assert_eq!(receipt.records, 3);

    let prefix = format!("youtube_channel_stats/creation_date={day}/");
    let keys = store.list(&prefix).await.unwrap();
    assert_eq!(keys, vec![receipt.key.clone()]);
    assert!(receipt.key.ends_with("-3.json.gz"));
    assert!(dir.path().join(&receipt.key).is_file());

    let body = store.get(&receipt.key).await.unwrap();
    assert_eq!(body.len(), receipt.compressed_bytes);
    let records = decode_object(&body).unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["UCa", "UCb", "UCc"]);
    assert!(records
        .windows(2)
        .all(|pair| pair[0].retrieved_at <= pair[1].retrieved_at));
}

/// Each flush is a separate object, so two flushes never overwrite each other
#[tokio::test]
async fn test_consecutive_flushes_create_distinct_objects() {
    let dir = TempDir::new().unwrap();
    let store = LocalObjectStore::new(dir.path());
    let day = DayPartition::parse("2024-03-01").unwrap();
    let mut sink = ResultSink::new("stats");

    sink.push_item(item("UC1")).unwrap();
    let first = sink.flush(&store, day).await.unwrap().unwrap();
    sink.push_item(item("UC1")).unwrap();
    let second = sink.flush(&store, day).await.unwrap().unwrap();

    assert_ne!(first.key, second.key);
    assert_eq!(store.list("stats/").await.unwrap().len(), 2);
}

/// Flushing nothing uploads nothing
#[tokio::test]
async fn test_empty_flush_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let store = LocalObjectStore::new(dir.path());
    let mut sink = ResultSink::new("stats");

    assert!(sink
        .flush(&store, DayPartition::today())
        .await
        .unwrap()
        .is_none());
    assert!(store.list("").await.unwrap().is_empty());
}

/// Stored records keep the API's field names plus the retrieval timestamp
#[tokio::test]
async fn test_stored_line_layout() {
    let dir = TempDir::new().unwrap();
    let store = LocalObjectStore::new(dir.path());
    let mut sink = ResultSink::new("stats");
    sink.push_item(item("UClayout")).unwrap();
    let receipt = sink
        .flush(&store, DayPartition::today())
        .await
        .unwrap()
        .unwrap();

    let body = store.get(&receipt.key).await.unwrap();
    let mut text = String::new();
    std::io::Read::read_to_string(&mut flate2::read::GzDecoder::new(&body[..]), &mut text)
        .unwrap();
    let line: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
    assert_eq!(line["id"], "UClayout");
    assert_eq!(line["kind"], "youtube#channel");
    assert!(line["statistics"]["viewCount"].is_u64());
    assert!(line["retrieved_at"].is_string());
}
