//! Unit tests for configuration file loading

use channel_stats_harvester::config::{ConfigError, HarvestConfig};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"{
            "youtube": [
                {"developer_key": "k1", "email": "a@example.com", "project": "p1"},
                {"developer_key": "k2", "email": "b@example.com", "project": "p2"}
            ],
            "storage": {"root": "/data/objects", "dataset": "channel_stats"},
            "catalog": {
                "metastore_dir": "/data/meta",
                "source_ids_csv": "/data/videos.csv",
                "source_table": "video_snippet",
                "table": "channel_stats"
            },
            "queue": {
                "root": "/data/queues",
                "work_queue": "channel-batches",
                "credentials_queue": "channel-credentials",
                "visibility_timeout_secs": 900
            },
            "api": {"base_url": "http://127.0.0.1:8080/youtube/v3"},
            "tmp_dir": "/tmp/harvest"
        }"#,
    );

    let config = HarvestConfig::load(file.path()).unwrap();
    assert_eq!(config.youtube.len(), 2);
    assert_eq!(config.youtube[1].developer_key, "k2");
    assert_eq!(config.storage.dataset, "channel_stats");
    assert_eq!(config.catalog.source_table, "video_snippet");
    assert_eq!(config.queue.work_queue, "channel-batches");
    assert_eq!(
        config.queue.credentials_queue.as_deref(),
        Some("channel-credentials")
    );
    assert_eq!(config.visibility_timeout().as_secs(), 900);
    assert_eq!(
        config.producer_lock_file(),
        std::path::PathBuf::from("/tmp/harvest/producer.lock")
    );
    assert_eq!(
        config.candidate_file(),
        std::path::PathBuf::from("/tmp/harvest/channel_ids.csv")
    );
}

#[test]
fn test_missing_file() {
    let err = HarvestConfig::load(std::path::Path::new("/nonexistent/harvest.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_missing_section_is_parse_error() {
    let file = write_config(r#"{"youtube": [], "storage": {"root": "/x"}}"#);
    assert!(matches!(
        HarvestConfig::load(file.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_queues_must_differ() {
    let file = write_config(
        r#"{
            "youtube": [{"developer_key": "k1", "email": "a@example.com", "project": "p1"}],
            "storage": {"root": "/data/objects"},
            "catalog": {"metastore_dir": "/m", "source_ids_csv": "/s.csv"},
            "queue": {"root": "/q", "work_queue": "same", "credentials_queue": "same"}
        }"#,
    );
    assert!(matches!(
        HarvestConfig::load(file.path()),
        Err(ConfigError::Invalid(_))
    ));
}
