//! # Channel Stats Harvester
//!
//! Harvests per-channel statistics from the YouTube Data API for every channel
//! id discovered upstream, and publishes the results as a dated batch of
//! compressed newline-delimited JSON under a day partition.
//!
//! ## Architecture
//!
//! - [`credentials`] - Randomized pool of API credentials that advances past invalid keys
//! - [`backoff`] - Failure classification and the bounded retry state machine
//! - [`api`] - Statistics client trait, HTTP implementation and per-worker session
//! - [`sink`] - Buffers records and flushes them as one compressed object
//! - [`producer`] - Computes today's candidate ids and fans them out as batches
//! - [`worker`] - Drains batches from the work queue
//! - [`catalog`], [`queue`], [`storage`] - Narrow interfaces to external systems,
//!   each with a local implementation
//!
//! ## Quick Start
//!
//! ```no_run
//! use channel_stats_harvester::credentials::{Credential, CredentialPool};
//!
//! let pool = CredentialPool::shuffled(vec![
//!     Credential::new("key-1", "ops@example.com", "harvest-a"),
//!     Credential::new("key-2", "ops@example.com", "harvest-b"),
//! ])
//! .unwrap();
//! assert_eq!(pool.remaining(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statistics API client and session
pub mod api;

/// Retry classification and backoff state machine
pub mod backoff;

/// Catalog (query engine) interface
pub mod catalog;

/// CLI command implementations
pub mod cli;

/// Configuration file loading
pub mod config;

/// Credential pool
pub mod credentials;

/// Crate-level error taxonomy
pub mod error;

/// Metrics emission
pub mod metrics;

/// Task producer
pub mod producer;

/// Work queue interface
pub mod queue;

/// Result sink
pub mod sink;

/// Object storage interface
pub mod storage;

/// Queue consumer
pub mod worker;

pub use error::{ErrorKind, HarvestError};

/// Maximum number of channel ids in one work batch
pub const BATCH_SIZE: usize = 1000;

/// Default dataset (table) name for channel statistics
pub const DEFAULT_DATASET: &str = "youtube_channel_stats";

/// Opaque channel identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a channel id, rejecting blank values
    pub fn parse(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("channel id must not be empty".to_string());
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Day partition of the output table (`creation_date=YYYY-MM-DD`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayPartition(NaiveDate);

impl DayPartition {
    /// Partition for the current UTC date
    pub fn today() -> Self {
        Self(Utc::now().date_naive())
    }

    /// Partition for a specific date
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Parse a partition value in `YYYY-MM-DD` form
    pub fn parse(value: &str) -> Result<Self, String> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|e| format!("invalid partition date '{value}': {e}"))
    }

    /// Underlying date
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Directory segment, e.g. `creation_date=2024-03-01`
    pub fn segment(&self) -> String {
        format!("creation_date={self}")
    }

    /// Key prefix for a dataset, e.g. `youtube_channel_stats/creation_date=2024-03-01`
    pub fn prefix(&self, dataset: &str) -> String {
        format!("{}/{}", dataset.trim_end_matches('/'), self.segment())
    }
}

impl fmt::Display for DayPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Channel statistics facet as returned by the API
///
/// Counts arrive as decimal strings and are stored as integers. Any of them
/// may be missing from an item; `subscriber_count` is absent whenever the
/// channel hides it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    /// Total views
    #[serde(
        default,
        deserialize_with = "count::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub view_count: Option<u64>,
    /// Total comments (no longer populated by the API for most channels)
    #[serde(
        default,
        deserialize_with = "count::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub comment_count: Option<u64>,
    /// Subscribers, absent when hidden
    #[serde(
        default,
        deserialize_with = "count::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub subscriber_count: Option<u64>,
    /// Whether the subscriber count is hidden
    #[serde(default)]
    pub hidden_subscriber_count: bool,
    /// Public videos
    #[serde(
        default,
        deserialize_with = "count::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub video_count: Option<u64>,
}

/// One item of a `channels.list` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelItem {
    /// Resource kind (`youtube#channel`)
    #[serde(default)]
    pub kind: String,
    /// Entity tag
    #[serde(default)]
    pub etag: String,
    /// Channel id
    pub id: String,
    /// Statistics facet
    #[serde(default)]
    pub statistics: Statistics,
}

/// Statistics record as stored in the output table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatsRecord {
    /// Resource kind
    pub kind: String,
    /// Entity tag
    pub etag: String,
    /// Channel id
    pub id: String,
    /// Statistics facet
    pub statistics: Statistics,
    /// Retrieval time (UTC)
    #[serde(with = "retrieved_at")]
    pub retrieved_at: DateTime<Utc>,
}

impl ChannelStatsRecord {
    /// Stamp an API item with its retrieval time
    pub fn from_item(item: ChannelItem, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            kind: item.kind,
            etag: item.etag,
            id: item.id,
            statistics: item.statistics,
            retrieved_at,
        }
    }
}

/// Serde helpers for counts that the API encodes as strings
mod count {
    use serde::de::{self, Visitor};
    use serde::Deserializer;
    use std::fmt;

    struct CountVisitor;

    impl<'de> Visitor<'de> for CountVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom(format!("negative count: {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid count: {v:?}")))
        }
    }

    fn required<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        d.deserialize_any(CountVisitor)
    }

    pub fn optional<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        struct OptionalVisitor;

        impl<'de> Visitor<'de> for OptionalVisitor {
            type Value = Option<u64>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an optional count")
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
                required(d).map(Some)
            }
        }

        d.deserialize_option(OptionalVisitor)
    }
}

/// `retrieved_at` uses the catalog's JSON SerDe timestamp layout
mod retrieved_at {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
