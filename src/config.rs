//! Configuration file loading
//!
//! One JSON document configures both the producer and the workers:
//!
//! ```json
//! {
//!   "youtube": [
//!     {"developer_key": "...", "email": "ops@example.com", "project": "harvest-a"}
//!   ],
//!   "storage": {"root": "/data/objects", "dataset": "youtube_channel_stats"},
//!   "catalog": {"metastore_dir": "/data/metastore", "source_ids_csv": "/data/snippets.csv"},
//!   "queue": {"root": "/data/queues", "credentials_queue": "youtube_credentials"},
//!   "tmp_dir": "/tmp/harvest"
//! }
//! ```
//!
//! Unknown top-level sections are ignored so the file can be shared with
//! other jobs.

use crate::api::DEFAULT_BASE_URL;
use crate::catalog::DEFAULT_SOURCE_TABLE;
use crate::credentials::Credential;
use crate::producer::{CANDIDATE_FILE, LOCK_FILE};
use crate::DEFAULT_DATASET;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default name of the work queue
pub const DEFAULT_WORK_QUEUE: &str = "youtube_channel_stats";

/// Default visibility timeout for claimed batches (6 hours)
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 6 * 60 * 60;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {message}")]
    Io {
        /// Config path
        path: String,
        /// Underlying error
        message: String,
    },

    /// File is not valid JSON for this schema
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// Parsed but semantically invalid
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Object storage section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local object store
    pub root: PathBuf,
    /// Dataset (top-level key prefix) for statistics objects
    #[serde(default = "default_dataset")]
    pub dataset: String,
}

/// Catalog section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory holding table definitions
    pub metastore_dir: PathBuf,
    /// CSV export of the upstream table (`channel_id` column)
    pub source_ids_csv: PathBuf,
    /// Upstream table name
    #[serde(default = "default_source_table")]
    pub source_table: String,
    /// Output statistics table name
    #[serde(default = "default_dataset")]
    pub table: String,
}

/// Queue section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Spool root directory
    pub root: PathBuf,
    /// Work queue name
    #[serde(default = "default_work_queue")]
    pub work_queue: String,
    /// Queue the producer publishes credentials on, if any
    #[serde(default)]
    pub credentials_queue: Option<String>,
    /// Seconds a received batch stays invisible before redelivery
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

/// Statistics API section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the Data API
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Complete harvester configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// API credentials
    #[serde(default)]
    pub youtube: Vec<Credential>,
    /// Object storage
    pub storage: StorageConfig,
    /// Catalog
    pub catalog: CatalogConfig,
    /// Queues
    pub queue: QueueConfig,
    /// Statistics API
    #[serde(default)]
    pub api: ApiConfig,
    /// Scratch directory for candidate downloads and the producer lock
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
}

fn default_dataset() -> String {
    DEFAULT_DATASET.to_string()
}

fn default_source_table() -> String {
    DEFAULT_SOURCE_TABLE.to_string()
}

fn default_work_queue() -> String {
    DEFAULT_WORK_QUEUE.to_string()
}

fn default_visibility_timeout_secs() -> u64 {
    DEFAULT_VISIBILITY_TIMEOUT_SECS
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl HarvestConfig {
    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON document
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.youtube.is_empty() && self.queue.credentials_queue.is_none() {
            return Err(ConfigError::Invalid(
                "no credentials: set `youtube` or `queue.credentials_queue`".to_string(),
            ));
        }
        if let Some(i) = self
            .youtube
            .iter()
            .position(|c| c.developer_key.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "credential #{i} has an empty developer_key"
            )));
        }

        if !is_identifier(&self.storage.dataset) {
            return Err(ConfigError::Invalid(format!(
                "storage.dataset must be alphanumeric/underscore: {:?}",
                self.storage.dataset
            )));
        }
        for (field, value) in [
            ("catalog.table", &self.catalog.table),
            ("catalog.source_table", &self.catalog.source_table),
        ] {
            if !is_identifier(value) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be alphanumeric/underscore: {value:?}"
                )));
            }
        }

        let mut queues = vec![("queue.work_queue", &self.queue.work_queue)];
        if let Some(name) = &self.queue.credentials_queue {
            if name == &self.queue.work_queue {
                return Err(ConfigError::Invalid(
                    "queue.credentials_queue must differ from queue.work_queue".to_string(),
                ));
            }
            queues.push(("queue.credentials_queue", name));
        }
        for (field, name) in queues {
            if name.is_empty()
                || name.starts_with('.')
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            {
                return Err(ConfigError::Invalid(format!("{field} is not a valid name: {name:?}")));
            }
        }
        if self.queue.visibility_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "queue.visibility_timeout_secs must be positive".to_string(),
            ));
        }

        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "api.base_url must be an http(s) URL: {}",
                self.api.base_url
            )));
        }

        Ok(())
    }

    /// Visibility timeout as a duration
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.visibility_timeout_secs)
    }

    /// Path of the candidate id download
    pub fn candidate_file(&self) -> PathBuf {
        self.tmp_dir.join(CANDIDATE_FILE)
    }

    /// Path of the producer lock file
    pub fn producer_lock_file(&self) -> PathBuf {
        self.tmp_dir.join(LOCK_FILE)
    }
}
