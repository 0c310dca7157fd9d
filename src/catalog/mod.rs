//! Catalog (query engine) interface
//!
//! The producer needs four things from the catalog: whether the output table
//! exists, the candidate channel ids as a downloaded file, the candidate count,
//! and DDL execution. Queries and DDL are typed values that can render
//! themselves as SQL for engines that take SQL text.

use crate::{ChannelId, DayPartition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub mod local;

pub use local::LocalCatalog;

/// Upstream table holding discovered videos and their channel ids
pub const DEFAULT_SOURCE_TABLE: &str = "youtube_video_snippet";

/// Catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Table is not registered
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Query or DDL failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Candidate file could not be read or written
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Metastore entry is corrupt
    #[error("invalid metastore entry: {0}")]
    InvalidMetastore(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Query engine over partitioned object storage
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Whether `table` is registered
    async fn table_exists(&self, table: &str) -> CatalogResult<bool>;

    /// Execute DDL and wait for it to finish
    async fn execute(&self, ddl: &TableDdl) -> CatalogResult<()>;

    /// Run the candidate query and download the result to `dest` as CSV
    /// with a `channel_id` header
    async fn download_candidates(&self, query: &CandidateQuery, dest: &Path) -> CatalogResult<()>;

    /// Run the candidate count query
    async fn count_candidates(&self, query: &CandidateQuery) -> CatalogResult<u64>;
}

/// Distinct upstream channel ids, optionally minus those already stored for a day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    /// Upstream table
    pub source_table: String,
    /// Output statistics table
    pub output_table: String,
    /// Day whose already-harvested ids are excluded
    pub exclude_day: Option<DayPartition>,
}

impl CandidateQuery {
    /// All distinct upstream ids
    pub fn new(source_table: impl Into<String>, output_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            output_table: output_table.into(),
            exclude_day: None,
        }
    }

    /// Exclude ids already present in `day`
    pub fn excluding(mut self, day: DayPartition) -> Self {
        self.exclude_day = Some(day);
        self
    }

    fn predicate(&self) -> String {
        let mut predicate = "snippet.channelId is not NULL".to_string();
        if let Some(day) = self.exclude_day {
            predicate.push_str(&format!(
                "\n  and snippet.channelId not in (\n    select {out}.id\n    from {out}\n    where {out}.creation_date = '{day}'\n  )",
                out = self.output_table,
            ));
        }
        predicate
    }

    /// Query selecting the candidate ids
    pub fn select_sql(&self) -> String {
        format!(
            "select distinct\n  snippet.channelId as channel_id\nfrom\n  {}\nwhere\n  {}",
            self.source_table,
            self.predicate()
        )
    }

    /// Query counting the candidate ids
    pub fn count_sql(&self) -> String {
        format!(
            "select count(distinct snippet.channelId) as channel_count\nfrom\n  {}\nwhere\n  {}",
            self.source_table,
            self.predicate()
        )
    }
}

/// External table holding channel statistics, partitioned by day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Table name
    pub name: String,
    /// Storage location (object key prefix or URL)
    pub location: String,
}

impl TableDefinition {
    /// Definition for `name` stored at `location`
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }
}

/// Idempotent table DDL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableDdl {
    /// `DROP TABLE IF EXISTS`
    Drop {
        /// Table name
        table: String,
    },
    /// `CREATE EXTERNAL TABLE IF NOT EXISTS`
    Create(TableDefinition),
    /// Register partitions found under the table location
    Repair {
        /// Table name
        table: String,
    },
}

impl TableDdl {
    /// Table the statement targets
    pub fn table(&self) -> &str {
        match self {
            TableDdl::Drop { table } | TableDdl::Repair { table } => table,
            TableDdl::Create(def) => &def.name,
        }
    }

    /// Render as SQL
    pub fn to_sql(&self) -> String {
        match self {
            TableDdl::Drop { table } => format!("DROP TABLE IF EXISTS {table}"),
            TableDdl::Repair { table } => format!("MSCK REPAIR TABLE {table}"),
            TableDdl::Create(def) => format!(
                "create external table if not exists {name}\n\
                 (\n\
                 \x20   kind string,\n\
                 \x20   etag string,\n\
                 \x20   id   string,\n\
                 \x20   statistics struct<\n\
                 \x20       viewCount: bigint,\n\
                 \x20       commentCount: bigint,\n\
                 \x20       subscriberCount: bigint,\n\
                 \x20       hiddenSubscriberCount: boolean,\n\
                 \x20       videoCount: bigint\n\
                 \x20   >,\n\
                 \x20   retrieved_at timestamp\n\
                 )\n\
                 PARTITIONED BY (creation_date String)\n\
                 ROW FORMAT SERDE 'org.openx.data.jsonserde.JsonSerDe'\n\
                 WITH SERDEPROPERTIES (\n\
                 \x20   'serialization.format' = '1',\n\
                 \x20   'ignore.malformed.json' = 'true'\n\
                 )\n\
                 LOCATION '{location}/'\n\
                 TBLPROPERTIES ('has_encrypted_data'='false')",
                name = def.name,
                location = def.location.trim_end_matches('/'),
            ),
        }
    }
}

/// Row of a candidate file
#[derive(Debug, Serialize, Deserialize)]
struct CandidateRecord {
    channel_id: String,
}

/// Write candidate ids as CSV with a `channel_id` header
pub fn write_candidate_file(path: &Path, ids: &[ChannelId]) -> CatalogResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CatalogError::IoError(e.to_string()))?;
    }
    let file = File::create(path)
        .map_err(|e| CatalogError::IoError(format!("Failed to create {path:?}: {e}")))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    if ids.is_empty() {
        writer
            .write_record(["channel_id"])
            .map_err(|e| CatalogError::CsvError(e.to_string()))?;
    }
    for id in ids {
        writer
            .serialize(CandidateRecord {
                channel_id: id.to_string(),
            })
            .map_err(|e| CatalogError::CsvError(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| CatalogError::IoError(e.to_string()))?;
    Ok(())
}

/// Read a candidate file, skipping blank ids and dropping repeats
///
/// First occurrence order is kept.
pub fn read_candidate_file(path: &Path) -> CatalogResult<Vec<ChannelId>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| CatalogError::CsvError(format!("Failed to open {path:?}: {e}")))?;
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for row in reader.deserialize::<CandidateRecord>() {
        let row = row.map_err(|e| CatalogError::CsvError(e.to_string()))?;
        let Ok(id) = ChannelId::parse(row.channel_id) else {
            continue;
        };
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }
    Ok(ids)
}
