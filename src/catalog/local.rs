//! Filesystem catalog
//!
//! Table definitions and their registered partitions live as JSON files in a
//! metastore directory. The upstream source table is a CSV export with a
//! `channel_id` column. Partition data is read from the object store, and only
//! partitions registered by the last repair are visible to queries.

use super::{
    write_candidate_file, CandidateQuery, Catalog, CatalogError, CatalogResult, TableDdl,
    TableDefinition,
};
use crate::sink::decode_object;
use crate::storage::ObjectStore;
use crate::{ChannelId, DayPartition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const PARTITION_KEY: &str = "creation_date=";

#[derive(Debug, Serialize, Deserialize)]
struct TableEntry {
    definition: TableDefinition,
    #[serde(default)]
    partitions: BTreeSet<String>,
}

/// Catalog backed by a metastore directory, a source CSV and an object store
pub struct LocalCatalog {
    metastore_dir: PathBuf,
    source_csv: PathBuf,
    store: Arc<dyn ObjectStore>,
}

impl LocalCatalog {
    /// Create a catalog
    pub fn new(
        metastore_dir: impl Into<PathBuf>,
        source_csv: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            metastore_dir: metastore_dir.into(),
            source_csv: source_csv.into(),
            store,
        }
    }

    /// Registered partitions of `table`, oldest first
    pub async fn partitions(&self, table: &str) -> CatalogResult<Vec<DayPartition>> {
        let entry = self.load(table).await?;
        entry
            .partitions
            .iter()
            .map(|p| DayPartition::parse(p).map_err(CatalogError::InvalidMetastore))
            .collect()
    }

    fn entry_path(&self, table: &str) -> CatalogResult<PathBuf> {
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(CatalogError::QueryFailed(format!(
                "invalid table name: {table:?}"
            )));
        }
        Ok(self.metastore_dir.join(format!("{table}.json")))
    }

    async fn try_load(&self, table: &str) -> CatalogResult<Option<TableEntry>> {
        let path = self.entry_path(table)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CatalogError::IoError(format!("Failed to read {path:?}: {e}")))
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CatalogError::InvalidMetastore(format!("{path:?}: {e}")))
    }

    async fn load(&self, table: &str) -> CatalogResult<TableEntry> {
        self.try_load(table)
            .await?
            .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))
    }

    async fn save(&self, entry: &TableEntry) -> CatalogResult<()> {
        let path = self.entry_path(&entry.definition.name)?;
        tokio::fs::create_dir_all(&self.metastore_dir)
            .await
            .map_err(|e| CatalogError::IoError(e.to_string()))?;
        let json = serde_json::to_string_pretty(entry)
            .map_err(|e| CatalogError::InvalidMetastore(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| CatalogError::IoError(format!("Failed to write {tmp:?}: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CatalogError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Distinct non-blank upstream ids in file order
    fn source_ids(&self) -> CatalogResult<Vec<ChannelId>> {
        super::read_candidate_file(&self.source_csv)
    }

    /// Ids already stored in `day`, if that partition is registered
    async fn stored_ids(&self, table: &str, day: DayPartition) -> CatalogResult<HashSet<String>> {
        let entry = self.load(table).await?;
        let mut ids = HashSet::new();
        if !entry.partitions.contains(&day.to_string()) {
            return Ok(ids);
        }

        let prefix = format!("{}/", day.prefix(&entry.definition.location));
        let keys = self
            .store
            .list(&prefix)
            .await
            .map_err(|e| CatalogError::QueryFailed(e.to_string()))?;
        for key in keys {
            let body = self
                .store
                .get(&key)
                .await
                .map_err(|e| CatalogError::QueryFailed(e.to_string()))?;
            // Malformed objects are skipped, as the table's SerDe ignores them
            match decode_object(&body) {
                Ok(records) => ids.extend(records.into_iter().map(|r| r.id)),
                Err(e) => debug!(key = %key, error = %e, "Skipping unreadable object"),
            }
        }
        Ok(ids)
    }

    async fn evaluate(&self, query: &CandidateQuery) -> CatalogResult<Vec<ChannelId>> {
        let mut ids = self.source_ids()?;
        if let Some(day) = query.exclude_day {
            let stored = self.stored_ids(&query.output_table, day).await?;
            ids.retain(|id| !stored.contains(id.as_str()));
        }
        Ok(ids)
    }
}

#[async_trait]
impl Catalog for LocalCatalog {
    async fn table_exists(&self, table: &str) -> CatalogResult<bool> {
        Ok(self.try_load(table).await?.is_some())
    }

    async fn execute(&self, ddl: &TableDdl) -> CatalogResult<()> {
        debug!(table = ddl.table(), sql = %ddl.to_sql(), "Executing DDL");
        match ddl {
            TableDdl::Drop { table } => {
                let path = self.entry_path(table)?;
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => info!(table = %table, "Dropped table"),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(CatalogError::IoError(e.to_string())),
                }
            }
            TableDdl::Create(definition) => {
                if self.try_load(&definition.name).await?.is_none() {
                    self.save(&TableEntry {
                        definition: definition.clone(),
                        partitions: BTreeSet::new(),
                    })
                    .await?;
                    info!(table = %definition.name, location = %definition.location, "Created table");
                }
            }
            TableDdl::Repair { table } => {
                let mut entry = self.load(table).await?;
                let prefix = format!("{}/", entry.definition.location.trim_end_matches('/'));
                let keys = self
                    .store
                    .list(&prefix)
                    .await
                    .map_err(|e| CatalogError::QueryFailed(e.to_string()))?;

                let found: BTreeSet<String> = keys
                    .iter()
                    .filter_map(|key| key.strip_prefix(&prefix))
                    .filter_map(|rest| rest.split('/').next())
                    .filter_map(|segment| segment.strip_prefix(PARTITION_KEY))
                    .filter(|value| DayPartition::parse(value).is_ok())
                    .map(str::to_string)
                    .collect();

                let added = found.difference(&entry.partitions).count();
                entry.partitions.extend(found);
                self.save(&entry).await?;
                info!(table = %table, added, total = entry.partitions.len(), "Repaired partitions");
            }
        }
        Ok(())
    }

    async fn download_candidates(&self, query: &CandidateQuery, dest: &Path) -> CatalogResult<()> {
        let ids = self.evaluate(query).await?;
        write_candidate_file(dest, &ids)?;
        debug!(dest = ?dest, rows = ids.len(), "Downloaded candidate ids");
        Ok(())
    }

    async fn count_candidates(&self, query: &CandidateQuery) -> CatalogResult<u64> {
        Ok(self.evaluate(query).await?.len() as u64)
    }
}
