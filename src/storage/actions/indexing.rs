use super::INDEXES_TABLE;
use crate::core::{DbError, Etag, Result};
use crate::storage::view::StorageView;
use crate::storage::table_storage::ABSENT_VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of one index over the document stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_indexed_etag: Etag,
    pub last_indexed_timestamp: Option<DateTime<Utc>>,
    pub indexing_runs: u64,
}

pub struct IndexingStorageActions {
    view: StorageView,
}

impl IndexingStorageActions {
    pub fn new(view: StorageView) -> Self {
        Self { view }
    }

    pub fn add_index(&self, name: &str) -> Result<()> {
        if self.view.read(INDEXES_TABLE, name)?.is_some() {
            return Err(DbError::InvalidArgument(format!("Index '{}' already exists", name)));
        }
        let stats = IndexStats {
            name: name.to_string(),
            created_at: Utc::now(),
            last_indexed_etag: Etag::EMPTY,
            last_indexed_timestamp: None,
            indexing_runs: 0,
        };
        self.view
            .put_as(INDEXES_TABLE, name, &stats, Some(ABSENT_VERSION))
    }

    pub fn delete_index(&self, name: &str) -> Result<()> {
        if self.view.read(INDEXES_TABLE, name)?.is_none() {
            return Err(DbError::IndexNotFound(name.to_string()));
        }
        let version = self.view.snapshot_version(INDEXES_TABLE, name);
        self.view.delete(INDEXES_TABLE, name, Some(version))
    }

    pub fn index_stats(&self, name: &str) -> Result<Option<IndexStats>> {
        self.view.read_as(INDEXES_TABLE, name)
    }

    pub fn indexes_stats(&self) -> Result<Vec<IndexStats>> {
        self.view
            .scan_prefix_as::<IndexStats>(INDEXES_TABLE, "")
            .map(|entries| entries.into_iter().map(|(_, stats)| stats).collect())
    }

    pub fn indexes_names(&self) -> Result<Vec<String>> {
        Ok(self.view.table(INDEXES_TABLE)?.keys().cloned().collect())
    }

    /// Record that `name` has indexed everything up to `etag`
    pub fn update_last_indexed(&self, name: &str, etag: Etag, timestamp: DateTime<Utc>) -> Result<()> {
        let mut stats = self
            .index_stats(name)?
            .ok_or_else(|| DbError::IndexNotFound(name.to_string()))?;
        stats.last_indexed_etag = stats.last_indexed_etag.max(etag);
        stats.last_indexed_timestamp = Some(timestamp);
        stats.indexing_runs += 1;

        let version = self.view.snapshot_version(INDEXES_TABLE, name);
        self.view.put_as(INDEXES_TABLE, name, &stats, Some(version))
    }
}
