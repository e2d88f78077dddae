use super::table_storage::{SnapshotReader, Table, VersionedValue, WriteBatch};
use crate::core::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};

/// Version given to values that only exist in the pending write batch.
pub const PENDING_VERSION: u64 = u64::MAX;

/// Read-your-own-writes view of one write batch over one snapshot.
///
/// Every sub-accessor of a session holds a clone of the same view, so they
/// all observe each other's pending writes.
#[derive(Debug, Clone)]
pub struct StorageView {
    snapshot: Arc<SnapshotReader>,
    write_batch: Arc<Mutex<WriteBatch>>,
}

impl StorageView {
    pub fn new(snapshot: Arc<SnapshotReader>, write_batch: Arc<Mutex<WriteBatch>>) -> Self {
        Self {
            snapshot,
            write_batch,
        }
    }

    pub fn snapshot(&self) -> &SnapshotReader {
        &self.snapshot
    }

    pub fn read(&self, table: &str, key: &str) -> Result<Option<JsonValue>> {
        let batch = self.write_batch.lock()?;
        if let Some(pending) = batch.pending(table, key) {
            return Ok(pending.cloned());
        }
        Ok(self.snapshot.read(table, key).map(|v| v.value.clone()))
    }

    pub fn read_as<T: DeserializeOwned>(&self, table: &str, key: &str) -> Result<Option<T>> {
        match self.read(table, key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Version of the key in the snapshot, ignoring pending writes.
    ///
    /// This is the version a write must expect to detect concurrent commits.
    pub fn snapshot_version(&self, table: &str, key: &str) -> u64 {
        self.snapshot.version(table, key)
    }

    pub fn put(&self, table: &str, key: &str, value: JsonValue, expected_version: Option<u64>) -> Result<()> {
        self.write_batch.lock()?.put(table, key, value, expected_version);
        Ok(())
    }

    pub fn put_as<T: Serialize>(&self, table: &str, key: &str, value: &T, expected_version: Option<u64>) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.put(table, key, value, expected_version)
    }

    pub fn delete(&self, table: &str, key: &str, expected_version: Option<u64>) -> Result<()> {
        self.write_batch.lock()?.delete(table, key, expected_version);
        Ok(())
    }

    /// The table as this unit of work sees it: snapshot plus pending writes.
    pub fn table(&self, table: &str) -> Result<Table> {
        let mut merged = self.snapshot.table(table);
        let batch = self.write_batch.lock()?;
        for (key, pending) in batch.pending_in_table(table) {
            match pending {
                Some(value) => {
                    merged.insert(
                        key.to_string(),
                        VersionedValue {
                            value: value.clone(),
                            version: PENDING_VERSION,
                        },
                    );
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged)
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, table: &str, prefix: &str) -> Result<Vec<(String, JsonValue)>> {
        let merged = self.table(table)?;
        Ok(merged
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, v)| (key.clone(), v.value.clone()))
            .collect())
    }

    pub fn scan_prefix_as<T: DeserializeOwned>(&self, table: &str, prefix: &str) -> Result<Vec<(String, T)>> {
        self.scan_prefix(table, prefix)?
            .into_iter()
            .map(|(key, value)| Ok((key, serde_json::from_value(value)?)))
            .collect()
    }

    pub fn count(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.len())
    }

    pub fn pending_writes(&self) -> Result<usize> {
        Ok(self.write_batch.lock()?.len())
    }
}
