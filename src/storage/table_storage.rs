// ============================================================================
// Table Storage: snapshots and write batches
// ============================================================================
//
// The committed state is a persistent map of tables (im::OrdMap), so taking a
// snapshot is an Arc clone and committing builds a new version of the state
// that shares structure with the previous one.
//
// Every stored value carries the commit sequence that last wrote it. Writes
// may state the version they observed; a commit is rejected as a whole when
// any such version has moved in the meantime (optimistic concurrency).
//
// ============================================================================

use crate::core::{DbError, Result};
use im::OrdMap;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Version reported for keys that do not exist.
pub const ABSENT_VERSION: u64 = 0;

/// A stored value and the commit sequence that wrote it
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    pub value: JsonValue,
    pub version: u64,
}

pub type Table = OrdMap<String, VersionedValue>;

#[derive(Debug, Clone, Default)]
struct StorageState {
    tables: OrdMap<String, Table>,
    commit_sequence: u64,
}

impl StorageState {
    fn version_of(&self, table: &str, key: &str) -> u64 {
        self.tables
            .get(table)
            .and_then(|t| t.get(key))
            .map(|v| v.version)
            .unwrap_or(ABSENT_VERSION)
    }
}

/// Shared committed state of all tables
#[derive(Debug, Default)]
pub struct TableStorage {
    state: RwLock<Arc<StorageState>>,
}

impl TableStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a point-in-time read view of every table
    pub fn snapshot(&self) -> Result<SnapshotReader> {
        let state = self.state.read()?.clone();
        Ok(SnapshotReader { state })
    }

    /// Sequence number of the last successful commit
    pub fn commit_sequence(&self) -> Result<u64> {
        Ok(self.state.read()?.commit_sequence)
    }

    /// Atomically apply a write batch.
    ///
    /// Either every operation is applied or none is. Returns the commit
    /// sequence the batch was written under.
    pub fn write(&self, batch: WriteBatch) -> Result<u64> {
        let mut guard = self.state.write()?;

        for op in &batch.operations {
            let Some(expected) = op.expected_version else {
                continue;
            };
            let current = guard.version_of(&op.table, &op.key);
            if current != expected {
                return Err(DbError::Concurrency(format!(
                    "Write-write conflict detected on '{}/{}': expected version {}, found {}",
                    op.table, op.key, expected, current
                )));
            }
        }

        let mut next = (**guard).clone();
        next.commit_sequence += 1;
        let sequence = next.commit_sequence;

        for op in batch.operations {
            if !next.tables.contains_key(&op.table) {
                next.tables.insert(op.table.clone(), Table::new());
            }
            let table = next
                .tables
                .get_mut(&op.table)
                .ok_or_else(|| DbError::Storage(format!("Table '{}' vanished during commit", op.table)))?;
            match op.value {
                Some(value) => {
                    table.insert(op.key, VersionedValue { value, version: sequence });
                }
                None => {
                    table.remove(&op.key);
                }
            }
        }

        *guard = Arc::new(next);
        Ok(sequence)
    }
}

/// Immutable view of the committed state at one point in time
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    state: Arc<StorageState>,
}

impl SnapshotReader {
    pub fn read(&self, table: &str, key: &str) -> Option<&VersionedValue> {
        self.state.tables.get(table).and_then(|t| t.get(key))
    }

    pub fn version(&self, table: &str, key: &str) -> u64 {
        self.state.version_of(table, key)
    }

    /// Whole table as of this snapshot (structural clone, O(1))
    pub fn table(&self, table: &str) -> Table {
        self.state.tables.get(table).cloned().unwrap_or_default()
    }

    pub fn commit_sequence(&self) -> u64 {
        self.state.commit_sequence
    }
}

/// One pending write. `value == None` is a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOperation {
    pub table: String,
    pub key: String,
    pub value: Option<JsonValue>,
    pub expected_version: Option<u64>,
}

/// Pending writes of one unit of work
#[derive(Debug, Default)]
pub struct WriteBatch {
    operations: Vec<WriteOperation>,
    latest: HashMap<(String, String), usize>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, table: &str, key: &str, value: JsonValue, expected_version: Option<u64>) {
        self.push(WriteOperation {
            table: table.to_string(),
            key: key.to_string(),
            value: Some(value),
            expected_version,
        });
    }

    pub fn delete(&mut self, table: &str, key: &str, expected_version: Option<u64>) {
        self.push(WriteOperation {
            table: table.to_string(),
            key: key.to_string(),
            value: None,
            expected_version,
        });
    }

    fn push(&mut self, op: WriteOperation) {
        self.latest
            .insert((op.table.clone(), op.key.clone()), self.operations.len());
        self.operations.push(op);
    }

    /// Latest pending state of a key: `None` when untouched by this batch,
    /// `Some(None)` when deleted, `Some(Some(value))` when written.
    pub fn pending(&self, table: &str, key: &str) -> Option<Option<&JsonValue>> {
        self.latest
            .get(&(table.to_string(), key.to_string()))
            .map(|&idx| self.operations[idx].value.as_ref())
    }

    /// Latest pending state of every key this batch touched in `table`
    pub fn pending_in_table<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a str, Option<&'a JsonValue>)> + 'a {
        self.latest
            .iter()
            .filter(move |((t, _), _)| t.as_str() == table)
            .map(|((_, key), &idx)| (key.as_str(), self.operations[idx].value.as_ref()))
    }

    pub fn operations(&self) -> &[WriteOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
