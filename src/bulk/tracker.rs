// ============================================================================
// Background bulk operations
// ============================================================================
//
// Bulk operations run on tokio's blocking pool. The tracker hands out a
// monotonically increasing operation id and keeps the live result sequence of
// every operation it started, so callers can poll progress by id.
//
// Running operations are always kept. Finished ones are kept until taken with
// `take_status` or until more than `retention` operations have finished, at
// which point the oldest finished entry is evicted.
//
// ============================================================================

use super::results::{BulkOperationResult, ResultSequence};
use crate::core::{DbError, Result};
use serde::Serialize;
use crate::config::DEFAULT_FINISHED_OPERATIONS_RETENTION;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{Level, event};

pub type BulkOperationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Running,
    Completed,
    Faulted,
}

/// Point-in-time status of a background operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationStatus {
    pub operation_id: BulkOperationId,
    pub state: OperationState,
    pub results: Vec<BulkOperationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
struct TrackedOperation {
    results: ResultSequence,
    state: OperationState,
    error: Option<String>,
}

impl TrackedOperation {
    fn status(&self, id: BulkOperationId) -> Result<BulkOperationStatus> {
        Ok(BulkOperationStatus {
            operation_id: id,
            state: self.state,
            results: self.results.snapshot()?,
            error: self.error.clone(),
        })
    }
}

#[derive(Debug)]
struct OperationTable {
    entries: HashMap<BulkOperationId, TrackedOperation>,
    // finish order, oldest first
    finished: VecDeque<BulkOperationId>,
    retention: usize,
}

impl OperationTable {
    fn new(retention: usize) -> Self {
        Self {
            entries: HashMap::new(),
            finished: VecDeque::new(),
            retention,
        }
    }

    fn evict_finished(&mut self) {
        while self.finished.len() > self.retention {
            if let Some(id) = self.finished.pop_front() {
                self.entries.remove(&id);
                event!(Level::DEBUG, operation_id = id, "finished bulk operation evicted");
            }
        }
    }
}

type Operations = Arc<Mutex<OperationTable>>;

/// Handle to a started background operation
#[derive(Debug)]
pub struct BulkOperationHandle {
    id: BulkOperationId,
    task: JoinHandle<Result<()>>,
}

impl BulkOperationHandle {
    pub fn id(&self) -> BulkOperationId {
        self.id
    }

    /// Wait for the operation to finish and return its outcome
    pub async fn wait(self) -> Result<()> {
        let id = self.id;
        self.task
            .await
            .map_err(|e| DbError::ExecutionError(format!("Bulk operation {} did not finish: {}", id, e)))?
    }
}

#[derive(Debug)]
pub struct BulkOperationTracker {
    last_id: AtomicU64,
    operations: Operations,
}

impl Default for BulkOperationTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_FINISHED_OPERATIONS_RETENTION)
    }
}

impl BulkOperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` finished operations queryable
    pub fn with_retention(retention: usize) -> Self {
        Self {
            last_id: AtomicU64::new(0),
            operations: Arc::new(Mutex::new(OperationTable::new(retention))),
        }
    }

    /// Run `work` in the background, reporting into `results`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&self, results: ResultSequence, work: F) -> Result<BulkOperationHandle>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DbError::ExecutionError(format!("Background operations need a tokio runtime: {}", e)))?;

        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.operations.lock()?.entries.insert(
            id,
            TrackedOperation {
                results,
                state: OperationState::Running,
                error: None,
            },
        );
        event!(Level::INFO, operation_id = id, "background bulk operation started");

        let operations = self.operations.clone();
        let task = runtime.spawn_blocking(move || {
            let outcome = work();
            finish(&operations, id, &outcome);
            outcome
        });

        Ok(BulkOperationHandle { id, task })
    }

    pub fn status(&self, id: BulkOperationId) -> Result<Option<BulkOperationStatus>> {
        let operations = self.operations.lock()?;
        operations
            .entries
            .get(&id)
            .map(|operation| operation.status(id))
            .transpose()
    }

    /// Status of `id`, releasing the operation and its results once it has finished.
    /// A running operation stays tracked.
    pub fn take_status(&self, id: BulkOperationId) -> Result<Option<BulkOperationStatus>> {
        let mut operations = self.operations.lock()?;
        let Some(operation) = operations.entries.get(&id) else {
            return Ok(None);
        };
        let status = operation.status(id)?;
        if status.state != OperationState::Running {
            operations.entries.remove(&id);
            operations.finished.retain(|finished| *finished != id);
        }
        Ok(Some(status))
    }

    pub fn running(&self) -> Result<usize> {
        Ok(self
            .operations
            .lock()?
            .entries
            .values()
            .filter(|op| op.state == OperationState::Running)
            .count())
    }

    /// Number of operations currently holding results, running or finished
    pub fn tracked(&self) -> Result<usize> {
        Ok(self.operations.lock()?.entries.len())
    }
}

fn finish(operations: &Operations, id: BulkOperationId, outcome: &Result<()>) {
    let mut operations = lock_recovering(operations);
    let Some(operation) = operations.entries.get_mut(&id) else {
        return;
    };
    match outcome {
        Ok(()) => {
            operation.state = OperationState::Completed;
            event!(Level::INFO, operation_id = id, "background bulk operation completed");
        }
        Err(err) => {
            operation.state = OperationState::Faulted;
            operation.error = Some(err.to_string());
            event!(Level::ERROR, operation_id = id, error = %err, "background bulk operation faulted");
        }
    }
    operations.finished.push_back(id);
    operations.evict_finished();
}

// The status entry must be written even if a poller panicked while holding the lock.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
