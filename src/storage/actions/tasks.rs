use super::TASKS_TABLE;
use crate::core::{Etag, Result};
use crate::storage::generator::EtagGenerator;
use crate::storage::view::StorageView;
use crate::transaction::DatabaseTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A task as persisted for the background workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTask {
    pub id: Etag,
    pub index: String,
    pub kind: String,
    pub payload: JsonValue,
    pub added_at: DateTime<Utc>,
}

pub struct TasksStorageActions {
    view: StorageView,
    generator: Arc<EtagGenerator>,
}

impl TasksStorageActions {
    pub fn new(view: StorageView, generator: Arc<EtagGenerator>) -> Self {
        Self { view, generator }
    }

    pub fn add_task(&self, task: &dyn DatabaseTask, added_at: DateTime<Utc>) -> Result<Etag> {
        let id = self.generator.create_sequential_etag();
        let stored = StoredTask {
            id,
            index: task.index().to_string(),
            kind: task.kind().to_string(),
            payload: task.payload()?,
            added_at,
        };
        self.view.put_as(TASKS_TABLE, &id.to_key(), &stored, None)?;
        Ok(id)
    }

    pub fn has_tasks_for_index(&self, index: &str) -> Result<bool> {
        has_tasks_for_index(&self.view, index)
    }

    pub fn approximate_task_count(&self) -> Result<usize> {
        self.view.count(TASKS_TABLE)
    }

    pub fn tasks(&self) -> Result<Vec<StoredTask>> {
        Ok(self
            .view
            .scan_prefix_as::<StoredTask>(TASKS_TABLE, "")?
            .into_iter()
            .map(|(_, task)| task)
            .collect())
    }

    /// Remove and return every pending task of `kind` for `index`, oldest first.
    ///
    /// The removal is version-checked so two workers cannot both take a task.
    pub fn take_tasks(&self, index: &str, kind: &str) -> Result<Vec<StoredTask>> {
        let taken: Vec<StoredTask> = self
            .tasks()?
            .into_iter()
            .filter(|task| task.index == index && task.kind == kind)
            .collect();
        for task in &taken {
            let key = task.id.to_key();
            let version = self.view.snapshot_version(TASKS_TABLE, &key);
            self.view.delete(TASKS_TABLE, &key, Some(version))?;
        }
        Ok(taken)
    }
}

pub(crate) fn has_tasks_for_index(view: &StorageView, index: &str) -> Result<bool> {
    let tasks = view.table(TASKS_TABLE)?;
    for (_, entry) in tasks.iter() {
        if entry.value.get("index").and_then(JsonValue::as_str) == Some(index) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{TableStorage, WriteBatch};
    use crate::transaction::{ReduceKeysTask, RemoveFromIndexTask};
    use std::sync::Mutex;

    #[test]
    fn test_add_and_take_tasks() {
        let storage = TableStorage::new();
        let tasks = TasksStorageActions::new(
            StorageView::new(
                Arc::new(storage.snapshot().unwrap()),
                Arc::new(Mutex::new(WriteBatch::new())),
            ),
            Arc::new(EtagGenerator::new()),
        );

        let mut remove = RemoveFromIndexTask::new("Users/ByName");
        remove.add_key("users/1");
        let reduce = ReduceKeysTask::new("Orders/Totals");
        let now = Utc::now();

        tasks.add_task(&remove, now).unwrap();
        tasks.add_task(&reduce, now).unwrap();
        assert_eq!(tasks.approximate_task_count().unwrap(), 2);
        assert!(tasks.has_tasks_for_index("Users/ByName").unwrap());
        assert!(!tasks.has_tasks_for_index("Missing").unwrap());

        let taken = tasks
            .take_tasks("Users/ByName", RemoveFromIndexTask::KIND)
            .unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].payload["keys"], serde_json::json!(["users/1"]));
        assert_eq!(taken[0].added_at, now);
        assert!(!tasks.has_tasks_for_index("Users/ByName").unwrap());
        assert_eq!(tasks.approximate_task_count().unwrap(), 1);
    }
}
