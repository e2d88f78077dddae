// ============================================================================
// Background Task Descriptors
// ============================================================================
//
// Work deferred to background workers (index cleanup, re-reduce). A session
// coalesces descriptors of the same kind so that many document changes in
// one unit of work persist a single task.
//
// ============================================================================

use crate::core::Result;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;

/// A unit of background work registered through a session
pub trait DatabaseTask: Any + Send + fmt::Debug {
    /// Stable name of the task kind, stored with the task
    fn kind(&self) -> &'static str;

    /// Index the task operates on
    fn index(&self) -> &str;

    /// Task body as persisted
    fn payload(&self) -> Result<JsonValue>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Remove entries of deleted documents from an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveFromIndexTask {
    pub index: String,
    pub keys: BTreeSet<String>,
}

impl RemoveFromIndexTask {
    pub const KIND: &'static str = "RemoveFromIndex";

    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            keys: BTreeSet::new(),
        }
    }

    pub fn add_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.keys.insert(key.into());
        self
    }
}

impl DatabaseTask for RemoveFromIndexTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn index(&self) -> &str {
        &self.index
    }

    fn payload(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Re-run the reduce step of a map/reduce index for a set of reduce keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReduceKeysTask {
    pub index: String,
    pub reduce_keys: BTreeSet<String>,
}

impl ReduceKeysTask {
    pub const KIND: &'static str = "ReduceKeys";

    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            reduce_keys: BTreeSet::new(),
        }
    }

    pub fn add_reduce_keys<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reduce_keys.extend(keys.into_iter().map(Into::into));
        self
    }
}

impl DatabaseTask for ReduceKeysTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn index(&self) -> &str {
        &self.index
    }

    fn payload(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_payloads() {
        let mut remove = RemoveFromIndexTask::new("Users");
        remove.add_key("users/2").add_key("users/1").add_key("users/2");
        assert_eq!(remove.kind(), "RemoveFromIndex");
        assert_eq!(
            remove.payload().unwrap(),
            json!({"index": "Users", "keys": ["users/1", "users/2"]})
        );

        let mut reduce = ReduceKeysTask::new("Totals");
        reduce.add_reduce_keys(["b", "a"]);
        assert_eq!(reduce.index(), "Totals");
        assert_eq!(reduce.payload().unwrap()["reduce_keys"], json!(["a", "b"]));
    }

    #[test]
    fn test_downcast_through_trait_object() {
        let task: Box<dyn DatabaseTask> = Box::new(ReduceKeysTask::new("Totals"));
        assert!(task.as_any().downcast_ref::<ReduceKeysTask>().is_some());
        assert!(task.as_any().downcast_ref::<RemoveFromIndexTask>().is_none());
    }
}
