use super::{QUEUES_TABLE, compound_key, compound_prefix};
use crate::core::{Etag, Result};
use crate::storage::generator::EtagGenerator;
use crate::storage::view::StorageView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: Etag,
    pub queue: String,
    pub data: JsonValue,
    pub enqueued_at: DateTime<Utc>,
}

pub struct QueueStorageActions {
    view: StorageView,
    generator: Arc<EtagGenerator>,
}

impl QueueStorageActions {
    pub fn new(view: StorageView, generator: Arc<EtagGenerator>) -> Self {
        Self { view, generator }
    }

    pub fn enqueue(&self, queue: &str, data: JsonValue) -> Result<Etag> {
        let id = self.generator.create_sequential_etag();
        let message = QueuedMessage {
            id,
            queue: queue.to_string(),
            data,
            enqueued_at: Utc::now(),
        };
        self.view
            .put_as(QUEUES_TABLE, &compound_key(&[queue, &id.to_key()]), &message, None)?;
        Ok(id)
    }

    /// Oldest messages first
    pub fn peek(&self, queue: &str, take: usize) -> Result<Vec<QueuedMessage>> {
        let mut messages = self
            .view
            .scan_prefix_as::<QueuedMessage>(QUEUES_TABLE, &compound_prefix(&[queue]))?;
        messages.truncate(take);
        Ok(messages.into_iter().map(|(_, m)| m).collect())
    }

    pub fn delete_from_queue(&self, queue: &str, id: Etag) -> Result<bool> {
        let key = compound_key(&[queue, &id.to_key()]);
        if self.view.read(QUEUES_TABLE, &key)?.is_none() {
            return Ok(false);
        }
        // Two consumers removing the same message must not both succeed.
        let version = self.view.snapshot_version(QUEUES_TABLE, &key);
        self.view.delete(QUEUES_TABLE, &key, Some(version))?;
        Ok(true)
    }
}
