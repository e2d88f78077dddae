use super::{LISTS_TABLE, compound_key, compound_prefix};
use crate::core::{Etag, Result};
use crate::storage::generator::EtagGenerator;
use crate::storage::view::StorageView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub key: String,
    pub etag: Etag,
    pub data: JsonValue,
    pub created_at: DateTime<Utc>,
}

pub struct ListsStorageActions {
    view: StorageView,
    generator: Arc<EtagGenerator>,
}

impl ListsStorageActions {
    pub fn new(view: StorageView, generator: Arc<EtagGenerator>) -> Self {
        Self { view, generator }
    }

    pub fn set(&self, name: &str, key: &str, data: JsonValue) -> Result<Etag> {
        let etag = self.generator.create_sequential_etag();
        let item = ListItem {
            key: key.to_string(),
            etag,
            data,
            created_at: Utc::now(),
        };
        self.view
            .put_as(LISTS_TABLE, &compound_key(&[name, key]), &item, None)?;
        Ok(etag)
    }

    pub fn read(&self, name: &str, key: &str) -> Result<Option<ListItem>> {
        self.view.read_as(LISTS_TABLE, &compound_key(&[name, key]))
    }

    /// All items of a list, in key order
    pub fn read_all(&self, name: &str) -> Result<Vec<ListItem>> {
        Ok(self
            .view
            .scan_prefix_as::<ListItem>(LISTS_TABLE, &compound_prefix(&[name]))?
            .into_iter()
            .map(|(_, item)| item)
            .collect())
    }

    pub fn remove(&self, name: &str, key: &str) -> Result<bool> {
        let compound = compound_key(&[name, key]);
        if self.view.read(LISTS_TABLE, &compound)?.is_none() {
            return Ok(false);
        }
        self.view.delete(LISTS_TABLE, &compound, None)?;
        Ok(true)
    }
}
