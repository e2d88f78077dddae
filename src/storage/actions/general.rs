use super::IDENTITIES_TABLE;
use crate::core::Result;
use crate::storage::view::StorageView;
use serde_json::json;

pub struct GeneralStorageActions {
    view: StorageView,
}

impl GeneralStorageActions {
    pub fn new(view: StorageView) -> Self {
        Self { view }
    }

    /// Increment and return the named identity counter.
    ///
    /// Concurrent increments of the same counter conflict at commit.
    pub fn next_identity_value(&self, name: &str) -> Result<u64> {
        let current = self.identity_value(name)?;
        let next = current + 1;
        let version = self.view.snapshot_version(IDENTITIES_TABLE, name);
        self.view.put(IDENTITIES_TABLE, name, json!(next), Some(version))?;
        Ok(next)
    }

    pub fn identity_value(&self, name: &str) -> Result<u64> {
        Ok(self
            .view
            .read(IDENTITIES_TABLE, name)?
            .and_then(|value| value.as_u64())
            .unwrap_or(0))
    }

    pub fn set_identity_value(&self, name: &str, value: u64) -> Result<()> {
        self.view.put(IDENTITIES_TABLE, name, json!(value), None)
    }
}
