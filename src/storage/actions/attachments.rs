use super::ATTACHMENTS_TABLE;
use crate::core::{DbError, Etag, Result};
use crate::storage::generator::EtagGenerator;
use crate::storage::view::StorageView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub key: String,
    pub etag: Etag,
    pub data: Vec<u8>,
    pub metadata: JsonValue,
    pub last_modified: DateTime<Utc>,
}

pub struct AttachmentsStorageActions {
    view: StorageView,
    generator: Arc<EtagGenerator>,
}

impl AttachmentsStorageActions {
    pub fn new(view: StorageView, generator: Arc<EtagGenerator>) -> Self {
        Self { view, generator }
    }

    fn check_etag(&self, operation: &str, key: &str, current: Option<&Attachment>, expected: Option<Etag>) -> Result<()> {
        let Some(expected) = expected else {
            return Ok(());
        };
        let actual = current.map(|a| a.etag).unwrap_or(Etag::EMPTY);
        if actual != expected {
            return Err(DbError::Concurrency(format!(
                "{} attempted on attachment '{}' using a non current etag (expected {}, actual {})",
                operation, key, expected, actual
            )));
        }
        Ok(())
    }

    pub fn add_attachment(
        &self,
        key: &str,
        expected_etag: Option<Etag>,
        data: Vec<u8>,
        metadata: JsonValue,
    ) -> Result<Etag> {
        let current = self.attachment(key)?;
        self.check_etag("PUT", key, current.as_ref(), expected_etag)?;

        let etag = self.generator.create_sequential_etag();
        let attachment = Attachment {
            key: key.to_string(),
            etag,
            data,
            metadata,
            last_modified: Utc::now(),
        };
        let version = self.view.snapshot_version(ATTACHMENTS_TABLE, key);
        self.view
            .put_as(ATTACHMENTS_TABLE, key, &attachment, Some(version))?;
        Ok(etag)
    }

    pub fn attachment(&self, key: &str) -> Result<Option<Attachment>> {
        self.view.read_as(ATTACHMENTS_TABLE, key)
    }

    pub fn delete_attachment(&self, key: &str, expected_etag: Option<Etag>) -> Result<bool> {
        let current = self.attachment(key)?;
        self.check_etag("DELETE", key, current.as_ref(), expected_etag)?;
        if current.is_none() {
            return Ok(false);
        }
        let version = self.view.snapshot_version(ATTACHMENTS_TABLE, key);
        self.view.delete(ATTACHMENTS_TABLE, key, Some(version))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{TableStorage, WriteBatch};
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_attachment_roundtrip_and_etag_checks() {
        let storage = TableStorage::new();
        let attachments = AttachmentsStorageActions::new(
            StorageView::new(
                Arc::new(storage.snapshot().unwrap()),
                Arc::new(Mutex::new(WriteBatch::new())),
            ),
            Arc::new(EtagGenerator::new()),
        );

        let etag = attachments
            .add_attachment("images/1", None, vec![1, 2, 3], json!({"Content-Type": "image/png"}))
            .unwrap();
        assert_eq!(attachments.attachment("images/1").unwrap().unwrap().data, vec![1, 2, 3]);

        let err = attachments
            .add_attachment("images/1", Some(Etag(etag.as_u64() + 100)), vec![], json!({}))
            .unwrap_err();
        assert!(matches!(err, DbError::Concurrency(_)));

        assert!(attachments.delete_attachment("images/1", Some(etag)).unwrap());
        assert!(!attachments.delete_attachment("images/1", None).unwrap());
    }
}
