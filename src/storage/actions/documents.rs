use super::{DOCUMENTS_BY_ETAG_TABLE, DOCUMENTS_TABLE};
use crate::core::{DbError, Etag, JsonDocument, Result};
use crate::storage::cacher::{CachedDocument, DocumentCacher};
use crate::storage::codec::DocumentCodecs;
use crate::storage::generator::EtagGenerator;
use crate::storage::view::StorageView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::ops::Bound;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentRecord {
    etag: Etag,
    data: JsonValue,
    metadata: JsonValue,
    last_modified: DateTime<Utc>,
}

/// Outcome of writing a document
#[derive(Debug, Clone, PartialEq)]
pub struct AddDocumentResult {
    pub etag: Etag,
    pub prev_etag: Option<Etag>,
    pub saved_at: DateTime<Utc>,
    pub updated: bool,
}

/// What was removed by a delete
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedDocument {
    pub etag: Etag,
    pub metadata: JsonValue,
}

pub struct DocumentsStorageActions {
    view: StorageView,
    generator: Arc<EtagGenerator>,
    codecs: Arc<DocumentCodecs>,
    cacher: Arc<DocumentCacher>,
}

impl DocumentsStorageActions {
    pub fn new(
        view: StorageView,
        generator: Arc<EtagGenerator>,
        codecs: Arc<DocumentCodecs>,
        cacher: Arc<DocumentCacher>,
    ) -> Self {
        Self {
            view,
            generator,
            codecs,
            cacher,
        }
    }

    pub fn document_by_key(&self, key: &str) -> Result<Option<JsonDocument>> {
        let Some(record) = self.view.read_as::<DocumentRecord>(DOCUMENTS_TABLE, key)? else {
            return Ok(None);
        };
        let decoded = self.decode(key, &record)?;
        Ok(Some(JsonDocument {
            key: key.to_string(),
            etag: record.etag,
            data: decoded.data,
            metadata: decoded.metadata,
            last_modified: record.last_modified,
        }))
    }

    fn decode(&self, key: &str, record: &DocumentRecord) -> Result<CachedDocument> {
        if let Some(cached) = self.cacher.get(key, record.etag)? {
            return Ok(cached);
        }
        let data = self
            .codecs
            .decode(key, record.data.clone(), &record.metadata)?;
        let document = CachedDocument {
            data,
            metadata: record.metadata.clone(),
        };
        self.cacher.set(key, record.etag, document.clone())?;
        Ok(document)
    }

    /// Write a document, optionally requiring its current etag.
    ///
    /// `expected_etag == Some(Etag::EMPTY)` requires that the document does not exist.
    pub fn add_document(
        &self,
        key: &str,
        expected_etag: Option<Etag>,
        data: JsonValue,
        metadata: JsonValue,
    ) -> Result<AddDocumentResult> {
        if key.is_empty() {
            return Err(DbError::InvalidArgument("Document key cannot be empty".into()));
        }

        let existing = self.view.read_as::<DocumentRecord>(DOCUMENTS_TABLE, key)?;
        if let Some(expected) = expected_etag {
            let current = existing.as_ref().map(|r| r.etag).unwrap_or(Etag::EMPTY);
            if current != expected {
                return Err(DbError::Concurrency(format!(
                    "PUT attempted on document '{}' using a non current etag (expected {}, actual {})",
                    key, expected, current
                )));
            }
        }

        let etag = self.generator.create_sequential_etag();
        let saved_at = Utc::now();
        let record = DocumentRecord {
            etag,
            data: self.codecs.encode(key, data, &metadata)?,
            metadata,
            last_modified: saved_at,
        };

        let version = self.view.snapshot_version(DOCUMENTS_TABLE, key);
        self.view.put_as(DOCUMENTS_TABLE, key, &record, Some(version))?;
        if let Some(prev) = &existing {
            self.view
                .delete(DOCUMENTS_BY_ETAG_TABLE, &prev.etag.to_key(), None)?;
        }
        self.view
            .put(DOCUMENTS_BY_ETAG_TABLE, &etag.to_key(), json!(key), None)?;

        Ok(AddDocumentResult {
            etag,
            prev_etag: existing.as_ref().map(|r| r.etag),
            saved_at,
            updated: existing.is_some(),
        })
    }

    /// Delete a document. Returns `None` when it does not exist.
    pub fn delete_document(&self, key: &str, expected_etag: Option<Etag>) -> Result<Option<DeletedDocument>> {
        let existing = self.view.read_as::<DocumentRecord>(DOCUMENTS_TABLE, key)?;

        if let Some(expected) = expected_etag {
            let current = existing.as_ref().map(|r| r.etag).unwrap_or(Etag::EMPTY);
            if current != expected {
                return Err(DbError::Concurrency(format!(
                    "DELETE attempted on document '{}' using a non current etag (expected {}, actual {})",
                    key, expected, current
                )));
            }
        }

        let Some(record) = existing else {
            return Ok(None);
        };

        let version = self.view.snapshot_version(DOCUMENTS_TABLE, key);
        self.view.delete(DOCUMENTS_TABLE, key, Some(version))?;
        self.view
            .delete(DOCUMENTS_BY_ETAG_TABLE, &record.etag.to_key(), None)?;
        self.cacher.remove(key)?;

        Ok(Some(DeletedDocument {
            etag: record.etag,
            metadata: record.metadata,
        }))
    }

    pub fn documents_count(&self) -> Result<usize> {
        self.view.count(DOCUMENTS_TABLE)
    }

    /// Documents written after `etag`, in etag order
    pub fn documents_after(&self, etag: Etag, take: usize) -> Result<Vec<JsonDocument>> {
        let by_etag = self.view.table(DOCUMENTS_BY_ETAG_TABLE)?;
        let mut documents = Vec::new();
        for (_, entry) in by_etag
            .range((Bound::Excluded(etag.to_key()), Bound::Unbounded))
            .take(take)
        {
            let Some(key) = entry.value.as_str() else {
                return Err(DbError::Storage("Corrupt documents-by-etag entry".into()));
            };
            if let Some(document) = self.document_by_key(key)? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    /// Etag of the most recently written document, `Etag::EMPTY` when there is none
    pub fn most_recent_etag(&self) -> Result<Etag> {
        most_recent_document_etag(&self.view)
    }
}

pub(crate) fn most_recent_document_etag(view: &StorageView) -> Result<Etag> {
    match view.table(DOCUMENTS_BY_ETAG_TABLE)?.get_max() {
        Some((key, _)) => key.parse(),
        None => Ok(Etag::EMPTY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{TableStorage, WriteBatch};
    use std::sync::Mutex;

    struct Fixture {
        storage: TableStorage,
        generator: Arc<EtagGenerator>,
        cacher: Arc<DocumentCacher>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                storage: TableStorage::new(),
                generator: Arc::new(EtagGenerator::new()),
                cacher: Arc::new(DocumentCacher::new(16)),
            }
        }

        fn actions(&self) -> (DocumentsStorageActions, Arc<Mutex<WriteBatch>>) {
            let batch = Arc::new(Mutex::new(WriteBatch::new()));
            let view = StorageView::new(Arc::new(self.storage.snapshot().unwrap()), batch.clone());
            let actions = DocumentsStorageActions::new(
                view,
                self.generator.clone(),
                Arc::new(DocumentCodecs::new()),
                self.cacher.clone(),
            );
            (actions, batch)
        }

        fn commit(&self, batch: Arc<Mutex<WriteBatch>>) -> Result<u64> {
            let batch = std::mem::take(&mut *batch.lock().unwrap());
            self.storage.write(batch)
        }
    }

    #[test]
    fn test_add_and_read_document() {
        let fixture = Fixture::new();
        let (docs, batch) = fixture.actions();

        let result = docs
            .add_document("users/1", None, json!({"name": "Ayende"}), json!({}))
            .unwrap();
        assert!(!result.updated);
        assert_eq!(docs.document_by_key("users/1").unwrap().unwrap().etag, result.etag);
        fixture.commit(batch).unwrap();

        let (docs, _) = fixture.actions();
        let doc = docs.document_by_key("users/1").unwrap().unwrap();
        assert_eq!(doc.data, json!({"name": "Ayende"}));
        assert_eq!(docs.documents_count().unwrap(), 1);
        assert_eq!(docs.most_recent_etag().unwrap(), result.etag);
    }

    #[test]
    fn test_etag_mismatch_is_concurrency_conflict() {
        let fixture = Fixture::new();
        let (docs, batch) = fixture.actions();
        docs.add_document("users/1", None, json!({}), json!({})).unwrap();
        fixture.commit(batch).unwrap();

        let (docs, _) = fixture.actions();
        let err = docs
            .add_document("users/1", Some(Etag(999)), json!({}), json!({}))
            .unwrap_err();
        assert!(matches!(err, DbError::Concurrency(_)));

        let err = docs.delete_document("users/1", Some(Etag(999))).unwrap_err();
        assert!(matches!(err, DbError::Concurrency(_)));
    }

    #[test]
    fn test_concurrent_creates_conflict_at_commit() {
        let fixture = Fixture::new();
        let (first, first_batch) = fixture.actions();
        let (second, second_batch) = fixture.actions();

        first.add_document("users/1", None, json!({"v": 1}), json!({})).unwrap();
        second.add_document("users/1", None, json!({"v": 2}), json!({})).unwrap();

        fixture.commit(first_batch).unwrap();
        let err = fixture.commit(second_batch).unwrap_err();
        assert!(matches!(err, DbError::Concurrency(_)));
    }

    #[test]
    fn test_delete_missing_document_returns_none() {
        let fixture = Fixture::new();
        let (docs, _) = fixture.actions();
        assert!(docs.delete_document("users/404", None).unwrap().is_none());
    }

    #[test]
    fn test_documents_after_follows_etag_order() {
        let fixture = Fixture::new();
        let (docs, batch) = fixture.actions();
        let first = docs.add_document("a", None, json!(1), json!({})).unwrap();
        docs.add_document("b", None, json!(2), json!({})).unwrap();
        docs.add_document("a", None, json!(3), json!({})).unwrap();
        fixture.commit(batch).unwrap();

        let (docs, _) = fixture.actions();
        let after: Vec<String> = docs
            .documents_after(first.etag, 10)
            .unwrap()
            .into_iter()
            .map(|d| d.key)
            .collect();
        assert_eq!(after, vec!["b".to_string(), "a".to_string()]);
    }
}
