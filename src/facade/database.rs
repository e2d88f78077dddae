use super::commands::{BatchCommand, BatchResult};
use super::patch::{PatchRequest, PatchResult, ScriptedPatchRequest, ScriptedPatcher, apply_patches};
use crate::bulk::{BulkOperationHandle, BulkOperationId, BulkOperationStatus, BulkOperationTracker, DatabaseBulkOperations, ResultSequence};
use crate::config::StorageConfig;
use crate::core::{DbError, Etag, JsonDocument, Result, TransactionInformation};
use crate::query::{DocumentIdQueryResult, IndexQuery, IndexQueryEngine};
use crate::storage::{DocumentCodecs, TransactionalStorage};
use crate::transaction::{ReduceKeysTask, RemoveFromIndexTask, StorageSession};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentChangeType {
    Put,
    Delete,
}

/// Published on the change channel after the write is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentChangeNotification {
    pub id: String,
    pub etag: Etag,
    #[serde(rename = "Type")]
    pub change: DocumentChangeType,
}

/// Key and new etag of a stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutResult {
    pub key: String,
    pub etag: Etag,
}

pub struct DocumentDatabase {
    storage: TransactionalStorage,
    queries: Arc<dyn IndexQueryEngine>,
    patcher: Option<Arc<dyn ScriptedPatcher>>,
    changes: broadcast::Sender<DocumentChangeNotification>,
    tracker: BulkOperationTracker,
}

impl DocumentDatabase {
    pub fn new(config: StorageConfig, queries: Arc<dyn IndexQueryEngine>) -> Result<Self> {
        Self::with_codecs(config, DocumentCodecs::new(), queries)
    }

    pub fn with_codecs(
        config: StorageConfig,
        codecs: DocumentCodecs,
        queries: Arc<dyn IndexQueryEngine>,
    ) -> Result<Self> {
        let (changes, _) = broadcast::channel(config.change_notification_capacity.max(1));
        let tracker = BulkOperationTracker::with_retention(config.finished_operations_retention);
        Ok(Self {
            storage: TransactionalStorage::with_codecs(config, codecs)?,
            queries,
            patcher: None,
            changes,
            tracker,
        })
    }

    pub fn with_patcher(mut self, patcher: Arc<dyn ScriptedPatcher>) -> Self {
        self.patcher = Some(patcher);
        self
    }

    pub fn storage(&self) -> &TransactionalStorage {
        &self.storage
    }

    pub fn queries(&self) -> &dyn IndexQueryEngine {
        self.queries.as_ref()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<DocumentChangeNotification> {
        self.changes.subscribe()
    }

    // ========================================================================
    // Single document units of work
    // ========================================================================

    pub fn get(&self, key: &str) -> Result<Option<JsonDocument>> {
        self.storage.read(|session| session.documents().document_by_key(key))
    }

    pub fn put(
        &self,
        key: &str,
        etag: Option<Etag>,
        data: JsonValue,
        metadata: JsonValue,
        transaction: Option<&TransactionInformation>,
    ) -> Result<PutResult> {
        self.storage.batch(|session| {
            self.put_in(session, key, etag, data.clone(), metadata.clone(), transaction)
        })
    }

    pub fn delete(&self, key: &str, etag: Option<Etag>, transaction: Option<&TransactionInformation>) -> Result<bool> {
        self.storage
            .batch(|session| self.delete_in(session, key, etag, transaction))
    }

    pub fn apply_patch(
        &self,
        key: &str,
        etag: Option<Etag>,
        patches: &[PatchRequest],
        transaction: Option<&TransactionInformation>,
    ) -> Result<PatchResult> {
        self.storage
            .batch(|session| self.apply_patch_in(session, key, etag, patches, transaction))
    }

    pub fn apply_scripted_patch(
        &self,
        key: &str,
        etag: Option<Etag>,
        patch: &ScriptedPatchRequest,
        transaction: Option<&TransactionInformation>,
    ) -> Result<(PatchResult, Vec<String>)> {
        self.storage
            .batch(|session| self.apply_scripted_patch_in(session, key, etag, patch, transaction))
    }

    /// Run every command in one unit of work. Any failure rolls back all of them.
    pub fn batch(&self, commands: &[BatchCommand], transaction: Option<&TransactionInformation>) -> Result<Vec<BatchResult>> {
        let results = self.storage.batch(|session| {
            let mut results = Vec::with_capacity(commands.len());
            for command in commands {
                let result = session.batch(|nested| self.execute_command(nested, command, transaction))?;
                results.push(result);
            }
            Ok(results)
        })?;
        event!(Level::DEBUG, commands = commands.len(), "batch executed");
        Ok(results)
    }

    fn execute_command(
        &self,
        session: &mut StorageSession,
        command: &BatchCommand,
        transaction: Option<&TransactionInformation>,
    ) -> Result<BatchResult> {
        let mut result = BatchResult::new(command);
        match command {
            BatchCommand::Put {
                key,
                etag,
                document,
                metadata,
            } => {
                let put = self.put_in(session, key, *etag, document.clone(), metadata.clone(), transaction)?;
                result.etag = Some(put.etag);
            }
            BatchCommand::Delete { key, etag } => {
                result.deleted = Some(self.delete_in(session, key, *etag, transaction)?);
            }
            BatchCommand::Patch { key, etag, patches } => {
                result.patch_result = Some(self.apply_patch_in(session, key, *etag, patches, transaction)?);
            }
        }
        Ok(result)
    }

    // ========================================================================
    // Mutations inside an open unit of work
    // ========================================================================

    pub fn put_in(
        &self,
        session: &mut StorageSession,
        key: &str,
        etag: Option<Etag>,
        data: JsonValue,
        metadata: JsonValue,
        transaction: Option<&TransactionInformation>,
    ) -> Result<PutResult> {
        let metadata = if metadata.is_null() { json!({}) } else { metadata };
        let written = session
            .documents()
            .add_document(key, etag, data.clone(), metadata.clone())?;

        event!(
            Level::DEBUG,
            key,
            etag = %written.etag,
            updated = written.updated,
            transaction = transaction.map(|tx| tx.id.as_str()),
            "document put"
        );

        let changes = self.changes.clone();
        session.register_post_commit_notification(
            JsonDocument {
                key: key.to_string(),
                etag: written.etag,
                data,
                metadata,
                last_modified: written.saved_at,
            },
            move |documents| {
                for document in documents {
                    // no subscribers is fine
                    let _ = changes.send(DocumentChangeNotification {
                        id: document.key,
                        etag: document.etag,
                        change: DocumentChangeType::Put,
                    });
                }
            },
        );

        Ok(PutResult {
            key: key.to_string(),
            etag: written.etag,
        })
    }

    /// Delete `key` and schedule its removal from every index.
    ///
    /// Returns false when the document did not exist.
    pub fn delete_in(
        &self,
        session: &mut StorageSession,
        key: &str,
        etag: Option<Etag>,
        transaction: Option<&TransactionInformation>,
    ) -> Result<bool> {
        let Some(deleted) = session.documents().delete_document(key, etag)? else {
            return Ok(false);
        };

        for index in session.indexing().indexes_names()? {
            let reduce_keys = session
                .map_reduce()
                .delete_mapped_results_for_document(&index, key)?;
            if !reduce_keys.is_empty() {
                session
                    .get_task(|task: &ReduceKeysTask| task.index == index, ReduceKeysTask::new(index.clone()))?
                    .add_reduce_keys(reduce_keys);
            }
            session
                .get_task(|task: &RemoveFromIndexTask| task.index == index, RemoveFromIndexTask::new(index.clone()))?
                .add_key(key);
        }

        event!(
            Level::DEBUG,
            key,
            etag = %deleted.etag,
            transaction = transaction.map(|tx| tx.id.as_str()),
            "document deleted"
        );

        let changes = self.changes.clone();
        let notification = DocumentChangeNotification {
            id: key.to_string(),
            etag: deleted.etag,
            change: DocumentChangeType::Delete,
        };
        session.on_storage_commit(move || {
            let _ = changes.send(notification);
        });

        Ok(true)
    }

    pub fn apply_patch_in(
        &self,
        session: &mut StorageSession,
        key: &str,
        etag: Option<Etag>,
        patches: &[PatchRequest],
        transaction: Option<&TransactionInformation>,
    ) -> Result<PatchResult> {
        let Some(document) = self.document_for_patch(session, key, etag)? else {
            return Ok(PatchResult::DocumentDoesNotExists);
        };

        let mut data = document.data;
        if !apply_patches(key, &mut data, patches)? {
            return Ok(PatchResult::NotModified);
        }
        self.put_in(session, key, Some(document.etag), data, document.metadata, transaction)?;
        Ok(PatchResult::Patched)
    }

    /// Run a scripted patch. Returns the result and the script's debug output.
    pub fn apply_scripted_patch_in(
        &self,
        session: &mut StorageSession,
        key: &str,
        etag: Option<Etag>,
        patch: &ScriptedPatchRequest,
        transaction: Option<&TransactionInformation>,
    ) -> Result<(PatchResult, Vec<String>)> {
        let patcher = self
            .patcher
            .as_ref()
            .ok_or_else(|| DbError::InvalidArgument("No scripted patcher is configured".into()))?;

        let Some(document) = self.document_for_patch(session, key, etag)? else {
            return Ok((PatchResult::DocumentDoesNotExists, Vec::new()));
        };

        let outcome = patcher.patch(&document, patch)?;
        if outcome.data == document.data {
            return Ok((PatchResult::NotModified, outcome.debug));
        }
        self.put_in(session, key, Some(document.etag), outcome.data, document.metadata, transaction)?;
        Ok((PatchResult::Patched, outcome.debug))
    }

    fn document_for_patch(&self, session: &StorageSession, key: &str, etag: Option<Etag>) -> Result<Option<JsonDocument>> {
        let Some(document) = session.documents().document_by_key(key)? else {
            return Ok(None);
        };
        if let Some(expected) = etag {
            if expected != document.etag {
                return Err(DbError::Concurrency(format!(
                    "Could not patch document '{}' because non current etag was used (expected {}, actual {})",
                    key, expected, document.etag
                )));
            }
        }
        Ok(Some(document))
    }

    // ========================================================================
    // Index queries and bulk operations
    // ========================================================================

    pub fn query_document_ids(&self, index: &str, query: &IndexQuery) -> Result<DocumentIdQueryResult<'_>> {
        self.queries.query_document_ids(index, query)
    }

    pub fn bulk_operations(&self, transaction: Option<TransactionInformation>) -> DatabaseBulkOperations<'_> {
        DatabaseBulkOperations::new(self, transaction)
    }

    pub fn start_delete_by_index(
        self: &Arc<Self>,
        index: impl Into<String>,
        query: IndexQuery,
        allow_stale: bool,
        transaction: Option<TransactionInformation>,
    ) -> Result<BulkOperationHandle> {
        let database = Arc::clone(self);
        let index = index.into();
        let results = ResultSequence::new();
        let sink = results.clone();
        self.tracker.start(results, move || {
            database
                .bulk_operations(transaction)
                .delete_by_index_into(&index, &query, allow_stale, &sink)
        })
    }

    pub fn start_update_by_index(
        self: &Arc<Self>,
        index: impl Into<String>,
        query: IndexQuery,
        patches: Vec<PatchRequest>,
        allow_stale: bool,
        transaction: Option<TransactionInformation>,
    ) -> Result<BulkOperationHandle> {
        let database = Arc::clone(self);
        let index = index.into();
        let results = ResultSequence::new();
        let sink = results.clone();
        self.tracker.start(results, move || {
            database
                .bulk_operations(transaction)
                .update_by_index_into(&index, &query, &patches, allow_stale, &sink)
        })
    }

    pub fn start_scripted_update_by_index(
        self: &Arc<Self>,
        index: impl Into<String>,
        query: IndexQuery,
        patch: ScriptedPatchRequest,
        allow_stale: bool,
        transaction: Option<TransactionInformation>,
    ) -> Result<BulkOperationHandle> {
        let database = Arc::clone(self);
        let index = index.into();
        let results = ResultSequence::new();
        let sink = results.clone();
        self.tracker.start(results, move || {
            database
                .bulk_operations(transaction)
                .update_by_index_scripted_into(&index, &query, &patch, allow_stale, &sink)
        })
    }

    pub fn bulk_operation_status(&self, id: BulkOperationId) -> Result<Option<BulkOperationStatus>> {
        self.tracker.status(id)
    }

    /// Like `bulk_operation_status`, but a finished operation is forgotten
    /// and its results released.
    pub fn take_bulk_operation_status(&self, id: BulkOperationId) -> Result<Option<BulkOperationStatus>> {
        self.tracker.take_status(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoIndexes;

    impl IndexQueryEngine for NoIndexes {
        fn query_document_ids<'a>(&'a self, index: &str, _: &IndexQuery) -> Result<DocumentIdQueryResult<'a>> {
            Err(DbError::IndexNotFound(index.to_string()))
        }
    }

    fn database() -> DocumentDatabase {
        DocumentDatabase::new(StorageConfig::default(), Arc::new(NoIndexes)).unwrap()
    }

    #[test]
    fn test_put_get_delete() {
        let db = database();
        let put = db.put("users/1", None, json!({"Name": "Oren"}), JsonValue::Null, None).unwrap();

        let doc = db.get("users/1").unwrap().unwrap();
        assert_eq!(doc.etag, put.etag);
        assert_eq!(doc.metadata, json!({}));

        assert!(db.delete("users/1", Some(put.etag), None).unwrap());
        assert!(db.get("users/1").unwrap().is_none());
        assert!(!db.delete("users/1", None, None).unwrap());
    }

    #[test]
    fn test_delete_schedules_index_removal_once_per_index() {
        let db = database();
        db.storage()
            .batch(|session| {
                session.indexing().add_index("Users/ByName")?;
                session.indexing().add_index("Users/ByAge")
            })
            .unwrap();
        db.put("users/1", None, json!({}), json!({}), None).unwrap();
        db.put("users/2", None, json!({}), json!({}), None).unwrap();

        db.storage()
            .batch(|session| {
                db.delete_in(session, "users/1", None, None)?;
                db.delete_in(session, "users/2", None, None)
            })
            .unwrap();

        let tasks = db.storage().read(|session| session.tasks().tasks()).unwrap();
        assert_eq!(tasks.len(), 2);
        for task in tasks {
            assert_eq!(task.kind, RemoveFromIndexTask::KIND);
            assert_eq!(task.payload["keys"], json!(["users/1", "users/2"]));
        }
    }

    #[test]
    fn test_patch_missing_document_is_not_an_error() {
        let db = database();
        let result = db
            .apply_patch("users/404", None, &[PatchRequest::set("Name", json!("x"))], None)
            .unwrap();
        assert_eq!(result, PatchResult::DocumentDoesNotExists);
    }

    #[test]
    fn test_patch_with_stale_etag_conflicts() {
        let db = database();
        db.put("users/1", None, json!({"Name": "Oren"}), json!({}), None).unwrap();
        let err = db
            .apply_patch("users/1", Some(Etag(12345)), &[PatchRequest::unset("Name")], None)
            .unwrap_err();
        assert!(err.is_concurrency_conflict());
    }

    #[test]
    fn test_scripted_patch_without_patcher_fails() {
        let db = database();
        db.put("users/1", None, json!({}), json!({}), None).unwrap();
        let err = db
            .apply_scripted_patch("users/1", None, &ScriptedPatchRequest::new("this.x = 1"), None)
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
    }

    #[test]
    fn test_batch_is_atomic() {
        let db = database();
        let commands = vec![
            BatchCommand::Put {
                key: "users/1".into(),
                etag: None,
                document: json!({"Name": "Oren"}),
                metadata: json!({}),
            },
            BatchCommand::Delete {
                key: "users/2".into(),
                etag: Some(Etag(77)),
            },
        ];

        let err = db.batch(&commands, None).unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert!(db.get("users/1").unwrap().is_none());
    }

    #[test]
    fn test_change_notifications_follow_commit() {
        let db = database();
        let mut changes = db.subscribe_changes();

        let put = db.put("users/1", None, json!({}), json!({}), None).unwrap();
        db.delete("users/1", None, None).unwrap();

        let first = changes.try_recv().unwrap();
        assert_eq!(first.id, "users/1");
        assert_eq!(first.etag, put.etag);
        assert_eq!(first.change, DocumentChangeType::Put);
        assert_eq!(changes.try_recv().unwrap().change, DocumentChangeType::Delete);
        assert!(changes.try_recv().is_err());
    }
}
