// ============================================================================
// RustDocDB Library
// ============================================================================
//
// Transactional document storage: per-unit-of-work storage sessions over
// snapshot + write batch pairs, a gateway that commits them atomically, and
// index-driven bulk operations that mutate matched documents in bounded,
// individually committed chunks.
//
// ============================================================================

pub mod bulk;
pub mod config;
pub mod core;
pub mod facade;
pub mod query;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use bulk::{
    BulkOperationEngine, BulkOperationHandle, BulkOperationResult, BulkOperationStatus,
    BulkOperationTracker, DatabaseBulkOperations, OperationState, ResultSequence,
};
pub use config::StorageConfig;
pub use self::core::{DbError, DocumentId, Etag, JsonDocument, Result, TransactionInformation};
pub use facade::{
    BatchCommand, BatchResult, DocumentChangeNotification, DocumentDatabase, PatchRequest,
    PatchResult, ScriptedPatchOutcome, ScriptedPatchRequest, ScriptedPatcher,
};
pub use query::{DocumentIdQueryResult, IndexQuery, IndexQueryEngine, SortedField};
pub use storage::{StorageStats, TransactionalStorage};
pub use transaction::{DatabaseTask, ReduceKeysTask, RemoveFromIndexTask, StorageSession};

/// Open a standalone storage gateway with default settings
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = rustdocdb::open_storage()?;
///
/// storage.batch(|session| {
///     session
///         .documents()
///         .add_document("users/1", None, json!({"Name": "Oren"}), json!({}))
/// })?;
///
/// let doc = storage.read(|session| session.documents().document_by_key("users/1"))?;
/// assert!(doc.is_some());
/// # Ok(())
/// # }
/// ```
pub fn open_storage() -> Result<TransactionalStorage> {
    TransactionalStorage::new(StorageConfig::default())
}
