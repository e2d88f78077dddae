#![allow(dead_code)]

use rustdocdb::query::DocumentIdQueryResult;
use rustdocdb::{
    DbError, DocumentDatabase, DocumentId, IndexQuery, IndexQueryEngine, JsonDocument, Result,
    ScriptedPatchOutcome, ScriptedPatchRequest, ScriptedPatcher, StorageConfig,
};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const EMAILS_INDEX: &str = "Emails/BySubject";

/// Index engine answering from fixed id lists
#[derive(Default)]
pub struct StaticIndex {
    indexes: Mutex<HashMap<String, (Vec<DocumentId>, bool)>>,
    queries: Mutex<Vec<IndexQuery>>,
    pulled: Arc<AtomicUsize>,
}

impl StaticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(self, name: &str, ids: Vec<DocumentId>, stale: bool) -> Self {
        self.indexes
            .lock()
            .unwrap()
            .insert(name.to_string(), (ids, stale));
        self
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<IndexQuery> {
        self.queries.lock().unwrap().clone()
    }

    /// Ids handed out by cursors so far
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

impl IndexQueryEngine for StaticIndex {
    fn query_document_ids<'a>(&'a self, index: &str, query: &IndexQuery) -> Result<DocumentIdQueryResult<'a>> {
        self.queries.lock().unwrap().push(query.clone());
        let indexes = self.indexes.lock().unwrap();
        let (ids, stale) = indexes
            .get(index)
            .cloned()
            .ok_or_else(|| DbError::IndexNotFound(index.to_string()))?;

        let pulled = self.pulled.clone();
        let cursor = ids.into_iter().skip(query.start).map(move |id| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok(id)
        });
        Ok(DocumentIdQueryResult::new(cursor, stale))
    }
}

/// Scripted patcher that copies the request values into the document.
///
/// A script of `fail` makes the patch fail.
pub struct ValuesPatcher;

impl ScriptedPatcher for ValuesPatcher {
    fn patch(&self, document: &JsonDocument, request: &ScriptedPatchRequest) -> Result<ScriptedPatchOutcome> {
        if request.script == "fail" {
            return Err(DbError::ExecutionError(format!("script failed on {}", document.key)));
        }
        let mut data = document.data.clone();
        let mut debug = Vec::new();
        for (name, value) in &request.values {
            data[name.as_str()] = value.clone();
            debug.push(format!("set {}", name));
        }
        Ok(ScriptedPatchOutcome { data, debug })
    }
}

pub fn email_ids(count: usize) -> Vec<DocumentId> {
    (0..count).map(|i| format!("Emails/{}", i)).collect()
}

pub fn email(i: usize) -> JsonValue {
    json!({"Subject": format!("spam {}", i), "Read": false})
}

/// Database with `count` emails stored in one unit of work and an index over them
pub fn email_database(count: usize, stale: bool, config: StorageConfig) -> (Arc<DocumentDatabase>, Arc<StaticIndex>) {
    let index = Arc::new(StaticIndex::new().with_index(EMAILS_INDEX, email_ids(count), stale));
    let database = DocumentDatabase::new(config, index.clone())
        .unwrap()
        .with_patcher(Arc::new(ValuesPatcher));

    database
        .storage()
        .batch(|session| {
            session.indexing().add_index(EMAILS_INDEX)?;
            for i in 0..count {
                session
                    .documents()
                    .add_document(&format!("Emails/{}", i), None, email(i), json!({}))?;
            }
            Ok(())
        })
        .unwrap();

    (Arc::new(database), index)
}

pub fn commit_sequence(database: &DocumentDatabase) -> u64 {
    database.storage().table_storage().commit_sequence().unwrap()
}

pub fn documents_count(database: &DocumentDatabase) -> usize {
    database
        .storage()
        .read(|session| session.documents().documents_count())
        .unwrap()
}
