use super::engine::BulkOperationEngine;
use super::results::{BulkOperationResult, ResultSequence};
use crate::core::{DocumentId, Result, TransactionInformation};
use crate::facade::{DocumentDatabase, PatchRequest, ScriptedPatchRequest};
use crate::query::IndexQuery;
use crate::transaction::StorageSession;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Delete or patch every document an index query matches.
///
/// Each operation runs in chunks of `bulk_chunk_size` documents; every chunk
/// is its own committed unit of work.
pub struct DatabaseBulkOperations<'a> {
    database: &'a DocumentDatabase,
    transaction_information: Option<TransactionInformation>,
    cancellation: Option<Arc<AtomicBool>>,
}

impl<'a> DatabaseBulkOperations<'a> {
    pub fn new(database: &'a DocumentDatabase, transaction_information: Option<TransactionInformation>) -> Self {
        Self {
            database,
            transaction_information,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(flag);
        self
    }

    pub fn delete_by_index(&self, index: &str, query: &IndexQuery, allow_stale: bool) -> Result<ResultSequence> {
        let results = ResultSequence::new();
        self.delete_by_index_into(index, query, allow_stale, &results)?;
        Ok(results)
    }

    pub fn delete_by_index_into(
        &self,
        index: &str,
        query: &IndexQuery,
        allow_stale: bool,
        results: &ResultSequence,
    ) -> Result<()> {
        let database = self.database;
        self.perform(index, query, allow_stale, results, |session, id, tx| {
            // acknowledged even when a stale index matched an already deleted id
            database.delete_in(session, id, None, tx)?;
            Ok(BulkOperationResult::deleted(id.clone(), true))
        })
    }

    pub fn update_by_index(
        &self,
        index: &str,
        query: &IndexQuery,
        patches: &[PatchRequest],
        allow_stale: bool,
    ) -> Result<ResultSequence> {
        let results = ResultSequence::new();
        self.update_by_index_into(index, query, patches, allow_stale, &results)?;
        Ok(results)
    }

    pub fn update_by_index_into(
        &self,
        index: &str,
        query: &IndexQuery,
        patches: &[PatchRequest],
        allow_stale: bool,
        results: &ResultSequence,
    ) -> Result<()> {
        let database = self.database;
        self.perform(index, query, allow_stale, results, |session, id, tx| {
            let result = database.apply_patch_in(session, id, None, patches, tx)?;
            Ok(BulkOperationResult::patched(id.clone(), serde_json::to_value(result)?))
        })
    }

    pub fn update_by_index_scripted(
        &self,
        index: &str,
        query: &IndexQuery,
        patch: &ScriptedPatchRequest,
        allow_stale: bool,
    ) -> Result<ResultSequence> {
        let results = ResultSequence::new();
        self.update_by_index_scripted_into(index, query, patch, allow_stale, &results)?;
        Ok(results)
    }

    pub fn update_by_index_scripted_into(
        &self,
        index: &str,
        query: &IndexQuery,
        patch: &ScriptedPatchRequest,
        allow_stale: bool,
        results: &ResultSequence,
    ) -> Result<()> {
        let database = self.database;
        self.perform(index, query, allow_stale, results, |session, id, tx| {
            let (result, debug) = database.apply_scripted_patch_in(session, id, None, patch, tx)?;
            Ok(BulkOperationResult::patched_with_debug(
                id.clone(),
                serde_json::to_value(result)?,
                json!(debug),
            ))
        })
    }

    fn perform<F>(
        &self,
        index: &str,
        query: &IndexQuery,
        allow_stale: bool,
        results: &ResultSequence,
        strategy: F,
    ) -> Result<()>
    where
        F: FnMut(&mut StorageSession, &DocumentId, Option<&TransactionInformation>) -> Result<BulkOperationResult>,
    {
        let mut engine = BulkOperationEngine::new(self.database.storage(), self.database.queries());
        if let Some(flag) = &self.cancellation {
            engine = engine.with_cancellation(flag.clone());
        }
        engine.perform(
            index,
            query,
            allow_stale,
            self.transaction_information.as_ref(),
            results,
            strategy,
        )
    }
}
