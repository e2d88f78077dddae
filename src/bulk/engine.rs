// ============================================================================
// Bulk Operation Engine
// ============================================================================
//
// Init -> StalenessCheck -> { Aborted (stale) | Running }
// Running: ChunkOpen -> ChunkApply -> ChunkCommit -> (more ids ? ChunkOpen : Done)
// Terminal: Aborted | Done | Failed
//
// A chunk's ids are pulled from the cursor before its unit of work opens.
// Each chunk commits atomically through the gateway; a failure aborts the
// chunk and the operation, leaving earlier chunks committed.
//
// ============================================================================

use super::results::{BulkOperationResult, ResultSequence};
use crate::core::{DbError, DocumentId, Result, TransactionInformation};
use crate::query::{IndexQuery, IndexQueryEngine};
use crate::storage::TransactionalStorage;
use crate::transaction::StorageSession;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, event, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOperationState {
    Init,
    StalenessCheck,
    Running,
    ChunkOpen,
    ChunkApply,
    ChunkCommit,
    Done,
    Aborted,
    Failed,
}

pub struct BulkOperationEngine<'a> {
    storage: &'a TransactionalStorage,
    queries: &'a dyn IndexQueryEngine,
    chunk_size: usize,
    cancellation: Option<Arc<AtomicBool>>,
}

impl<'a> BulkOperationEngine<'a> {
    pub fn new(storage: &'a TransactionalStorage, queries: &'a dyn IndexQueryEngine) -> Self {
        Self {
            storage,
            queries,
            chunk_size: storage.config().bulk_chunk_size,
            cancellation: None,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Stop between chunks once `flag` is set
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(flag);
        self
    }

    /// Apply `strategy` to every document `query` matches on `index`,
    /// appending one result per document to `results`.
    pub fn perform<F>(
        &self,
        index: &str,
        query: &IndexQuery,
        allow_stale: bool,
        transaction: Option<&TransactionInformation>,
        results: &ResultSequence,
        mut strategy: F,
    ) -> Result<()>
    where
        F: FnMut(&mut StorageSession, &DocumentId, Option<&TransactionInformation>) -> Result<BulkOperationResult>,
    {
        let span = info_span!("bulk_operation", index);
        let _entered = span.enter();

        transition(BulkOperationState::Init);
        let restricted = query.for_document_ids();

        transition(BulkOperationState::StalenessCheck);
        let matched = self.queries.query_document_ids(index, &restricted)?;
        if matched.stale && !allow_stale {
            transition(BulkOperationState::Aborted);
            event!(Level::WARN, index, "index is stale, bulk operation aborted");
            return Err(DbError::StaleIndex {
                index: index.to_string(),
            });
        }

        transition(BulkOperationState::Running);
        let mut ids = matched.ids;
        match self.run_chunks(&mut ids, transaction, results, &mut strategy) {
            Ok((chunks, documents)) => {
                transition(BulkOperationState::Done);
                event!(Level::DEBUG, chunks, documents, "bulk operation completed");
                Ok(())
            }
            Err(err @ DbError::Cancelled(_)) => {
                transition(BulkOperationState::Aborted);
                event!(Level::WARN, error = %err, "bulk operation cancelled");
                Err(err)
            }
            Err(err) => {
                transition(BulkOperationState::Failed);
                event!(Level::ERROR, error = %err, "bulk operation failed");
                Err(err)
            }
        }
    }

    fn run_chunks<I, F>(
        &self,
        ids: &mut I,
        transaction: Option<&TransactionInformation>,
        results: &ResultSequence,
        strategy: &mut F,
    ) -> Result<(usize, usize)>
    where
        I: Iterator<Item = Result<DocumentId>>,
        F: FnMut(&mut StorageSession, &DocumentId, Option<&TransactionInformation>) -> Result<BulkOperationResult>,
    {
        let mut chunks = 0;
        let mut documents = 0;

        loop {
            if self.is_cancelled() {
                return Err(DbError::Cancelled(format!(
                    "Bulk operation stopped after {} documents",
                    documents
                )));
            }

            let chunk = ids.by_ref().take(self.chunk_size).collect::<Result<Vec<DocumentId>>>()?;
            if chunk.is_empty() {
                break;
            }

            transition(BulkOperationState::ChunkOpen);
            let chunk_start = results.len()?;
            self.storage.batch(|session| {
                // a re-run of a conflicted chunk starts from a clean slate
                results.truncate(chunk_start)?;
                transition(BulkOperationState::ChunkApply);
                for id in &chunk {
                    match strategy(&mut *session, id, transaction) {
                        Ok(result) => results.push(result)?,
                        Err(err) if session.is_write_conflict(&err) => return Err(err),
                        Err(err) => {
                            event!(Level::ERROR, document = %id, error = %err, "mutation strategy failed");
                            return Err(DbError::mutation(id.clone(), err));
                        }
                    }
                }
                transition(BulkOperationState::ChunkCommit);
                Ok(())
            })?;

            chunks += 1;
            documents += chunk.len();
            event!(Level::DEBUG, chunk = chunks, size = chunk.len(), "chunk committed");

            if chunk.len() < self.chunk_size {
                break;
            }
        }

        Ok((chunks, documents))
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

fn transition(state: BulkOperationState) {
    event!(Level::DEBUG, state = ?state, "bulk operation state");
}
