// ============================================================================
// Transactional Storage (unit-of-work gateway)
// ============================================================================
//
// batch(action):
//   1. snapshot + empty write batch
//   2. StorageSession bound to both
//   3. action(session)
//   4. session.save_all_tasks()
//   5. atomic commit of the write batch
//   6. post-commit hooks (top-level only)
//
// Sessions normally become nested only inside StorageSession::batch, which
// clears the flag again before the gateway commits. An action that leaves
// its session marked nested hands hook execution to whoever owns the outer
// unit of work, so step 6 is skipped.
//
// Any failure before step 5 discards the write batch: nothing is partially
// committed. The session is disposed on every path. A failure the session
// classifies as a write conflict re-runs the whole unit of work on a fresh
// snapshot, at most `max_conflict_retries` times.
//
// ============================================================================

use super::{DocumentCacher, DocumentCodecs, EtagGenerator, TableStorage, WriteBatch};
use crate::config::StorageConfig;
use crate::core::{DbError, Result};
use crate::transaction::StorageSession;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{Level, event, info_span};

/// Counters of finished units of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub commits: u64,
    pub conflicts: u64,
    pub failures: u64,
}

enum Attempt<T> {
    Committed(T),
    Conflict(DbError),
    Failed(DbError),
}

pub struct TransactionalStorage {
    storage: Arc<TableStorage>,
    generator: Arc<EtagGenerator>,
    codecs: Arc<DocumentCodecs>,
    cacher: Arc<DocumentCacher>,
    config: StorageConfig,
    commits: AtomicU64,
    conflicts: AtomicU64,
    failures: AtomicU64,
}

impl TransactionalStorage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        Self::with_codecs(config, DocumentCodecs::new())
    }

    pub fn with_codecs(config: StorageConfig, codecs: DocumentCodecs) -> Result<Self> {
        config.validate().map_err(DbError::InvalidArgument)?;
        Ok(Self {
            storage: Arc::new(TableStorage::new()),
            generator: Arc::new(EtagGenerator::new()),
            codecs: Arc::new(codecs),
            cacher: Arc::new(DocumentCacher::new(config.document_cache_size)),
            config,
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn table_storage(&self) -> &Arc<TableStorage> {
        &self.storage
    }

    pub fn generator(&self) -> &Arc<EtagGenerator> {
        &self.generator
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            commits: self.commits.load(Ordering::SeqCst),
            conflicts: self.conflicts.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
        }
    }

    fn open_session(&self) -> Result<(StorageSession, Arc<Mutex<WriteBatch>>)> {
        let snapshot = Arc::new(self.storage.snapshot()?);
        let write_batch = Arc::new(Mutex::new(WriteBatch::new()));
        let session = StorageSession::new(
            self.generator.clone(),
            self.codecs.clone(),
            self.cacher.clone(),
            write_batch.clone(),
            snapshot,
            self.storage.clone(),
        );
        Ok((session, write_batch))
    }

    /// Run `action` as one atomic unit of work and commit it.
    pub fn batch<T, F>(&self, mut action: F) -> Result<T>
    where
        F: FnMut(&mut StorageSession) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match self.run_once(&mut action) {
                Attempt::Committed(value) => return Ok(value),
                Attempt::Conflict(err) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    event!(
                        Level::WARN,
                        attempt,
                        error = %err,
                        "write conflict, re-running unit of work"
                    );
                }
                Attempt::Conflict(err) | Attempt::Failed(err) => return Err(err),
            }
        }
    }

    /// Run `action` against a fresh snapshot without committing anything
    pub fn read<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce(&StorageSession) -> Result<T>,
    {
        let (session, _) = self.open_session()?;
        action(&session)
    }

    fn run_once<T, F>(&self, action: &mut F) -> Attempt<T>
    where
        F: FnMut(&mut StorageSession) -> Result<T>,
    {
        let span = info_span!("storage_batch");
        let _entered = span.enter();

        let (mut session, write_batch) = match self.open_session() {
            Ok(opened) => opened,
            Err(err) => return self.failed(err),
        };

        let value = match action(&mut session) {
            Ok(value) => value,
            Err(err) => return self.classify(&session, err),
        };

        if let Err(err) = session.save_all_tasks() {
            return self.classify(&session, err);
        }

        let batch = match write_batch.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(err) => return self.failed(err.into()),
        };
        let operations = batch.len();

        let sequence = match self.storage.write(batch) {
            Ok(sequence) => sequence,
            Err(err) => return self.classify(&session, err),
        };
        self.commits.fetch_add(1, Ordering::SeqCst);
        event!(Level::DEBUG, sequence, operations, "unit of work committed");

        if !session.is_nested() {
            session.execute_on_storage_commit();
        }

        Attempt::Committed(value)
    }

    fn classify<T>(&self, session: &StorageSession, err: DbError) -> Attempt<T> {
        if session.is_write_conflict(&err) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            let concurrent_commits = session.commits_since_snapshot().unwrap_or_default();
            event!(
                Level::WARN,
                concurrent_commits,
                error = %err,
                "unit of work hit a write conflict"
            );
            return Attempt::Conflict(err);
        }
        self.failed(err)
    }

    fn failed<T>(&self, err: DbError) -> Attempt<T> {
        self.failures.fetch_add(1, Ordering::SeqCst);
        event!(Level::DEBUG, error = %err, "unit of work aborted");
        Attempt::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JsonDocument;
    use crate::transaction::RemoveFromIndexTask;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn storage() -> TransactionalStorage {
        TransactionalStorage::new(StorageConfig::default()).unwrap()
    }

    #[test]
    fn test_batch_commits_writes() {
        let storage = storage();
        storage
            .batch(|session| {
                session
                    .documents()
                    .add_document("users/1", None, json!({"name": "Oren"}), json!({}))
            })
            .unwrap();

        let doc = storage
            .read(|session| session.documents().document_by_key("users/1"))
            .unwrap()
            .unwrap();
        assert_eq!(doc.data["name"], "Oren");
        assert_eq!(storage.stats().commits, 1);
    }

    #[test]
    fn test_failed_action_commits_nothing_and_skips_notifications() {
        let storage = storage();
        let notified = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));

        let counter = notified.clone();
        let dispose_counter = disposed.clone();
        let err = storage
            .batch(|session| -> Result<()> {
                let written = session
                    .documents()
                    .add_document("users/1", None, json!({}), json!({}))?;
                let doc = JsonDocument {
                    key: "users/1".into(),
                    etag: written.etag,
                    data: json!({}),
                    metadata: json!({}),
                    last_modified: written.saved_at,
                };
                let counter = counter.clone();
                session.register_post_commit_notification(doc, move |_| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                });
                let dispose_counter = dispose_counter.clone();
                session.on_dispose(move || {
                    dispose_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                });
                Err(DbError::ExecutionError("boom".into()))
            })
            .unwrap_err();

        assert!(matches!(err, DbError::ExecutionError(_)));
        assert_eq!(notified.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(disposed.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(
            storage
                .read(|session| session.documents().document_by_key("users/1"))
                .unwrap()
                .is_none()
        );
        assert_eq!(storage.stats(), StorageStats { commits: 0, conflicts: 0, failures: 1 });
    }

    #[test]
    fn test_tasks_are_saved_before_commit() {
        let storage = storage();
        storage
            .batch(|session| {
                for key in ["a", "b"] {
                    session
                        .get_task(|t: &RemoveFromIndexTask| t.index == "Idx", RemoveFromIndexTask::new("Idx"))?
                        .add_key(key);
                }
                Ok(())
            })
            .unwrap();

        let tasks = storage.read(|session| session.tasks().tasks()).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].payload["keys"], json!(["a", "b"]));
    }

    #[test]
    fn test_conflict_propagates_without_retries() {
        let storage = storage();
        storage
            .batch(|session| session.general().set_identity_value("users", 1))
            .unwrap();

        let err = storage
            .batch(|session| {
                let next = session.general().next_identity_value("users")?;
                // Another unit of work commits the same counter first.
                storage.batch(|other| other.general().next_identity_value("users"))?;
                Ok(next)
            })
            .unwrap_err();

        assert!(err.is_concurrency_conflict());
        assert_eq!(storage.stats().conflicts, 1);
    }

    #[test]
    fn test_conflict_is_rerun_when_configured() {
        let storage = TransactionalStorage::new(StorageConfig::new().max_conflict_retries(2)).unwrap();
        let attempts = AtomicUsize::new(0);

        let value = storage
            .batch(|session| {
                let next = session.general().next_identity_value("users")?;
                if attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    storage.batch(|other| other.general().next_identity_value("users"))?;
                }
                Ok(next)
            })
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(storage.stats().conflicts, 1);
    }

    #[test]
    fn test_session_left_nested_commits_without_running_hooks() {
        let storage = storage();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        storage
            .batch(|session| {
                session
                    .documents()
                    .add_document("users/1", None, json!({}), json!({}))?;
                let counter = counter.clone();
                session.on_storage_commit(move || {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                });
                session.set_nested(true);
                Ok(())
            })
            .unwrap();

        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(storage.stats().commits, 1);
        assert!(storage
            .read(|session| session.documents().document_by_key("users/1"))
            .unwrap()
            .is_some());

        let counter = fired.clone();
        storage
            .batch(|session| {
                let counter = counter.clone();
                session.on_storage_commit(move || {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                });
                Ok(())
            })
            .unwrap();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
