// ============================================================================
// Storage Session
// ============================================================================
//
// One session per unit of work. It binds a snapshot + write batch pair, hands
// out the domain sub-accessors over it, and collects what must happen around
// the commit:
//
// - background tasks, coalesced per (kind, predicate) and persisted once by
//   save_all_tasks() right before commit
// - post-commit hooks, fired in registration order after a successful commit
// - dispose hooks, fired exactly once when the session ends
//
// Sessions are confined to the thread running the unit of work.
//
// ============================================================================

use super::notifications::CommitNotifications;
use super::tasks::DatabaseTask;
use crate::core::{DbError, JsonDocument, Result};
use crate::storage::actions::{
    AttachmentsStorageActions, DocumentsStorageActions, GeneralStorageActions,
    IndexingStorageActions, ListsStorageActions, MapReduceStorageActions, QueueStorageActions,
    StalenessStorageActions, TasksStorageActions,
};
use crate::storage::{
    DocumentCacher, DocumentCodecs, EtagGenerator, SnapshotReader, StorageView, TableStorage,
    WriteBatch,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{Level, event};

type Hook = Box<dyn FnOnce() + Send>;

enum CommitHook {
    Callback(Hook),
    /// Position of the batched document notification in the hook order
    FlushNotifications,
}

pub struct StorageSession {
    documents: DocumentsStorageActions,
    indexing: IndexingStorageActions,
    queue: QueueStorageActions,
    lists: ListsStorageActions,
    tasks: TasksStorageActions,
    staleness: StalenessStorageActions,
    map_reduce: MapReduceStorageActions,
    attachments: AttachmentsStorageActions,
    general: GeneralStorageActions,

    view: StorageView,
    storage: Arc<TableStorage>,
    created_at: DateTime<Utc>,
    is_nested: bool,

    registered_tasks: Vec<Box<dyn DatabaseTask>>,
    notifications: CommitNotifications,
    commit_hooks: Vec<CommitHook>,
    dispose_hooks: Vec<Hook>,
    disposed: bool,
}

impl StorageSession {
    /// Bind a session to one snapshot + write batch pair. Performs no I/O.
    pub fn new(
        generator: Arc<EtagGenerator>,
        codecs: Arc<DocumentCodecs>,
        cacher: Arc<DocumentCacher>,
        write_batch: Arc<Mutex<WriteBatch>>,
        snapshot: Arc<SnapshotReader>,
        storage: Arc<TableStorage>,
    ) -> Self {
        let view = StorageView::new(snapshot, write_batch);

        Self {
            documents: DocumentsStorageActions::new(view.clone(), generator.clone(), codecs, cacher),
            indexing: IndexingStorageActions::new(view.clone()),
            queue: QueueStorageActions::new(view.clone(), generator.clone()),
            lists: ListsStorageActions::new(view.clone(), generator.clone()),
            tasks: TasksStorageActions::new(view.clone(), generator.clone()),
            staleness: StalenessStorageActions::new(view.clone()),
            map_reduce: MapReduceStorageActions::new(view.clone(), generator.clone()),
            attachments: AttachmentsStorageActions::new(view.clone(), generator),
            general: GeneralStorageActions::new(view.clone()),
            view,
            storage,
            created_at: Utc::now(),
            is_nested: false,
            registered_tasks: Vec::new(),
            notifications: CommitNotifications::new(),
            commit_hooks: Vec::new(),
            dispose_hooks: Vec::new(),
            disposed: false,
        }
    }

    pub fn documents(&self) -> &DocumentsStorageActions {
        &self.documents
    }

    pub fn indexing(&self) -> &IndexingStorageActions {
        &self.indexing
    }

    pub fn queue(&self) -> &QueueStorageActions {
        &self.queue
    }

    pub fn lists(&self) -> &ListsStorageActions {
        &self.lists
    }

    pub fn tasks(&self) -> &TasksStorageActions {
        &self.tasks
    }

    pub fn staleness(&self) -> &StalenessStorageActions {
        &self.staleness
    }

    pub fn map_reduce(&self) -> &MapReduceStorageActions {
        &self.map_reduce
    }

    pub fn attachments(&self) -> &AttachmentsStorageActions {
        &self.attachments
    }

    pub fn general(&self) -> &GeneralStorageActions {
        &self.general
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True while running inside an already open outer unit of work
    pub fn is_nested(&self) -> bool {
        self.is_nested
    }

    pub fn set_nested(&mut self, nested: bool) {
        self.is_nested = nested;
    }

    /// Number of writes buffered by this unit of work so far
    pub fn pending_writes(&self) -> Result<usize> {
        self.view.pending_writes()
    }

    /// Commits made by other units of work since this session's snapshot
    pub fn commits_since_snapshot(&self) -> Result<u64> {
        let current = self.storage.commit_sequence()?;
        Ok(current.saturating_sub(self.view.snapshot().commit_sequence()))
    }

    /// Whether `err` is an optimistic-concurrency conflict rather than any
    /// other failure. The gateway re-runs conflicted units of work; every
    /// other error propagates.
    pub fn is_write_conflict(&self, err: &DbError) -> bool {
        err.is_concurrency_conflict()
    }

    /// Run `action` as a nested unit of work on this same session.
    ///
    /// Nothing is committed here; the outer unit of work commits everything.
    pub fn batch<T, F>(&mut self, action: F) -> Result<T>
    where
        F: FnOnce(&mut StorageSession) -> Result<T>,
    {
        let was_nested = std::mem::replace(&mut self.is_nested, true);
        let result = action(self);
        self.is_nested = was_nested;
        result
    }

    /// Return the first registered task of type `T` matching `predicate`,
    /// or register `new_task` and return it.
    pub fn get_task<T, P>(&mut self, predicate: P, new_task: T) -> Result<&mut T>
    where
        T: DatabaseTask,
        P: Fn(&T) -> bool,
    {
        let position = self.registered_tasks.iter().position(|task| {
            task.as_any()
                .downcast_ref::<T>()
                .is_some_and(|task| predicate(task))
        });

        let position = match position {
            Some(position) => position,
            None => {
                event!(
                    Level::DEBUG,
                    kind = new_task.kind(),
                    index = new_task.index(),
                    "background task registered"
                );
                self.registered_tasks.push(Box::new(new_task));
                self.registered_tasks.len() - 1
            }
        };

        self.registered_tasks[position]
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| DbError::ExecutionError("Registered task changed type".into()))
    }

    pub fn registered_tasks(&self) -> usize {
        self.registered_tasks.len()
    }

    /// Queue `document` for the post-commit notification.
    ///
    /// The first call binds `handler`; later calls only add documents. The
    /// handler runs once after commit with every document, in order.
    pub fn register_post_commit_notification<F>(&mut self, document: JsonDocument, handler: F)
    where
        F: FnOnce(Vec<JsonDocument>) + Send + 'static,
    {
        if self.notifications.register(document, handler) {
            self.commit_hooks.push(CommitHook::FlushNotifications);
        }
    }

    pub fn pending_notifications(&self) -> &[JsonDocument] {
        self.notifications.pending()
    }

    /// Run `hook` once after the unit of work commits
    pub fn on_storage_commit<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.commit_hooks.push(CommitHook::Callback(Box::new(hook)));
    }

    /// Run `hook` once when the session ends, committed or not
    pub fn on_dispose<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispose_hooks.push(Box::new(hook));
    }

    /// Persist every registered task, tagged with the session creation time.
    ///
    /// Called by the gateway immediately before commit.
    pub fn save_all_tasks(&mut self) -> Result<usize> {
        let tasks = std::mem::take(&mut self.registered_tasks);
        for task in &tasks {
            self.tasks.add_task(task.as_ref(), self.created_at)?;
        }
        Ok(tasks.len())
    }

    /// Fire the post-commit hooks. Only the gateway calls this, after commit.
    pub(crate) fn execute_on_storage_commit(&mut self) {
        for hook in std::mem::take(&mut self.commit_hooks) {
            match hook {
                CommitHook::Callback(hook) => hook(),
                CommitHook::FlushNotifications => {
                    if let Some(delivered) = self.notifications.flush() {
                        event!(Level::DEBUG, delivered, "post-commit notification delivered");
                    }
                }
            }
        }
    }

    /// Fire the dispose hooks. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for hook in std::mem::take(&mut self.dispose_hooks) {
            hook();
        }
    }
}

impl Drop for StorageSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for StorageSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSession")
            .field("created_at", &self.created_at)
            .field("is_nested", &self.is_nested)
            .field("registered_tasks", &self.registered_tasks)
            .field("notifications", &self.notifications)
            .field("commit_hooks", &self.commit_hooks.len())
            .field("dispose_hooks", &self.dispose_hooks.len())
            .finish()
    }
}
