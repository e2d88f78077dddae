use super::documents::most_recent_document_etag;
use super::indexing::IndexStats;
use super::tasks::has_tasks_for_index;
use super::INDEXES_TABLE;
use crate::core::{DbError, Etag, Result};
use crate::storage::view::StorageView;
use chrono::{DateTime, Utc};

pub struct StalenessStorageActions {
    view: StorageView,
}

impl StalenessStorageActions {
    pub fn new(view: StorageView) -> Self {
        Self { view }
    }

    fn stats(&self, name: &str) -> Result<IndexStats> {
        self.view
            .read_as::<IndexStats>(INDEXES_TABLE, name)?
            .ok_or_else(|| DbError::IndexNotFound(name.to_string()))
    }

    /// Whether the index does not yet reflect every committed document.
    ///
    /// With a cutoff, an index that is behind only counts as stale when its
    /// last indexing run happened before the cutoff. Pending tasks for the
    /// index always make it stale.
    pub fn is_index_stale(&self, name: &str, cutoff: Option<DateTime<Utc>>) -> Result<bool> {
        let stats = self.stats(name)?;

        if has_tasks_for_index(&self.view, name)? {
            return Ok(true);
        }

        let most_recent = most_recent_document_etag(&self.view)?;
        if stats.last_indexed_etag >= most_recent {
            return Ok(false);
        }

        Ok(match (cutoff, stats.last_indexed_timestamp) {
            (Some(cutoff), Some(indexed_at)) => indexed_at < cutoff,
            _ => true,
        })
    }

    /// Timestamp and etag of the last indexing run
    pub fn index_last_updated_at(&self, name: &str) -> Result<(Option<DateTime<Utc>>, Etag)> {
        let stats = self.stats(name)?;
        Ok((stats.last_indexed_timestamp, stats.last_indexed_etag))
    }

    pub fn most_recent_document_etag(&self) -> Result<Etag> {
        most_recent_document_etag(&self.view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::actions::{DocumentsStorageActions, IndexingStorageActions, TasksStorageActions};
    use crate::storage::cacher::DocumentCacher;
    use crate::storage::codec::DocumentCodecs;
    use crate::storage::generator::EtagGenerator;
    use crate::storage::{TableStorage, WriteBatch};
    use crate::transaction::RemoveFromIndexTask;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Actions {
        documents: DocumentsStorageActions,
        indexing: IndexingStorageActions,
        tasks: TasksStorageActions,
        staleness: StalenessStorageActions,
    }

    fn actions() -> Actions {
        let storage = TableStorage::new();
        let view = StorageView::new(
            Arc::new(storage.snapshot().unwrap()),
            Arc::new(Mutex::new(WriteBatch::new())),
        );
        let generator = Arc::new(EtagGenerator::new());
        Actions {
            documents: DocumentsStorageActions::new(
                view.clone(),
                generator.clone(),
                Arc::new(DocumentCodecs::new()),
                Arc::new(DocumentCacher::new(8)),
            ),
            indexing: IndexingStorageActions::new(view.clone()),
            tasks: TasksStorageActions::new(view.clone(), generator),
            staleness: StalenessStorageActions::new(view),
        }
    }

    #[test]
    fn test_index_behind_documents_is_stale() {
        let a = actions();
        a.indexing.add_index("Emails").unwrap();
        assert!(!a.staleness.is_index_stale("Emails", None).unwrap());

        let written = a.documents.add_document("Emails/1", None, json!({}), json!({})).unwrap();
        assert!(a.staleness.is_index_stale("Emails", None).unwrap());

        a.indexing
            .update_last_indexed("Emails", written.etag, Utc::now())
            .unwrap();
        assert!(!a.staleness.is_index_stale("Emails", None).unwrap());
        assert_eq!(a.staleness.index_last_updated_at("Emails").unwrap().1, written.etag);
    }

    #[test]
    fn test_cutoff_before_last_run_is_not_stale() {
        let a = actions();
        a.indexing.add_index("Emails").unwrap();
        a.indexing
            .update_last_indexed("Emails", Etag::EMPTY, Utc::now())
            .unwrap();
        a.documents.add_document("Emails/1", None, json!({}), json!({})).unwrap();

        let early = Utc::now() - Duration::hours(1);
        let late = Utc::now() + Duration::hours(1);
        assert!(!a.staleness.is_index_stale("Emails", Some(early)).unwrap());
        assert!(a.staleness.is_index_stale("Emails", Some(late)).unwrap());
    }

    #[test]
    fn test_pending_tasks_make_index_stale() {
        let a = actions();
        a.indexing.add_index("Emails").unwrap();
        a.tasks
            .add_task(&RemoveFromIndexTask::new("Emails"), Utc::now())
            .unwrap();
        assert!(a.staleness.is_index_stale("Emails", None).unwrap());
    }

    #[test]
    fn test_unknown_index() {
        let a = actions();
        assert!(matches!(
            a.staleness.is_index_stale("Missing", None),
            Err(DbError::IndexNotFound(_))
        ));
    }
}
