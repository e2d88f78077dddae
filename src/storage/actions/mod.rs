// ============================================================================
// Storage Actions
// ============================================================================
//
// Narrow CRUD surfaces over one snapshot + write batch pair. Each accessor is
// a thin view: it owns no state beyond clones of the shared StorageView and
// the collaborators it needs, and every write lands in the same write batch.
//
// ============================================================================

pub mod attachments;
pub mod documents;
pub mod general;
pub mod indexing;
pub mod lists;
pub mod mapreduce;
pub mod queue;
pub mod staleness;
pub mod tasks;

pub use attachments::{Attachment, AttachmentsStorageActions};
pub use documents::{AddDocumentResult, DeletedDocument, DocumentsStorageActions};
pub use general::GeneralStorageActions;
pub use indexing::{IndexStats, IndexingStorageActions};
pub use lists::{ListItem, ListsStorageActions};
pub use mapreduce::{MapReduceStorageActions, MappedResult};
pub use queue::{QueueStorageActions, QueuedMessage};
pub use staleness::StalenessStorageActions;
pub use tasks::{StoredTask, TasksStorageActions};

pub const DOCUMENTS_TABLE: &str = "documents";
pub const DOCUMENTS_BY_ETAG_TABLE: &str = "documents_by_etag";
pub const INDEXES_TABLE: &str = "indexes";
pub const QUEUES_TABLE: &str = "queues";
pub const LISTS_TABLE: &str = "lists";
pub const TASKS_TABLE: &str = "tasks";
pub const MAPPED_RESULTS_TABLE: &str = "mapped_results";
pub const MAPPED_RESULTS_BY_DOCUMENT_TABLE: &str = "mapped_results_by_document";
pub const ATTACHMENTS_TABLE: &str = "attachments";
pub const IDENTITIES_TABLE: &str = "identities";

// Document keys routinely contain '/', so compound keys use a control char.
const KEY_SEPARATOR: char = '\u{1f}';

pub(crate) fn compound_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part);
    }
    key
}

/// Prefix matching every compound key that starts with all of `parts`
pub(crate) fn compound_prefix(parts: &[&str]) -> String {
    let mut prefix = compound_key(parts);
    prefix.push(KEY_SEPARATOR);
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_prefix_does_not_match_longer_parts() {
        let prefix = compound_prefix(&["idx", "Emails/1"]);
        assert!(compound_key(&["idx", "Emails/1", "a"]).starts_with(&prefix));
        assert!(!compound_key(&["idx", "Emails/10", "a"]).starts_with(&prefix));
    }
}
