use crate::core::JsonDocument;
use std::fmt;

pub type CommitNotificationHandler = Box<dyn FnOnce(Vec<JsonDocument>) + Send>;

/// Documents waiting for one post-commit callback.
///
/// The handler slot is filled by the first registration only; later
/// registrations just add documents. Flushing empties the slot, so the
/// handler runs at most once.
#[derive(Default)]
pub struct CommitNotifications {
    handler: Option<CommitNotificationHandler>,
    documents: Vec<JsonDocument>,
}

impl CommitNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document. Returns true when this call bound the handler.
    pub fn register<F>(&mut self, document: JsonDocument, handler: F) -> bool
    where
        F: FnOnce(Vec<JsonDocument>) + Send + 'static,
    {
        let bound = self.handler.is_none() && self.documents.is_empty();
        if bound {
            self.handler = Some(Box::new(handler));
        }
        self.documents.push(document);
        bound
    }

    pub fn pending(&self) -> &[JsonDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Hand the accumulated documents to the handler, in insertion order.
    ///
    /// Returns the number of documents delivered, or `None` if there was
    /// nothing to deliver.
    pub fn flush(&mut self) -> Option<usize> {
        let handler = self.handler.take()?;
        let documents = std::mem::take(&mut self.documents);
        let delivered = documents.len();
        handler(documents);
        Some(delivered)
    }
}

impl fmt::Debug for CommitNotifications {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitNotifications")
            .field("bound", &self.handler.is_some())
            .field("documents", &self.documents.len())
            .finish()
    }
}
