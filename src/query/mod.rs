// ============================================================================
// Index Queries
// ============================================================================
//
// The bulk engine only needs the identifiers an index matches. Index engines
// answer a restricted query with a lazy cursor of document ids plus a flag
// telling whether the index had caught up with every committed write.
//
// ============================================================================

use crate::core::{DocumentId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Projection that yields only the identifier of each matched document
pub const DOCUMENT_ID_FIELD_NAME: &str = "__document_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortedField {
    pub field: String,
    pub descending: bool,
}

impl SortedField {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Read-only description of an index query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuery {
    pub query: String,
    pub start: usize,
    pub page_size: usize,
    pub cutoff: Option<DateTime<Utc>>,
    pub sorted_fields: Vec<SortedField>,
    pub fields_to_fetch: Vec<String>,
}

impl Default for IndexQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            start: 0,
            page_size: 128,
            cutoff: None,
            sorted_fields: Vec::new(),
            fields_to_fetch: Vec::new(),
        }
    }
}

impl IndexQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.cutoff = Some(cutoff);
        self
    }

    pub fn sort_by(mut self, field: SortedField) -> Self {
        self.sorted_fields.push(field);
        self
    }

    pub fn fetch(mut self, field: impl Into<String>) -> Self {
        self.fields_to_fetch.push(field.into());
        self
    }

    /// Copy of this query that fetches only document identifiers, unpaged.
    ///
    /// Query text, start offset, cutoff and sort order are kept.
    pub fn for_document_ids(&self) -> Self {
        Self {
            page_size: usize::MAX,
            fields_to_fetch: vec![DOCUMENT_ID_FIELD_NAME.to_string()],
            ..self.clone()
        }
    }

    pub fn fetches_only_document_ids(&self) -> bool {
        self.fields_to_fetch.len() == 1 && self.fields_to_fetch[0] == DOCUMENT_ID_FIELD_NAME
    }
}

/// Lazy, single-pass cursor over matched document ids
pub type DocumentIdCursor<'a> = Box<dyn Iterator<Item = Result<DocumentId>> + Send + 'a>;

pub struct DocumentIdQueryResult<'a> {
    pub ids: DocumentIdCursor<'a>,
    pub stale: bool,
}

impl<'a> DocumentIdQueryResult<'a> {
    pub fn new<I>(ids: I, stale: bool) -> Self
    where
        I: Iterator<Item = Result<DocumentId>> + Send + 'a,
    {
        Self {
            ids: Box::new(ids),
            stale,
        }
    }
}

/// Executes index queries. Implemented by the indexing subsystem.
pub trait IndexQueryEngine: Send + Sync {
    /// Run `query` against `index`, yielding matched document ids lazily.
    ///
    /// Fails with `DbError::IndexNotFound` for unknown indexes.
    fn query_document_ids<'a>(&'a self, index: &str, query: &IndexQuery) -> Result<DocumentIdQueryResult<'a>>;
}
