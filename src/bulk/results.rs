use crate::core::{DocumentId, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Arc, RwLock};

/// Outcome of applying a mutation strategy to one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BulkOperationResult {
    Deleted {
        document: DocumentId,
        deleted: bool,
    },
    PatchedWithDebug {
        document: DocumentId,
        result: JsonValue,
        debug: JsonValue,
    },
    Patched {
        document: DocumentId,
        result: JsonValue,
    },
}

impl BulkOperationResult {
    pub fn deleted(document: impl Into<DocumentId>, deleted: bool) -> Self {
        Self::Deleted {
            document: document.into(),
            deleted,
        }
    }

    pub fn patched(document: impl Into<DocumentId>, result: JsonValue) -> Self {
        Self::Patched {
            document: document.into(),
            result,
        }
    }

    pub fn patched_with_debug(document: impl Into<DocumentId>, result: JsonValue, debug: JsonValue) -> Self {
        Self::PatchedWithDebug {
            document: document.into(),
            result,
            debug,
        }
    }

    pub fn document(&self) -> &str {
        match self {
            Self::Deleted { document, .. }
            | Self::Patched { document, .. }
            | Self::PatchedWithDebug { document, .. } => document,
        }
    }
}

/// Append-only, ordered results of one bulk operation.
///
/// Clones share the same sequence, so a background operation can be observed
/// while it runs.
#[derive(Debug, Clone, Default)]
pub struct ResultSequence {
    inner: Arc<RwLock<Vec<BulkOperationResult>>>,
}

impl ResultSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: BulkOperationResult) -> Result<()> {
        self.inner.write()?.push(result);
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.inner.read()?.is_empty())
    }

    pub fn snapshot(&self) -> Result<Vec<BulkOperationResult>> {
        Ok(self.inner.read()?.clone())
    }

    /// Drop everything appended after the first `len` results
    pub(crate) fn truncate(&self, len: usize) -> Result<()> {
        self.inner.write()?.truncate(len);
        Ok(())
    }

    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(&*self.inner.read()?)?)
    }
}
