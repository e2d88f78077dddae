use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Bulk operation cancelled because the index '{index}' is stale and allowStale is false")]
    StaleIndex { index: String },

    #[error("Failed to apply bulk operation to document '{document}': {source}")]
    Mutation {
        document: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Index '{0}' not found")]
    IndexNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl DbError {
    /// Wrap a failure raised while mutating a single document.
    pub fn mutation(document: impl Into<String>, source: DbError) -> Self {
        Self::Mutation {
            document: document.into(),
            source: Box::new(source),
        }
    }

    /// True for optimistic-concurrency failures, including ones wrapped by a mutation.
    pub fn is_concurrency_conflict(&self) -> bool {
        match self {
            Self::Concurrency(_) => true,
            Self::Mutation { source, .. } => source.is_concurrency_conflict(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_error_keeps_conflict_visible() {
        let err = DbError::mutation("users/1", DbError::Concurrency("etag mismatch".into()));
        assert!(err.is_concurrency_conflict());
        assert_eq!(
            err.to_string(),
            "Failed to apply bulk operation to document 'users/1': Concurrency conflict: etag mismatch"
        );
    }

    #[test]
    fn test_stale_index_message() {
        let err = DbError::StaleIndex {
            index: "Raven/DocumentsByEntityName".into(),
        };
        assert!(!err.is_concurrency_conflict());
        assert!(err.to_string().contains("allowStale is false"));
    }
}
