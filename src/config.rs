/// Number of document ids processed per committed chunk of a bulk operation.
pub const DEFAULT_BULK_CHUNK_SIZE: usize = 1024;

/// Finished background bulk operations kept queryable by id.
pub const DEFAULT_FINISHED_OPERATIONS_RETENTION: usize = 64;

/// Storage and bulk operation configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// How many times the gateway re-runs a unit of work that failed with a
    /// write conflict. Zero means conflicts always propagate.
    pub max_conflict_retries: usize,

    /// Capacity of the decoded document cache (entries)
    pub document_cache_size: usize,

    /// Document ids per bulk operation chunk
    pub bulk_chunk_size: usize,

    /// Buffer size of the document change broadcast channel
    pub change_notification_capacity: usize,

    /// Finished background bulk operations whose results stay available
    /// through status queries. Older ones are evicted.
    pub finished_operations_retention: usize,
}

impl StorageConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self {
            max_conflict_retries: 0,
            document_cache_size: 1024,
            bulk_chunk_size: DEFAULT_BULK_CHUNK_SIZE,
            change_notification_capacity: 256,
            finished_operations_retention: DEFAULT_FINISHED_OPERATIONS_RETENTION,
        }
    }

    /// Set how many times a conflicted unit of work is re-run
    pub fn max_conflict_retries(mut self, retries: usize) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Set the document cache capacity
    pub fn document_cache_size(mut self, size: usize) -> Self {
        self.document_cache_size = size;
        self
    }

    /// Set the bulk operation chunk size
    pub fn bulk_chunk_size(mut self, size: usize) -> Self {
        self.bulk_chunk_size = size;
        self
    }

    /// Set the change notification channel capacity
    pub fn change_notification_capacity(mut self, capacity: usize) -> Self {
        self.change_notification_capacity = capacity;
        self
    }

    /// Set how many finished background operations stay queryable
    pub fn finished_operations_retention(mut self, retention: usize) -> Self {
        self.finished_operations_retention = retention;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.bulk_chunk_size == 0 {
            return Err("bulk_chunk_size must be greater than 0".to_string());
        }

        if self.document_cache_size == 0 {
            return Err("document_cache_size must be greater than 0".to_string());
        }

        if self.change_notification_capacity == 0 {
            return Err("change_notification_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new()
    }
}
