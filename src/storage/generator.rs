use crate::core::Etag;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out strictly increasing etags for every kind of stored item
#[derive(Debug, Default)]
pub struct EtagGenerator {
    last: AtomicU64,
}

impl EtagGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after an etag recovered from existing data
    pub fn starting_after(last: Etag) -> Self {
        Self {
            last: AtomicU64::new(last.as_u64()),
        }
    }

    pub fn create_sequential_etag(&self) -> Etag {
        Etag(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn last_etag(&self) -> Etag {
        Etag(self.last.load(Ordering::SeqCst))
    }
}
