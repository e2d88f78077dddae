use crate::core::{Etag, Result};
use lru::LruCache;
use serde_json::Value as JsonValue;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Decoded document body and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDocument {
    pub data: JsonValue,
    pub metadata: JsonValue,
}

/// LRU cache of decoded documents keyed by (key, etag).
///
/// An etag identifies one immutable revision, so entries never go stale;
/// superseded revisions simply age out.
#[derive(Debug)]
pub struct DocumentCacher {
    cache: Mutex<LruCache<(String, Etag), CachedDocument>>,
}

impl DocumentCacher {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str, etag: Etag) -> Result<Option<CachedDocument>> {
        let mut cache = self.cache.lock()?;
        Ok(cache.get(&(key.to_string(), etag)).cloned())
    }

    pub fn set(&self, key: &str, etag: Etag, document: CachedDocument) -> Result<()> {
        self.cache.lock()?.put((key.to_string(), etag), document);
        Ok(())
    }

    /// Drop every cached revision of `key`
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.lock()?;
        let stale: Vec<(String, Etag)> = cache
            .iter()
            .filter(|((cached_key, _), _)| cached_key == key)
            .map(|(k, _)| k.clone())
            .collect();
        for k in stale {
            cache.pop(&k);
        }
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.cache.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
