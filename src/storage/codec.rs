use crate::core::Result;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Transformation applied to document data on its way into and out of storage.
///
/// Encoding runs codecs in ascending order, decoding in the reverse order,
/// so each codec sees exactly what it produced.
pub trait DocumentCodec: Send + Sync {
    fn name(&self) -> &str;

    fn encode(&self, key: &str, data: JsonValue, metadata: &JsonValue) -> Result<JsonValue>;

    fn decode(&self, key: &str, data: JsonValue, metadata: &JsonValue) -> Result<JsonValue>;
}

/// Ordered collection of codecs
#[derive(Clone, Default)]
pub struct DocumentCodecs {
    codecs: Vec<(i32, Arc<dyn DocumentCodec>)>,
}

impl DocumentCodecs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec; lower `order` encodes first
    pub fn register(&mut self, order: i32, codec: Arc<dyn DocumentCodec>) {
        self.codecs.push((order, codec));
        self.codecs.sort_by_key(|(order, _)| *order);
    }

    pub fn encode(&self, key: &str, data: JsonValue, metadata: &JsonValue) -> Result<JsonValue> {
        self.codecs
            .iter()
            .try_fold(data, |data, (_, codec)| codec.encode(key, data, metadata))
    }

    pub fn decode(&self, key: &str, data: JsonValue, metadata: &JsonValue) -> Result<JsonValue> {
        self.codecs
            .iter()
            .rev()
            .try_fold(data, |data, (_, codec)| codec.decode(key, data, metadata))
    }

    pub fn names(&self) -> Vec<&str> {
        self.codecs.iter().map(|(_, codec)| codec.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl std::fmt::Debug for DocumentCodecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCodecs")
            .field("codecs", &self.names())
            .finish()
    }
}
