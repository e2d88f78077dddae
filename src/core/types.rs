// ============================================================================
// Core Document Types
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::{DbError, Result};

/// Key of a stored document, e.g. `Emails/42`.
pub type DocumentId = String;

/// Monotonically increasing change marker assigned to every write.
///
/// Rendered as 16 upper-case hex digits so that the lexical order of the
/// string form matches the numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Etag(pub u64);

impl Etag {
    pub const EMPTY: Etag = Etag(0);

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Ordered storage key for this etag.
    pub fn to_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl FromStr for Etag {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        u64::from_str_radix(s, 16)
            .map(Etag)
            .map_err(|e| DbError::InvalidArgument(format!("Invalid etag '{}': {}", s, e)))
    }
}

impl Serialize for Etag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Etag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A document as seen by callers: decoded data plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDocument {
    pub key: DocumentId,
    pub etag: Etag,
    pub data: JsonValue,
    pub metadata: JsonValue,
    pub last_modified: DateTime<Utc>,
}

/// Ambient transaction context of a request.
///
/// Passed explicitly to every mutation strategy; never kept in global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInformation {
    pub id: String,
    pub timeout: Duration,
}

impl TransactionInformation {
    pub fn new(timeout: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timeout,
        }
    }

    pub fn with_id(id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            timeout,
        }
    }
}
