pub mod error;
pub mod types;

pub use error::{DbError, Result};
pub use types::{DocumentId, Etag, JsonDocument, TransactionInformation};
