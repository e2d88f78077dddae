// ============================================================================
// Transaction Module
// ============================================================================
//
// Per-unit-of-work storage session: sub-accessor composition, background task
// coalescing, post-commit notification batching and conflict classification.
//
// ============================================================================

pub mod notifications;
pub mod session;
pub mod tasks;

pub use notifications::{CommitNotificationHandler, CommitNotifications};
pub use session::StorageSession;
pub use tasks::{DatabaseTask, ReduceKeysTask, RemoveFromIndexTask};
