// ============================================================================
// Bulk Operations
// ============================================================================
//
// engine      - chunked, index-driven application of a mutation strategy
// operations  - delete / patch / scripted patch by index
// results     - per-document outcome records
// tracker     - background execution with pollable status
//
// ============================================================================

pub mod engine;
pub mod operations;
pub mod results;
pub mod tracker;

pub use engine::{BulkOperationEngine, BulkOperationState};
pub use operations::DatabaseBulkOperations;
pub use results::{BulkOperationResult, ResultSequence};
pub use tracker::{BulkOperationHandle, BulkOperationId, BulkOperationStatus, BulkOperationTracker, OperationState};
