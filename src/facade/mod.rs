// ============================================================================
// Document Database Facade
// ============================================================================

pub mod commands;
pub mod database;
pub mod patch;

pub use commands::{BatchCommand, BatchResult};
pub use database::{DocumentChangeNotification, DocumentChangeType, DocumentDatabase, PutResult};
pub use patch::{
    PatchCommandType, PatchRequest, PatchResult, ScriptedPatchOutcome, ScriptedPatchRequest,
    ScriptedPatcher, apply_patches,
};
