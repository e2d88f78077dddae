// ============================================================================
// Storage Module
// ============================================================================
//
// table_storage  - committed state, snapshots, write batches
// view           - read-your-own-writes overlay shared by one session
// actions        - domain sub-accessors over a view
// transactional  - unit-of-work gateway
//
// ============================================================================

pub mod actions;
pub mod cacher;
pub mod codec;
pub mod generator;
pub mod table_storage;
pub mod transactional;
pub mod view;

pub use cacher::{CachedDocument, DocumentCacher};
pub use codec::{DocumentCodec, DocumentCodecs};
pub use generator::EtagGenerator;
pub use table_storage::{SnapshotReader, Table, TableStorage, VersionedValue, WriteBatch, WriteOperation};
pub use transactional::{StorageStats, TransactionalStorage};
pub use view::StorageView;
