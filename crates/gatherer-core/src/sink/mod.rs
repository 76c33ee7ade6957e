//! Collection Result Sink: where downloaded items end up.
//!
//! The engine only needs two questions answered: "is this fingerprint already
//! collected?" and "store these bytes". Gallery and album models live behind
//! this seam, outside the engine.

mod directory;
mod memory;
mod naming;

pub use directory::DirectorySink;
pub use memory::{MemorySink, RecordedItem};
pub use naming::{filename_for, sanitize_filename, unique_path};

use crate::error::EngineError;
use crate::task::{OutputTarget, TaskId};

/// Facts about an item known before it is stored.
#[derive(Debug, Clone)]
pub struct ItemMetadata {
    pub source_id: String,
    /// Lowercase hex SHA-256 of the bytes.
    pub fingerprint: String,
    pub content_type: Option<String>,
    pub output: OutputTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    /// Where the sink put the item (a path for the directory sink).
    pub location: String,
    pub fingerprint: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemAdded {
    Stored(StoredItem),
    /// Another item with the same fingerprint was stored first.
    Duplicate,
}

pub trait CollectionSink: Send + Sync {
    fn is_known(&self, fingerprint: &str) -> bool;

    fn add_item(
        &self,
        task_id: &TaskId,
        bytes: &[u8],
        source_url: &str,
        meta: &ItemMetadata,
    ) -> Result<ItemAdded, EngineError>;
}
