//! Task persistence.
//!
//! The engine records every task and every status transition here so history
//! and crash snapshots survive restarts. Progress ticks are not persisted.

mod memory;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use crate::error::EngineError;
use crate::task::{Task, TaskId};

/// Durable task records. Implementations are called from worker threads and
/// must not require an async context.
pub trait TaskStore: Send + Sync {
    /// Insert or replace the record for `task.id`.
    fn persist(&self, task: &Task) -> Result<(), EngineError>;

    fn load(&self, id: &TaskId) -> Result<Option<Task>, EngineError>;

    /// All records, oldest submission first.
    fn list(&self) -> Result<Vec<Task>, EngineError>;
}
