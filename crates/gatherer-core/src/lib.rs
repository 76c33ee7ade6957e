pub mod config;
pub mod error;
pub mod logging;

pub mod cancel;
pub mod download;
pub mod events;
pub mod fetch;
pub mod navigation;
pub mod params;
pub mod registry;
pub mod retry;
pub mod sandbox;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use error::EngineError;
pub use scheduler::{Collaborators, Engine};
pub use task::{Task, TaskId, TaskRequest, TaskStatus};
