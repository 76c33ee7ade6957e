//! Engine error taxonomy.

use crate::retry::FetchError;
use crate::task::TaskId;

/// Errors surfaced by engine commands, host calls and collaborators.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad or missing parameter, unknown source, invalid request. The task never starts.
    #[error("config error: {0}")]
    Config(String),
    /// Parse or runtime failure inside the collection script.
    #[error("script error: {0}")]
    Script(String),
    /// The task's cancellation token was observed.
    #[error("Task canceled")]
    Canceled,
    /// A single fetch exhausted its retry budget or failed permanently.
    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: FetchError,
    },
    /// Popping an empty page stack, or reading a page before any navigation.
    #[error("navigation error: {0}")]
    Navigation(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("task store error: {0}")]
    Store(String),
    #[error("engine is shut down")]
    ShutDown,
}

impl EngineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn store(err: anyhow::Error) -> Self {
        EngineError::Store(format!("{:#}", err))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, EngineError::Canceled)
    }
}
