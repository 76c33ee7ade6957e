use std::sync::Mutex;

use super::TaskStore;
use crate::error::EngineError;
use crate::task::{Task, TaskId};

/// Volatile store for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn persist(&self, task: &Task) -> Result<(), EngineError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        Ok(())
    }

    fn load(&self, id: &TaskId) -> Result<Option<Task>, EngineError> {
        Ok(self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| &t.id == id)
            .cloned())
    }

    fn list(&self) -> Result<Vec<Task>, EngineError> {
        Ok(self.tasks.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
