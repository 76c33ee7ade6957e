//! Task worker threads.

use std::sync::Arc;
use std::thread::JoinHandle;

use super::run::execute_task;
use super::Shared;
use crate::error::EngineError;

/// Start `count` workers. Each takes the oldest pending task, runs it to a
/// terminal state, and repeats until the queue is closed.
pub(super) fn spawn_workers(
    shared: &Arc<Shared>,
    count: usize,
) -> Result<Vec<JoinHandle<()>>, EngineError> {
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let shared = Arc::clone(shared);
        let handle = std::thread::Builder::new()
            .name(format!("gatherer-worker-{}", i))
            .spawn(move || {
                while let Some(id) = shared.queue.pop_blocking() {
                    execute_task(&shared, &id);
                }
                tracing::debug!("worker {} exiting", i);
            })
            .map_err(|e| EngineError::io("spawning task worker", e))?;
        handles.push(handle);
    }
    Ok(handles)
}
