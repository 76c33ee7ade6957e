//! Run one task: pickup, sandboxed script, outcome, terminal transition.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;

use super::Shared;
use crate::cancel::CancellationToken;
use crate::download::DownloadOwner;
use crate::error::EngineError;
use crate::registry::SourceDefinition;
use crate::sandbox::{Sandbox, SandboxError, TaskHost};
use crate::task::{now_millis, CrashSnapshot, Task, TaskId, TaskStatus};

const CANCELED_MESSAGE: &str = "Task canceled";

/// How a run ended, before it is applied to the task table.
struct Outcome {
    status: TaskStatus,
    error: Option<String>,
    snapshot: Option<serde_json::Value>,
}

impl Outcome {
    fn completed() -> Self {
        Self {
            status: TaskStatus::Completed,
            error: None,
            snapshot: None,
        }
    }

    fn canceled() -> Self {
        Self {
            status: TaskStatus::Canceled,
            error: Some(CANCELED_MESSAGE.to_string()),
            snapshot: None,
        }
    }

    fn failed(error: String, snapshot: Option<serde_json::Value>) -> Self {
        Self {
            status: TaskStatus::Failed,
            error: Some(error),
            snapshot,
        }
    }
}

/// Drive task `id` from pending to a terminal state. Never panics.
pub(super) fn execute_task(shared: &Shared, id: &TaskId) {
    let Some(token) = shared.cancels.get(id) else {
        tracing::warn!(task = %id, "no cancellation token for queued task; skipping");
        return;
    };
    if shared.stopping.load(Ordering::Acquire) {
        tracing::debug!(task = %id, "engine stopping; leaving task pending");
        shared.cancels.unregister(id);
        return;
    }
    if token.is_canceled() {
        finish(shared, id, Outcome::canceled());
        return;
    }

    let task = match shared.tasks.transition(id, TaskStatus::Running, None) {
        Ok(Some(task)) => task,
        Ok(None) => {
            tracing::debug!(task = %id, "task left pending before pickup");
            shared.cancels.unregister(id);
            return;
        }
        Err(e) => {
            tracing::warn!(task = %id, "cannot start task: {}", e);
            shared.cancels.unregister(id);
            return;
        }
    };
    shared.events.publish_status(&task);
    tracing::info!(task = %id, source = %task.source_id, "task started");

    let outcome = match shared.registry.resolve(&task.source_id) {
        Ok(source) => run_source(shared, &task, &source, &token),
        Err(e) => Outcome::failed(e.to_string(), None),
    };
    finish(shared, id, outcome);
}

fn run_source(
    shared: &Shared,
    task: &Task,
    source: &SourceDefinition,
    token: &CancellationToken,
) -> Outcome {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let host = TaskHost::new(
            shared.host_services(),
            DownloadOwner {
                task_id: task.id.clone(),
                source_id: task.source_id.clone(),
            },
            task.output.clone(),
            task.headers.clone(),
            token.clone(),
        );
        let sandbox = Sandbox::new(host, token.clone(), &shared.config.sandbox);
        sandbox.run(&source.script, &task.parameters, source.base_url.as_deref())
    }));

    match result {
        _ if token.is_canceled() => Outcome::canceled(),
        Ok(Ok(())) => judge_items(shared, &task.id),
        Ok(Err(SandboxError::Canceled)) => Outcome::canceled(),
        Ok(Err(SandboxError::Script { message, scope })) => {
            let error = EngineError::Script(message).to_string();
            let snapshot = scope.map(|scope| {
                serde_json::json!({
                    "kind": "script-error",
                    "sourceId": task.source_id,
                    "error": error,
                    "scope": scope,
                })
            });
            Outcome::failed(error, snapshot)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(task = %task.id, "script host panicked: {}", message);
            let error = format!("script host panicked: {}", message);
            let snapshot = serde_json::json!({
                "kind": "panic",
                "sourceId": task.source_id,
                "error": error,
            });
            Outcome::failed(error, Some(snapshot))
        }
    }
}

/// A script that returned normally fails only when every attempted item
/// failed and the policy asks for it.
fn judge_items(shared: &Shared, id: &TaskId) -> Outcome {
    if !shared.config.fail_when_all_items_fail {
        return Outcome::completed();
    }
    let items = match shared.tasks.get(id) {
        Ok(Some(task)) => task.items,
        _ => return Outcome::completed(),
    };
    if items.attempted() > 0 && items.succeeded() == 0 {
        Outcome::failed(
            format!("all {} item downloads failed", items.attempted()),
            None,
        )
    } else {
        Outcome::completed()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn finish(shared: &Shared, id: &TaskId, outcome: Outcome) {
    if let Some(snapshot) = outcome.snapshot {
        shared.tasks.set_crash_snapshot(
            id,
            CrashSnapshot {
                blob: snapshot.to_string(),
                captured_at: now_millis(),
                acknowledged: false,
            },
        );
    }
    match shared.tasks.transition(id, outcome.status, outcome.error) {
        Ok(Some(task)) => {
            shared.events.publish_status(&task);
            match task.status {
                TaskStatus::Completed => tracing::info!(
                    task = %id,
                    stored = task.items.stored,
                    duplicates = task.items.duplicates,
                    failed = task.items.failed,
                    "task completed"
                ),
                _ => tracing::info!(
                    task = %id,
                    "task {}: {}",
                    task.status,
                    task.error.as_deref().unwrap_or_default()
                ),
            }
        }
        Ok(None) => tracing::debug!(task = %id, "task already terminal"),
        Err(e) => tracing::warn!(task = %id, "cannot finish task: {}", e),
    }
    shared.cancels.unregister(id);
}
