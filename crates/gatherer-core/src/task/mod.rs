//! Task data model: identity, status, progress, item counters, crash snapshot.

mod progress;
mod status;
mod table;

pub use progress::{clamp_progress, PROGRESS_CEILING, PROGRESS_COMPLETE};
pub use status::TaskStatus;
pub use table::{ItemKind, TaskTable};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::fetch::Headers;
use crate::params::ParamValue;

/// Opaque task identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        TaskId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        TaskId(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where collected items go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// Per-task download outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCounts {
    pub stored: u64,
    pub duplicates: u64,
    /// Items that failed to download or persist (partial loss on completed tasks).
    pub failed: u64,
}

impl ItemCounts {
    pub fn attempted(&self) -> u64 {
        self.stored + self.duplicates + self.failed
    }

    pub fn succeeded(&self) -> u64 {
        self.stored + self.duplicates
    }
}

/// Diagnostic state captured when a script run aborted abnormally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashSnapshot {
    /// JSON document describing the failure.
    pub blob: String,
    pub captured_at: u64,
    pub acknowledged: bool,
}

/// One request to run a collection source with a given parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub source_id: String,
    #[serde(default)]
    pub output: OutputTarget,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub headers: Headers,
    pub status: TaskStatus,
    pub progress: f64,
    pub submitted_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_snapshot: Option<CrashSnapshot>,
    #[serde(default)]
    pub items: ItemCounts,
}

/// Read-only copy of a task handed to front ends.
pub type TaskSnapshot = Task;

impl Task {
    pub fn pending(
        source_id: impl Into<String>,
        output: OutputTarget,
        parameters: BTreeMap<String, ParamValue>,
        headers: Headers,
    ) -> Self {
        Self {
            id: TaskId::new(),
            source_id: source_id.into(),
            output,
            parameters,
            headers,
            status: TaskStatus::Pending,
            progress: 0.0,
            submitted_at: now_millis(),
            started_at: None,
            ended_at: None,
            error: None,
            crash_snapshot: None,
            items: ItemCounts::default(),
        }
    }

    /// Move to `next` if the state machine allows it, stamping times and progress.
    /// Returns false (and leaves the task untouched) for an illegal transition.
    pub fn transition(&mut self, next: TaskStatus, error: Option<String>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = now_millis();
        self.status = next;
        match next {
            TaskStatus::Running => self.started_at = Some(now),
            TaskStatus::Completed => {
                self.progress = PROGRESS_COMPLETE;
                self.ended_at = Some(now);
            }
            TaskStatus::Failed | TaskStatus::Canceled => {
                self.ended_at = Some(now);
                self.error = Some(error.unwrap_or_else(|| next.as_str().to_string()));
            }
            TaskStatus::Pending => {}
        }
        true
    }

    /// Request that reproduces this task's inputs, used for retry-as-new-task.
    pub fn to_request(&self) -> TaskRequest {
        TaskRequest {
            source_id: self.source_id.clone(),
            output: self.output.clone(),
            parameters: self
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
            headers: self.headers.clone(),
        }
    }
}

/// Caller-supplied task descriptor. Parameters are raw JSON until validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub source_id: String,
    #[serde(default)]
    pub output: OutputTarget,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub headers: Headers,
}

impl TaskRequest {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Default::default()
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .insert(crate::fetch::header_key(name), value.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output.dir = Some(dir.into());
        self
    }
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::pending("demo", OutputTarget::default(), BTreeMap::new(), Headers::new())
    }

    #[test]
    fn completed_sets_progress_to_100() {
        let mut t = task();
        assert!(t.transition(TaskStatus::Running, None));
        assert!(t.started_at.is_some());
        t.progress = 42.0;
        assert!(t.transition(TaskStatus::Completed, None));
        assert_eq!(t.progress, PROGRESS_COMPLETE);
        assert!(t.ended_at.is_some());
        assert!(t.error.is_none());
    }

    #[test]
    fn failed_keeps_progress_and_records_error() {
        let mut t = task();
        t.transition(TaskStatus::Running, None);
        t.progress = 30.0;
        assert!(t.transition(TaskStatus::Failed, Some("boom".into())));
        assert_eq!(t.progress, 30.0);
        assert_eq!(t.error.as_deref(), Some("boom"));
    }

    #[test]
    fn illegal_transition_leaves_task_untouched() {
        let mut t = task();
        t.transition(TaskStatus::Canceled, Some("Task canceled".into()));
        let before = t.clone();
        assert!(!t.transition(TaskStatus::Running, None));
        assert_eq!(t, before);
        assert!(t.started_at.is_none());
    }

    #[test]
    fn task_json_uses_camel_case() {
        let t = task();
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["sourceId"], "demo");
        assert_eq!(json["status"], "pending");
        assert!(json.get("startedAt").is_none());
        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn to_request_carries_parameters() {
        let mut t = task();
        t.parameters.insert("pages".into(), ParamValue::Int(3));
        let req = t.to_request();
        assert_eq!(req.source_id, "demo");
        assert_eq!(req.parameters["pages"], serde_json::json!(3));
    }
}
