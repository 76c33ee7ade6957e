//! Event/Progress Bus.
//!
//! Fan-out of engine events to any number of subscribers. Publishing never
//! blocks the worker: each subscriber has its own unbounded channel and
//! subscribers whose receiver is gone are pruned on the next publish.
//!
//! Progress is coalesced per task to at most one event per interval. Values
//! that arrive inside the interval replace a pending value, which is sent by
//! the next publish after the interval or flushed before the terminal status.
//! Status, error, log and download-state events are never dropped.

mod gate;

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId, TaskStatus, PROGRESS_COMPLETE};
use gate::ProgressGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Where one item download stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// Waiting for a download slot.
    Queued,
    Downloading,
    Stored,
    Duplicate,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    TaskStatus {
        task_id: TaskId,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ended_at: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TaskProgress { task_id: TaskId, progress: f64 },
    #[serde(rename_all = "camelCase")]
    TaskError { task_id: TaskId, error: String },
    #[serde(rename_all = "camelCase")]
    TaskLog {
        task_id: TaskId,
        level: LogLevel,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    DownloadState {
        task_id: TaskId,
        source_id: String,
        url: String,
        state: ItemState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl EngineEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            EngineEvent::TaskStatus { task_id, .. }
            | EngineEvent::TaskProgress { task_id, .. }
            | EngineEvent::TaskError { task_id, .. }
            | EngineEvent::TaskLog { task_id, .. }
            | EngineEvent::DownloadState { task_id, .. } => task_id,
        }
    }
}

pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
    gates: Mutex<HashMap<TaskId, ProgressGate>>,
    interval: Duration,
}

impl EventBus {
    pub fn new(progress_interval: Duration) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
            interval: progress_interval,
        }
    }

    /// New subscriber; sees events published from now on.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        EventStream { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Publish a status change. A terminal status first flushes any coalesced
    /// progress (and `100` for `completed`), then the status, then for failed
    /// and canceled tasks a `task-error`.
    pub fn publish_status(&self, task: &Task) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        if task.status.is_terminal() {
            let mut gate = gates.remove(&task.id).unwrap_or_default();
            if let Some(progress) = gate.take_pending() {
                self.send(EngineEvent::TaskProgress {
                    task_id: task.id.clone(),
                    progress,
                });
            }
            if task.status == TaskStatus::Completed && gate.last_sent() < PROGRESS_COMPLETE {
                self.send(EngineEvent::TaskProgress {
                    task_id: task.id.clone(),
                    progress: PROGRESS_COMPLETE,
                });
            }
        }
        self.send(EngineEvent::TaskStatus {
            task_id: task.id.clone(),
            status: task.status,
            started_at: task.started_at,
            ended_at: task.ended_at,
            error: task.error.clone(),
        });
        if matches!(task.status, TaskStatus::Failed | TaskStatus::Canceled) {
            self.send(EngineEvent::TaskError {
                task_id: task.id.clone(),
                error: task
                    .error
                    .clone()
                    .unwrap_or_else(|| task.status.as_str().to_string()),
            });
        }
    }

    /// Offer a progress value. Non-increasing values are dropped.
    pub fn publish_progress(&self, task_id: &TaskId, progress: f64) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        let gate = gates.entry(task_id.clone()).or_default();
        if let Some(progress) = gate.offer(progress, self.interval) {
            self.send(EngineEvent::TaskProgress {
                task_id: task_id.clone(),
                progress,
            });
        }
    }

    pub fn publish_log(&self, task_id: &TaskId, level: LogLevel, message: impl Into<String>) {
        self.send(EngineEvent::TaskLog {
            task_id: task_id.clone(),
            level,
            message: message.into(),
        });
    }

    pub fn publish_download(
        &self,
        task_id: &TaskId,
        source_id: &str,
        url: &str,
        state: ItemState,
        error: Option<String>,
    ) {
        self.send(EngineEvent::DownloadState {
            task_id: task_id.clone(),
            source_id: source_id.to_string(),
            url: url.to_string(),
            state,
            error,
        });
    }

    fn send(&self, event: EngineEvent) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Receiving end of one subscription.
pub struct EventStream {
    rx: Receiver<EngineEvent>,
}

impl EventStream {
    /// Block for the next event. None once the bus is gone.
    pub fn recv(&self) -> Option<EngineEvent> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(ev) => Some(ev),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything already queued, without blocking.
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.rx.try_iter().collect()
    }
}

impl Iterator for EventStream {
    type Item = EngineEvent;

    fn next(&mut self) -> Option<EngineEvent> {
        self.recv()
    }
}
