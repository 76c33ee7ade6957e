//! `gatherer run` – run one source and follow it to completion.

use anyhow::{bail, Result};
use gatherer_core::config::EngineConfig;
use gatherer_core::events::{EngineEvent, EventStream, ItemState};
use gatherer_core::task::OutputTarget;
use gatherer_core::{Engine, TaskId, TaskRequest, TaskStatus};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::open_engine;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub source: String,
    pub params: BTreeMap<String, serde_json::Value>,
    pub headers: Vec<(String, String)>,
    pub output_dir: Option<PathBuf>,
    pub group: Option<String>,
    pub workers: Option<usize>,
    pub downloads: Option<usize>,
}

impl RunOptions {
    fn request(&self) -> TaskRequest {
        let mut req = TaskRequest::new(self.source.clone());
        req.parameters = self.params.clone();
        req.output = OutputTarget {
            dir: self.output_dir.clone(),
            group_id: self.group.clone(),
        };
        for (name, value) in &self.headers {
            req = req.header(name, value.clone());
        }
        req
    }
}

pub fn run_source(mut cfg: EngineConfig, opts: RunOptions) -> Result<()> {
    if let Some(workers) = opts.workers {
        cfg.task_workers = workers;
    }
    if let Some(downloads) = opts.downloads {
        cfg.max_concurrent_downloads = downloads;
    }
    let engine = open_engine(cfg)?;
    let events = engine.subscribe();

    let restored = engine.restore_pending_tasks()?;
    if restored > 0 {
        println!("Resuming {} unfinished task(s) from a previous run.", restored);
    }
    let id = engine.submit_task(opts.request())?;
    println!("Task {} submitted ({}).", id, opts.source);
    follow(&engine, &events, &id)
}

/// Print progress and log lines for `id` until it is terminal, let other
/// tasks of this engine finish, then report the outcome.
pub(super) fn follow(engine: &Engine, events: &EventStream, id: &TaskId) -> Result<()> {
    while let Some(event) = events.recv() {
        if event.task_id() != id {
            continue;
        }
        match event {
            EngineEvent::TaskProgress { progress, .. } => println!("  {:5.1}%", progress),
            EngineEvent::TaskLog { level, message, .. } => {
                println!("  [{}] {}", format!("{:?}", level).to_lowercase(), message)
            }
            EngineEvent::DownloadState {
                url,
                state: ItemState::Stored,
                ..
            } => println!("  + {}", url),
            EngineEvent::TaskStatus { status, .. } if status.is_terminal() => break,
            EngineEvent::TaskStatus { .. }
            | EngineEvent::TaskError { .. }
            | EngineEvent::DownloadState { .. } => {}
        }
    }

    while engine.running_count() + engine.pending_count() > 0 {
        let _ = events.recv_timeout(Duration::from_millis(200));
    }

    let task = engine.get_task(id)?;
    println!(
        "Task {} {}: {} stored, {} duplicate(s), {} failed.",
        id, task.status, task.items.stored, task.items.duplicates, task.items.failed
    );
    if task.crash_snapshot.is_some() {
        println!("A crash snapshot was recorded; see `gatherer show {}`.", id);
    }
    if task.status != TaskStatus::Completed {
        bail!(
            "task {} {}: {}",
            id,
            task.status,
            task.error.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}
