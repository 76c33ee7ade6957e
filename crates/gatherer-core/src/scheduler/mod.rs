//! Task Scheduler: the engine context.
//!
//! Owns the worker pool, the pending queue, the task table, the download
//! queue and the event bus. Everything is reached through an `Engine` value;
//! there is no global state, so several engines can coexist (tests do).

mod queue;
mod run;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::cancel::CancelRegistry;
use crate::config::EngineConfig;
use crate::download::{ActiveDownload, DownloadQueue};
use crate::error::EngineError;
use crate::events::{EventBus, EventStream};
use crate::fetch::{header_key, Fetcher};
use crate::params;
use crate::registry::SourceRegistry;
use crate::sandbox::HostServices;
use crate::sink::CollectionSink;
use crate::store::TaskStore;
use crate::task::{ItemCounts, Task, TaskId, TaskRequest, TaskStatus, TaskTable};
use queue::PendingQueue;

/// External collaborators the engine consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn TaskStore>,
    pub sink: Arc<dyn CollectionSink>,
    pub registry: Arc<dyn SourceRegistry>,
    pub fetcher: Arc<dyn Fetcher>,
}

/// State shared by the engine handle and its workers.
pub(crate) struct Shared {
    config: EngineConfig,
    tasks: Arc<TaskTable>,
    queue: PendingQueue,
    cancels: CancelRegistry,
    /// Set once by `Engine::shutdown`; workers leave later pickups pending.
    stopping: AtomicBool,
    downloads: Arc<DownloadQueue>,
    events: Arc<EventBus>,
    registry: Arc<dyn SourceRegistry>,
    sink: Arc<dyn CollectionSink>,
    fetcher: Arc<dyn Fetcher>,
}

impl Shared {
    fn host_services(&self) -> HostServices {
        HostServices {
            downloads: Arc::clone(&self.downloads),
            sink: Arc::clone(&self.sink),
            fetcher: Arc::clone(&self.fetcher),
            tasks: Arc::clone(&self.tasks),
            events: Arc::clone(&self.events),
            page_policy: self.config.retry_policy(),
            max_items: self.config.max_items_per_task,
        }
    }
}

pub struct Engine {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Start an engine: `config.task_workers` worker threads and a download
    /// queue of `config.max_concurrent_downloads` slots.
    pub fn init(config: EngineConfig, collaborators: Collaborators) -> Result<Self, EngineError> {
        let events = Arc::new(EventBus::new(config.progress_interval()));
        let downloads = Arc::new(
            DownloadQueue::new(
                config.download_limit(),
                Arc::clone(&collaborators.fetcher),
                config.retry_policy(),
            )
            .with_events(Arc::clone(&events)),
        );
        let shared = Arc::new(Shared {
            tasks: Arc::new(TaskTable::new(collaborators.store)),
            queue: PendingQueue::new(),
            cancels: CancelRegistry::new(),
            stopping: AtomicBool::new(false),
            downloads,
            events,
            registry: collaborators.registry,
            sink: collaborators.sink,
            fetcher: collaborators.fetcher,
            config,
        });
        let workers = match worker::spawn_workers(&shared, shared.config.worker_count()) {
            Ok(workers) => workers,
            Err(e) => {
                shared.queue.close();
                return Err(e);
            }
        };
        tracing::info!(
            workers = workers.len(),
            downloads = shared.downloads.concurrency(),
            "engine started"
        );
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Validate and enqueue a task. Returns as soon as it is recorded as
    /// `pending`; a rejected request leaves no record.
    pub fn submit_task(&self, request: TaskRequest) -> Result<TaskId, EngineError> {
        self.ensure_running()?;
        let source = self.shared.registry.resolve(&request.source_id)?;
        let parameters = params::validate(&source.parameters, &request.parameters)?;
        let headers = request
            .headers
            .iter()
            .map(|(name, value)| (header_key(name), value.clone()))
            .collect();
        let task = Task::pending(request.source_id, request.output, parameters, headers);
        self.enqueue(task)
    }

    fn enqueue(&self, task: Task) -> Result<TaskId, EngineError> {
        let id = task.id.clone();
        self.shared.cancels.register(&id);
        if let Err(e) = self.shared.tasks.insert(task.clone()) {
            self.shared.cancels.unregister(&id);
            return Err(e);
        }
        self.shared.events.publish_status(&task);
        if !self.shared.queue.push(id.clone()) {
            return Err(EngineError::ShutDown);
        }
        tracing::info!(task = %id, source = %task.source_id, "task submitted");
        Ok(id)
    }

    /// Request cancellation. A pending task is canceled at once, including one
    /// left pending by an earlier run and not restored yet; a running task
    /// stops at its next cancellation check. Terminal tasks are left as they are.
    pub fn cancel_task(&self, id: &TaskId) -> Result<(), EngineError> {
        let task = self.get_task(id)?;
        if let Some(token) = self.shared.cancels.get(id) {
            token.cancel();
        }
        if task.status != TaskStatus::Pending {
            return Ok(());
        }
        if self.shared.tasks.contains(id) {
            // A task already popped by a worker is finished by that worker.
            if !self.shared.queue.remove(id) {
                return Ok(());
            }
        } else {
            self.shared.tasks.adopt(task);
        }
        if let Some(canceled) =
            self.shared
                .tasks
                .transition(id, TaskStatus::Canceled, Some("Task canceled".into()))?
        {
            self.shared.events.publish_status(&canceled);
            tracing::info!(task = %id, "pending task canceled");
        }
        self.shared.cancels.unregister(id);
        Ok(())
    }

    pub fn get_task(&self, id: &TaskId) -> Result<Task, EngineError> {
        self.shared
            .tasks
            .get(id)?
            .ok_or_else(|| EngineError::TaskNotFound(id.clone()))
    }

    /// Every task in the store, oldest first, with live state for this run's tasks.
    pub fn list_tasks(&self) -> Result<Vec<Task>, EngineError> {
        self.shared.tasks.list()
    }

    pub fn item_counts(&self, id: &TaskId) -> Result<ItemCounts, EngineError> {
        Ok(self.get_task(id)?.items)
    }

    pub fn list_active_downloads(&self) -> Vec<ActiveDownload> {
        self.shared.downloads.list_active_downloads()
    }

    pub fn acknowledge_crash_snapshot(&self, id: &TaskId) -> Result<(), EngineError> {
        self.shared.tasks.acknowledge_crash_snapshot(id)
    }

    /// Submit a new task with the same source, parameters, headers and
    /// output as terminal task `id`. The original record is untouched.
    pub fn retry_task(&self, id: &TaskId) -> Result<TaskId, EngineError> {
        let task = self.get_task(id)?;
        if !task.status.is_terminal() {
            return Err(EngineError::Config(format!(
                "task {} is {}; only finished tasks can be retried",
                id, task.status
            )));
        }
        let new_id = self.submit_task(task.to_request())?;
        tracing::info!(task = %id, retry = %new_id, "task retried");
        Ok(new_id)
    }

    /// Re-enqueue tasks a previous process left `pending` or `running`.
    /// Interrupted running tasks start over from the beginning.
    pub fn restore_pending_tasks(&self) -> Result<usize, EngineError> {
        self.ensure_running()?;
        let mut restored = 0;
        for mut task in self.shared.tasks.store().list()? {
            if self.shared.tasks.contains(&task.id) {
                continue;
            }
            match task.status {
                TaskStatus::Pending => {}
                TaskStatus::Running => {
                    tracing::warn!(task = %task.id, "task was interrupted while running; restarting it");
                    task.status = TaskStatus::Pending;
                    task.started_at = None;
                    task.progress = 0.0;
                    task.error = None;
                    task.items = ItemCounts::default();
                }
                _ => continue,
            }
            let id = task.id.clone();
            self.shared.cancels.register(&id);
            self.shared.tasks.adopt(task.clone());
            self.shared.events.publish_status(&task);
            if !self.shared.queue.push(id) {
                return Err(EngineError::ShutDown);
            }
            restored += 1;
        }
        if restored > 0 {
            tracing::info!("restored {} unfinished task(s)", restored);
        }
        Ok(restored)
    }

    /// Change the global download ceiling. Returns the value applied after clamping.
    pub fn set_download_concurrency(&self, m: usize) -> usize {
        self.shared.downloads.set_concurrency(m)
    }

    pub fn download_concurrency(&self) -> usize {
        self.shared.downloads.concurrency()
    }

    pub fn subscribe(&self) -> EventStream {
        self.shared.events.subscribe()
    }

    pub fn running_count(&self) -> usize {
        self.shared.tasks.count_with_status(TaskStatus::Running)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stop pickup, cancel running tasks and join the workers. Pending tasks
    /// stay pending in the store. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("engine shutting down");
        self.shared.queue.close();
        // Everything registered and no longer queued has been popped by a
        // worker, whether or not it has reached `running` yet.
        let queued = self.shared.queue.snapshot();
        for id in self.shared.cancels.ids() {
            if !queued.contains(&id) {
                self.shared.cancels.cancel(&id);
            }
        }
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("task worker panicked");
            }
        }
        tracing::info!("engine stopped");
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.shared.stopping.load(Ordering::Acquire) {
            Err(EngineError::ShutDown)
        } else {
            Ok(())
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
