//! In-memory table of live tasks backed by the Task Store.
//!
//! Readers (status polling) take the read lock; each task is only written by
//! the submitting caller, by `cancel_task` while it is pending, and by the one
//! worker running it. Transitions are persisted; progress ticks are not.
//! Store writes happen under the write lock so they land in the order they
//! were made. A task leaves memory once its terminal state is persisted;
//! lookups fall back to the store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{CrashSnapshot, ItemCounts, Task, TaskId, TaskStatus};
use crate::error::EngineError;
use crate::store::TaskStore;

pub struct TaskTable {
    tasks: RwLock<HashMap<TaskId, Task>>,
    store: Arc<dyn TaskStore>,
}

/// Which counter a finished download bumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Stored,
    Duplicate,
    Failed,
}

impl TaskTable {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Persist and track a new task. Store failures are returned: a task that
    /// could not be recorded is never enqueued.
    pub fn insert(&self, task: Task) -> Result<(), EngineError> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        self.store.persist(&task)?;
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Snapshot of a task, falling back to the store for finished tasks and
    /// tasks of earlier runs.
    pub fn get(&self, id: &TaskId) -> Result<Option<Task>, EngineError> {
        if let Some(task) = self
            .tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
        {
            return Ok(Some(task.clone()));
        }
        self.store.load(id)
    }

    /// True while the task is pending or running in this engine.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.tasks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// All tasks known to the store, with live in-memory state taking precedence.
    pub fn list(&self) -> Result<Vec<Task>, EngineError> {
        let mut stored = self.store.list()?;
        let live = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        for task in stored.iter_mut() {
            if let Some(current) = live.get(&task.id) {
                *task = current.clone();
            }
        }
        for (id, task) in live.iter() {
            if !stored.iter().any(|t| &t.id == id) {
                stored.push(task.clone());
            }
        }
        Ok(stored)
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|t| t.status == status)
            .count()
    }

    /// Apply a state-machine transition and persist it.
    /// Returns the updated snapshot, or None when the transition is not allowed
    /// (e.g. the task was canceled while a worker was picking it up).
    pub fn transition(
        &self,
        id: &TaskId,
        next: TaskStatus,
        error: Option<String>,
    ) -> Result<Option<Task>, EngineError> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let Some(task) = tasks.get_mut(id) else {
            return match self.store.load(id)? {
                Some(stored) if stored.status.is_terminal() => Ok(None),
                _ => Err(EngineError::TaskNotFound(id.clone())),
            };
        };
        if !task.transition(next, error) {
            return Ok(None);
        }
        let snapshot = task.clone();
        self.settle(&mut tasks, &snapshot);
        Ok(Some(snapshot))
    }

    /// Record a new progress value. The caller has already clamped it.
    pub fn set_progress(&self, id: &TaskId, progress: f64) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = tasks.get_mut(id) {
            if task.status == TaskStatus::Running && progress > task.progress {
                task.progress = progress;
            }
        }
    }

    pub fn record_item(&self, id: &TaskId, kind: ItemKind) -> Option<ItemCounts> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let task = tasks.get_mut(id)?;
        match kind {
            ItemKind::Stored => task.items.stored += 1,
            ItemKind::Duplicate => task.items.duplicates += 1,
            ItemKind::Failed => task.items.failed += 1,
        }
        Some(task.items)
    }

    pub fn set_crash_snapshot(&self, id: &TaskId, snapshot: CrashSnapshot) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let Some(task) = tasks.get_mut(id) else {
            return;
        };
        task.crash_snapshot = Some(snapshot);
        let updated = task.clone();
        self.settle(&mut tasks, &updated);
    }

    /// Mark a task's crash snapshot as seen. Works for tasks of earlier runs too.
    pub fn acknowledge_crash_snapshot(&self, id: &TaskId) -> Result<(), EngineError> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let mut task = match tasks.get(id) {
            Some(task) => task.clone(),
            None => self
                .store
                .load(id)?
                .ok_or_else(|| EngineError::TaskNotFound(id.clone()))?,
        };
        if let Some(snapshot) = task.crash_snapshot.as_mut() {
            snapshot.acknowledged = true;
        }
        self.store.persist(&task)?;
        if let Some(live) = tasks.get_mut(id) {
            if task.status.is_terminal() {
                tasks.remove(id);
            } else {
                *live = task;
            }
        }
        Ok(())
    }

    /// Re-admit a task loaded from the store (restore after restart, or a
    /// cancel of a task that was never restored).
    pub fn adopt(&self, task: Task) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        self.persist(&task);
        tasks.insert(task.id.clone(), task);
    }

    /// Persist `task` with the write lock held; a persisted terminal task
    /// leaves memory.
    fn settle(&self, tasks: &mut HashMap<TaskId, Task>, task: &Task) {
        if self.persist(task) && task.status.is_terminal() {
            tasks.remove(&task.id);
        }
    }

    fn persist(&self, task: &Task) -> bool {
        match self.store.persist(task) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(task = %task.id, "failed to persist task: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Headers;
    use crate::store::MemoryTaskStore;
    use crate::task::OutputTarget;
    use std::collections::BTreeMap;

    fn table() -> (TaskTable, Arc<MemoryTaskStore>) {
        let store = Arc::new(MemoryTaskStore::new());
        (TaskTable::new(store.clone()), store)
    }

    fn pending() -> Task {
        Task::pending("demo", OutputTarget::default(), BTreeMap::new(), Headers::new())
    }

    #[test]
    fn transitions_are_persisted() {
        let (table, store) = table();
        let task = pending();
        let id = task.id.clone();
        table.insert(task).unwrap();
        let running = table.transition(&id, TaskStatus::Running, None).unwrap();
        assert!(running.is_some());
        assert_eq!(
            store.load(&id).unwrap().unwrap().status,
            TaskStatus::Running
        );
    }

    #[test]
    fn rejected_transition_returns_none() {
        let (table, _) = table();
        let task = pending();
        let id = task.id.clone();
        table.insert(task).unwrap();
        table
            .transition(&id, TaskStatus::Canceled, Some("Task canceled".into()))
            .unwrap();
        assert!(table
            .transition(&id, TaskStatus::Running, None)
            .unwrap()
            .is_none());
        assert_eq!(
            table.get(&id).unwrap().unwrap().status,
            TaskStatus::Canceled
        );
    }

    #[test]
    fn unknown_task_is_not_found() {
        let (table, _) = table();
        let err = table
            .transition(&TaskId::new(), TaskStatus::Running, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound(_)));
    }

    #[test]
    fn progress_only_moves_forward_while_running() {
        let (table, _) = table();
        let task = pending();
        let id = task.id.clone();
        table.insert(task).unwrap();
        table.set_progress(&id, 10.0);
        assert_eq!(table.get(&id).unwrap().unwrap().progress, 0.0);
        table.transition(&id, TaskStatus::Running, None).unwrap();
        table.set_progress(&id, 10.0);
        table.set_progress(&id, 5.0);
        assert_eq!(table.get(&id).unwrap().unwrap().progress, 10.0);
    }

    #[test]
    fn finished_tasks_leave_memory_but_stay_readable() {
        let (table, store) = table();
        let task = pending();
        let id = task.id.clone();
        table.insert(task).unwrap();
        table.transition(&id, TaskStatus::Running, None).unwrap();
        table.record_item(&id, ItemKind::Stored);
        table.transition(&id, TaskStatus::Completed, None).unwrap();

        assert!(!table.contains(&id));
        assert_eq!(table.live_count(), 0);
        let finished = table.get(&id).unwrap().unwrap();
        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.items.stored, 1);
        assert_eq!(store.load(&id).unwrap().unwrap(), finished);
        assert_eq!(table.list().unwrap(), vec![finished]);
    }

    #[test]
    fn acknowledge_then_finish_keeps_both_writes() {
        let (table, store) = table();
        let task = pending();
        let id = task.id.clone();
        table.insert(task).unwrap();
        table.transition(&id, TaskStatus::Running, None).unwrap();
        table.set_crash_snapshot(
            &id,
            CrashSnapshot {
                blob: "{}".into(),
                captured_at: 1,
                acknowledged: false,
            },
        );
        table.acknowledge_crash_snapshot(&id).unwrap();
        assert!(table.contains(&id));
        table
            .transition(&id, TaskStatus::Failed, Some("boom".into()))
            .unwrap();

        let stored = store.load(&id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.crash_snapshot.unwrap().acknowledged);
    }

    #[test]
    fn acknowledge_reaches_store_only_tasks() {
        let (table, store) = table();
        let mut task = pending();
        task.crash_snapshot = Some(CrashSnapshot {
            blob: "{}".into(),
            captured_at: 1,
            acknowledged: false,
        });
        store.persist(&task).unwrap();
        table.acknowledge_crash_snapshot(&task.id).unwrap();
        let loaded = store.load(&task.id).unwrap().unwrap();
        assert!(loaded.crash_snapshot.unwrap().acknowledged);
    }
}
