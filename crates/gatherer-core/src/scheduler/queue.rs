//! FIFO of pending task ids shared by the worker pool.

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

use crate::task::TaskId;

#[derive(Default)]
struct State {
    items: VecDeque<TaskId>,
    closed: bool,
}

#[derive(Default)]
pub(super) struct PendingQueue {
    state: Mutex<State>,
    ready: Condvar,
}

impl PendingQueue {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Returns false once the queue is closed.
    pub(super) fn push(&self, id: TaskId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return false;
        }
        state.items.push_back(id);
        self.ready.notify_one();
        true
    }

    /// Block for the oldest id. None once the queue is closed; ids still
    /// queued at that point stay pending.
    pub(super) fn pop_blocking(&self) -> Option<TaskId> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if state.closed {
                return None;
            }
            if let Some(id) = state.items.pop_front() {
                return Some(id);
            }
            state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub(super) fn remove(&self, id: &TaskId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let before = state.items.len();
        state.items.retain(|queued| queued != id);
        state.items.len() != before
    }

    pub(super) fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        self.ready.notify_all();
    }

    /// Ids waiting right now.
    pub(super) fn snapshot(&self) -> HashSet<TaskId> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .iter()
            .cloned()
            .collect()
    }

    pub(super) fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_and_remove() {
        let q = PendingQueue::new();
        let (a, b, c) = (TaskId::new(), TaskId::new(), TaskId::new());
        q.push(a.clone());
        q.push(b.clone());
        q.push(c.clone());
        assert!(q.remove(&b));
        assert!(!q.remove(&b));
        assert_eq!(q.snapshot(), HashSet::from([a.clone(), c.clone()]));
        assert_eq!(q.pop_blocking(), Some(a));
        assert_eq!(q.pop_blocking(), Some(c));
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn close_wakes_blocked_workers() {
        let q = Arc::new(PendingQueue::new());
        let worker = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.pop_blocking())
        };
        std::thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(worker.join().unwrap(), None);
        assert!(!q.push(TaskId::new()));
    }
}
