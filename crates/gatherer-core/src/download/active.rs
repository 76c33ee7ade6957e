//! Registry of downloads currently holding a slot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    /// Slot held, request not started yet.
    Queued,
    Downloading,
}

/// Ephemeral record of an in-flight fetch. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDownload {
    pub url: String,
    pub source_id: String,
    pub task_id: TaskId,
    pub state: DownloadState,
    pub started_at: u64,
}

#[derive(Debug, Default)]
pub struct ActiveDownloads {
    next_key: AtomicU64,
    entries: Mutex<BTreeMap<u64, ActiveDownload>>,
}

impl ActiveDownloads {
    pub fn insert(&self, entry: ActiveDownload) -> u64 {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, entry);
        key
    }

    pub fn set_state(&self, key: u64, state: DownloadState) {
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&key)
        {
            entry.state = state;
        }
    }

    pub fn remove(&self, key: u64) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    /// Entries in slot acquisition order.
    pub fn snapshot(&self) -> Vec<ActiveDownload> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
