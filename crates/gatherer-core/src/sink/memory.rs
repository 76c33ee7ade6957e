//! In-memory sink for embedding and tests.

use std::collections::HashSet;
use std::sync::Mutex;

use super::{CollectionSink, ItemAdded, ItemMetadata, StoredItem};
use crate::error::EngineError;
use crate::task::TaskId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedItem {
    pub task_id: TaskId,
    pub source_url: String,
    pub fingerprint: String,
    pub size: usize,
}

#[derive(Default)]
struct Inner {
    known: HashSet<String>,
    items: Vec<RecordedItem>,
}

#[derive(Default)]
pub struct MemorySink {
    inner: Mutex<Inner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend these fingerprints were collected earlier.
    pub fn with_known<I: IntoIterator<Item = String>>(fingerprints: I) -> Self {
        let sink = Self::new();
        sink.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .known
            .extend(fingerprints);
        sink
    }

    pub fn items(&self) -> Vec<RecordedItem> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .clone()
    }

    pub fn items_for(&self, task_id: &TaskId) -> Vec<RecordedItem> {
        self.items()
            .into_iter()
            .filter(|i| &i.task_id == task_id)
            .collect()
    }
}

impl CollectionSink for MemorySink {
    fn is_known(&self, fingerprint: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .known
            .contains(fingerprint)
    }

    fn add_item(
        &self,
        task_id: &TaskId,
        bytes: &[u8],
        source_url: &str,
        meta: &ItemMetadata,
    ) -> Result<ItemAdded, EngineError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.known.insert(meta.fingerprint.clone()) {
            return Ok(ItemAdded::Duplicate);
        }
        inner.items.push(RecordedItem {
            task_id: task_id.clone(),
            source_url: source_url.to_string(),
            fingerprint: meta.fingerprint.clone(),
            size: bytes.len(),
        });
        Ok(ItemAdded::Stored(StoredItem {
            location: format!("memory:{}", inner.items.len() - 1),
            fingerprint: meta.fingerprint.clone(),
            size: bytes.len() as u64,
        }))
    }
}
