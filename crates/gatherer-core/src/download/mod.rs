//! Bounded Download Queue.
//!
//! Caps how many image downloads are in flight across all tasks (independent
//! of how many tasks run), retries transient failures while holding the slot,
//! and short-circuits items whose fingerprint the sink already knows.

mod active;
mod archive;
mod fingerprint;
mod slot;
mod sniff;

pub use active::{ActiveDownload, ActiveDownloads, DownloadState};
pub use archive::{entry_url, extract_images, ArchiveEntry, ArchiveKind, MAX_ENTRY_BYTES};
pub use fingerprint::{sha256_bytes, sha256_path};
pub use slot::{SlotPool, WAIT_SLICE};
pub use sniff::{detect_format, is_image_url, looks_like_image, ImageFormat};

use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::events::{EventBus, ItemState};
use crate::fetch::{FetchResponse, Fetcher, Headers};
use crate::retry::{run_with_retry, FetchError, RetryPolicy};
use crate::sink::{CollectionSink, ItemAdded, ItemMetadata, StoredItem};
use crate::task::{now_millis, OutputTarget, TaskId};

/// Scoped slot: frees the slot and drops the `ActiveDownload` entry on every exit path.
pub struct SlotGuard {
    slots: Arc<SlotPool>,
    active: Arc<ActiveDownloads>,
    key: u64,
}

impl SlotGuard {
    fn mark_downloading(&self) {
        self.active.set_state(self.key, DownloadState::Downloading);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active.remove(self.key);
        self.slots.release();
    }
}

/// Which task a download belongs to.
#[derive(Debug, Clone)]
pub struct DownloadOwner {
    pub task_id: TaskId,
    pub source_id: String,
}

/// Everything `download_image` needs for one item.
pub struct DownloadRequest<'a> {
    pub owner: &'a DownloadOwner,
    pub url: &'a str,
    pub headers: &'a Headers,
    pub output: &'a OutputTarget,
    pub cancel: &'a CancellationToken,
}

/// Body of a successful image fetch.
#[derive(Debug, Clone)]
pub struct FetchedItem {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub final_url: String,
}

/// Result of one `download_image` call. None of these is an error for the task.
#[derive(Debug)]
pub enum DownloadOutcome {
    Stored(StoredItem),
    /// Fingerprint already collected; nothing persisted.
    Duplicate,
    /// Network failure after retries, non-image payload, or sink I/O failure.
    Failed(EngineError),
}

fn image_only(resp: &FetchResponse) -> Result<(), FetchError> {
    let mime = resp.mime();
    if looks_like_image(&resp.body, mime.as_deref()) {
        Ok(())
    } else {
        Err(FetchError::NotAnImage {
            content_type: resp.content_type.clone(),
        })
    }
}

pub struct DownloadQueue {
    slots: Arc<SlotPool>,
    active: Arc<ActiveDownloads>,
    fetcher: Arc<dyn Fetcher>,
    policy: RetryPolicy,
    events: Option<Arc<EventBus>>,
}

impl DownloadQueue {
    pub fn new(limit: usize, fetcher: Arc<dyn Fetcher>, policy: RetryPolicy) -> Self {
        Self {
            slots: Arc::new(SlotPool::new(limit)),
            active: Arc::new(ActiveDownloads::default()),
            fetcher,
            policy,
            events: None,
        }
    }

    /// Publish a `download-state` event for every step of every item.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn report(&self, req: &DownloadRequest<'_>, url: &str, state: ItemState, error: Option<String>) {
        if let Some(events) = &self.events {
            events.publish_download(&req.owner.task_id, &req.owner.source_id, url, state, error);
        }
    }

    fn report_outcome(&self, req: &DownloadRequest<'_>, url: &str, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Stored(_) => self.report(req, url, ItemState::Stored, None),
            DownloadOutcome::Duplicate => self.report(req, url, ItemState::Duplicate, None),
            DownloadOutcome::Failed(e) => {
                self.report(req, url, ItemState::Failed, Some(e.to_string()))
            }
        }
    }

    /// Block until fewer than `M` downloads are active, then register the
    /// download as `queued`. Returns `EngineError::Canceled` instead of a slot
    /// if `cancel` is set while waiting.
    pub fn acquire_slot(
        &self,
        owner: &DownloadOwner,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<SlotGuard, EngineError> {
        self.slots.reserve(cancel)?;
        let key = self.active.insert(ActiveDownload {
            url: url.to_string(),
            source_id: owner.source_id.clone(),
            task_id: owner.task_id.clone(),
            state: DownloadState::Queued,
            started_at: now_millis(),
        });
        Ok(SlotGuard {
            slots: Arc::clone(&self.slots),
            active: Arc::clone(&self.active),
            key,
        })
    }

    /// Fetch `url` while holding `guard`. Transient failures are retried up
    /// to `retry_budget` times; 4xx, empty and unaccepted bodies fail at once.
    fn fetch(
        &self,
        url: &str,
        headers: &Headers,
        guard: &SlotGuard,
        retry_budget: u32,
        cancel: &CancellationToken,
        accept: impl Fn(&FetchResponse) -> Result<(), FetchError>,
    ) -> Result<FetchedItem, FetchError> {
        guard.mark_downloading();
        let policy = self.policy.with_retry_budget(retry_budget);
        run_with_retry(&policy, cancel, |_| {
            let resp = self.fetcher.get(url, headers)?;
            if resp.body.is_empty() {
                return Err(FetchError::Empty);
            }
            accept(&resp)?;
            let content_type = resp.mime();
            Ok(FetchedItem {
                bytes: resp.body,
                content_type,
                final_url: resp.final_url,
            })
        })
    }

    /// Slot, fetch with retries, release. `Err` only for cancellation, which
    /// wins over a fetch failure that happened while it was being set.
    fn fetch_in_slot(
        &self,
        req: &DownloadRequest<'_>,
        accept: impl Fn(&FetchResponse) -> Result<(), FetchError>,
    ) -> Result<Result<FetchedItem, FetchError>, EngineError> {
        let guard = self.acquire_slot(req.owner, req.url, req.cancel)?;
        req.cancel.check()?;
        self.report(req, req.url, ItemState::Downloading, None);
        let fetched = self.fetch(
            req.url,
            req.headers,
            &guard,
            self.policy.max_attempts.saturating_sub(1),
            req.cancel,
            accept,
        );
        drop(guard);
        req.cancel.check()?;
        Ok(fetched)
    }

    /// Acquire a slot, fetch, release, fingerprint, and hand new items to `sink`.
    /// `Err` only for cancellation; every other failure is `DownloadOutcome::Failed`.
    pub fn download_image(
        &self,
        req: &DownloadRequest<'_>,
        sink: &dyn CollectionSink,
    ) -> Result<DownloadOutcome, EngineError> {
        req.cancel.check()?;
        self.report(req, req.url, ItemState::Queued, None);
        let fetched = match self.fetch_in_slot(req, image_only) {
            Ok(fetched) => fetched,
            Err(e) => {
                self.report(req, req.url, ItemState::Canceled, None);
                return Err(e);
            }
        };

        let outcome = match fetched {
            Ok(item) => self.keep(req, req.url, item.bytes, item.content_type, sink),
            Err(source) => {
                tracing::debug!(task = %req.owner.task_id, url = req.url, "download failed: {}", source);
                DownloadOutcome::Failed(EngineError::Network {
                    url: req.url.to_string(),
                    source,
                })
            }
        };
        self.report_outcome(req, req.url, &outcome);
        Ok(outcome)
    }

    /// Fetch an archive under one slot and collect every image inside it.
    /// Returns one outcome per image entry, or a single `Failed` when the
    /// archive itself cannot be fetched or read.
    pub fn download_archive(
        &self,
        req: &DownloadRequest<'_>,
        kind: ArchiveKind,
        sink: &dyn CollectionSink,
    ) -> Result<Vec<DownloadOutcome>, EngineError> {
        req.cancel.check()?;
        self.report(req, req.url, ItemState::Queued, None);
        let fetched = match self.fetch_in_slot(req, |_| Ok(())) {
            Ok(fetched) => fetched,
            Err(e) => {
                self.report(req, req.url, ItemState::Canceled, None);
                return Err(e);
            }
        };
        let archive = match fetched {
            Ok(item) => item,
            Err(source) => {
                let outcome = DownloadOutcome::Failed(EngineError::Network {
                    url: req.url.to_string(),
                    source,
                });
                self.report_outcome(req, req.url, &outcome);
                return Ok(vec![outcome]);
            }
        };

        let entries = match kind {
            ArchiveKind::Zip => extract_images(req.url, &archive.bytes, req.cancel),
        };
        let entries = match entries {
            Ok(entries) => entries,
            Err(e) if e.is_canceled() => {
                self.report(req, req.url, ItemState::Canceled, None);
                return Err(e);
            }
            Err(e) => {
                tracing::debug!(task = %req.owner.task_id, url = req.url, "unreadable archive: {}", e);
                let outcome = DownloadOutcome::Failed(e);
                self.report_outcome(req, req.url, &outcome);
                return Ok(vec![outcome]);
            }
        };
        tracing::debug!(task = %req.owner.task_id, url = req.url, "archive holds {} image(s)", entries.len());

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            req.cancel.check()?;
            let url = entry_url(req.url, &entry.name);
            let content_type = detect_format(&entry.bytes).map(|f| f.mime().to_string());
            let outcome = self.keep(req, &url, entry.bytes, content_type, sink);
            self.report_outcome(req, &url, &outcome);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Fingerprint `bytes` and store them unless the sink already has them.
    fn keep(
        &self,
        req: &DownloadRequest<'_>,
        url: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        sink: &dyn CollectionSink,
    ) -> DownloadOutcome {
        let fingerprint = sha256_bytes(&bytes);
        if sink.is_known(&fingerprint) {
            tracing::debug!(task = %req.owner.task_id, url, "duplicate item {}", fingerprint);
            return DownloadOutcome::Duplicate;
        }
        let meta = ItemMetadata {
            source_id: req.owner.source_id.clone(),
            fingerprint,
            content_type,
            output: req.output.clone(),
        };
        match sink.add_item(&req.owner.task_id, &bytes, url, &meta) {
            Ok(ItemAdded::Stored(stored)) => DownloadOutcome::Stored(stored),
            Ok(ItemAdded::Duplicate) => DownloadOutcome::Duplicate,
            Err(e) => {
                tracing::warn!(task = %req.owner.task_id, url, "failed to store item: {}", e);
                DownloadOutcome::Failed(e)
            }
        }
    }

    pub fn list_active_downloads(&self) -> Vec<ActiveDownload> {
        self.active.snapshot()
    }

    /// Change the download ceiling at runtime. Returns the clamped value.
    pub fn set_concurrency(&self, m: usize) -> usize {
        let applied = self.slots.set_limit(m);
        tracing::info!("download concurrency set to {}", applied);
        applied
    }

    pub fn concurrency(&self) -> usize {
        self.slots.limit()
    }

    pub fn in_flight(&self) -> usize {
        self.slots.in_use()
    }
}
