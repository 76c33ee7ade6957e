//! `HostApi` for a running task: page stack, downloads, progress, headers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::api::{HostApi, LogLevel, TextMatch};
use crate::cancel::CancellationToken;
use crate::download::{
    self, ArchiveKind, DownloadOutcome, DownloadOwner, DownloadQueue, DownloadRequest,
};
use crate::error::EngineError;
use crate::events::EventBus;
use crate::fetch::{header_key, Fetcher, Headers};
use crate::navigation::{self, PageStack};
use crate::retry::RetryPolicy;
use crate::sink::CollectionSink;
use crate::task::{clamp_progress, ItemKind, OutputTarget, TaskTable};

/// Engine-wide services a task host borrows.
#[derive(Clone)]
pub struct HostServices {
    pub downloads: Arc<DownloadQueue>,
    pub sink: Arc<dyn CollectionSink>,
    pub fetcher: Arc<dyn Fetcher>,
    pub tasks: Arc<TaskTable>,
    pub events: Arc<EventBus>,
    /// Retry policy for page fetches (not slot-limited).
    pub page_policy: RetryPolicy,
    /// Download attempts allowed per task.
    pub max_items: usize,
}

pub struct TaskHost {
    services: HostServices,
    owner: DownloadOwner,
    output: OutputTarget,
    cancel: CancellationToken,
    headers: Headers,
    pages: PageStack,
    progress: f64,
    attempts: usize,
}

impl TaskHost {
    pub fn new(
        services: HostServices,
        owner: DownloadOwner,
        output: OutputTarget,
        headers: Headers,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            services,
            owner,
            output,
            cancel,
            headers,
            pages: PageStack::new(),
            progress: 0.0,
            attempts: 0,
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn page_depth(&self) -> usize {
        self.pages.depth()
    }

    fn top_content(&self) -> Result<&str, EngineError> {
        self.pages
            .top()
            .map(|f| f.content.as_str())
            .ok_or_else(|| EngineError::Navigation("no page loaded".into()))
    }

    fn count_attempt(&mut self) -> Result<(), EngineError> {
        if self.attempts >= self.services.max_items {
            return Err(EngineError::Script(format!(
                "item limit of {} reached",
                self.services.max_items
            )));
        }
        self.attempts += 1;
        Ok(())
    }

    fn request<'a>(&'a self, url: &'a str) -> DownloadRequest<'a> {
        DownloadRequest {
            owner: &self.owner,
            url,
            headers: &self.headers,
            output: &self.output,
            cancel: &self.cancel,
        }
    }

    /// Count the outcome against the task. True for stored and duplicate items.
    fn record(&self, outcome: &DownloadOutcome) -> bool {
        let (kind, ok) = match outcome {
            DownloadOutcome::Stored(_) => (ItemKind::Stored, true),
            DownloadOutcome::Duplicate => (ItemKind::Duplicate, true),
            DownloadOutcome::Failed(e) => {
                self.warn(&format!("download failed: {}", e));
                (ItemKind::Failed, false)
            }
        };
        self.services.tasks.record_item(&self.owner.task_id, kind);
        ok
    }

    fn warn(&self, message: &str) {
        tracing::warn!(task = %self.owner.task_id, "script: {}", message);
        self.services
            .events
            .publish_log(&self.owner.task_id, LogLevel::Warn, message);
    }

    fn load(&mut self, url: &str) -> Result<(), EngineError> {
        let target = self.pages.resolve(url);
        let frame = navigation::fetch_page(
            self.services.fetcher.as_ref(),
            &target,
            &self.headers,
            &self.services.page_policy,
            &self.cancel,
        )?;
        tracing::debug!(task = %self.owner.task_id, url = %frame.url, "page loaded");
        self.pages.push(frame);
        Ok(())
    }
}

fn folder_path(folder_url: &str) -> Result<PathBuf, EngineError> {
    if folder_url.starts_with("file:") {
        url::Url::parse(folder_url)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| EngineError::Script(format!("'{}' is not a local folder URL", folder_url)))
    } else {
        Ok(PathBuf::from(folder_url))
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

fn collect_files(
    dir: &Path,
    extensions: &[String],
    recursive: bool,
    cancel: &CancellationToken,
    out: &mut Vec<PathBuf>,
) -> Result<(), EngineError> {
    cancel.check()?;
    let entries = std::fs::read_dir(dir)
        .map_err(|e| EngineError::io(format!("listing {}", dir.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::io(format!("listing {}", dir.display()), e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| EngineError::io(format!("reading {}", path.display()), e))?;
        if file_type.is_dir() {
            if recursive {
                collect_files(&path, extensions, recursive, cancel, out)?;
            }
        } else if has_extension(&path, extensions) {
            out.push(path);
        }
    }
    Ok(())
}

impl HostApi for TaskHost {
    fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        self.load(url)
    }

    fn fetch_json(&mut self, url: &str) -> Result<serde_json::Value, EngineError> {
        self.load(url)?;
        let content = self.top_content()?;
        serde_json::from_str(content).map_err(|e| {
            EngineError::Script(format!("invalid JSON from {}: {}", url, e))
        })
    }

    fn back(&mut self) -> Result<(), EngineError> {
        self.pages
            .pop()
            .map(|_| ())
            .ok_or_else(|| EngineError::Navigation("back() with an empty page stack".into()))
    }

    fn current_url(&self) -> Result<String, EngineError> {
        self.pages
            .top()
            .map(|f| f.url.clone())
            .ok_or_else(|| EngineError::Navigation("no page loaded".into()))
    }

    fn current_content(&self) -> Result<String, EngineError> {
        self.top_content().map(str::to_string)
    }

    fn query(&self, selector: &str) -> Result<Vec<String>, EngineError> {
        navigation::query(self.top_content()?, selector)
    }

    fn get_attribute(&self, selector: &str, name: &str) -> Result<Vec<String>, EngineError> {
        navigation::get_attribute(self.top_content()?, selector, name)
    }

    fn find_by_text(&self, text: &str, selector: &str) -> Result<Vec<String>, EngineError> {
        navigation::find_by_text(self.top_content()?, text, selector)
    }

    fn query_by_text(&self, text: &str) -> Result<Vec<TextMatch>, EngineError> {
        Ok(navigation::query_by_text(self.top_content()?, text))
    }

    fn resolve(&self, relative: &str) -> String {
        self.pages.resolve(relative)
    }

    fn is_image_url(&self, url: &str) -> bool {
        download::is_image_url(url)
    }

    fn download_image(&mut self, url: &str) -> Result<bool, EngineError> {
        self.cancel.check()?;
        self.count_attempt()?;
        let target = self.pages.resolve(url);
        let outcome = self
            .services
            .downloads
            .download_image(&self.request(&target), self.services.sink.as_ref())?;
        let ok = self.record(&outcome);
        self.cancel.check()?;
        Ok(ok)
    }

    fn download_archive(&mut self, url: &str, kind: &str) -> Result<usize, EngineError> {
        self.cancel.check()?;
        let target = self.pages.resolve(url);
        let kind = ArchiveKind::resolve(kind, &target)?;
        self.count_attempt()?;
        let outcomes = self.services.downloads.download_archive(
            &self.request(&target),
            kind,
            self.services.sink.as_ref(),
        )?;
        let collected = outcomes.iter().filter(|o| self.record(o)).count();
        self.cancel.check()?;
        Ok(collected)
    }

    fn add_progress(&mut self, delta: f64) -> Result<(), EngineError> {
        self.cancel.check()?;
        let next = clamp_progress(self.progress, delta);
        if next > self.progress {
            self.progress = next;
            self.services.tasks.set_progress(&self.owner.task_id, next);
            self.services.events.publish_progress(&self.owner.task_id, next);
        }
        Ok(())
    }

    fn list_local_files(
        &mut self,
        folder_url: &str,
        extensions: &[String],
        recursive: bool,
    ) -> Result<Vec<String>, EngineError> {
        self.cancel.check()?;
        let root = folder_path(folder_url)?;
        let mut files = Vec::new();
        collect_files(&root, extensions, recursive, &self.cancel, &mut files)?;
        files.sort();
        self.cancel.check()?;
        Ok(files
            .iter()
            .filter_map(|p| url::Url::from_file_path(p).ok())
            .map(|u| u.to_string())
            .collect())
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(header_key(name), value.to_string());
    }

    fn delete_header(&mut self, name: &str) {
        self.headers.remove(&header_key(name));
    }

    fn log(&mut self, level: LogLevel, message: &str) {
        let task = &self.owner.task_id;
        match level {
            LogLevel::Debug => tracing::debug!(task = %task, "script: {}", message),
            LogLevel::Info => tracing::info!(task = %task, "script: {}", message),
            LogLevel::Warn => tracing::warn!(task = %task, "script: {}", message),
            LogLevel::Error => tracing::error!(task = %task, "script: {}", message),
        }
        self.services.events.publish_log(task, level, message);
    }
}

#[cfg(test)]
mod tests;
