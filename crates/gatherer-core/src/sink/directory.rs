//! Directory-backed sink: one file per item, deduplicated by fingerprint.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::naming::{filename_for, sanitize_filename, unique_path_except};
use super::{CollectionSink, ItemAdded, ItemMetadata, StoredItem};
use crate::download::sha256_path;
use crate::error::EngineError;
use crate::task::TaskId;

/// Temporary file suffix used before the atomic rename.
const PART_SUFFIX: &str = ".part";

pub struct DirectorySink {
    default_dir: PathBuf,
    index: Mutex<Index>,
}

#[derive(Default)]
struct Index {
    known: HashMap<String, PathBuf>,
    /// Fingerprints and final paths of writes in progress.
    writing: HashSet<String>,
    claimed: HashSet<PathBuf>,
}

impl Index {
    fn release(&mut self, fingerprint: &str, path: &Path) {
        self.writing.remove(fingerprint);
        self.claimed.remove(path);
    }
}

/// `.part` file removed on drop unless committed.
struct PartFile {
    path: PathBuf,
    committed: bool,
}

impl PartFile {
    fn for_target(target: &Path) -> Self {
        let mut path = target.to_path_buf().into_os_string();
        path.push(PART_SUFFIX);
        Self {
            path: PathBuf::from(path),
            committed: false,
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), EngineError> {
        fs::write(&self.path, bytes)
            .map_err(|e| EngineError::io(format!("write {}", self.path.display()), e))
    }

    fn commit(mut self, target: &Path) -> Result<(), EngineError> {
        fs::rename(&self.path, target).map_err(|e| {
            EngineError::io(
                format!("rename {} to {}", self.path.display(), target.display()),
                e,
            )
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl DirectorySink {
    /// Items for tasks without an output directory go to `default_dir`.
    pub fn new(default_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_dir: default_dir.into(),
            index: Mutex::new(Index::default()),
        }
    }

    /// Fingerprint every file already under `dir` (recursively) so re-runs
    /// report duplicates instead of storing copies. Returns the number indexed.
    pub fn index_existing(&self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }
        let mut stack = vec![dir.to_path_buf()];
        let mut found = Vec::new();
        while let Some(current) = stack.pop() {
            for entry in fs::read_dir(&current)? {
                let path = entry?.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().and_then(|e| e.to_str()) != Some("part") {
                    found.push((sha256_path(&path)?, path));
                }
            }
        }
        let count = found.len();
        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        for (fp, path) in found {
            index.known.entry(fp).or_insert(path);
        }
        tracing::debug!(dir = %dir.display(), count, "indexed existing items");
        Ok(count)
    }

    fn target_dir(&self, meta: &ItemMetadata) -> PathBuf {
        let base = meta
            .output
            .dir
            .clone()
            .unwrap_or_else(|| self.default_dir.clone());
        match meta.output.group_id.as_deref().map(sanitize_filename) {
            Some(group) if !group.is_empty() => base.join(group),
            _ => base,
        }
    }

    fn write_item(&self, dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), EngineError> {
        fs::create_dir_all(dir)
            .map_err(|e| EngineError::io(format!("create {}", dir.display()), e))?;
        let part = PartFile::for_target(target);
        part.write(bytes)?;
        part.commit(target)
    }
}

impl CollectionSink for DirectorySink {
    fn is_known(&self, fingerprint: &str) -> bool {
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .known
            .contains_key(fingerprint)
    }

    fn add_item(
        &self,
        task_id: &TaskId,
        bytes: &[u8],
        source_url: &str,
        meta: &ItemMetadata,
    ) -> Result<ItemAdded, EngineError> {
        let dir = self.target_dir(meta);
        // Reserve the fingerprint and the file name; the write runs unlocked.
        let final_path = {
            let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
            if index.known.contains_key(&meta.fingerprint)
                || index.writing.contains(&meta.fingerprint)
            {
                return Ok(ItemAdded::Duplicate);
            }
            let name = filename_for(source_url, bytes);
            let path = unique_path_except(&dir, &name, |p| index.claimed.contains(p));
            index.writing.insert(meta.fingerprint.clone());
            index.claimed.insert(path.clone());
            path
        };

        let written = self.write_item(&dir, &final_path, bytes);
        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        index.release(&meta.fingerprint, &final_path);
        written?;
        index
            .known
            .insert(meta.fingerprint.clone(), final_path.clone());
        drop(index);

        tracing::debug!(task = %task_id, url = source_url, path = %final_path.display(), "stored item");
        Ok(ItemAdded::Stored(StoredItem {
            location: final_path.display().to_string(),
            fingerprint: meta.fingerprint.clone(),
            size: bytes.len() as u64,
        }))
    }
}
