//! Sources on disk: `<root>/<id>/source.toml` plus the script it names.
//!
//! ```toml
//! name = "Example gallery"
//! base_url = "https://example.com/"
//! script = "crawl.rhai"          # default
//!
//! [[parameters]]
//! key = "pages"
//! type = "int"
//! min = 1
//! default = 3
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::{SourceDefinition, SourceRegistry};
use crate::error::EngineError;
use crate::params::ParamDecl;

pub const MANIFEST_FILE: &str = "source.toml";
const DEFAULT_SCRIPT: &str = "crawl.rhai";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    parameters: Vec<ParamDecl>,
}

pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn source_dir(&self, source_id: &str) -> Result<PathBuf, EngineError> {
        let valid = !source_id.is_empty()
            && !source_id.starts_with('.')
            && !source_id.contains(['/', '\\'])
            && !source_id.contains("..");
        if !valid {
            return Err(EngineError::Config(format!("invalid source id '{}'", source_id)));
        }
        Ok(self.root.join(source_id))
    }
}

impl SourceRegistry for DirectoryRegistry {
    fn resolve(&self, source_id: &str) -> Result<SourceDefinition, EngineError> {
        let dir = self.source_dir(source_id)?;
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(EngineError::Config(format!("unknown source '{}'", source_id)));
        }
        let text = fs::read_to_string(&manifest_path)
            .map_err(|e| EngineError::io(format!("reading {}", manifest_path.display()), e))?;
        let manifest: Manifest = toml::from_str(&text).map_err(|e| {
            EngineError::Config(format!("{}: {}", manifest_path.display(), e))
        })?;

        let script_name = manifest.script.as_deref().unwrap_or(DEFAULT_SCRIPT);
        if Path::new(script_name).components().count() != 1 {
            return Err(EngineError::Config(format!(
                "source '{}': script must be a file name inside the source folder",
                source_id
            )));
        }
        let script_path = dir.join(script_name);
        let script = fs::read_to_string(&script_path).map_err(|e| {
            EngineError::Config(format!(
                "source '{}': cannot read {}: {}",
                source_id,
                script_path.display(),
                e
            ))
        })?;

        Ok(SourceDefinition {
            id: source_id.to_string(),
            name: manifest.name.unwrap_or_else(|| source_id.to_string()),
            base_url: manifest.base_url,
            parameters: manifest.parameters,
            script,
        })
    }

    fn list(&self) -> Result<Vec<SourceDefinition>, EngineError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EngineError::io(format!("reading {}", self.root.display()), e))
            }
        };
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            let Some(id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match self.resolve(id) {
                Ok(def) => out.push(def),
                Err(e) => tracing::warn!("skipping source {}: {}", path.display(), e),
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}
