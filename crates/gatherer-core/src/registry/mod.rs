//! Source Registry: maps a source id to its collection script and parameter schema.

mod directory;
mod memory;

pub use directory::{DirectoryRegistry, MANIFEST_FILE};
pub use memory::MemoryRegistry;

use serde::Serialize;

use crate::error::EngineError;
use crate::params::ParamDecl;

/// A resolved collection source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDefinition {
    pub id: String,
    pub name: String,
    /// Injected into the script as `base_url` unless a parameter shadows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub parameters: Vec<ParamDecl>,
    #[serde(skip)]
    pub script: String,
}

impl SourceDefinition {
    pub fn new(id: impl Into<String>, script: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_url: None,
            parameters: Vec::new(),
            script: script.into(),
        }
    }

    pub fn with_param(mut self, decl: ParamDecl) -> Self {
        self.parameters.push(decl);
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

pub trait SourceRegistry: Send + Sync {
    /// Unknown ids are `EngineError::Config`.
    fn resolve(&self, source_id: &str) -> Result<SourceDefinition, EngineError>;

    /// Every resolvable source, sorted by id.
    fn list(&self) -> Result<Vec<SourceDefinition>, EngineError>;
}
