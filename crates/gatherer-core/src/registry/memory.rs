use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{SourceDefinition, SourceRegistry};
use crate::error::EngineError;

/// Registry of sources defined in code.
#[derive(Default)]
pub struct MemoryRegistry {
    sources: RwLock<BTreeMap<String, SourceDefinition>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, def: SourceDefinition) -> Self {
        self.insert(def);
        self
    }

    /// Add or replace a source. Later resolutions see the new definition.
    pub fn insert(&self, def: SourceDefinition) {
        self.sources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(def.id.clone(), def);
    }

    pub fn remove(&self, source_id: &str) -> Option<SourceDefinition> {
        self.sources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(source_id)
    }
}

impl SourceRegistry for MemoryRegistry {
    fn resolve(&self, source_id: &str) -> Result<SourceDefinition, EngineError> {
        self.sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(source_id)
            .cloned()
            .ok_or_else(|| EngineError::Config(format!("unknown source '{}'", source_id)))
    }

    fn list(&self) -> Result<Vec<SourceDefinition>, EngineError> {
        Ok(self
            .sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }
}
