//! `gatherer sources` – list sources in the sources directory.

use anyhow::Result;
use gatherer_core::config::EngineConfig;
use gatherer_core::registry::{DirectoryRegistry, SourceRegistry};

pub fn run_sources(cfg: &EngineConfig) -> Result<()> {
    let registry = DirectoryRegistry::new(cfg.resolved_sources_dir()?);
    let sources = registry.list()?;
    if sources.is_empty() {
        println!("No sources in {}.", registry.root().display());
        return Ok(());
    }
    for s in sources {
        let params: Vec<_> = s
            .parameters
            .iter()
            .map(|p| format!("{}:{}", p.key, p.spec.type_name()))
            .collect();
        println!("{:<20} {:<30} {}", s.id, s.name, params.join(" "));
    }
    Ok(())
}
