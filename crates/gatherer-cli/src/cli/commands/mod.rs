//! CLI command handlers, one file per command.

mod ack;
mod completions;
mod fingerprint;
mod manpage;
mod retry;
mod run;
mod show;
mod sources;
mod status;

pub use ack::run_ack;
pub use completions::run_completions;
pub use fingerprint::run_fingerprint;
pub use manpage::run_manpage;
pub use retry::run_retry;
pub use run::{run_source, RunOptions};
pub use show::run_show;
pub use sources::run_sources;
pub use status::run_status;

use anyhow::{Context, Result};
use gatherer_core::config::EngineConfig;
use gatherer_core::fetch::{CurlFetcher, CurlOptions};
use gatherer_core::registry::DirectoryRegistry;
use gatherer_core::sink::DirectorySink;
use gatherer_core::store::SqliteTaskStore;
use gatherer_core::{Collaborators, Engine};
use std::sync::Arc;

/// Engine wired to the on-disk collaborators: SQLite store, output
/// directory sink (indexed for dedup), sources directory and curl.
fn open_engine(cfg: EngineConfig) -> Result<Engine> {
    let output_dir = cfg.resolved_output_dir()?;
    let sink = DirectorySink::new(&output_dir);
    let indexed = sink
        .index_existing(&output_dir)
        .with_context(|| format!("indexing {}", output_dir.display()))?;
    tracing::debug!("indexed {} existing item(s)", indexed);

    let collaborators = Collaborators {
        store: Arc::new(SqliteTaskStore::open_default().context("opening task store")?),
        sink: Arc::new(sink),
        registry: Arc::new(DirectoryRegistry::new(cfg.resolved_sources_dir()?)),
        fetcher: Arc::new(CurlFetcher::new(CurlOptions::from_config(&cfg))),
    };
    Ok(Engine::init(cfg, collaborators)?)
}
