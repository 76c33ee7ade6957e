//! Fingerprint command: the SHA-256 used to recognize already-collected items.

use anyhow::Result;
use gatherer_core::download::sha256_path;
use std::path::Path;

pub fn run_fingerprint(path: &Path) -> Result<()> {
    let digest = sha256_path(path)?;
    println!("{}  {}", digest, path.display());
    Ok(())
}
