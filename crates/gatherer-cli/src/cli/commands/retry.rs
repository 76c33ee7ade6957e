//! `gatherer retry` – run a finished task again as a new task.

use anyhow::Result;
use gatherer_core::config::EngineConfig;
use gatherer_core::TaskId;

use super::open_engine;
use super::run::follow;

pub fn run_retry(cfg: EngineConfig, id: &str) -> Result<()> {
    let engine = open_engine(cfg)?;
    let events = engine.subscribe();
    let new_id = engine.retry_task(&TaskId::from(id))?;
    println!("Task {} submitted as a retry of {}.", new_id, id);
    follow(&engine, &events, &new_id)
}
