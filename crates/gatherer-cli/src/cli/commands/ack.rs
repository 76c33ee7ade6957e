//! `gatherer ack` – acknowledge a crash snapshot.

use anyhow::Result;
use gatherer_core::config::EngineConfig;
use gatherer_core::TaskId;

use super::open_engine;

pub fn run_ack(mut cfg: EngineConfig, id: &str) -> Result<()> {
    cfg.task_workers = 1;
    let engine = open_engine(cfg)?;
    let id = TaskId::from(id);
    engine.acknowledge_crash_snapshot(&id)?;
    match engine.get_task(&id)?.crash_snapshot {
        Some(_) => println!("Crash snapshot of task {} acknowledged.", id),
        None => println!("Task {} has no crash snapshot.", id),
    }
    Ok(())
}
