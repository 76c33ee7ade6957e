//! `gatherer show` – one task in detail.

use anyhow::{Context, Result};
use gatherer_core::store::{SqliteTaskStore, TaskStore};
use gatherer_core::TaskId;

pub fn run_show(id: &str) -> Result<()> {
    let store = SqliteTaskStore::open_default()?;
    let id = TaskId::from(id);
    let task = store
        .load(&id)?
        .with_context(|| format!("task not found: {}", id))?;

    println!("Task:      {}", task.id);
    println!("Source:    {}", task.source_id);
    println!("Status:    {}", task.status);
    println!("Progress:  {:.1}%", task.progress);
    println!(
        "Items:     {} stored, {} duplicate(s), {} failed",
        task.items.stored, task.items.duplicates, task.items.failed
    );
    if let Some(dir) = &task.output.dir {
        println!("Output:    {}", dir.display());
    }
    if let Some(group) = &task.output.group_id {
        println!("Group:     {}", group);
    }
    for (key, value) in &task.parameters {
        println!("Param:     {} = {}", key, value);
    }
    for name in task.headers.keys() {
        println!("Header:    {}", name);
    }
    if let Some(error) = &task.error {
        println!("Error:     {}", error);
    }
    if let Some(snapshot) = &task.crash_snapshot {
        println!(
            "Crash snapshot ({}):",
            if snapshot.acknowledged { "acknowledged" } else { "not acknowledged" }
        );
        match serde_json::from_str::<serde_json::Value>(&snapshot.blob) {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            Err(_) => println!("{}", snapshot.blob),
        }
    }
    Ok(())
}
