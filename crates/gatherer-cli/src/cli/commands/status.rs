//! `gatherer status` – show status of all tasks.

use anyhow::Result;
use gatherer_core::store::{SqliteTaskStore, TaskStore};

pub fn run_status() -> Result<()> {
    let store = SqliteTaskStore::open_default()?;
    let tasks = store.list()?;
    if tasks.is_empty() {
        println!("No tasks in database.");
        return Ok(());
    }
    println!(
        "{:<36} {:<10} {:>6} {:>7} {:<5} {}",
        "ID", "STATUS", "PROG", "ITEMS", "CRASH", "SOURCE"
    );
    for t in tasks {
        let crash = match &t.crash_snapshot {
            Some(s) if !s.acknowledged => "new",
            Some(_) => "ack",
            None => "-",
        };
        println!(
            "{:<36} {:<10} {:>5.1}% {:>7} {:<5} {}",
            t.id.as_str(),
            t.status.as_str(),
            t.progress,
            t.items.stored,
            crash,
            t.source_id
        );
    }
    Ok(())
}
