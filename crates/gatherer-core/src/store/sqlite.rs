//! SQLite-backed task store (sqlx).
//!
//! The engine is thread-based, so the store owns a small tokio runtime and
//! blocks on it for each call. Callers must not be inside a tokio runtime.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

use super::TaskStore;
use crate::error::EngineError;
use crate::task::{now_millis, Task, TaskId};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
pub(super) fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the task database.
///
/// The default file lives under the XDG state directory:
/// `~/.local/state/gatherer/tasks.db`.
pub struct SqliteTaskStore {
    pool: Pool<Sqlite>,
    runtime: tokio::runtime::Runtime,
}

impl SqliteTaskStore {
    /// Open (or create) the default task database.
    pub fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("gatherer")?;
        let db_path = xdg_dirs.get_state_home().join("gatherer").join("tasks.db");
        Self::open_at(db_path)
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        Self::connect(&uri, 4)
    }

    /// In-memory database; one connection so every call sees the same data.
    pub fn open_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1)
    }

    fn connect(uri: &str, max_connections: u32) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("gatherer-store")
            .enable_all()
            .build()
            .context("building task store runtime")?;
        let pool = runtime.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect(uri)
                .await
        })?;
        let store = SqliteTaskStore { pool, runtime };
        store.runtime.block_on(store.migrate())?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        // `task_json` is the full record; the other columns exist for
        // inspection with the sqlite3 shell and for ordering.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source_id TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                submitted_at INTEGER NOT NULL,
                started_at INTEGER,
                ended_at INTEGER,
                error TEXT,
                task_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert(&self, task: &Task) -> Result<()> {
        let task_json = serde_json::to_string(task)?;
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, source_id, status, progress, submitted_at,
                started_at, ended_at, error, task_json, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                source_id = excluded.source_id,
                status = excluded.status,
                progress = excluded.progress,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                error = excluded.error,
                task_json = excluded.task_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(task.id.as_str())
        .bind(&task.source_id)
        .bind(task.status.as_str())
        .bind(task.progress)
        .bind(task.submitted_at as i64)
        .bind(task.started_at.map(|t| t as i64))
        .bind(task.ended_at.map(|t| t as i64))
        .bind(&task.error)
        .bind(task_json)
        .bind(now_millis() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_one(&self, id: &TaskId) -> Result<Option<Task>> {
        let row = sqlx::query(r#"SELECT task_json FROM tasks WHERE id = ?1"#)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let json: String = row.get("task_json");
        let task = serde_json::from_str(&json).with_context(|| format!("decoding task {}", id))?;
        Ok(Some(task))
    }

    async fn fetch_all(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(r#"SELECT id, task_json FROM tasks ORDER BY seq ASC"#)
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let json: String = row.get("task_json");
            match serde_json::from_str::<Task>(&json) {
                Ok(task) => out.push(task),
                Err(e) => tracing::warn!(task = %id, "skipping undecodable task record: {}", e),
            }
        }
        Ok(out)
    }
}

impl TaskStore for SqliteTaskStore {
    fn persist(&self, task: &Task) -> Result<(), EngineError> {
        self.runtime
            .block_on(self.upsert(task))
            .map_err(EngineError::store)
    }

    fn load(&self, id: &TaskId) -> Result<Option<Task>, EngineError> {
        self.runtime
            .block_on(self.fetch_one(id))
            .map_err(EngineError::store)
    }

    fn list(&self) -> Result<Vec<Task>, EngineError> {
        self.runtime
            .block_on(self.fetch_all())
            .map_err(EngineError::store)
    }
}

impl Drop for SqliteTaskStore {
    fn drop(&mut self) {
        self.runtime.block_on(self.pool.close());
    }
}
