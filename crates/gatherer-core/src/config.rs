use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Valid range for the global download ceiling.
pub const MIN_DOWNLOADS: usize = 1;
pub const MAX_DOWNLOADS: usize = 10;

/// Backoff parameters for page fetches and image downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 0.5,
            max_delay_secs: 5.0,
        }
    }
}

/// Resource ceilings applied to every script interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Maximum interpreter operations per run (0 = unlimited).
    pub max_operations: u64,
    /// Maximum function call nesting.
    pub max_call_levels: usize,
    /// Maximum length of a single string value, in bytes.
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    /// Wall-clock limit for one script run. None = no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
            max_string_size: 16 * 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 100_000,
            timeout_secs: None,
        }
    }
}

/// Engine configuration loaded from `~/.config/gatherer/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Size of the task worker pool (tasks running at once).
    pub task_workers: usize,
    /// Global ceiling on in-flight image downloads, clamped to 1..=10.
    pub max_concurrent_downloads: usize,
    /// Extra attempts per fetch after the first one fails transiently.
    pub network_retry_count: u32,
    /// Minimum spacing between progress events for one task.
    pub progress_interval_ms: u64,
    /// Download attempts a single task may make before the script is stopped.
    pub max_items_per_task: usize,
    /// Fail a task whose every attempted download failed.
    pub fail_when_all_items_fail: bool,
    /// Total time allowed for one HTTP request.
    pub request_timeout_secs: u64,
    /// Largest response body accepted, in bytes.
    pub max_response_bytes: u64,
    pub user_agent: String,
    /// Where items go when a task names no output directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Directory holding one sub-directory per collection source.
    #[serde(default)]
    pub sources_dir: Option<PathBuf>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_workers: 10,
            max_concurrent_downloads: 3,
            network_retry_count: 2,
            progress_interval_ms: 100,
            max_items_per_task: 10_000,
            fail_when_all_items_fail: true,
            request_timeout_secs: 120,
            max_response_bytes: 64 * 1024 * 1024,
            user_agent: format!("gatherer/{}", env!("CARGO_PKG_VERSION")),
            output_dir: None,
            sources_dir: None,
            retry: RetryConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

/// Longest backoff a config file can ask for.
pub const MAX_BACKOFF_SECS: f64 = 3600.0;

/// Seconds from the config file as a duration in `0..=MAX_BACKOFF_SECS`;
/// NaN counts as zero.
fn backoff_duration(secs: f64) -> Duration {
    if secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs.clamp(0.0, MAX_BACKOFF_SECS))
}

impl EngineConfig {
    /// Download ceiling after clamping to the valid range.
    pub fn download_limit(&self) -> usize {
        clamp_downloads(self.max_concurrent_downloads)
    }

    pub fn worker_count(&self) -> usize {
        self.task_workers.max(1)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Retry policy for one fetch: the first attempt plus `network_retry_count` retries.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.network_retry_count.saturating_add(1),
            base_delay: backoff_duration(self.retry.base_delay_secs),
            max_delay: backoff_duration(self.retry.max_delay_secs),
        }
    }

    /// Output directory, falling back to `$XDG_DATA_HOME/gatherer/images`.
    pub fn resolved_output_dir(&self) -> Result<PathBuf> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let xdg_dirs = xdg::BaseDirectories::with_prefix("gatherer")?;
                Ok(xdg_dirs.get_data_home().join("gatherer").join("images"))
            }
        }
    }

    /// Sources directory, falling back to `$XDG_DATA_HOME/gatherer/sources`.
    pub fn resolved_sources_dir(&self) -> Result<PathBuf> {
        match &self.sources_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let xdg_dirs = xdg::BaseDirectories::with_prefix("gatherer")?;
                Ok(xdg_dirs.get_data_home().join("gatherer").join("sources"))
            }
        }
    }
}

pub fn clamp_downloads(m: usize) -> usize {
    m.clamp(MIN_DOWNLOADS, MAX_DOWNLOADS)
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("gatherer")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}
