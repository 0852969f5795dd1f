// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub busy_timeout_secs: u64,
    /// Idle pooled connections are closed after this many seconds
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://syncarr.db".to_string(),
            pool_max_size: 16,
            busy_timeout_secs: 10,
            idle_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4848,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// Direction in which a queue serves task priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriorityOrdering {
    /// Lower values run first ("niceness")
    Ascending,
    /// Higher values run first
    #[default]
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerModel {
    /// Each task runs as its own tokio task
    #[default]
    Async,
    /// Each task runs on a dedicated blocking thread
    Thread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueVerbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

/// Bounds of the jittered idle-poll sleep, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl PollWindow {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn fixed(ms: u64) -> Self {
        Self::new(ms, ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub fast: PollWindow,
    pub slow: PollWindow,
    pub start_fast: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            fast: PollWindow::new(0, 100),
            slow: PollWindow::new(500, 1500),
            start_fast: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    pub workers: usize,
    #[serde(default)]
    pub worker_model: WorkerModel,
    #[serde(default)]
    pub priority_ordering: Option<PriorityOrdering>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub max_run_time_secs: Option<u64>,
    #[serde(default)]
    pub verbosity: QueueVerbosity,
}

impl QueueSettings {
    pub fn new(name: impl Into<String>, workers: usize, worker_model: WorkerModel) -> Self {
        Self {
            name: name.into(),
            workers,
            worker_model,
            priority_ordering: None,
            max_attempts: None,
            max_run_time_secs: None,
            verbosity: QueueVerbosity::Normal,
        }
    }
}

fn default_queues() -> Vec<QueueSettings> {
    vec![
        QueueSettings::new("database", 1, WorkerModel::Async),
        QueueSettings::new("filesystem", 2, WorkerModel::Thread),
        // Rate-sensitive remote indexing: one at a time
        QueueSettings::new("limited", 1, WorkerModel::Async),
        QueueSettings::new("network", 2, WorkerModel::Async),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    pub max_attempts: u32,
    pub max_run_time_secs: u64,
    pub completed_retention_days: u32,
    pub priority_ordering: PriorityOrdering,
    pub drain_timeout_secs: u64,
    pub store_retry_max_secs: u64,
    pub housekeeping_interval_secs: u64,
    pub poll: PollConfig,
    pub queues: Vec<QueueSettings>,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            max_run_time_secs: 1800,
            completed_retention_days: 30,
            priority_ordering: PriorityOrdering::Descending,
            drain_timeout_secs: 30,
            store_retry_max_secs: 60,
            housekeeping_interval_secs: 24 * 60 * 60,
            poll: PollConfig::default(),
            queues: default_queues(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadsConfig {
    pub root: PathBuf,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("downloads"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub command: String,
    /// Arguments placed before the generated ones
    pub args: Vec<String>,
    /// Arguments appended to every download invocation
    pub extra_args: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            command: "yt-dlp".to_string(),
            args: Vec::new(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaServerKind {
    Plex,
    Jellyfin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaServerConfig {
    pub name: String,
    pub kind: MediaServerKind,
    pub url: String,
    pub token: String,
    #[serde(default)]
    pub libraries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
    pub tasks: TasksConfig,
    pub downloads: DownloadsConfig,
    pub extractor: ExtractorConfig,
    pub media_servers: Vec<MediaServerConfig>,
}

impl AppConfig {
    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tasks.max_attempts == 0 {
            bail!("tasks.max_attempts must be at least 1");
        }
        if self.tasks.queues.is_empty() {
            bail!("at least one task queue must be configured");
        }
        for (idx, queue) in self.tasks.queues.iter().enumerate() {
            if queue.name.trim().is_empty() {
                bail!("tasks.queues[{}] has an empty name", idx);
            }
            if queue.workers == 0 {
                bail!("queue '{}' must have at least one worker", queue.name);
            }
            if queue.max_attempts == Some(0) {
                bail!("queue '{}' max_attempts must be at least 1", queue.name);
            }
            if self.tasks.queues[..idx].iter().any(|q| q.name == queue.name) {
                bail!("queue '{}' is configured twice", queue.name);
            }
        }
        for window in [self.tasks.poll.fast, self.tasks.poll.slow] {
            if window.min_ms > window.max_ms {
                bail!(
                    "poll window min_ms ({}) exceeds max_ms ({})",
                    window.min_ms,
                    window.max_ms
                );
            }
        }
        Ok(())
    }
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: SYNCARR_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("SYNCARR_").split("__"));

    let config: AppConfig = figment.extract()?;
    config.validate()?;
    info!(target: "config", queues = config.tasks.queues.len(), "configuration loaded");
    Ok(config)
}
