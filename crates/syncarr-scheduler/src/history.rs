// SPDX-License-Identifier: GPL-3.0-or-later
//! Task lifecycle signals and the execution-history recorder that observes them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use syncarr_infrastructure::millis::{from_millis, opt_from_millis, opt_to_millis, to_millis};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::task::{TaskId, TaskRecord, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSignal {
    Enqueued,
    Executing,
    Complete,
    Error,
    Retrying,
    /// Exceeded its run time
    Interrupted,
    /// Aborted while draining for shutdown
    Canceled,
    Revoked,
    /// The claim was lost to another worker before settling
    Locked,
    Expired,
}

impl TaskSignal {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Executing => "executing",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Retrying => "retrying",
            Self::Interrupted => "interrupted",
            Self::Canceled => "canceled",
            Self::Revoked => "revoked",
            Self::Locked => "locked",
            Self::Expired => "expired",
        }
    }

    /// Signals that close an execution span.
    pub fn ends_span(&self) -> bool {
        matches!(
            self,
            Self::Interrupted
                | Self::Canceled
                | Self::Locked
                | Self::Error
                | Self::Retrying
                | Self::Complete
        )
    }
}

impl fmt::Display for TaskSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives every task transition.
#[async_trait]
pub trait TaskObserver: Send + Sync {
    async fn on_signal(&self, signal: TaskSignal, task: &TaskRecord, error: Option<&str>) -> Result<()>;
}

/// An ordered list of observers. Failures are logged and never propagate.
#[derive(Clone, Default)]
pub struct Observers {
    observers: Vec<Arc<dyn TaskObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub async fn emit(&self, signal: TaskSignal, task: &TaskRecord, error: Option<&str>) {
        for observer in &self.observers {
            if let Err(err) = observer.on_signal(signal, task, error).await {
                warn!(
                    target: "observers",
                    task_id = %task.id,
                    %signal,
                    error = %err,
                    "task observer failed"
                );
            }
        }
    }
}

/// In-progress history of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub task_id: TaskId,
    pub task_name: String,
    pub queue: String,
    pub verbose_name: Option<String>,
    pub attempts: u32,
    pub elapsed_secs: f64,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Latest timestamp of each signal
    pub signals: BTreeMap<String, DateTime<Utc>>,
    /// Start of the execution span not yet added to `elapsed_secs`
    #[serde(default)]
    pub open_span: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    pub fn new(task: &TaskRecord) -> Self {
        Self {
            task_id: task.id,
            task_name: task.task_name.clone(),
            queue: task.queue.clone(),
            verbose_name: task.verbose_name.clone(),
            attempts: 0,
            elapsed_secs: 0.0,
            scheduled_at: Some(task.run_at),
            started_at: None,
            failed_at: None,
            last_error: None,
            signals: BTreeMap::new(),
            open_span: None,
        }
    }

    pub fn signal_at(&self, signal: TaskSignal) -> Option<DateTime<Utc>> {
        self.signals.get(signal.as_str()).copied()
    }
}

/// A finalized history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedTask {
    pub entry: HistoryEntry,
    pub finished_at: DateTime<Utc>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn load_state(&self, id: TaskId) -> Result<Option<HistoryEntry>>;
    async fn save_state(&self, entry: &HistoryEntry) -> Result<()>;
    async fn clear_state(&self, id: TaskId) -> Result<()>;
    async fn finalize(&self, entry: &HistoryEntry, finished_at: DateTime<Utc>) -> Result<()>;
    async fn get_finished(&self, id: TaskId) -> Result<Option<FinishedTask>>;
    /// Delete finalized rows and stale accumulators older than `before`.
    async fn purge_before(&self, before: DateTime<Utc>) -> Result<u64>;
}

pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn load_state(&self, id: TaskId) -> Result<Option<HistoryEntry>> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM task_history_state WHERE task_id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn save_state(&self, entry: &HistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_history_state (task_id, data, updated_at) VALUES (?, ?, ?)
            ON CONFLICT (task_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.task_id.to_string())
        .bind(serde_json::to_string(entry)?)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_state(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM task_history_state WHERE task_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finalize(&self, entry: &HistoryEntry, finished_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO task_history (
                task_id, task_name, queue, verbose_name, attempts, elapsed_secs, scheduled_at,
                started_at, finished_at, failed_at, last_error, signals
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.task_id.to_string())
        .bind(&entry.task_name)
        .bind(&entry.queue)
        .bind(&entry.verbose_name)
        .bind(i64::from(entry.attempts))
        .bind(entry.elapsed_secs)
        .bind(opt_to_millis(entry.scheduled_at))
        .bind(opt_to_millis(entry.started_at))
        .bind(to_millis(finished_at))
        .bind(opt_to_millis(entry.failed_at))
        .bind(&entry.last_error)
        .bind(serde_json::to_string(&entry.signals)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_finished(&self, id: TaskId) -> Result<Option<FinishedTask>> {
        let row = sqlx::query("SELECT * FROM task_history WHERE task_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_finished(&r)).transpose()
    }

    async fn purge_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let cutoff = to_millis(before);
        let finished = sqlx::query("DELETE FROM task_history WHERE finished_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let stale = sqlx::query("DELETE FROM task_history_state WHERE updated_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(finished.rows_affected() + stale.rows_affected())
    }
}

fn row_to_finished(row: &SqliteRow) -> Result<FinishedTask> {
    let task_id: String = row.try_get("task_id")?;
    let attempts: i64 = row.try_get("attempts")?;
    let signals: String = row.try_get("signals")?;
    Ok(FinishedTask {
        entry: HistoryEntry {
            task_id: TaskId::from_uuid(Uuid::parse_str(&task_id)?),
            task_name: row.try_get("task_name")?,
            queue: row.try_get("queue")?,
            verbose_name: row.try_get("verbose_name")?,
            attempts: u32::try_from(attempts)?,
            elapsed_secs: row.try_get("elapsed_secs")?,
            scheduled_at: opt_from_millis(row.try_get("scheduled_at")?)?,
            started_at: opt_from_millis(row.try_get("started_at")?)?,
            failed_at: opt_from_millis(row.try_get("failed_at")?)?,
            last_error: row.try_get("last_error")?,
            signals: serde_json::from_str(&signals)?,
            open_span: None,
        },
        finished_at: from_millis(row.try_get("finished_at")?)?,
    })
}

/// Accumulates per-task execution history from lifecycle signals.
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
    cache: Mutex<HashMap<TaskId, HistoryEntry>>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn cached(&self, id: TaskId) -> Option<HistoryEntry> {
        self.cache.lock().await.get(&id).cloned()
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[async_trait]
impl TaskObserver for HistoryRecorder {
    async fn on_signal(&self, signal: TaskSignal, task: &TaskRecord, error: Option<&str>) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let mut entry = match cache.remove(&task.id) {
            Some(entry) => entry,
            None => match self.store.load_state(task.id).await? {
                Some(entry) => entry,
                None => HistoryEntry::new(task),
            },
        };

        let now = Utc::now();
        if signal.ends_span() {
            if let Some(started) = entry.open_span.take() {
                let span = (now - started).num_milliseconds().max(0) as f64 / 1000.0;
                entry.elapsed_secs += span;
            }
        }
        match signal {
            TaskSignal::Executing => {
                entry.attempts += 1;
                entry.open_span = Some(now);
                entry.started_at.get_or_insert(now);
            }
            TaskSignal::Error | TaskSignal::Interrupted => {
                entry.failed_at = Some(now);
            }
            _ => {}
        }
        entry.signals.insert(signal.as_str().to_string(), now);
        if let Some(error) = error {
            entry.last_error = Some(error.to_string());
        }
        if entry.verbose_name.is_none() {
            entry.verbose_name = task.verbose_name.clone();
        }

        let finished = match signal {
            TaskSignal::Complete | TaskSignal::Revoked | TaskSignal::Expired => true,
            TaskSignal::Error => task.state == TaskState::FailedPermanent,
            _ => false,
        };
        if finished {
            self.store.finalize(&entry, now).await?;
            debug!(target: "history", task_id = %task.id, %signal, elapsed = entry.elapsed_secs, "task history finalized");
        }

        if signal == TaskSignal::Complete {
            self.store.clear_state(task.id).await?;
        } else {
            self.store.save_state(&entry).await?;
            // Only executing tasks stay cached; the rest reload from the store
            if !finished && entry.open_span.is_some() {
                cache.insert(task.id, entry);
            }
        }
        Ok(())
    }
}
