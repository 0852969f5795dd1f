// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backoff::default_backoff;
use crate::error::TaskError;
use crate::handle::SchedulerHandle;
use crate::task::{TaskId, TaskRecord};

/// Represents the execution context for a job
#[derive(Clone)]
pub struct JobContext {
    pub task_id: TaskId,
    pub task_name: String,
    pub queue: String,
    /// 1 on the first run
    pub attempt: u32,
    pub args: Value,
    pub kwargs: Value,
    pub owner: Option<String>,
    pub execution_time: DateTime<Utc>,
    /// For enqueueing follow-up work
    pub handle: SchedulerHandle,
    /// Cancelled once the run time is exceeded or the worker gives up on the task.
    /// Bodies that block between awaits should check it.
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn new(task: &TaskRecord, handle: SchedulerHandle) -> Self {
        Self {
            task_id: task.id,
            task_name: task.task_name.clone(),
            queue: task.queue.clone(),
            attempt: task.attempts,
            args: task.args.clone(),
            kwargs: task.kwargs.clone(),
            owner: task.owner.clone(),
            execution_time: Utc::now(),
            handle,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Positional argument `idx`, deserialized.
    pub fn arg<T: DeserializeOwned>(&self, idx: usize) -> Result<T, TaskError> {
        let value = self
            .args
            .get(idx)
            .ok_or_else(|| TaskError::invalid(format!("{}: missing argument {}", self.task_name, idx)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| TaskError::invalid(format!("{}: argument {}: {}", self.task_name, idx, e)))
    }
}

/// Core trait for all background jobs
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// Stable name tasks refer to
    fn name(&self) -> &'static str;

    /// Queue the job's tasks are placed on
    fn queue(&self) -> &'static str;

    /// Running the job twice with the same arguments is harmless
    fn is_idempotent(&self) -> bool {
        true
    }

    /// Whether unclassified failures get another attempt
    fn is_retriable(&self) -> bool {
        true
    }

    /// Overrides the queue's attempt ceiling
    fn max_attempts(&self) -> Option<u32> {
        None
    }

    /// Seconds to wait before attempt `n + 1`. Must be non-decreasing in `n`.
    fn backoff(&self, attempt: u32) -> u64 {
        default_backoff(attempt)
    }

    /// Overrides the queue's wall-clock limit
    fn max_run_time(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, ctx: JobContext) -> Result<Value, TaskError>;
}

impl fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name())
            .field("queue", &self.queue())
            .finish()
    }
}
