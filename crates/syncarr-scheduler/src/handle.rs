// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::history::{Observers, TaskSignal};
use crate::registry::QueueRegistry;
use crate::store::TaskStore;
use crate::task::{task_hash, NewTask, TaskId};

/// Options for a single enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnqueueOptions {
    pub args: Value,
    pub kwargs: Value,
    pub priority: i64,
    /// Earliest run time; now when unset
    pub eta: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    pub verbose_name: Option<String>,
    pub replace_existing: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            args: json!([]),
            kwargs: json!({}),
            priority: 0,
            eta: None,
            owner: None,
            verbose_name: None,
            replace_existing: false,
            expires_at: None,
        }
    }
}

impl EnqueueOptions {
    pub fn with_args(args: Value) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }
}

/// Cheap, clonable entry point for putting work on the queues.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<dyn TaskStore>,
    registry: Arc<QueueRegistry>,
    observers: Observers,
}

impl SchedulerHandle {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<QueueRegistry>, observers: Observers) -> Self {
        Self {
            store,
            registry,
            observers,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    pub async fn enqueue(&self, job_name: &str, opts: EnqueueOptions) -> Result<TaskId> {
        let job = self
            .registry
            .job(job_name)
            .ok_or_else(|| anyhow!("unknown job '{}'", job_name))?;

        let task = NewTask {
            queue: job.queue().to_string(),
            task_name: job_name.to_string(),
            args: opts.args,
            kwargs: opts.kwargs,
            priority: opts.priority,
            run_at: opts.eta.unwrap_or_else(Utc::now),
            expires_at: opts.expires_at,
            max_attempts: self.registry.max_attempts_for(job.as_ref()),
            owner: opts.owner,
            verbose_name: opts.verbose_name,
            replace_existing: opts.replace_existing,
        };
        let id = self.store.enqueue(task).await?;

        if let Some(record) = self.store.get(id).await? {
            self.observers.emit(TaskSignal::Enqueued, &record, None).await;
        }
        Ok(id)
    }

    /// Enqueue unless an unfinished task with the same name and arguments already exists.
    pub async fn ensure_scheduled(&self, job_name: &str, opts: EnqueueOptions) -> Result<Option<TaskId>> {
        let hash = task_hash(job_name, &opts.args, &opts.kwargs);
        if let Some(existing) = self.store.find_pending(&hash).await? {
            debug!(target: "scheduler", task_name = job_name, task_id = %existing.id, "already scheduled");
            return Ok(None);
        }
        self.enqueue(job_name, opts).await.map(Some)
    }
}
