// SPDX-License-Identifier: GPL-3.0-or-later
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde_json::Value;
use syncarr_config::WorkerModel;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tokio::time::timeout;
use tokio_util::task::AbortOnDropHandle;
use tracing::{error, warn};

use crate::error::TaskError;
use crate::job::{Job, JobContext};
use crate::registry::QueueConfig;

/// What a task body produced, classified for the retry policy.
#[derive(Debug)]
pub enum Outcome {
    Success(Value),
    Retry(TaskError),
    Fail(TaskError),
}

impl Outcome {
    fn from_error(err: TaskError, retriable: bool, task_name: &str) -> Self {
        if let TaskError::Unclassified(inner) = &err {
            error!(target: "worker", task_name, error = %inner, "unclassified task error (possible bug)");
        }
        if err.is_permanent() || !retriable {
            Self::Fail(err)
        } else {
            Self::Retry(err)
        }
    }
}

/// Bounded execution slots for one queue.
#[derive(Clone)]
pub struct WorkerPool {
    model: WorkerModel,
    workers: usize,
    slots: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(queue: &QueueConfig) -> Self {
        Self {
            model: queue.worker_model,
            workers: queue.workers,
            slots: Arc::new(Semaphore::new(queue.workers)),
        }
    }

    pub fn model(&self) -> WorkerModel {
        self.model
    }

    pub fn capacity(&self) -> usize {
        self.workers
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }

    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().acquire_owned().await.ok()
    }

    /// Run one task body in isolation and turn whatever happens into an [`Outcome`].
    ///
    /// `job` is `None` when no job is registered under the task's name.
    pub async fn execute(
        &self,
        job: Option<Arc<dyn Job>>,
        ctx: JobContext,
        max_run_time: Duration,
    ) -> Outcome {
        let Some(job) = job else {
            return Outcome::Fail(TaskError::invalid(format!(
                "no job registered as '{}'",
                ctx.task_name
            )));
        };
        let retriable = job.is_retriable();
        let task_name = ctx.task_name.clone();
        let cancel = ctx.cancel.clone();
        // Also fires when this future is dropped, e.g. on a drain abort
        let _cancel_on_exit = cancel.clone().drop_guard();

        let joined = match self.model {
            WorkerModel::Async => {
                // Dropping the handle aborts the task, on timeout and when the caller is aborted
                let handle = AbortOnDropHandle::new(tokio::spawn(async move { job.execute(ctx).await }));
                match timeout(max_run_time, handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        cancel.cancel();
                        warn!(target: "worker", %task_name, "task timed out and was aborted");
                        return Outcome::Retry(TaskError::Timeout(max_run_time));
                    }
                }
            }
            WorkerModel::Thread => {
                let runtime = Handle::current();
                let body_cancel = cancel.clone();
                let mut handle = tokio::task::spawn_blocking(move || {
                    runtime.block_on(async move {
                        tokio::select! {
                            result = job.execute(ctx) => Some(result),
                            _ = body_cancel.cancelled() => None,
                        }
                    })
                });
                match timeout(max_run_time, &mut handle).await {
                    Ok(joined) => joined.map(|finished| {
                        finished.unwrap_or_else(|| Err(TaskError::Timeout(max_run_time)))
                    }),
                    Err(_) => {
                        cancel.cancel();
                        warn!(target: "worker", %task_name, "task timed out, waiting for its thread to stop");
                        // The claim stays held until the body has actually returned
                        if let Err(join_err) = handle.await {
                            let err = join_failure(&task_name, join_err);
                            warn!(target: "worker", %task_name, error = %err, "timed out task ended abnormally");
                        }
                        return Outcome::Retry(TaskError::Timeout(max_run_time));
                    }
                }
            }
        };

        match joined {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(err)) => Outcome::from_error(err, retriable, &task_name),
            Err(join_err) => Outcome::Retry(TaskError::Unclassified(join_failure(
                &task_name, join_err,
            ))),
        }
    }
}

fn join_failure(task_name: &str, err: JoinError) -> anyhow::Error {
    if err.is_panic() {
        let message = panic_message(err.into_panic());
        error!(target: "worker", task_name, %message, "task panicked (possible bug)");
        anyhow!("task panicked: {}", message)
    } else {
        anyhow!("task was cancelled")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
