// SPDX-License-Identifier: GPL-3.0-or-later
//! Per-queue claim/execute/settle loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use syncarr_config::{QueueVerbosity, TasksConfig};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::{default_backoff, plan_retry, RetrySchedule};
use crate::error::TaskError;
use crate::handle::SchedulerHandle;
use crate::history::TaskSignal;
use crate::job::{Job, JobContext};
use crate::lifecycle::Lifecycle;
use crate::registry::QueueConfig;
use crate::store::{Claim, ClaimPolicy, Settlement, TaskStore};
use crate::task::{TaskId, TaskRecord, TaskState};
use crate::worker::{Outcome, WorkerPool};

const STORE_RETRY_BASE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Claiming,
    Executing,
    Draining,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Claiming => "claiming",
            Self::Executing => "executing",
            Self::Draining => "draining",
        };
        f.write_str(s)
    }
}

struct Inner {
    queue: QueueConfig,
    handle: SchedulerHandle,
    lifecycle: Lifecycle,
    pool: WorkerPool,
    worker_id: String,
    policy: ClaimPolicy,
    drain_timeout: Duration,
    store_retry_max: Duration,
    state: Mutex<DispatcherState>,
    in_flight: Mutex<HashMap<TaskId, TaskRecord>>,
}

/// Drives one queue: claims due tasks, runs them on the worker pool and records outcomes.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        queue: QueueConfig,
        handle: SchedulerHandle,
        lifecycle: Lifecycle,
        tasks: &TasksConfig,
    ) -> Self {
        let policy = handle.registry().claim_policy(&queue);
        let worker_id = format!(
            "{}:{}:{}",
            queue.name,
            std::process::id(),
            Uuid::new_v4().simple()
        );
        Self {
            inner: Arc::new(Inner {
                pool: WorkerPool::new(&queue),
                queue,
                handle,
                lifecycle,
                worker_id,
                policy,
                drain_timeout: Duration::from_secs(tasks.drain_timeout_secs),
                store_retry_max: Duration::from_secs(tasks.store_retry_max_secs.max(1)),
                state: Mutex::new(DispatcherState::Idle),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn queue(&self) -> &QueueConfig {
        &self.inner.queue
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    pub fn state(&self) -> DispatcherState {
        *self.lock_state()
    }

    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    fn store(&self) -> &Arc<dyn TaskStore> {
        self.inner.handle.store()
    }

    fn lock_state(&self) -> MutexGuard<'_, DispatcherState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| {
            warn!(target: "dispatcher", "state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.inner.in_flight.lock().unwrap_or_else(|poisoned| {
            warn!(target: "dispatcher", "in-flight map poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn set_state(&self, state: DispatcherState) {
        *self.lock_state() = state;
    }

    /// Run until shutdown is requested or `budget` elapses, then drain.
    pub async fn run(&self, budget: Option<Duration>) -> Result<()> {
        let queue = self.inner.queue.name.clone();
        let deadline = budget.map(|budget| Instant::now() + budget);
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut store_delay: Option<Duration> = None;

        info!(
            target: "dispatcher",
            %queue,
            workers = self.inner.pool.capacity(),
            model = ?self.inner.pool.model(),
            worker_id = %self.inner.worker_id,
            "dispatcher started"
        );

        loop {
            if self.inner.lifecycle.is_shutdown_requested() {
                break;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!(target: "dispatcher", %queue, "run budget elapsed");
                break;
            }

            while let Some(joined) = workers.try_join_next() {
                log_join(&queue, joined);
            }

            let Some(permit) = self.inner.pool.try_acquire() else {
                self.set_state(DispatcherState::Executing);
                tokio::select! {
                    Some(joined) = workers.join_next() => log_join(&queue, joined),
                    _ = self.inner.lifecycle.cancelled() => {}
                    _ = until(deadline) => {}
                }
                continue;
            };

            self.set_state(DispatcherState::Claiming);
            let claimed = self.claim(Utc::now()).await;

            match claimed {
                Ok(Some(Claim::Ready(task))) => {
                    store_delay = None;
                    self.begin(&task).await;
                    self.set_state(DispatcherState::Executing);
                    let this = self.clone();
                    workers.spawn(async move {
                        let _permit = permit;
                        this.execute_and_settle(task).await;
                    });
                }
                Ok(Some(Claim::Expired(task))) => {
                    store_delay = None;
                    drop(permit);
                    self.log_task(&task, "task expired before running");
                    self.inner.handle.observers().emit(TaskSignal::Expired, &task, None).await;
                }
                Ok(None) => {
                    store_delay = None;
                    drop(permit);
                    self.set_state(DispatcherState::Idle);
                    self.store().release_idle(&queue).await;
                    let idle = self.inner.lifecycle.idle_interval();
                    tokio::select! {
                        _ = sleep(idle) => {}
                        Some(joined) = workers.join_next() => log_join(&queue, joined),
                        _ = self.inner.lifecycle.cancelled() => {}
                        _ = until(deadline) => {}
                    }
                }
                Err(err) => {
                    drop(permit);
                    let delay = store_delay
                        .map(|delay| (delay * 2).min(self.inner.store_retry_max))
                        .unwrap_or(STORE_RETRY_BASE.min(self.inner.store_retry_max));
                    store_delay = Some(delay);
                    error!(target: "dispatcher", %queue, error = %err, ?delay, "task store unavailable, backing off");
                    self.set_state(DispatcherState::Idle);
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = self.inner.lifecycle.cancelled() => {}
                        _ = until(deadline) => {}
                    }
                }
            }
        }

        self.drain(workers).await;
        info!(target: "dispatcher", %queue, "dispatcher stopped");
        Ok(())
    }

    /// Claim, execute and settle a single task inline.
    ///
    /// Returns the task as stored after settling, or `None` when nothing was due at `now`.
    pub async fn run_next(&self, now: DateTime<Utc>) -> Result<Option<(TaskRecord, Settlement)>> {
        let queue = &self.inner.queue.name;
        let claimed = self.claim(now).await?;
        match claimed {
            None => {
                self.store().release_idle(queue).await;
                Ok(None)
            }
            Some(Claim::Expired(task)) => {
                self.inner.handle.observers().emit(TaskSignal::Expired, &task, None).await;
                Ok(Some((task, Settlement::Applied)))
            }
            Some(Claim::Ready(task)) => {
                self.begin(&task).await;
                let _permit = self.inner.pool.acquire().await;
                let (job, outcome) = self.execute(&task).await;
                let settled = self.settle(&task, job.as_deref(), outcome, now).await;
                self.lock_in_flight().remove(&task.id);
                let settlement = settled?;
                let latest = self.store().get(task.id).await?.unwrap_or(task);
                Ok(Some((latest, settlement)))
            }
        }
    }

    /// Settle abandoned work that has no attempts left, then claim the next task.
    async fn claim(&self, now: DateTime<Utc>) -> Result<Option<Claim>> {
        let queue = &self.inner.queue.name;
        let abandoned = self.store().fail_abandoned(queue, now, &self.inner.policy).await?;
        let observers = self.inner.handle.observers();
        for task in abandoned {
            let message = task.last_error.clone().unwrap_or_default();
            error!(
                target: "dispatcher",
                %queue,
                task_id = %task.id,
                task = task.label(),
                attempts = task.attempts,
                "abandoned task failed permanently"
            );
            observers.emit(TaskSignal::Error, &task, Some(&message)).await;
        }
        self.store()
            .claim_next(queue, &self.inner.worker_id, now, &self.inner.policy)
            .await
    }

    async fn begin(&self, task: &TaskRecord) {
        self.lock_in_flight().insert(task.id, task.clone());
        self.log_task(task, "task claimed");
        self.inner.handle.observers().emit(TaskSignal::Executing, task, None).await;
    }

    async fn execute(&self, task: &TaskRecord) -> (Option<Arc<dyn Job>>, Outcome) {
        let registry = self.inner.handle.registry();
        let job = registry.job(&task.task_name);
        let max_run_time = job
            .as_deref()
            .map(|job| registry.max_run_time_for(job, &self.inner.queue))
            .unwrap_or(self.inner.queue.max_run_time);
        let ctx = JobContext::new(task, self.inner.handle.clone());
        let outcome = self.inner.pool.execute(job.clone(), ctx, max_run_time).await;
        (job, outcome)
    }

    async fn execute_and_settle(&self, task: TaskRecord) {
        let (job, outcome) = self.execute(&task).await;
        if let Err(err) = self.settle(&task, job.as_deref(), outcome, Utc::now()).await {
            // The lock times out and the task is claimed again
            error!(
                target: "dispatcher",
                queue = %self.inner.queue.name,
                task_id = %task.id,
                error = %err,
                "failed to record task outcome"
            );
        }
        self.lock_in_flight().remove(&task.id);
    }

    /// Record an outcome and emit the matching signals.
    async fn settle(
        &self,
        task: &TaskRecord,
        job: Option<&dyn Job>,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        match outcome {
            Outcome::Success(value) => {
                let settlement = self
                    .store()
                    .complete(task.id, &self.inner.worker_id, &value, now)
                    .await?;
                if settlement == Settlement::Applied {
                    let mut done = task.clone();
                    done.state = TaskState::Complete;
                    done.result = Some(value);
                    done.locked_by = None;
                    done.locked_at = None;
                    done.finished_at = Some(now);
                    self.log_task(&done, "task complete");
                    self.inner.handle.observers().emit(TaskSignal::Complete, &done, None).await;
                } else {
                    self.settlement_lost(task, settlement).await;
                }
                Ok(settlement)
            }
            Outcome::Retry(err) => {
                if matches!(err, TaskError::Timeout(_)) {
                    let message = err.to_string();
                    self.inner
                        .handle
                        .observers()
                        .emit(TaskSignal::Interrupted, task, Some(&message))
                        .await;
                }
                let backoff = |attempt: u32| match job {
                    Some(job) => job.backoff(attempt),
                    None => default_backoff(attempt),
                };
                let schedule = plan_retry(
                    task.attempts,
                    task.max_attempts,
                    task.retry_delay_secs,
                    backoff,
                    now,
                );
                self.record_failure(task, &err, schedule, now).await
            }
            Outcome::Fail(err) => self.record_failure(task, &err, None, now).await,
        }
    }

    async fn record_failure(
        &self,
        task: &TaskRecord,
        err: &TaskError,
        schedule: Option<RetrySchedule>,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        let message = err.to_string();
        let settlement = self
            .store()
            .fail(task.id, &self.inner.worker_id, &message, schedule, now)
            .await?;
        if settlement != Settlement::Applied {
            self.settlement_lost(task, settlement).await;
            return Ok(settlement);
        }

        let observers = self.inner.handle.observers();
        let mut failed = task.clone();
        failed.last_error = Some(message.clone());
        failed.locked_by = None;
        failed.locked_at = None;
        match schedule {
            Some(schedule) => {
                failed.state = TaskState::FailedRetryable;
                failed.run_at = schedule.run_at;
                failed.retry_delay_secs = schedule.delay_secs;
                warn!(
                    target: "dispatcher",
                    queue = %task.queue,
                    task_id = %task.id,
                    task = task.label(),
                    attempt = task.attempts,
                    kind = err.kind(),
                    error = %message,
                    retry_in_secs = schedule.delay_secs,
                    "task failed, will retry"
                );
                observers.emit(TaskSignal::Error, &failed, Some(&message)).await;
                observers.emit(TaskSignal::Retrying, &failed, None).await;
            }
            None => {
                failed.state = TaskState::FailedPermanent;
                failed.finished_at = Some(now);
                error!(
                    target: "dispatcher",
                    queue = %task.queue,
                    task_id = %task.id,
                    task = task.label(),
                    attempts = task.attempts,
                    kind = err.kind(),
                    error = %message,
                    "task failed permanently"
                );
                observers.emit(TaskSignal::Error, &failed, Some(&message)).await;
            }
        }
        Ok(settlement)
    }

    async fn settlement_lost(&self, task: &TaskRecord, settlement: Settlement) {
        match settlement {
            Settlement::LockLost => {
                warn!(target: "dispatcher", task_id = %task.id, "task was claimed by another worker, outcome discarded");
                self.inner.handle.observers().emit(TaskSignal::Locked, task, None).await;
            }
            // Whoever revoked the task already signalled it
            Settlement::Gone => {
                info!(target: "dispatcher", task_id = %task.id, "task was revoked while running, outcome discarded");
            }
            Settlement::Applied => {}
        }
    }

    async fn drain(&self, mut workers: JoinSet<()>) {
        let queue = self.inner.queue.name.clone();
        self.set_state(DispatcherState::Draining);
        if !workers.is_empty() {
            info!(target: "dispatcher", %queue, in_flight = workers.len(), timeout = ?self.inner.drain_timeout, "draining workers");
            let drained = timeout(self.inner.drain_timeout, join_all(&queue, &mut workers)).await;
            if drained.is_err() {
                warn!(target: "dispatcher", %queue, remaining = workers.len(), "drain timed out, aborting workers");
                workers.abort_all();
                while workers.join_next().await.is_some() {}
            }
        }

        let abandoned: Vec<TaskRecord> = self.lock_in_flight().drain().map(|(_, task)| task).collect();
        for task in abandoned {
            self.cancel(task).await;
        }
        self.store().release_idle(&queue).await;
    }

    /// Hand an aborted task back to the queue, or fail it when no attempts remain.
    async fn cancel(&self, task: TaskRecord) {
        let now = Utc::now();
        let observers = self.inner.handle.observers();
        observers.emit(TaskSignal::Canceled, &task, None).await;

        let retry = task.attempts_left().then_some(RetrySchedule {
            run_at: now,
            delay_secs: task.retry_delay_secs,
        });
        let message = "canceled during shutdown";
        match self
            .store()
            .fail(task.id, &self.inner.worker_id, message, retry, now)
            .await
        {
            Ok(Settlement::Applied) if retry.is_none() => {
                let mut failed = task;
                failed.state = TaskState::FailedPermanent;
                failed.last_error = Some(message.to_string());
                failed.finished_at = Some(now);
                observers.emit(TaskSignal::Error, &failed, Some(message)).await;
            }
            Ok(_) => {
                debug!(target: "dispatcher", task_id = %task.id, "canceled task released");
            }
            Err(err) => {
                error!(target: "dispatcher", task_id = %task.id, error = %err, "failed to release canceled task");
            }
        }
    }

    fn log_task(&self, task: &TaskRecord, message: &str) {
        match self.inner.queue.verbosity {
            QueueVerbosity::Quiet => {}
            QueueVerbosity::Normal => debug!(
                target: "dispatcher",
                queue = %task.queue,
                task_id = %task.id,
                task = task.label(),
                attempt = task.attempts,
                "{}",
                message
            ),
            QueueVerbosity::Verbose => info!(
                target: "dispatcher",
                queue = %task.queue,
                task_id = %task.id,
                task = task.label(),
                attempt = task.attempts,
                "{}",
                message
            ),
        }
    }
}

async fn join_all(queue: &str, workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        log_join(queue, joined);
    }
}

fn log_join(queue: &str, joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            error!(target: "dispatcher", queue, error = %err, "worker panicked while settling (possible bug)");
        }
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
