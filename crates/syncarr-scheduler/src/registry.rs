// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use syncarr_config::{PriorityOrdering, QueueVerbosity, TasksConfig, WorkerModel};
use tracing::info;

use crate::job::Job;
use crate::store::ClaimPolicy;

/// Resolved settings of one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    pub workers: usize,
    pub worker_model: WorkerModel,
    pub priority_ordering: PriorityOrdering,
    pub max_attempts: u32,
    pub max_run_time: Duration,
    pub verbosity: QueueVerbosity,
}

/// Queue configurations and the jobs that run on them. Built once at startup.
#[derive(Default)]
pub struct QueueRegistry {
    queues: BTreeMap<String, QueueConfig>,
    jobs: HashMap<&'static str, Arc<dyn Job>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve per-queue overrides against the global task settings.
    pub fn from_config(tasks: &TasksConfig) -> Result<Self> {
        let mut registry = Self::new();
        for settings in &tasks.queues {
            registry.add_queue(QueueConfig {
                name: settings.name.clone(),
                workers: settings.workers,
                worker_model: settings.worker_model,
                priority_ordering: settings.priority_ordering.unwrap_or(tasks.priority_ordering),
                max_attempts: settings.max_attempts.unwrap_or(tasks.max_attempts),
                max_run_time: Duration::from_secs(
                    settings.max_run_time_secs.unwrap_or(tasks.max_run_time_secs),
                ),
                verbosity: settings.verbosity,
            })?;
        }
        Ok(registry)
    }

    pub fn add_queue(&mut self, queue: QueueConfig) -> Result<()> {
        if queue.workers == 0 {
            bail!("queue '{}' must have at least one worker", queue.name);
        }
        if self.queues.contains_key(&queue.name) {
            bail!("queue '{}' is already registered", queue.name);
        }
        info!(
            target: "registry",
            queue = %queue.name,
            workers = queue.workers,
            model = ?queue.worker_model,
            ordering = ?queue.priority_ordering,
            "registering queue"
        );
        self.queues.insert(queue.name.clone(), queue);
        Ok(())
    }

    pub fn register(&mut self, job: impl Job + 'static) -> Result<()> {
        self.register_arc(Arc::new(job))
    }

    pub fn register_arc(&mut self, job: Arc<dyn Job>) -> Result<()> {
        if !self.queues.contains_key(job.queue()) {
            bail!("job '{}' targets unknown queue '{}'", job.name(), job.queue());
        }
        if self.jobs.contains_key(job.name()) {
            bail!("job '{}' is already registered", job.name());
        }
        info!(target: "registry", job = job.name(), queue = job.queue(), "registering job");
        self.jobs.insert(job.name(), job);
        Ok(())
    }

    pub fn job(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).cloned()
    }

    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.get(name)
    }

    pub fn queues(&self) -> impl Iterator<Item = &QueueConfig> {
        self.queues.values()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.jobs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn max_attempts_for(&self, job: &dyn Job) -> u32 {
        let queue_default = self.queue(job.queue()).map(|q| q.max_attempts).unwrap_or(1);
        job.max_attempts().unwrap_or(queue_default).max(1)
    }

    pub fn max_run_time_for(&self, job: &dyn Job, queue: &QueueConfig) -> Duration {
        job.max_run_time().unwrap_or(queue.max_run_time)
    }

    /// Claim policy for a queue. The lock timeout covers the longest run time any of its jobs may take.
    pub fn claim_policy(&self, queue: &QueueConfig) -> ClaimPolicy {
        let lock_timeout = self
            .jobs
            .values()
            .filter(|job| job.queue() == queue.name)
            .filter_map(|job| job.max_run_time())
            .fold(queue.max_run_time, Duration::max);
        ClaimPolicy {
            ordering: queue.priority_ordering,
            lock_timeout,
        }
    }
}
