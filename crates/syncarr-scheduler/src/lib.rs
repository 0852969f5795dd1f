// SPDX-License-Identifier: GPL-3.0-or-later
pub mod backoff;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod history;
pub mod job;
pub mod jobs;
pub mod lifecycle;
pub mod maintenance;
pub mod registry;
pub mod store;
pub mod task;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use syncarr_application::{
    build_notifiers, HttpImageFetcher, ImageFetcher, MediaExtractor, MediaServerNotifier, YtDlpExtractor,
};
use syncarr_config::AppConfig;
use syncarr_infrastructure::repositories::{MediaRepository, SourceRepository};
use syncarr_infrastructure::sqlite_adapters::{SqliteMediaRepository, SqliteSourceRepository};
use tokio::task::JoinHandle;
use tracing::info;

use dispatcher::Dispatcher;
use history::{HistoryRecorder, HistoryStore, Observers, SqliteHistoryStore};
use jobs::{CatalogDeps, SourceFailureMarker};

pub use backoff::{default_backoff, next_retry_delay, plan_retry, RetrySchedule};
pub use error::TaskError;
pub use handle::{EnqueueOptions, SchedulerHandle};
pub use history::{TaskObserver, TaskSignal};
pub use job::{Job, JobContext};
pub use lifecycle::Lifecycle;
pub use registry::{QueueConfig, QueueRegistry};
pub use store::{Claim, ClaimPolicy, EnqueueError, QueueStats, Settlement, SqliteTaskStore, TaskStore};
pub use task::{NewTask, TaskId, TaskRecord, TaskState};
pub use worker::{Outcome, WorkerPool};

/// The wired-up task system: queues, job catalog, store and observers.
pub struct Scheduler {
    config: AppConfig,
    pool: SqlitePool,
    handle: SchedulerHandle,
    lifecycle: Lifecycle,
    sources: Arc<dyn SourceRepository>,
    media: Arc<dyn MediaRepository>,
    history: Arc<dyn HistoryStore>,
    media_server_names: Vec<String>,
}

impl Scheduler {
    /// Build with the real extractor and the configured media servers.
    pub fn build(config: AppConfig, pool: SqlitePool, lifecycle: Lifecycle) -> Result<Self> {
        let client = syncarr_infrastructure::http_client()?;
        let extractor: Arc<dyn MediaExtractor> =
            Arc::new(YtDlpExtractor::new(config.extractor.clone()));
        let images: Arc<dyn ImageFetcher> = Arc::new(HttpImageFetcher::new(client.clone()));
        let media_servers = build_notifiers(&client, &config.media_servers);
        Self::with_adapters(config, pool, lifecycle, extractor, images, media_servers)
    }

    pub fn with_adapters(
        config: AppConfig,
        pool: SqlitePool,
        lifecycle: Lifecycle,
        extractor: Arc<dyn MediaExtractor>,
        images: Arc<dyn ImageFetcher>,
        media_servers: Vec<Arc<dyn MediaServerNotifier>>,
    ) -> Result<Self> {
        let sources: Arc<dyn SourceRepository> = Arc::new(SqliteSourceRepository::new(pool.clone()));
        let media: Arc<dyn MediaRepository> = Arc::new(SqliteMediaRepository::new(pool.clone()));
        let history: Arc<dyn HistoryStore> = Arc::new(SqliteHistoryStore::new(pool.clone()));
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(pool.clone()));
        let media_server_names = media_servers.iter().map(|s| s.name().to_string()).collect();

        let mut registry = QueueRegistry::from_config(&config.tasks)?;
        jobs::register_catalog(
            &mut registry,
            CatalogDeps {
                sources: sources.clone(),
                media: media.clone(),
                extractor,
                images,
                media_servers,
                history: history.clone(),
                downloads_root: config.downloads.root.clone(),
                completed_retention_days: config.tasks.completed_retention_days,
                housekeeping_interval: Duration::from_secs(config.tasks.housekeeping_interval_secs),
            },
        )?;

        let observers = Observers::new()
            .with(Arc::new(HistoryRecorder::new(history.clone())))
            .with(Arc::new(SourceFailureMarker::new(sources.clone(), media.clone())));
        let handle = SchedulerHandle::new(store, Arc::new(registry), observers);

        info!(
            target: "scheduler",
            queues = ?handle.registry().queue_names(),
            jobs = ?handle.registry().job_names(),
            "scheduler built"
        );

        Ok(Self {
            config,
            pool,
            handle,
            lifecycle,
            sources,
            media,
            history,
            media_server_names,
        })
    }

    pub fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn sources(&self) -> &Arc<dyn SourceRepository> {
        &self.sources
    }

    pub fn media(&self) -> &Arc<dyn MediaRepository> {
        &self.media
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn media_server_names(&self) -> &[String] {
        &self.media_server_names
    }

    /// Make sure the recurring work exists: housekeeping and one index per active source.
    pub async fn seed(&self) -> Result<()> {
        self.handle
            .ensure_scheduled(jobs::HOUSEKEEPING, jobs::housekeeping_options(None))
            .await?;
        for source in self.sources.list_active().await? {
            self.handle
                .ensure_scheduled(jobs::INDEX_SOURCE, jobs::index_options(&source, None))
                .await?;
        }
        Ok(())
    }

    pub fn dispatcher(&self, queue: &str) -> Option<Dispatcher> {
        let queue = self.handle.registry().queue(queue)?.clone();
        Some(Dispatcher::new(
            queue,
            self.handle.clone(),
            self.lifecycle.clone(),
            &self.config.tasks,
        ))
    }

    /// Spawn one dispatcher per queue, or only for the queues named in `queue_filter`.
    pub fn start(
        &self,
        queue_filter: &[String],
        budget: Option<Duration>,
    ) -> Result<Vec<JoinHandle<Result<()>>>> {
        let registry = self.handle.registry();
        for name in queue_filter {
            if registry.queue(name).is_none() {
                bail!("unknown queue '{}'", name);
            }
        }

        let mut handles = Vec::new();
        for queue in registry.queues() {
            if !queue_filter.is_empty() && !queue_filter.contains(&queue.name) {
                continue;
            }
            if let Some(dispatcher) = self.dispatcher(&queue.name) {
                handles.push(tokio::spawn(async move { dispatcher.run(budget).await }));
            }
        }
        info!(target: "scheduler", dispatchers = handles.len(), ?budget, "scheduler started");
        Ok(handles)
    }
}
