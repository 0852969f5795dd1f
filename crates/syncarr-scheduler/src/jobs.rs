// SPDX-License-Identifier: GPL-3.0-or-later
//! The media-sync job catalog.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use syncarr_application::nfo::{render_nfo, write_atomic};
use syncarr_application::{
    ExtractOutput, ExtractTarget, ImageFetcher, MediaExtractor, MediaServerNotifier,
};
use syncarr_domain::{Media, MediaId, Source, SourceId};
use syncarr_infrastructure::repositories::{MediaRepository, SourceRepository};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::handle::EnqueueOptions;
use crate::history::{HistoryStore, TaskObserver, TaskSignal};
use crate::job::{Job, JobContext};
use crate::registry::QueueRegistry;
use crate::store::EnqueueError;
use crate::task::{TaskRecord, TaskState};

pub const INDEX_SOURCE: &str = "index_source";
pub const DOWNLOAD_MEDIA_METADATA: &str = "download_media_metadata";
pub const DOWNLOAD_MEDIA: &str = "download_media";
pub const DOWNLOAD_MEDIA_THUMBNAIL: &str = "download_media_thumbnail";
pub const WRITE_METADATA: &str = "write_metadata";
pub const RESCAN_MEDIA_SERVER: &str = "rescan_media_server";
pub const CHECK_SOURCE_DIRECTORY: &str = "check_source_directory";
pub const HOUSEKEEPING: &str = "housekeeping";

pub const QUEUE_LIMITED: &str = "limited";
pub const QUEUE_NETWORK: &str = "network";
pub const QUEUE_FILESYSTEM: &str = "filesystem";
pub const QUEUE_DATABASE: &str = "database";

const PRIORITY_MEDIA_METADATA: i64 = 25;
const PRIORITY_DOWNLOAD: i64 = 20;
const PRIORITY_METADATA: i64 = 15;
const PRIORITY_INDEX: i64 = 10;
const PRIORITY_THUMBNAIL: i64 = 10;
const PRIORITY_RESCAN: i64 = 5;

/// Everything the catalog's jobs talk to.
#[derive(Clone)]
pub struct CatalogDeps {
    pub sources: Arc<dyn SourceRepository>,
    pub media: Arc<dyn MediaRepository>,
    pub extractor: Arc<dyn MediaExtractor>,
    pub images: Arc<dyn ImageFetcher>,
    pub media_servers: Vec<Arc<dyn MediaServerNotifier>>,
    pub history: Arc<dyn HistoryStore>,
    pub downloads_root: PathBuf,
    pub completed_retention_days: u32,
    pub housekeeping_interval: Duration,
}

/// Register all eight jobs. Their queues must already exist.
pub fn register_catalog(registry: &mut QueueRegistry, deps: CatalogDeps) -> Result<()> {
    let server_names: Vec<String> = deps.media_servers.iter().map(|s| s.name().to_string()).collect();

    registry.register(IndexSourceJob {
        sources: deps.sources.clone(),
        media: deps.media.clone(),
        extractor: deps.extractor.clone(),
    })?;
    registry.register(DownloadMediaMetadataJob {
        sources: deps.sources.clone(),
        media: deps.media.clone(),
        extractor: deps.extractor.clone(),
    })?;
    registry.register(DownloadMediaJob {
        sources: deps.sources.clone(),
        media: deps.media.clone(),
        extractor: deps.extractor.clone(),
        downloads_root: deps.downloads_root.clone(),
        media_servers: server_names,
    })?;
    registry.register(DownloadMediaThumbnailJob {
        sources: deps.sources.clone(),
        media: deps.media.clone(),
        images: deps.images,
    })?;
    registry.register(WriteMetadataJob {
        sources: deps.sources.clone(),
        media: deps.media.clone(),
    })?;
    registry.register(RescanMediaServerJob {
        servers: deps
            .media_servers
            .iter()
            .map(|server| (server.name().to_string(), server.clone()))
            .collect(),
    })?;
    registry.register(CheckSourceDirectoryJob {
        sources: deps.sources.clone(),
        downloads_root: deps.downloads_root.clone(),
    })?;
    registry.register(HousekeepingJob {
        sources: deps.sources,
        media: deps.media,
        history: deps.history,
        retention_days: deps.completed_retention_days,
        interval: deps.housekeeping_interval,
    })?;
    Ok(())
}

pub fn index_options(source: &Source, eta: Option<DateTime<Utc>>) -> EnqueueOptions {
    EnqueueOptions {
        args: json!([source.id.to_string()]),
        priority: PRIORITY_INDEX,
        eta,
        owner: Some(source.id.to_string()),
        verbose_name: Some(format!("Index media from source \"{}\"", source.name)),
        replace_existing: true,
        ..EnqueueOptions::default()
    }
}

/// Refresh one item's details before anything is downloaded for it.
pub fn media_metadata_options(source: &Source, media: &Media) -> EnqueueOptions {
    EnqueueOptions {
        args: json!([media.id.to_string()]),
        priority: PRIORITY_MEDIA_METADATA,
        owner: Some(source.id.to_string()),
        verbose_name: Some(format!("Fetch details of \"{}\" from \"{}\"", media.key, source.name)),
        ..EnqueueOptions::default()
    }
}

pub fn download_options(source: &Source, media: &Media) -> EnqueueOptions {
    EnqueueOptions {
        args: json!([media.id.to_string()]),
        priority: PRIORITY_DOWNLOAD,
        owner: Some(source.id.to_string()),
        verbose_name: Some(format!("Download \"{}\" from \"{}\"", media.key, source.name)),
        ..EnqueueOptions::default()
    }
}

pub fn metadata_options(source: &Source, media: &Media) -> EnqueueOptions {
    EnqueueOptions {
        args: json!([media.id.to_string()]),
        priority: PRIORITY_METADATA,
        owner: Some(source.id.to_string()),
        verbose_name: Some(format!("Write metadata for \"{}\"", media.key)),
        ..EnqueueOptions::default()
    }
}

pub fn thumbnail_options(source: &Source, media: &Media) -> EnqueueOptions {
    EnqueueOptions {
        args: json!([media.id.to_string()]),
        priority: PRIORITY_THUMBNAIL,
        owner: Some(source.id.to_string()),
        verbose_name: Some(format!("Copy thumbnail for \"{}\"", media.key)),
        ..EnqueueOptions::default()
    }
}

/// Pending rescans of one server collapse into the newest request.
pub fn rescan_options(server: &str) -> EnqueueOptions {
    EnqueueOptions {
        args: json!([server]),
        priority: PRIORITY_RESCAN,
        verbose_name: Some(format!("Rescan media server \"{}\"", server)),
        replace_existing: true,
        ..EnqueueOptions::default()
    }
}

pub fn check_directory_options(source: &Source) -> EnqueueOptions {
    EnqueueOptions {
        args: json!([source.id.to_string()]),
        owner: Some(source.id.to_string()),
        verbose_name: Some(format!("Check directory for source \"{}\"", source.name)),
        ..EnqueueOptions::default()
    }
}

pub fn housekeeping_options(eta: Option<DateTime<Utc>>) -> EnqueueOptions {
    EnqueueOptions {
        eta,
        verbose_name: Some("Housekeeping".to_string()),
        replace_existing: true,
        ..EnqueueOptions::default()
    }
}

fn uuid_arg(ctx: &JobContext, idx: usize) -> Result<Uuid, TaskError> {
    let raw: String = ctx.arg(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| TaskError::invalid(format!("{}: argument {} is not an id: {}", ctx.task_name, idx, e)))
}

fn later(now: DateTime<Utc>, interval: ChronoDuration) -> DateTime<Utc> {
    now.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn skipped(reason: &str) -> Value {
    json!({ "skipped": reason })
}

/// Schedule follow-up work. Returns false when the owning source was deleted meanwhile.
async fn follow_up(ctx: &JobContext, job_name: &str, opts: EnqueueOptions) -> Result<bool, TaskError> {
    match ctx.handle.enqueue(job_name, opts).await {
        Ok(_) => Ok(true),
        Err(err) => match err.downcast_ref::<EnqueueError>() {
            Some(EnqueueError::OwnerGone(owner)) => {
                debug!(target: "jobs", task_name = job_name, owner = %owner, "owner deleted, not scheduling");
                Ok(false)
            }
            None => Err(TaskError::infra(err)),
        },
    }
}

pub struct IndexSourceJob {
    sources: Arc<dyn SourceRepository>,
    media: Arc<dyn MediaRepository>,
    extractor: Arc<dyn MediaExtractor>,
}

#[async_trait]
impl Job for IndexSourceJob {
    fn name(&self) -> &'static str {
        INDEX_SOURCE
    }

    fn queue(&self) -> &'static str {
        QUEUE_LIMITED
    }

    async fn execute(&self, ctx: JobContext) -> Result<Value, TaskError> {
        let source_id = SourceId::from_uuid(uuid_arg(&ctx, 0)?);
        let Some(mut source) = self.sources.get(source_id).await.map_err(TaskError::infra)? else {
            debug!(target: "jobs", %source_id, "source is gone, nothing to index");
            return Ok(skipped("source not found"));
        };
        if !source.is_active() {
            return Ok(skipped("source inactive"));
        }

        self.sources
            .set_has_failed(source.id, false)
            .await
            .map_err(TaskError::infra)?;
        source.has_failed = false;

        let listing = match self
            .extractor
            .fetch_or_download(&ExtractTarget::Index { url: source.url() })
            .await?
        {
            ExtractOutput::Listing(items) => items,
            _ => return Err(TaskError::ToolExecution("expected a listing".into())),
        };
        if listing.is_empty() {
            return Err(TaskError::ToolExecution(format!(
                "no media returned for source \"{}\"",
                source.name
            )));
        }

        let mut created = 0usize;
        let mut listed = HashSet::with_capacity(listing.len());
        for info in &listing {
            listed.insert(info.key.clone());
            let (media, is_new) = self
                .media
                .upsert(source.id, info)
                .await
                .map_err(TaskError::infra)?;
            if is_new {
                created += 1;
                follow_up(&ctx, DOWNLOAD_MEDIA_METADATA, media_metadata_options(&source, &media)).await?;
            }
        }

        let mut removed = 0usize;
        if source.delete_removed_media {
            for media in self.media.list_by_source(source.id).await.map_err(TaskError::infra)? {
                if !listed.contains(&media.key) {
                    info!(target: "jobs", source = %source.name, key = %media.key, "media no longer listed, deleting");
                    self.media.delete(media.id).await.map_err(TaskError::infra)?;
                    removed += 1;
                }
            }
        }

        let now = Utc::now();
        source.last_crawl = Some(now);
        let source = self.sources.update(source).await.map_err(TaskError::infra)?;

        follow_up(
            &ctx,
            INDEX_SOURCE,
            index_options(&source, Some(later(now, source.index_interval()))),
        )
        .await?;

        info!(
            target: "jobs",
            source = %source.name,
            listed = listing.len(),
            created,
            removed,
            "source indexed"
        );
        Ok(json!({ "listed": listing.len(), "created": created, "removed": removed }))
    }
}

pub struct DownloadMediaMetadataJob {
    sources: Arc<dyn SourceRepository>,
    media: Arc<dyn MediaRepository>,
    extractor: Arc<dyn MediaExtractor>,
}

#[async_trait]
impl Job for DownloadMediaMetadataJob {
    fn name(&self) -> &'static str {
        DOWNLOAD_MEDIA_METADATA
    }

    fn queue(&self) -> &'static str {
        QUEUE_NETWORK
    }

    async fn execute(&self, ctx: JobContext) -> Result<Value, TaskError> {
        let media_id = MediaId::from_uuid(uuid_arg(&ctx, 0)?);
        let Some(mut media) = self.media.get(media_id).await.map_err(TaskError::infra)? else {
            return Ok(skipped("media not found"));
        };
        let Some(source) = self.sources.get(media.source_id).await.map_err(TaskError::infra)? else {
            return Ok(skipped("source not found"));
        };
        if !source.is_active() {
            return Ok(skipped("source inactive"));
        }

        let info = match self
            .extractor
            .fetch_or_download(&ExtractTarget::Metadata { url: media.url() })
            .await?
        {
            ExtractOutput::Metadata(info) => info,
            _ => return Err(TaskError::ToolExecution("expected item metadata".into())),
        };
        media.apply_info(&info);
        let media = self.media.update(media).await.map_err(TaskError::infra)?;
        debug!(target: "jobs", key = %media.key, "media details refreshed");

        let wants_download = source.download_media && !media.skip && !(media.downloaded && media.file_exists());
        let scheduled = wants_download && follow_up(&ctx, DOWNLOAD_MEDIA, download_options(&source, &media)).await?;
        Ok(json!({ "title": media.title, "download_scheduled": scheduled }))
    }
}

pub struct DownloadMediaJob {
    sources: Arc<dyn SourceRepository>,
    media: Arc<dyn MediaRepository>,
    extractor: Arc<dyn MediaExtractor>,
    downloads_root: PathBuf,
    media_servers: Vec<String>,
}

#[async_trait]
impl Job for DownloadMediaJob {
    fn name(&self) -> &'static str {
        DOWNLOAD_MEDIA
    }

    fn queue(&self) -> &'static str {
        QUEUE_NETWORK
    }

    async fn execute(&self, ctx: JobContext) -> Result<Value, TaskError> {
        let media_id = MediaId::from_uuid(uuid_arg(&ctx, 0)?);
        let Some(mut media) = self.media.get(media_id).await.map_err(TaskError::infra)? else {
            return Ok(skipped("media not found"));
        };
        if media.skip {
            return Ok(skipped("media marked skip"));
        }
        if media.downloaded && media.file_exists() {
            return Ok(skipped("already downloaded"));
        }
        let Some(source) = self.sources.get(media.source_id).await.map_err(TaskError::infra)? else {
            return Ok(skipped("source not found"));
        };
        if !source.download_media {
            return Ok(skipped("source does not download"));
        }

        let target = ExtractTarget::Download {
            url: media.url(),
            output_dir: source.directory_path(&self.downloads_root),
        };
        let (path, filesize) = match self.extractor.fetch_or_download(&target).await? {
            ExtractOutput::Downloaded { path, filesize } => (path, filesize),
            _ => return Err(TaskError::ToolExecution("expected a downloaded file".into())),
        };

        media.mark_downloaded(path.to_string_lossy(), filesize);
        let media = self.media.update(media).await.map_err(TaskError::infra)?;
        info!(target: "jobs", key = %media.key, path = %path.display(), "media downloaded");

        if source.write_nfo {
            follow_up(&ctx, WRITE_METADATA, metadata_options(&source, &media)).await?;
        }
        if source.copy_thumbnails && media.thumbnail_url.is_some() {
            follow_up(&ctx, DOWNLOAD_MEDIA_THUMBNAIL, thumbnail_options(&source, &media)).await?;
        }
        for server in &self.media_servers {
            follow_up(&ctx, RESCAN_MEDIA_SERVER, rescan_options(server)).await?;
        }
        Ok(json!({ "path": path.to_string_lossy(), "filesize": filesize }))
    }
}

pub struct DownloadMediaThumbnailJob {
    sources: Arc<dyn SourceRepository>,
    media: Arc<dyn MediaRepository>,
    images: Arc<dyn ImageFetcher>,
}

#[async_trait]
impl Job for DownloadMediaThumbnailJob {
    fn name(&self) -> &'static str {
        DOWNLOAD_MEDIA_THUMBNAIL
    }

    fn queue(&self) -> &'static str {
        QUEUE_NETWORK
    }

    async fn execute(&self, ctx: JobContext) -> Result<Value, TaskError> {
        let media_id = MediaId::from_uuid(uuid_arg(&ctx, 0)?);
        let Some(media) = self.media.get(media_id).await.map_err(TaskError::infra)? else {
            return Ok(skipped("media not found"));
        };
        let Some(path) = media.thumbnail_path().filter(|_| media.downloaded) else {
            return Ok(skipped("media not downloaded"));
        };
        let Some(url) = media.thumbnail_url.as_deref() else {
            return Ok(skipped("no thumbnail"));
        };
        let Some(source) = self.sources.get(media.source_id).await.map_err(TaskError::infra)? else {
            return Ok(skipped("source not found"));
        };
        if !source.copy_thumbnails {
            return Ok(skipped("source does not copy thumbnails"));
        }

        let bytes = self.images.fetch(url).await?;
        if ctx.is_cancelled() {
            return Err(TaskError::infra("thumbnail fetch outlived its run time"));
        }
        write_atomic(&path, &bytes).map_err(TaskError::infra)?;
        debug!(target: "jobs", path = %path.display(), size = bytes.len(), "thumbnail written");
        Ok(json!({ "path": path.to_string_lossy(), "size": bytes.len() }))
    }
}

pub struct WriteMetadataJob {
    sources: Arc<dyn SourceRepository>,
    media: Arc<dyn MediaRepository>,
}

#[async_trait]
impl Job for WriteMetadataJob {
    fn name(&self) -> &'static str {
        WRITE_METADATA
    }

    fn queue(&self) -> &'static str {
        QUEUE_FILESYSTEM
    }

    async fn execute(&self, ctx: JobContext) -> Result<Value, TaskError> {
        let media_id = MediaId::from_uuid(uuid_arg(&ctx, 0)?);
        let Some(media) = self.media.get(media_id).await.map_err(TaskError::infra)? else {
            return Ok(skipped("media not found"));
        };
        let Some(nfo_path) = media.nfo_path().filter(|_| media.downloaded) else {
            return Ok(skipped("media not downloaded"));
        };
        let Some(source) = self.sources.get(media.source_id).await.map_err(TaskError::infra)? else {
            return Ok(skipped("source not found"));
        };

        let contents = render_nfo(&media, &source)?;
        write_atomic(&nfo_path, &contents).map_err(TaskError::infra)?;
        debug!(target: "jobs", path = %nfo_path.display(), "metadata written");
        Ok(json!({ "path": nfo_path.to_string_lossy() }))
    }
}

pub struct RescanMediaServerJob {
    servers: HashMap<String, Arc<dyn MediaServerNotifier>>,
}

#[async_trait]
impl Job for RescanMediaServerJob {
    fn name(&self) -> &'static str {
        RESCAN_MEDIA_SERVER
    }

    fn queue(&self) -> &'static str {
        QUEUE_NETWORK
    }

    async fn execute(&self, ctx: JobContext) -> Result<Value, TaskError> {
        let name: String = ctx.arg(0)?;
        let server = self
            .servers
            .get(&name)
            .ok_or_else(|| TaskError::invalid(format!("no media server named '{}'", name)))?;
        server.notify_library_update().await?;
        info!(target: "jobs", server = %name, "media server rescan requested");
        Ok(json!({ "server": name }))
    }
}

pub struct CheckSourceDirectoryJob {
    sources: Arc<dyn SourceRepository>,
    downloads_root: PathBuf,
}

#[async_trait]
impl Job for CheckSourceDirectoryJob {
    fn name(&self) -> &'static str {
        CHECK_SOURCE_DIRECTORY
    }

    fn queue(&self) -> &'static str {
        QUEUE_FILESYSTEM
    }

    async fn execute(&self, ctx: JobContext) -> Result<Value, TaskError> {
        let source_id = SourceId::from_uuid(uuid_arg(&ctx, 0)?);
        let Some(source) = self.sources.get(source_id).await.map_err(TaskError::infra)? else {
            return Ok(skipped("source not found"));
        };
        let path = source.directory_path(&self.downloads_root);
        let created = !path.is_dir();
        if created {
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| TaskError::infra(format!("{}: {}", path.display(), e)))?;
            info!(target: "jobs", source = %source.name, path = %path.display(), "created source directory");
        }
        Ok(json!({ "path": path.to_string_lossy(), "created": created }))
    }
}

pub struct HousekeepingJob {
    sources: Arc<dyn SourceRepository>,
    media: Arc<dyn MediaRepository>,
    history: Arc<dyn HistoryStore>,
    retention_days: u32,
    interval: Duration,
}

impl HousekeepingJob {
    async fn expire_media(&self, source: &Source, cutoff: DateTime<Utc>) -> Result<usize, TaskError> {
        let expired = self
            .media
            .list_downloaded_before(source.id, cutoff)
            .await
            .map_err(TaskError::infra)?;
        let count = expired.len();
        for mut media in expired {
            for sidecar in [media.nfo_path(), media.thumbnail_path()].into_iter().flatten() {
                remove_if_present(&sidecar).await?;
            }
            if let Some(path) = media.media_path.take() {
                remove_if_present(Path::new(&path)).await?;
            }
            // Marked skip so the next index does not download it again
            media.skip = true;
            media.downloaded = false;
            media.media_path = None;
            media.filesize = None;
            self.media.update(media).await.map_err(TaskError::infra)?;
        }
        if count > 0 {
            info!(target: "jobs", source = %source.name, count, "deleted media past retention");
        }
        Ok(count)
    }
}

async fn remove_if_present(path: &Path) -> Result<(), TaskError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TaskError::infra(format!("{}: {}", path.display(), e))),
    }
}

#[async_trait]
impl Job for HousekeepingJob {
    fn name(&self) -> &'static str {
        HOUSEKEEPING
    }

    fn queue(&self) -> &'static str {
        QUEUE_DATABASE
    }

    async fn execute(&self, ctx: JobContext) -> Result<Value, TaskError> {
        let now = Utc::now();
        let retention_cutoff = ChronoDuration::try_days(i64::from(self.retention_days))
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let tasks_purged = ctx
            .handle
            .store()
            .purge_finished(retention_cutoff)
            .await
            .map_err(TaskError::infra)?;
        let history_purged = self
            .history
            .purge_before(retention_cutoff)
            .await
            .map_err(TaskError::infra)?;

        let mut media_expired = 0usize;
        let sources = self.sources.list_active().await.map_err(TaskError::infra)?;
        for source in &sources {
            ctx.handle
                .ensure_scheduled(CHECK_SOURCE_DIRECTORY, check_directory_options(source))
                .await
                .map_err(TaskError::infra)?;
            if let Some(cutoff) = source.retention_cutoff(now) {
                media_expired += self.expire_media(source, cutoff).await?;
            }
        }

        let interval = ChronoDuration::from_std(self.interval).unwrap_or(ChronoDuration::days(1));
        follow_up(&ctx, HOUSEKEEPING, housekeeping_options(Some(later(now, interval)))).await?;

        info!(
            target: "jobs",
            tasks_purged,
            history_purged,
            media_expired,
            sources = sources.len(),
            "housekeeping finished"
        );
        Ok(json!({
            "tasks_purged": tasks_purged,
            "history_purged": history_purged,
            "media_expired": media_expired,
        }))
    }
}

/// Flags the domain objects behind permanently failed work.
pub struct SourceFailureMarker {
    sources: Arc<dyn SourceRepository>,
    media: Arc<dyn MediaRepository>,
}

impl SourceFailureMarker {
    pub fn new(sources: Arc<dyn SourceRepository>, media: Arc<dyn MediaRepository>) -> Self {
        Self { sources, media }
    }
}

fn first_uuid(task: &TaskRecord) -> Option<Uuid> {
    task.args
        .get(0)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

#[async_trait]
impl TaskObserver for SourceFailureMarker {
    async fn on_signal(&self, signal: TaskSignal, task: &TaskRecord, _error: Option<&str>) -> Result<()> {
        if signal != TaskSignal::Error || task.state != TaskState::FailedPermanent {
            return Ok(());
        }
        let Some(id) = first_uuid(task) else {
            return Ok(());
        };
        match task.task_name.as_str() {
            INDEX_SOURCE => {
                warn!(target: "jobs", source_id = %id, "indexing failed permanently, flagging source");
                self.sources.set_has_failed(SourceId::from_uuid(id), true).await
            }
            DOWNLOAD_MEDIA | DOWNLOAD_MEDIA_METADATA => {
                warn!(target: "jobs", media_id = %id, task_name = %task.task_name, "media failed permanently, skipping it");
                self.media.set_skip(MediaId::from_uuid(id), true).await
            }
            _ => Ok(()),
        }
    }
}
