// SPDX-License-Identifier: GPL-3.0-or-later
//! Administrative operations on the queues: full resets and source deletion.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use syncarr_domain::{Source, SourceId};
use syncarr_infrastructure::repositories::{MediaRepository, SourceRepository};
use tracing::info;

use crate::handle::SchedulerHandle;
use crate::history::TaskSignal;
use crate::jobs::{self, CHECK_SOURCE_DIRECTORY, INDEX_SOURCE, RESCAN_MEDIA_SERVER};
use crate::store::{SqliteTaskStore, TaskStore};
use crate::task::TaskRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStatus {
    Finished,
}

/// Empty a queue.
///
/// `callback` runs once after the task records are gone and before results and revocations are
/// cleared.
pub async fn reset_queue<F>(store: &dyn TaskStore, queue: &str, callback: F) -> Result<()>
where
    F: FnOnce(ResetStatus),
{
    let now = Utc::now();
    let revoked = store.revoke_pending(queue, now).await?;
    let scheduled = store.flush_scheduled(queue, now).await?;
    let flushed = store.flush(queue).await?;
    callback(ResetStatus::Finished);
    let results = store.flush_results(queue).await?;
    store.clear_revocations(queue).await?;
    info!(target: "maintenance", queue, revoked, scheduled, flushed, results, "queue reset");
    Ok(())
}

/// Reset every queue, then schedule directory checks and indexing for the configured sources.
pub async fn reset_all_tasks(handle: &SchedulerHandle, sources: &dyn SourceRepository) -> Result<()> {
    for queue in handle.registry().queue_names() {
        reset_queue(handle.store().as_ref(), &queue, |_| {}).await?;
    }

    let mut offset = 0;
    let mut seeded = 0usize;
    loop {
        let page = sources.list(100, offset).await?;
        if page.is_empty() {
            break;
        }
        offset += page.len() as i64;
        for source in &page {
            seed_source(handle, source).await?;
            seeded += 1;
        }
    }
    info!(target: "maintenance", sources = seeded, "all tasks reset");
    Ok(())
}

async fn seed_source(handle: &SchedulerHandle, source: &Source) -> Result<()> {
    handle
        .enqueue(CHECK_SOURCE_DIRECTORY, jobs::check_directory_options(source))
        .await?;
    if source.is_active() {
        handle
            .enqueue(INDEX_SOURCE, jobs::index_options(source, None))
            .await?;
    }
    Ok(())
}

/// Deactivate a source, revoke its tasks and delete it with its media in one transaction.
///
/// Returns the revoked tasks, or `None` when the source does not exist.
pub async fn delete_source(
    pool: &SqlitePool,
    sources: &dyn SourceRepository,
    media: &dyn MediaRepository,
    handle: &SchedulerHandle,
    media_servers: &[String],
    source_id: SourceId,
) -> Result<Option<Vec<TaskRecord>>> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    if !sources.deactivate_in(&mut *tx, source_id).await? {
        return Ok(None);
    }
    let revoked = SqliteTaskStore::revoke_owner_in(&mut *tx, &source_id.to_string(), now).await?;
    let media_deleted = media.delete_by_source_in(&mut *tx, source_id).await?;
    sources.delete_in(&mut *tx, source_id).await?;
    tx.commit().await?;

    info!(
        target: "maintenance",
        source_id = %source_id,
        revoked = revoked.len(),
        media_deleted,
        "source deleted"
    );

    for task in &revoked {
        handle.observers().emit(TaskSignal::Revoked, task, None).await;
    }
    for server in media_servers {
        handle
            .enqueue(RESCAN_MEDIA_SERVER, jobs::rescan_options(server))
            .await?;
    }
    Ok(Some(revoked))
}
