// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use syncarr_domain::{Media, MediaId, MediaInfo, Source, SourceId};

// ============================================================================
// Repository Traits
// ============================================================================

/// Sources and the queries the task catalog needs.
#[async_trait::async_trait]
pub trait SourceRepository: Send + Sync {
    async fn create(&self, source: Source) -> Result<Source>;
    async fn get(&self, id: SourceId) -> Result<Option<Source>>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Source>>;
    async fn list_active(&self) -> Result<Vec<Source>>;
    /// Fails when the row no longer exists.
    async fn update(&self, source: Source) -> Result<Source>;
    async fn set_has_failed(&self, id: SourceId, has_failed: bool) -> Result<()>;

    /// Deactivate inside a caller-owned transaction. Returns false when the source does not exist.
    async fn deactivate_in(&self, conn: &mut SqliteConnection, id: SourceId) -> Result<bool>;
    async fn delete_in(&self, conn: &mut SqliteConnection, id: SourceId) -> Result<()>;
}

/// Media items discovered from sources.
#[async_trait::async_trait]
pub trait MediaRepository: Send + Sync {
    async fn get(&self, id: MediaId) -> Result<Option<Media>>;
    async fn get_by_key(&self, source_id: SourceId, key: &str) -> Result<Option<Media>>;
    /// Insert or refresh the item identified by `(source_id, info.key)`.
    /// The flag is true when a new row was created.
    async fn upsert(&self, source_id: SourceId, info: &MediaInfo) -> Result<(Media, bool)>;
    /// Fails when the row no longer exists.
    async fn update(&self, media: Media) -> Result<Media>;
    async fn list_by_source(&self, source_id: SourceId) -> Result<Vec<Media>>;
    async fn list_downloaded_before(
        &self,
        source_id: SourceId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Media>>;
    async fn set_skip(&self, id: MediaId, skip: bool) -> Result<()>;
    async fn delete(&self, id: MediaId) -> Result<()>;
    async fn delete_by_source_in(&self, conn: &mut SqliteConnection, source_id: SourceId)
        -> Result<u64>;
}
