// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use syncarr_domain::{Media, MediaId, MediaInfo, Source, SourceId, SourceKind};
use tracing::debug;
use uuid::Uuid;

use crate::millis::{from_millis, opt_from_millis, opt_to_millis, to_millis};
use crate::repositories::{MediaRepository, SourceRepository};

/// SQLx-backed Source repository
pub struct SqliteSourceRepository {
    pool: SqlitePool,
}

impl SqliteSourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SourceRepository for SqliteSourceRepository {
    async fn create(&self, source: Source) -> Result<Source> {
        debug!(target: "repository", source_id = %source.id, "creating source");
        let q = r#"
            INSERT INTO sources (
                id, name, kind, key, directory, index_schedule_secs, download_media,
                write_nfo, copy_thumbnails, delete_removed_media, days_to_keep, active,
                has_failed, last_crawl, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;
        sqlx::query(q)
            .bind(source.id.to_string())
            .bind(&source.name)
            .bind(source.kind.to_string())
            .bind(&source.key)
            .bind(&source.directory)
            .bind(source.index_schedule_secs)
            .bind(source.download_media)
            .bind(source.write_nfo)
            .bind(source.copy_thumbnails)
            .bind(source.delete_removed_media)
            .bind(source.days_to_keep.map(i64::from))
            .bind(source.active)
            .bind(source.has_failed)
            .bind(opt_to_millis(source.last_crawl))
            .bind(to_millis(source.created_at))
            .bind(to_millis(source.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(source)
    }

    async fn get(&self, id: SourceId) -> Result<Option<Source>> {
        debug!(target: "repository", %id, "fetching source by id");
        let row = sqlx::query("SELECT * FROM sources WHERE id = ? LIMIT 1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_source(&r)).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Source>> {
        debug!(target: "repository", limit, offset, "listing sources");
        let rows = sqlx::query("SELECT * FROM sources ORDER BY name LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_source).collect()
    }

    async fn list_active(&self) -> Result<Vec<Source>> {
        debug!(target: "repository", "listing active sources");
        let rows = sqlx::query("SELECT * FROM sources WHERE active = 1 ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_source).collect()
    }

    async fn update(&self, source: Source) -> Result<Source> {
        debug!(target: "repository", source_id = %source.id, "updating source");
        let q = r#"
            UPDATE sources SET
                name = ?,
                kind = ?,
                key = ?,
                directory = ?,
                index_schedule_secs = ?,
                download_media = ?,
                write_nfo = ?,
                copy_thumbnails = ?,
                delete_removed_media = ?,
                days_to_keep = ?,
                active = ?,
                has_failed = ?,
                last_crawl = ?,
                updated_at = ?
            WHERE id = ?
        "#;
        let result = sqlx::query(q)
            .bind(&source.name)
            .bind(source.kind.to_string())
            .bind(&source.key)
            .bind(&source.directory)
            .bind(source.index_schedule_secs)
            .bind(source.download_media)
            .bind(source.write_nfo)
            .bind(source.copy_thumbnails)
            .bind(source.delete_removed_media)
            .bind(source.days_to_keep.map(i64::from))
            .bind(source.active)
            .bind(source.has_failed)
            .bind(opt_to_millis(source.last_crawl))
            .bind(to_millis(source.updated_at))
            .bind(source.id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("source {} not found", source.id));
        }
        Ok(source)
    }

    async fn set_has_failed(&self, id: SourceId, has_failed: bool) -> Result<()> {
        debug!(target: "repository", %id, has_failed, "flagging source");
        sqlx::query("UPDATE sources SET has_failed = ?, updated_at = ? WHERE id = ?")
            .bind(has_failed)
            .bind(to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn deactivate_in(&self, conn: &mut SqliteConnection, id: SourceId) -> Result<bool> {
        debug!(target: "repository", %id, "deactivating source");
        let result = sqlx::query(
            "UPDATE sources SET active = 0, download_media = 0, write_nfo = 0, copy_thumbnails = 0, updated_at = ? WHERE id = ?",
        )
        .bind(to_millis(Utc::now()))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_in(&self, conn: &mut SqliteConnection, id: SourceId) -> Result<()> {
        debug!(target: "repository", %id, "deleting source");
        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// SQLx-backed Media repository
pub struct SqliteMediaRepository {
    pool: SqlitePool,
}

impl SqliteMediaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert(&self, media: &Media) -> Result<()> {
        let q = r#"
            INSERT INTO media (
                id, source_id, key, title, description, uploader, duration_secs, published,
                thumbnail_url, categories, skip, downloaded, download_date, media_path,
                filesize, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;
        sqlx::query(q)
            .bind(media.id.to_string())
            .bind(media.source_id.to_string())
            .bind(&media.key)
            .bind(&media.title)
            .bind(&media.description)
            .bind(&media.uploader)
            .bind(media.duration_secs)
            .bind(opt_to_millis(media.published))
            .bind(&media.thumbnail_url)
            .bind(serde_json::to_string(&media.categories)?)
            .bind(media.skip)
            .bind(media.downloaded)
            .bind(opt_to_millis(media.download_date))
            .bind(&media.media_path)
            .bind(media.filesize)
            .bind(to_millis(media.created_at))
            .bind(to_millis(media.updated_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MediaRepository for SqliteMediaRepository {
    async fn get(&self, id: MediaId) -> Result<Option<Media>> {
        debug!(target: "repository", %id, "fetching media by id");
        let row = sqlx::query("SELECT * FROM media WHERE id = ? LIMIT 1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_media(&r)).transpose()
    }

    async fn get_by_key(&self, source_id: SourceId, key: &str) -> Result<Option<Media>> {
        debug!(target: "repository", %source_id, key, "fetching media by key");
        let row = sqlx::query("SELECT * FROM media WHERE source_id = ? AND key = ? LIMIT 1")
            .bind(source_id.to_string())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_media(&r)).transpose()
    }

    async fn upsert(&self, source_id: SourceId, info: &MediaInfo) -> Result<(Media, bool)> {
        match self.get_by_key(source_id, &info.key).await? {
            Some(mut existing) => {
                existing.apply_info(info);
                Ok((self.update(existing).await?, false))
            }
            None => {
                debug!(target: "repository", %source_id, key = %info.key, "creating media");
                let mut media = Media::new(source_id, info.key.clone());
                media.apply_info(info);
                self.insert(&media).await?;
                Ok((media, true))
            }
        }
    }

    async fn update(&self, media: Media) -> Result<Media> {
        debug!(target: "repository", media_id = %media.id, "updating media");
        let q = r#"
            UPDATE media SET
                title = ?,
                description = ?,
                uploader = ?,
                duration_secs = ?,
                published = ?,
                thumbnail_url = ?,
                categories = ?,
                skip = ?,
                downloaded = ?,
                download_date = ?,
                media_path = ?,
                filesize = ?,
                updated_at = ?
            WHERE id = ?
        "#;
        let result = sqlx::query(q)
            .bind(&media.title)
            .bind(&media.description)
            .bind(&media.uploader)
            .bind(media.duration_secs)
            .bind(opt_to_millis(media.published))
            .bind(&media.thumbnail_url)
            .bind(serde_json::to_string(&media.categories)?)
            .bind(media.skip)
            .bind(media.downloaded)
            .bind(opt_to_millis(media.download_date))
            .bind(&media.media_path)
            .bind(media.filesize)
            .bind(to_millis(media.updated_at))
            .bind(media.id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("media {} not found", media.id));
        }
        Ok(media)
    }

    async fn list_by_source(&self, source_id: SourceId) -> Result<Vec<Media>> {
        debug!(target: "repository", %source_id, "listing media by source");
        let rows = sqlx::query("SELECT * FROM media WHERE source_id = ? ORDER BY created_at")
            .bind(source_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_media).collect()
    }

    async fn list_downloaded_before(
        &self,
        source_id: SourceId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Media>> {
        let rows = sqlx::query(
            "SELECT * FROM media WHERE source_id = ? AND downloaded = 1 AND download_date < ? ORDER BY download_date",
        )
        .bind(source_id.to_string())
        .bind(to_millis(cutoff))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_media).collect()
    }

    async fn set_skip(&self, id: MediaId, skip: bool) -> Result<()> {
        debug!(target: "repository", %id, skip, "setting media skip");
        sqlx::query("UPDATE media SET skip = ?, updated_at = ? WHERE id = ?")
            .bind(skip)
            .bind(to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: MediaId) -> Result<()> {
        debug!(target: "repository", %id, "deleting media");
        sqlx::query("DELETE FROM media WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_source_in(
        &self,
        conn: &mut SqliteConnection,
        source_id: SourceId,
    ) -> Result<u64> {
        debug!(target: "repository", %source_id, "deleting media of source");
        let result = sqlx::query("DELETE FROM media WHERE source_id = ?")
            .bind(source_id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| anyhow!("invalid uuid '{}': {}", s, e))
}

fn row_to_source(row: &SqliteRow) -> Result<Source> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let days_to_keep: Option<i64> = row.try_get("days_to_keep")?;

    Ok(Source {
        id: SourceId::from_uuid(parse_uuid(&id)?),
        name: row.try_get("name")?,
        kind: kind.parse::<SourceKind>().map_err(|e| anyhow!(e))?,
        key: row.try_get("key")?,
        directory: row.try_get("directory")?,
        index_schedule_secs: row.try_get("index_schedule_secs")?,
        download_media: row.try_get("download_media")?,
        write_nfo: row.try_get("write_nfo")?,
        copy_thumbnails: row.try_get("copy_thumbnails")?,
        delete_removed_media: row.try_get("delete_removed_media")?,
        days_to_keep: days_to_keep.map(u32::try_from).transpose()?,
        active: row.try_get("active")?,
        has_failed: row.try_get("has_failed")?,
        last_crawl: opt_from_millis(row.try_get("last_crawl")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn row_to_media(row: &SqliteRow) -> Result<Media> {
    let id: String = row.try_get("id")?;
    let source_id: String = row.try_get("source_id")?;
    let categories: String = row.try_get("categories")?;

    Ok(Media {
        id: MediaId::from_uuid(parse_uuid(&id)?),
        source_id: SourceId::from_uuid(parse_uuid(&source_id)?),
        key: row.try_get("key")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        uploader: row.try_get("uploader")?,
        duration_secs: row.try_get("duration_secs")?,
        published: opt_from_millis(row.try_get("published")?)?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        categories: serde_json::from_str(&categories)?,
        skip: row.try_get("skip")?,
        downloaded: row.try_get("downloaded")?,
        download_date: opt_from_millis(row.try_get("download_date")?)?,
        media_path: row.try_get("media_path")?,
        filesize: row.try_get("filesize")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}
