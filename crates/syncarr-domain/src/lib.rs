// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ============================================================================
// Value Objects & IDs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaId(pub Uuid);

impl MediaId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for MediaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MediaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Channel,
    Playlist,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Channel => write!(f, "channel"),
            Self::Playlist => write!(f, "playlist"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel" => Ok(Self::Channel),
            "playlist" => Ok(Self::Playlist),
            other => Err(format!("unknown source kind: {}", other)),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A remote content origin that periodically contributes media items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub kind: SourceKind,
    /// Remote identifier of the channel or playlist
    pub key: String,
    /// Directory relative to the download root
    pub directory: String,
    pub index_schedule_secs: i64,
    pub download_media: bool,
    pub write_nfo: bool,
    /// Save each item's thumbnail next to the downloaded file
    pub copy_thumbnails: bool,
    pub delete_removed_media: bool,
    pub days_to_keep: Option<u32>,
    pub active: bool,
    pub has_failed: bool,
    pub last_crawl: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn new(
        name: impl Into<String>,
        kind: SourceKind,
        key: impl Into<String>,
        directory: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SourceId::new(),
            name: name.into(),
            kind,
            key: key.into(),
            directory: directory.into(),
            index_schedule_secs: 24 * 60 * 60,
            download_media: true,
            write_nfo: false,
            copy_thumbnails: false,
            delete_removed_media: false,
            days_to_keep: None,
            active: true,
            has_failed: false,
            last_crawl: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn url(&self) -> String {
        match self.kind {
            SourceKind::Channel => format!("https://www.youtube.com/channel/{}/videos", self.key),
            SourceKind::Playlist => {
                format!("https://www.youtube.com/playlist?list={}", self.key)
            }
        }
    }

    pub fn directory_path(&self, download_root: &Path) -> PathBuf {
        download_root.join(&self.directory)
    }

    pub fn index_interval(&self) -> Duration {
        Duration::seconds(self.index_schedule_secs.max(60))
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop the source from touching the disk or media servers.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.download_media = false;
        self.write_nfo = false;
        self.copy_thumbnails = false;
        self.updated_at = Utc::now();
    }

    /// Cut-off before which downloaded media expires, if the source keeps media for a limited time.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.days_to_keep {
            Some(days) if days > 0 => Some(now - Duration::days(days as i64)),
            _ => None,
        }
    }
}

/// A single content item discovered from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: MediaId,
    pub source_id: SourceId,
    pub key: String,
    pub title: String,
    pub description: String,
    pub uploader: Option<String>,
    pub duration_secs: Option<f64>,
    pub published: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
    pub categories: Vec<String>,
    pub skip: bool,
    pub downloaded: bool,
    pub download_date: Option<DateTime<Utc>>,
    pub media_path: Option<String>,
    pub filesize: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Media {
    pub fn new(source_id: SourceId, key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MediaId::new(),
            source_id,
            key: key.into(),
            title: String::new(),
            description: String::new(),
            uploader: None,
            duration_secs: None,
            published: None,
            thumbnail_url: None,
            categories: Vec::new(),
            skip: false,
            downloaded: false,
            download_date: None,
            media_path: None,
            filesize: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.key)
    }

    /// Copy the indexed metadata onto this record.
    pub fn apply_info(&mut self, info: &MediaInfo) {
        self.title = info.title.chars().take(200).collect();
        self.description = info.description.clone();
        self.uploader = info.uploader.clone();
        self.duration_secs = info.duration_secs.filter(|d| *d > 0.0);
        if info.published.is_some() {
            self.published = info.published;
        }
        self.thumbnail_url = info.thumbnail_url.clone();
        self.categories = info.categories.clone();
        self.updated_at = Utc::now();
    }

    pub fn file_exists(&self) -> bool {
        self.media_path
            .as_deref()
            .map(|p| Path::new(p).is_file())
            .unwrap_or(false)
    }

    /// Sidecar NFO path next to the downloaded file.
    pub fn nfo_path(&self) -> Option<PathBuf> {
        self.media_path
            .as_deref()
            .map(|p| Path::new(p).with_extension("nfo"))
    }

    /// Sidecar thumbnail path next to the downloaded file.
    pub fn thumbnail_path(&self) -> Option<PathBuf> {
        self.media_path
            .as_deref()
            .map(|p| Path::new(p).with_extension("jpg"))
    }

    pub fn mark_downloaded(&mut self, path: impl Into<String>, filesize: Option<i64>) {
        let now = Utc::now();
        self.downloaded = true;
        self.download_date = Some(now);
        self.media_path = Some(path.into());
        self.filesize = filesize;
        self.updated_at = now;
    }
}

/// Metadata returned by the extractor for one remote item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub key: String,
    pub title: String,
    pub description: String,
    pub uploader: Option<String>,
    pub duration_secs: Option<f64>,
    pub published: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
    pub categories: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_round_trips_through_display() {
        for kind in [SourceKind::Channel, SourceKind::Playlist] {
            assert_eq!(kind.to_string().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("podcast".parse::<SourceKind>().is_err());
    }

    #[test]
    fn deactivate_stops_disk_activity() {
        let mut source = Source::new("Test", SourceKind::Channel, "UC123", "test");
        source.write_nfo = true;
        source.copy_thumbnails = true;
        source.deactivate();
        assert!(!source.is_active());
        assert!(!source.download_media);
        assert!(!source.write_nfo);
        assert!(!source.copy_thumbnails);
    }

    #[test]
    fn directory_path_is_under_root() {
        let source = Source::new("Test", SourceKind::Playlist, "PL1", "shows/test");
        let path = source.directory_path(Path::new("/data"));
        assert_eq!(path, PathBuf::from("/data/shows/test"));
        assert!(source.url().contains("list=PL1"));
    }

    #[test]
    fn retention_cutoff_requires_positive_days() {
        let mut source = Source::new("Test", SourceKind::Channel, "UC1", "t");
        let now = Utc::now();
        assert!(source.retention_cutoff(now).is_none());
        source.days_to_keep = Some(0);
        assert!(source.retention_cutoff(now).is_none());
        source.days_to_keep = Some(3);
        assert_eq!(source.retention_cutoff(now), Some(now - Duration::days(3)));
    }

    #[test]
    fn index_interval_has_a_floor() {
        let mut source = Source::new("Test", SourceKind::Channel, "UC1", "t");
        source.index_schedule_secs = 5;
        assert_eq!(source.index_interval(), Duration::seconds(60));
    }

    #[test]
    fn apply_info_truncates_title_and_keeps_published() {
        let mut media = Media::new(SourceId::new(), "abc");
        let published = Utc::now();
        media.published = Some(published);
        let info = MediaInfo {
            key: "abc".into(),
            title: "x".repeat(300),
            duration_secs: Some(0.0),
            ..Default::default()
        };
        media.apply_info(&info);
        assert_eq!(media.title.len(), 200);
        assert_eq!(media.published, Some(published));
        assert_eq!(media.duration_secs, None);
    }

    #[test]
    fn nfo_path_follows_media_path() {
        let mut media = Media::new(SourceId::new(), "abc");
        assert!(media.nfo_path().is_none());
        media.mark_downloaded("/data/show/episode.mkv", Some(10));
        assert_eq!(media.nfo_path(), Some(PathBuf::from("/data/show/episode.nfo")));
        assert_eq!(media.thumbnail_path(), Some(PathBuf::from("/data/show/episode.jpg")));
        assert!(media.downloaded);
    }
}
