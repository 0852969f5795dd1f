// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use syncarr_config::ExtractorConfig;
use syncarr_domain::MediaInfo;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// What the extraction tool is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractTarget {
    /// List every item of a channel or playlist without downloading.
    Index { url: String },
    /// Full metadata of one item, without downloading it.
    Metadata { url: String },
    /// Download one item into `output_dir`.
    Download { url: String, output_dir: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractOutput {
    Listing(Vec<MediaInfo>),
    Metadata(MediaInfo),
    Downloaded { path: PathBuf, filesize: Option<i64> },
}

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("remote content unavailable: {0}")]
    RemoteContent(String),
    #[error("extractor exited with status {status:?}: {stderr}")]
    ToolFailed { status: Option<i32>, stderr: String },
    #[error("failed to launch extractor '{command}': {message}")]
    Launch { command: String, message: String },
    #[error("unexpected extractor output: {0}")]
    Output(String),
}

impl ExtractorError {
    /// Permanent errors will not go away by retrying.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::RemoteContent(_))
    }
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn fetch_or_download(&self, target: &ExtractTarget) -> Result<ExtractOutput, ExtractorError>;
}

/// Drives a `yt-dlp` compatible command line tool.
pub struct YtDlpExtractor {
    config: ExtractorConfig,
}

impl YtDlpExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    fn index_args(&self, url: &str) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.extend(
            ["--flat-playlist", "--dump-json", "--no-warnings"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(url.to_string());
        args
    }

    fn metadata_args(&self, url: &str) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.extend(
            ["--dump-single-json", "--no-playlist", "--skip-download", "--no-warnings"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(url.to_string());
        args
    }

    fn download_args(&self, url: &str, output_dir: &Path) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.extend(
            ["--no-progress", "--print", "after_move:filepath", "-o", "%(id)s.%(ext)s", "-P"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(output_dir.to_string_lossy().into_owned());
        args.extend(self.config.extra_args.iter().cloned());
        args.push(url.to_string());
        args
    }

    async fn run(&self, args: &[String]) -> Result<String, ExtractorError> {
        debug!(target: "extractor", command = %self.config.command, ?args, "invoking extractor");
        let output = Command::new(&self.config.command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractorError::Launch {
                command: self.config.command.clone(),
                message: e.to_string(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            if is_remote_content_error(&stderr) {
                return Err(ExtractorError::RemoteContent(stderr));
            }
            return Err(ExtractorError::ToolFailed {
                status: output.status.code(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            debug!(target: "extractor", %stderr, "extractor reported diagnostics");
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn fetch_or_download(&self, target: &ExtractTarget) -> Result<ExtractOutput, ExtractorError> {
        match target {
            ExtractTarget::Index { url } => {
                let stdout = self.run(&self.index_args(url)).await?;
                Ok(ExtractOutput::Listing(parse_listing(&stdout)?))
            }
            ExtractTarget::Metadata { url } => {
                let stdout = self.run(&self.metadata_args(url)).await?;
                Ok(ExtractOutput::Metadata(parse_metadata(&stdout)?))
            }
            ExtractTarget::Download { url, output_dir } => {
                tokio::fs::create_dir_all(output_dir)
                    .await
                    .map_err(|e| ExtractorError::Output(format!("{}: {}", output_dir.display(), e)))?;
                let stdout = self.run(&self.download_args(url, output_dir)).await?;
                let path = stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .last()
                    .map(PathBuf::from)
                    .ok_or_else(|| ExtractorError::Output("no output file reported".into()))?;
                let filesize = match tokio::fs::metadata(&path).await {
                    Ok(meta) => i64::try_from(meta.len()).ok(),
                    Err(e) => {
                        warn!(target: "extractor", path = %path.display(), error = %e, "downloaded file not found");
                        None
                    }
                };
                Ok(ExtractOutput::Downloaded { path, filesize })
            }
        }
    }
}

/// Whether the tool's error output describes content that is gone or inaccessible.
pub fn is_remote_content_error(stderr: &str) -> bool {
    const MARKERS: &[&str] = &[
        "video unavailable",
        "this video is unavailable",
        "private video",
        "has been removed",
        "members-only",
        "join this channel",
        "http error 403",
        "http error 404",
    ];
    let lower = stderr.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    upload_date: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    categories: Option<Vec<String>>,
}

impl From<ListingEntry> for MediaInfo {
    fn from(entry: ListingEntry) -> Self {
        let published = entry
            .timestamp
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .or_else(|| entry.upload_date.as_deref().and_then(parse_upload_date));
        MediaInfo {
            key: entry.id,
            title: entry.title.unwrap_or_default(),
            description: entry.description.unwrap_or_default(),
            uploader: entry.uploader.or(entry.channel),
            duration_secs: entry.duration,
            published,
            thumbnail_url: entry.thumbnail,
            categories: entry.categories.unwrap_or_default(),
        }
    }
}

fn parse_upload_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Parse `--dump-json` output: one JSON document per line.
pub fn parse_listing(stdout: &str) -> Result<Vec<MediaInfo>, ExtractorError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str::<ListingEntry>(line)
                .map(MediaInfo::from)
                .map_err(|e| ExtractorError::Output(e.to_string()))
        })
        .collect()
}

/// Parse `--dump-single-json` output for one item.
pub fn parse_metadata(stdout: &str) -> Result<MediaInfo, ExtractorError> {
    serde_json::from_str::<ListingEntry>(stdout.trim())
        .map(MediaInfo::from)
        .map_err(|e| ExtractorError::Output(e.to_string()))
}
