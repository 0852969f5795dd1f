// SPDX-License-Identifier: GPL-3.0-or-later
//! Kodi-style `<episodedetails>` sidecar files.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use syncarr_domain::{Media, Source};
use tracing::debug;

#[derive(Serialize)]
#[serde(rename = "episodedetails")]
struct EpisodeDetails<'a> {
    title: &'a str,
    showtitle: &'a str,
    plot: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime: Option<i64>,
    id: &'a str,
    uniqueid: UniqueId<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    studio: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aired: Option<String>,
    dateadded: String,
    genre: &'a [String],
}

#[derive(Serialize)]
struct UniqueId<'a> {
    #[serde(rename = "@type")]
    kind: &'static str,
    #[serde(rename = "@default")]
    default: bool,
    #[serde(rename = "$text")]
    value: &'a str,
}

pub fn render_nfo(media: &Media, source: &Source) -> Result<String> {
    let details = EpisodeDetails {
        title: &media.title,
        showtitle: &source.name,
        plot: &media.description,
        // Runtime is in whole minutes
        runtime: media
            .duration_secs
            .map(|secs| (secs / 60.0).round() as i64)
            .filter(|m| *m > 0),
        id: &media.key,
        uniqueid: UniqueId {
            kind: "youtube",
            default: true,
            value: &media.key,
        },
        studio: media.uploader.as_deref(),
        aired: media.published.map(|p| p.format("%Y-%m-%d").to_string()),
        dateadded: media
            .download_date
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        genre: &media.categories,
    };
    let body = quick_xml::se::to_string(&details).context("serializing nfo")?;
    Ok(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n{}\n",
        body
    ))
}

/// Write `contents` to `path` through a temporary file and a rename.
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut file =
            fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(contents.as_ref())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    debug!(target: "nfo", path = %path.display(), "sidecar written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncarr_domain::{MediaInfo, SourceKind};

    fn sample() -> (Media, Source) {
        let source = Source::new("Cooking & Co", SourceKind::Channel, "UC1", "cooking");
        let mut media = Media::new(source.id, "abc123");
        media.apply_info(&MediaInfo {
            key: "abc123".into(),
            title: "Bread".into(),
            description: "How to bake".into(),
            uploader: Some("Chef".into()),
            duration_secs: Some(600.0),
            categories: vec!["Food".into(), "Howto".into()],
            ..Default::default()
        });
        (media, source)
    }

    #[test]
    fn renders_episode_details() {
        let (media, source) = sample();
        let xml = render_nfo(&media, &source).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<episodedetails>"));
        assert!(xml.contains("<title>Bread</title>"));
        assert!(xml.contains("<showtitle>Cooking &amp; Co</showtitle>"));
        assert!(xml.contains("<runtime>10</runtime>"));
        assert!(xml.contains("<genre>Food</genre><genre>Howto</genre>"));
        assert!(xml.contains(r#"<uniqueid type="youtube" default="true">abc123</uniqueid>"#));
        assert!(!xml.contains("<aired>"));
    }

    #[test]
    fn atomic_write_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode.nfo");
        write_atomic(&path, "<episodedetails/>").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<episodedetails/>");
        assert!(!dir.path().join("episode.nfo.tmp").exists());
    }

    #[test]
    fn atomic_write_takes_binary_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode.jpg");
        write_atomic(&path, [0xff_u8, 0xd8, 0xff]).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![0xff, 0xd8, 0xff]);
        assert!(!dir.path().join("episode.jpg.tmp").exists());
    }
}
