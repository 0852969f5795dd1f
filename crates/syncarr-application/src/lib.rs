// SPDX-License-Identifier: GPL-3.0-or-later
pub mod extractor;
pub mod media_servers;
pub mod nfo;
pub mod thumbnails;

pub use extractor::{ExtractOutput, ExtractTarget, ExtractorError, MediaExtractor, YtDlpExtractor};
pub use media_servers::{
    build_notifiers, JellyfinNotifier, MediaServerError, MediaServerNotifier, PlexNotifier,
};
pub use thumbnails::{HttpImageFetcher, ImageError, ImageFetcher};
