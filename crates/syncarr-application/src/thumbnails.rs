// SPDX-License-Identifier: GPL-3.0-or-later
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image request failed: {0}")]
    Request(String),
    #[error("image server responded with status {0}")]
    HttpStatus(u16),
    #[error("response is not an image: {0}")]
    NotAnImage(String),
}

impl ImageError {
    /// A missing or forbidden image will not appear by retrying.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::HttpStatus(status) => matches!(
                StatusCode::from_u16(*status),
                Ok(StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::GONE)
            ),
            Self::NotAnImage(_) => true,
            Self::Request(_) => false,
        }
    }
}

/// Fetches remote artwork.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError>;
}

pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        debug!(target: "thumbnails", url, "fetching image");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImageError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::HttpStatus(status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.is_empty() && !content_type.starts_with("image/") {
            return Err(ImageError::NotAnImage(content_type));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ImageError::Request(e.to_string()))?;
        Ok(body.to_vec())
    }
}
