// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Url};
use syncarr_config::{MediaServerConfig, MediaServerKind};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MediaServerError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
    #[error("media server responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

/// A media server that can be told to rescan its libraries.
#[async_trait]
pub trait MediaServerNotifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify_library_update(&self) -> Result<(), MediaServerError>;
}

fn endpoint(base_url: &str, path: &str) -> Result<Url, MediaServerError> {
    Url::parse(&format!("{}{}", base_url, path))
        .map_err(|err| MediaServerError::InvalidBaseUrl(err.to_string()))
}

async fn check_response(response: reqwest::Response) -> Result<(), MediaServerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response
        .text()
        .await
        .map_err(|e| MediaServerError::Request(e.to_string()))?;
    Err(MediaServerError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

pub struct PlexNotifier {
    client: Client,
    name: String,
    base_url: String,
    token: String,
    libraries: Vec<String>,
}

impl PlexNotifier {
    pub fn new(client: Client, config: &MediaServerConfig) -> Self {
        Self {
            client,
            name: config.name.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            libraries: config.libraries.clone(),
        }
    }
}

#[async_trait]
impl MediaServerNotifier for PlexNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify_library_update(&self) -> Result<(), MediaServerError> {
        let sections: Vec<&str> = if self.libraries.is_empty() {
            vec!["all"]
        } else {
            self.libraries.iter().map(String::as_str).collect()
        };
        for section in sections {
            let url = endpoint(&self.base_url, &format!("/library/sections/{}/refresh", section))?;
            debug!(target: "media_servers", server = %self.name, section, "refreshing plex library");
            let response = self
                .client
                .get(url)
                .query(&[("X-Plex-Token", self.token.as_str())])
                .send()
                .await
                .map_err(|e| MediaServerError::Request(e.to_string()))?;
            check_response(response).await?;
        }
        info!(target: "media_servers", server = %self.name, "plex libraries refreshed");
        Ok(())
    }
}

pub struct JellyfinNotifier {
    client: Client,
    name: String,
    base_url: String,
    token: String,
}

impl JellyfinNotifier {
    pub fn new(client: Client, config: &MediaServerConfig) -> Self {
        Self {
            client,
            name: config.name.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl MediaServerNotifier for JellyfinNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify_library_update(&self) -> Result<(), MediaServerError> {
        let url = endpoint(&self.base_url, "/Library/Refresh")?;
        let response = self
            .client
            .post(url)
            .header("X-Emby-Token", &self.token)
            .send()
            .await
            .map_err(|e| MediaServerError::Request(e.to_string()))?;
        check_response(response).await?;
        info!(target: "media_servers", server = %self.name, "jellyfin library refresh requested");
        Ok(())
    }
}

/// Build one notifier per configured media server.
pub fn build_notifiers(
    client: &Client,
    servers: &[MediaServerConfig],
) -> Vec<Arc<dyn MediaServerNotifier>> {
    servers
        .iter()
        .map(|server| -> Arc<dyn MediaServerNotifier> {
            match server.kind {
                MediaServerKind::Plex => Arc::new(PlexNotifier::new(client.clone(), server)),
                MediaServerKind::Jellyfin => Arc::new(JellyfinNotifier::new(client.clone(), server)),
            }
        })
        .collect()
}
