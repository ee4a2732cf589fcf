//! Write-through disk cache in front of the remote image host.
//!
//! `fetch("covers/abc/cover.jpg")` serves `<root>/covers/abc/cover.jpg` when it
//! exists and otherwise fetches `<upstream>/covers/abc/cover.jpg`, storing a
//! successful body on disk before returning it. Failed upstream responses are
//! relayed but never stored.

use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use axum::body::Bytes;
use reqwest::header::CONTENT_TYPE;

use crate::config::SourceConfig;
use crate::error::{HubError, Result};
use crate::fs_utils;

/// A response ready to relay to the client
#[derive(Debug, Clone)]
pub struct Asset {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
    /// Served from the disk cache
    pub cached: bool,
}

pub struct AssetCache {
    root: PathBuf,
    upstream: String,
    client: reqwest::Client,
}

impl AssetCache {
    pub fn new(root: PathBuf, config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("mangahub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(root, &config.assets_url, client))
    }

    pub fn with_client(root: PathBuf, upstream: &str, client: reqwest::Client) -> Self {
        Self {
            root,
            upstream: upstream.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache location for a request path; only plain relative segments are accepted
    pub fn local_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !plain {
            return Err(HubError::invalid_request(format!("invalid asset path: {}", path)));
        }
        Ok(self.root.join(relative))
    }

    pub async fn fetch(&self, path: &str) -> Result<Asset> {
        let local = self.local_path(path)?;

        if let Ok(meta) = tokio::fs::metadata(&local).await {
            if meta.is_file() {
                let body = tokio::fs::read(&local).await?;
                return Ok(Asset {
                    status: 200,
                    content_type: mime_guess::from_path(&local)
                        .first_or_octet_stream()
                        .to_string(),
                    body: Bytes::from(body),
                    cached: true,
                });
            }
        }

        let start = Instant::now();
        let url = format!("{}/{}", self.upstream, path);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| {
                mime_guess::from_path(&local)
                    .first_or_octet_stream()
                    .to_string()
            });
        let body = response.bytes().await?;

        tracing::debug!(
            path = %path,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fetched asset upstream"
        );

        if status.is_success() {
            let data = body.clone();
            let target = local.clone();
            match tokio::task::spawn_blocking(move || fs_utils::write_atomic(&target, &data)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(path = %local.display(), "Failed to cache asset: {}", e)
                }
                Err(e) => tracing::warn!(path = %local.display(), "Asset write task failed: {}", e),
            }
        }

        Ok(Asset {
            status: status.as_u16(),
            content_type,
            body,
            cached: false,
        })
    }
}
