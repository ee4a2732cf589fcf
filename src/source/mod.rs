//! Third-party metadata source.
//!
//! `MetadataSource` returns entries already normalized into library models.
//! The production implementation is [`MangaDexClient`], which also looks up
//! banner images on AniList; tests script their own.

mod anilist;
mod mangadex;

pub use anilist::AniListClient;
pub use mangadex::MangaDexClient;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::models::{Chapter, Manga, Tag};

/// Search parameters accepted by the browse listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub included_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excluded_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ratings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

/// Default page size of a browse search
pub const DEFAULT_SEARCH_LIMIT: u32 = 36;

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub entries: Vec<Manga>,
    pub limit: u32,
    pub offset: u32,
    pub total: u32,
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn manga(&self, id: &str) -> Result<Manga>;

    /// One chapter including its page list
    async fn chapter(&self, id: &str) -> Result<Chapter>;

    /// Every chapter of a title in one language, all feed pages concatenated
    async fn chapter_feed(&self, manga_id: &str, language: &str) -> Result<Vec<Chapter>>;

    async fn tags(&self) -> Result<Vec<Tag>>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage>;

    /// Banner image for an AniList media id (the `al` link of a title)
    async fn banner(&self, _anilist_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Paces callers to a fixed request rate.
///
/// Each caller reserves the next free slot under the lock and then sleeps
/// until it, so concurrent callers queue up instead of bursting.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn per_second(requests: u32) -> Self {
        Self::new(Duration::from_secs(1) / requests.max(1))
    }

    /// Wait for this caller's slot
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
