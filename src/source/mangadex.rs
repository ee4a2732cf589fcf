//! MangaDex API client
//!
//! Fetches and normalizes:
//! - Title metadata (with cover, author and artist relationships)
//! - Chapter metadata and page lists (via the at-home endpoint)
//! - Per-title chapter feeds, paginated
//! - The tag catalog and title search
//!
//! Every request passes through a shared [`RateLimiter`]. Banner lookups are
//! delegated to [`AniListClient`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::{AniListClient, MetadataSource, RateLimiter, SearchPage, SearchQuery, DEFAULT_SEARCH_LIMIT};
use crate::config::SourceConfig;
use crate::error::{HubError, Result};
use crate::models::{Chapter, Entity, Manga, Tag};

/// Maximum page size of the chapter feed endpoint
const FEED_PAGE_SIZE: u32 = 100;

const CONTENT_RATINGS: [&str; 3] = ["safe", "suggestive", "erotica"];

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ApiError>,
    #[serde(default)]
    limit: u32,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    detail: String,
}

#[derive(Debug, Deserialize)]
struct MdManga {
    id: String,
    attributes: MdMangaAttributes,
    #[serde(default)]
    relationships: Vec<MdRelationship>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MdMangaAttributes {
    #[serde(default)]
    title: Value,
    #[serde(default)]
    description: Value,
    #[serde(default)]
    tags: Vec<MdTag>,
    #[serde(default)]
    links: Value,
    #[serde(default)]
    original_language: Option<String>,
    #[serde(default)]
    publication_demographic: Option<String>,
    #[serde(default)]
    content_rating: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MdChapter {
    id: String,
    attributes: MdChapterAttributes,
    #[serde(default)]
    relationships: Vec<MdRelationship>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MdChapterAttributes {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    volume: Option<String>,
    #[serde(default)]
    chapter: Option<String>,
    #[serde(default)]
    translated_language: Option<String>,
    #[serde(default)]
    external_url: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    publish_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MdRelationship {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MdTag {
    id: String,
    attributes: MdTagAttributes,
}

#[derive(Debug, Deserialize)]
struct MdTagAttributes {
    #[serde(default)]
    name: Value,
}

/// Response of `/at-home/server/{id}`; not wrapped in the usual envelope
#[derive(Debug, Deserialize)]
struct AtHomeResponse {
    #[serde(default)]
    chapter: Option<AtHomeChapter>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct AtHomeChapter {
    hash: String,
    #[serde(default)]
    data: Vec<String>,
}

/// Pick the English value of a localized string map, else any value.
/// MangaDex sends `[]` instead of `{}` for empty maps.
fn localized(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .get("en")
            .or_else(|| map.get("ja-ro"))
            .or_else(|| map.values().next())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

fn timestamp(raw: &Option<String>) -> i64 {
    raw.as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or_default()
}

fn relationship_name(rel: &MdRelationship, key: &str) -> String {
    rel.attributes
        .as_ref()
        .and_then(|attrs| attrs.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn validate_id(id: &str) -> Result<()> {
    if id.len() != 36 {
        return Err(HubError::InvalidId { id: id.to_string() });
    }
    Ok(())
}

impl MdManga {
    fn normalize(self) -> Manga {
        let attrs = self.attributes;
        let mut manga = Manga::new(self.id);
        manga.title = localized(&attrs.title);
        manga.description = localized(&attrs.description);
        manga.created_at = timestamp(&attrs.created_at);
        manga.updated_at = timestamp(&attrs.updated_at);
        manga.tags = attrs
            .tags
            .iter()
            .map(|t| localized(&t.attributes.name))
            .filter(|name| !name.is_empty())
            .collect();
        if let Value::Object(links) = attrs.links {
            manga.links = links
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                .collect::<BTreeMap<_, _>>();
        }
        manga.origin = attrs.original_language.unwrap_or_default();
        manga.demographic = attrs.publication_demographic.unwrap_or_default();
        manga.rating = attrs.content_rating.unwrap_or_default();
        manga.status = attrs.status.unwrap_or_default();

        for rel in &self.relationships {
            match rel.kind.as_str() {
                "cover_art" => manga.cover = relationship_name(rel, "fileName"),
                "author" => manga.authors.push(Entity {
                    id: rel.id.clone(),
                    name: relationship_name(rel, "name"),
                }),
                "artist" => manga.artists.push(Entity {
                    id: rel.id.clone(),
                    name: relationship_name(rel, "name"),
                }),
                _ => {}
            }
        }
        manga
    }
}

impl MdChapter {
    /// `None` when the chapter has no manga relationship
    fn normalize(self) -> Option<Chapter> {
        let manga_id = self
            .relationships
            .iter()
            .find(|r| r.kind == "manga")
            .map(|r| r.id.clone())?;

        let attrs = self.attributes;
        let groups = self
            .relationships
            .iter()
            .filter(|r| r.kind == "scanlation_group")
            .map(|r| Entity {
                id: r.id.clone(),
                name: relationship_name(r, "name"),
            })
            .collect();

        Some(Chapter {
            id: self.id,
            manga_id,
            created_at: timestamp(&attrs.created_at),
            publish_at: timestamp(&attrs.publish_at),
            updated_at: timestamp(&attrs.updated_at),
            title: attrs.title.unwrap_or_default(),
            volume: attrs.volume.unwrap_or_default(),
            chapter: attrs.chapter.unwrap_or_default(),
            language: attrs.translated_language.unwrap_or_default(),
            groups,
            external_url: attrs.external_url.unwrap_or_default(),
            ..Default::default()
        })
    }
}

/// Client for the MangaDex REST API
pub struct MangaDexClient {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    anilist: AniListClient,
}

impl MangaDexClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("mangahub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            anilist: AniListClient::new(client.clone(), &config.anilist_url),
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::per_second(config.requests_per_second),
        })
    }

    /// Rate-limited GET returning the decoded envelope, upstream errors mapped
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        entity: &'static str,
        id: &str,
    ) -> Result<ApiResponse<T>> {
        self.limiter.acquire().await;

        let url = format!("{}/{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let parsed: ApiResponse<T> = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(HubError::Upstream {
                    message: format!("{} returned {}", path, status),
                })
            }
        };

        if let Some(err) = parsed.errors.first() {
            if err.status == 404 {
                return Err(HubError::not_found(entity, id));
            }
            return Err(HubError::Upstream {
                message: err.detail.clone(),
            });
        }
        Ok(parsed)
    }

    async fn pages(&self, chapter_id: &str) -> Result<AtHomeChapter> {
        self.limiter.acquire().await;

        let url = format!("{}/at-home/server/{}", self.base_url, chapter_id);
        let response: AtHomeResponse = self.client.get(&url).send().await?.json().await?;
        if let Some(err) = response.errors.first() {
            return Err(HubError::Upstream {
                message: err.detail.clone(),
            });
        }
        response.chapter.ok_or_else(|| HubError::Upstream {
            message: format!("no page data for chapter {}", chapter_id),
        })
    }
}

#[async_trait]
impl MetadataSource for MangaDexClient {
    async fn manga(&self, id: &str) -> Result<Manga> {
        validate_id(id)?;
        let query = [
            ("includes[]", "cover_art".to_string()),
            ("includes[]", "author".to_string()),
            ("includes[]", "artist".to_string()),
        ];
        let response: ApiResponse<MdManga> =
            self.get(&format!("manga/{}", id), &query, "manga", id).await?;
        let data = response
            .data
            .ok_or_else(|| HubError::not_found("manga", id))?;
        Ok(data.normalize())
    }

    async fn chapter(&self, id: &str) -> Result<Chapter> {
        validate_id(id)?;
        let query = [("includes[]", "scanlation_group".to_string())];
        let response: ApiResponse<MdChapter> = self
            .get(&format!("chapter/{}", id), &query, "chapter", id)
            .await?;
        let mut chapter = response
            .data
            .and_then(MdChapter::normalize)
            .ok_or_else(|| HubError::not_found("chapter", id))?;

        // External chapters have no hosted pages
        if chapter.external_url.is_empty() {
            let pages = self.pages(id).await?;
            chapter.hash = pages.hash;
            chapter.pages = pages.data;
        }
        Ok(chapter)
    }

    async fn chapter_feed(&self, manga_id: &str, language: &str) -> Result<Vec<Chapter>> {
        validate_id(manga_id)?;
        let path = format!("manga/{}/feed", manga_id);
        let mut chapters = Vec::new();
        let mut offset = 0u32;

        loop {
            let mut query = vec![
                ("limit", FEED_PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
                ("translatedLanguage[]", language.to_string()),
                ("includes[]", "scanlation_group".to_string()),
                ("order[chapter]", "desc".to_string()),
            ];
            query.extend(CONTENT_RATINGS.iter().map(|r| ("contentRating[]", r.to_string())));

            let response: ApiResponse<Vec<MdChapter>> =
                self.get(&path, &query, "manga", manga_id).await?;
            let page = response.data.unwrap_or_default();
            let fetched = page.len() as u32;
            chapters.extend(page.into_iter().filter_map(MdChapter::normalize));

            offset = response.offset + response.limit.max(fetched);
            if fetched == 0 || offset >= response.total {
                break;
            }
        }

        tracing::debug!(manga = %manga_id, count = chapters.len(), "Fetched chapter feed");
        Ok(chapters)
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        let response: ApiResponse<Vec<MdTag>> = self.get("manga/tag", &[], "tag", "*").await?;
        Ok(response
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|t| Tag {
                name: localized(&t.attributes.name),
                id: t.id,
            })
            .collect())
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchPage> {
        let mut query = vec![
            ("limit", q.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).to_string()),
            ("offset", q.offset.unwrap_or(0).to_string()),
            ("includes[]", "cover_art".to_string()),
        ];
        if !q.title.is_empty() {
            query.push(("title", q.title.clone()));
        }
        query.extend(q.included_tags.iter().map(|t| ("includedTags[]", t.clone())));
        query.extend(q.excluded_tags.iter().map(|t| ("excludedTags[]", t.clone())));
        query.extend(q.origins.iter().map(|o| ("originalLanguage[]", o.clone())));
        query.extend(q.ratings.iter().map(|r| ("contentRating[]", r.clone())));
        query.extend(q.status.iter().map(|s| ("status[]", s.clone())));
        if let Some(sort) = &q.sort {
            let order = q.order.clone().unwrap_or_else(|| "desc".to_string());
            query.push((sort_key(sort), order));
        }

        let response: ApiResponse<Vec<MdManga>> = self.get("manga", &query, "manga", "*").await?;
        Ok(SearchPage {
            entries: response
                .data
                .unwrap_or_default()
                .into_iter()
                .map(MdManga::normalize)
                .collect(),
            limit: response.limit,
            offset: response.offset,
            total: response.total,
        })
    }

    async fn banner(&self, anilist_id: &str) -> Result<Option<String>> {
        self.anilist.banner(anilist_id).await
    }
}

/// Map a client sort name to the MangaDex `order[...]` parameter
fn sort_key(sort: &str) -> &'static str {
    match sort {
        "createdAt" => "order[createdAt]",
        "updatedAt" => "order[updatedAt]",
        "title" => "order[title]",
        "year" => "order[year]",
        "followedCount" => "order[followedCount]",
        "relevance" => "order[relevance]",
        _ => "order[latestUploadedChapter]",
    }
}
