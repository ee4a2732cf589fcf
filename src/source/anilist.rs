//! AniList GraphQL lookups (banner images only)

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::RateLimiter;
use crate::error::{HubError, Result};

/// AniList allows 90 requests per minute
const REQUEST_INTERVAL: Duration = Duration::from_millis(60_000 / 90);

const BANNER_QUERY: &str = "query ($id: Int) { Media (id: $id, type: MANGA) { bannerImage } }";

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: MediaVariables,
}

#[derive(Serialize)]
struct MediaVariables {
    id: u64,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<MediaData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct MediaData {
    #[serde(rename = "Media")]
    media: Option<Media>,
}

#[derive(Deserialize)]
struct Media {
    #[serde(rename = "bannerImage")]
    banner_image: Option<String>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

pub struct AniListClient {
    client: reqwest::Client,
    url: String,
    limiter: RateLimiter,
}

impl AniListClient {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
            limiter: RateLimiter::new(REQUEST_INTERVAL),
        }
    }

    /// Banner image URL of an AniList media entry; `None` if it has none
    pub async fn banner(&self, media_id: &str) -> Result<Option<String>> {
        let id: u64 = media_id.trim().parse().map_err(|_| HubError::InvalidId {
            id: media_id.to_string(),
        })?;
        self.limiter.acquire().await;

        let request = GraphQlRequest {
            query: BANNER_QUERY,
            variables: MediaVariables { id },
        };
        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let parsed: GraphQlResponse = serde_json::from_slice(&body).map_err(|_| HubError::Upstream {
            message: format!("AniList returned {}", status),
        })?;
        if let Some(err) = parsed.errors.first() {
            return Err(HubError::Upstream {
                message: format!("AniList: {}", err.message),
            });
        }

        Ok(parsed
            .data
            .and_then(|d| d.media)
            .and_then(|m| m.banner_image)
            .filter(|banner| !banner.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Json;
    use serde_json::{json, Value};

    async fn graphql(Json(request): Json<Value>) -> Json<Value> {
        match request["variables"]["id"].as_u64() {
            Some(97852) => Json(json!({
                "data": {"Media": {"bannerImage": "https://img.anili.st/97852.jpg"}}
            })),
            Some(1) => Json(json!({"data": {"Media": {"bannerImage": null}}})),
            _ => Json(json!({"data": {"Media": null}, "errors": [{"message": "Not Found."}]})),
        }
    }

    async fn fake_anilist() -> String {
        let app = axum::Router::new().route("/", post(graphql));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_banner_lookup() {
        let client = AniListClient::new(reqwest::Client::new(), &fake_anilist().await);

        let banner = client.banner("97852").await.unwrap();
        assert_eq!(banner.as_deref(), Some("https://img.anili.st/97852.jpg"));
        assert_eq!(client.banner("1").await.unwrap(), None);

        let err = client.banner("404").await.unwrap_err();
        assert_eq!(err.to_string(), "Upstream error: AniList: Not Found.");
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_rejected() {
        let client = AniListClient::new(reqwest::Client::new(), "http://127.0.0.1:9/");
        let err = client.banner("frieren").await.unwrap_err();
        assert!(matches!(err, HubError::InvalidId { .. }));
    }
}
