//! One handler per task.
//!
//! Handlers decode the request body, call into [`Services`] and return the
//! reply body as JSON. Errors are returned to the router, which puts their
//! text in the reply envelope. Listing reads run on the blocking pool since
//! a cold cache rebuilds from SQLite inline.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::router::AppContext;
use crate::error::{HubError, Result};
use crate::models::FollowState;
use crate::prefs::{BrowsePreference, LibraryPreference, ReaderPreference};
use crate::server::sync::interval_from_hours;
use crate::services::{RefreshMode, Services};
use crate::source::SearchQuery;

/// Common request body fields; each task reads the ones it needs
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Body {
    manga_id: Option<String>,
    chapter_id: Option<String>,
    chapter_ids: Vec<String>,
    page: Option<u32>,
    follow_state: Option<FollowState>,
}

fn decode<T: DeserializeOwned>(body: Option<Value>) -> Result<T> {
    let body = body.ok_or_else(|| HubError::invalid_request("missing body"))?;
    serde_json::from_value(body)
        .map_err(|e| HubError::invalid_request(format!("malformed body: {}", e)))
}

/// Bodies that carry a bare id string
fn bare_id(body: Option<Value>) -> Result<String> {
    match body {
        Some(Value::String(id)) if !id.is_empty() => Ok(id),
        _ => Err(HubError::invalid_request("expected an id string")),
    }
}

fn required(field: Option<String>, name: &str) -> Result<String> {
    field
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HubError::invalid_request(format!("missing {}", name)))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Run a store-backed read on the blocking pool; an empty cache builds inline
async fn blocking_read<F>(ctx: &Arc<AppContext>, read: F) -> Result<Value>
where
    F: FnOnce(&Services) -> Result<Value> + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    tokio::task::spawn_blocking(move || read(&ctx.services)).await?
}

// ============================================================================
// Manga
// ============================================================================

pub async fn get_manga(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let id = bare_id(body)?;
    to_json(&ctx.services.get_manga(&id)?)
}

pub async fn update_manga(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let body: Body = decode(body)?;
    let id = required(body.manga_id, "mangaId")?;
    to_json(&ctx.services.update_manga(&id, RefreshMode::Interactive).await?)
}

pub async fn follow_manga(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let body: Body = decode(body)?;
    let id = required(body.manga_id, "mangaId")?;
    let state = body.follow_state.unwrap_or(FollowState::Reading);
    to_json(&ctx.services.follow_manga(&id, state)?)
}

pub async fn unfollow_manga(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let id = bare_id(body)?;
    to_json(&ctx.services.unfollow_manga(&id)?)
}

// ============================================================================
// Chapters
// ============================================================================

pub async fn get_chapter(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let body: Body = decode(body)?;
    let id = required(body.chapter_id, "chapterId")?;
    to_json(&ctx.services.get_chapter(&id)?)
}

pub async fn update_chapter(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let body: Body = decode(body)?;
    let id = required(body.chapter_id, "chapterId")?;
    to_json(&ctx.services.update_chapter(&id).await?)
}

pub async fn get_chapters(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let manga_id = bare_id(body)?;
    to_json(&ctx.services.get_chapters(&manga_id)?)
}

pub async fn update_chapters(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let body: Body = decode(body)?;
    let manga_id = required(body.manga_id, "mangaId")?;
    to_json(
        &ctx.services
            .update_chapters(&manga_id, RefreshMode::Interactive)
            .await?,
    )
}

// ============================================================================
// Reading state
// ============================================================================

pub async fn read_page(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let body: Body = decode(body)?;
    let id = required(body.chapter_id, "chapterId")?;
    to_json(&ctx.services.read_page(&id, body.page.unwrap_or(0))?)
}

/// `chapterIds` wins over a single `chapterId`
fn chapter_ids(body: Body) -> Result<Vec<String>> {
    if !body.chapter_ids.is_empty() {
        return Ok(body.chapter_ids);
    }
    Ok(vec![required(body.chapter_id, "chapterId")?])
}

pub async fn read_chapter(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let ids = chapter_ids(decode(body)?)?;
    to_json(&ctx.services.set_read_state(&ids, true)?)
}

pub async fn unread_chapter(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let ids = chapter_ids(decode(body)?)?;
    to_json(&ctx.services.set_read_state(&ids, false)?)
}

// ============================================================================
// Listings
// ============================================================================

pub async fn library(ctx: Arc<AppContext>, _body: Option<Value>) -> Result<Value> {
    blocking_read(&ctx, |services| to_json(&*services.library()?)).await
}

pub async fn browse(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let query: SearchQuery = match body {
        None | Some(Value::Null) => SearchQuery::default(),
        body => decode(body)?,
    };
    to_json(&ctx.services.browse(query).await?)
}

pub async fn tags(ctx: Arc<AppContext>, _body: Option<Value>) -> Result<Value> {
    blocking_read(&ctx, |services| to_json(&*services.tags()?)).await
}

pub async fn updates(ctx: Arc<AppContext>, _body: Option<Value>) -> Result<Value> {
    blocking_read(&ctx, |services| to_json(&*services.updates()?)).await
}

pub async fn history(ctx: Arc<AppContext>, _body: Option<Value>) -> Result<Value> {
    blocking_read(&ctx, |services| to_json(&services.history()?)).await
}

// ============================================================================
// Preferences
// ============================================================================

pub async fn get_prefs(ctx: Arc<AppContext>, _body: Option<Value>) -> Result<Value> {
    to_json(&ctx.services.get_prefs())
}

pub async fn get_browse_preference(ctx: Arc<AppContext>, _body: Option<Value>) -> Result<Value> {
    to_json(&ctx.services.prefs().browse())
}

pub async fn get_library_preference(ctx: Arc<AppContext>, _body: Option<Value>) -> Result<Value> {
    to_json(&ctx.services.prefs().library())
}

pub async fn get_reader_preference(ctx: Arc<AppContext>, _body: Option<Value>) -> Result<Value> {
    to_json(&ctx.services.prefs().reader())
}

pub async fn update_browse_preference(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let browse: BrowsePreference = decode(body)?;
    to_json(&ctx.services.update_browse_prefs(browse)?)
}

pub async fn update_library_preference(
    ctx: Arc<AppContext>,
    body: Option<Value>,
) -> Result<Value> {
    let library: LibraryPreference = decode(body)?;
    let (saved, frequency_changed) = ctx.services.update_library_prefs(library)?;
    if frequency_changed {
        ctx.updater
            .reschedule(interval_from_hours(saved.update_frequency));
    }
    to_json(&saved)
}

pub async fn update_reader_preference(ctx: Arc<AppContext>, body: Option<Value>) -> Result<Value> {
    let reader: ReaderPreference = decode(body)?;
    to_json(&ctx.services.update_reader_prefs(reader)?)
}

// ============================================================================
// Library update
// ============================================================================

pub async fn update_library(ctx: Arc<AppContext>, _body: Option<Value>) -> Result<Value> {
    to_json(&ctx.updater.trigger())
}

pub async fn get_update_library_state(ctx: Arc<AppContext>, _body: Option<Value>) -> Result<Value> {
    to_json(&ctx.updater.state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::sync::LibraryUpdater;
    use crate::services::tests::{fixture, remote_manga, Fixture};
    use crate::socket_server::hub;
    use crate::store::LibraryStore;
    use serde_json::json;

    fn context() -> (Fixture, Arc<AppContext>) {
        let fx = fixture();
        let (hub, _task) = hub::spawn();
        let services = Arc::new(Services::new(
            fx.store.clone(),
            fx.source.clone(),
            Arc::clone(fx.services.caches()),
            Arc::clone(fx.services.prefs()),
        ));
        let updater = LibraryUpdater::new(Arc::clone(&services), hub);
        (fx, Arc::new(AppContext { services, updater }))
    }

    #[test]
    fn test_body_shapes() {
        assert_eq!(bare_id(Some(json!("abc"))).unwrap(), "abc");
        assert!(bare_id(Some(json!({"mangaId": "abc"}))).is_err());
        assert!(bare_id(None).is_err());

        let body: Body = decode(Some(json!({"chapterIds": ["a", "b"], "chapterId": "c"}))).unwrap();
        assert_eq!(chapter_ids(body).unwrap(), vec!["a", "b"]);
        let body: Body = decode(Some(json!({"chapterId": "c"}))).unwrap();
        assert_eq!(chapter_ids(body).unwrap(), vec!["c"]);
        let body: Body = decode(Some(json!({}))).unwrap();
        assert!(chapter_ids(body).is_err());

        let err = decode::<Body>(Some(json!({"followState": 9}))).unwrap_err();
        assert!(err.to_string().starts_with("Invalid request: malformed body"));
    }

    #[tokio::test]
    async fn test_get_manga_by_bare_id() {
        let (fx, ctx) = context();
        fx.store.upsert_manga(&remote_manga("m1", "One")).unwrap();

        let body = get_manga(Arc::clone(&ctx), Some(json!("m1"))).await.unwrap();
        assert_eq!(body["title"], "One");
        assert_eq!(body["chapters"], json!([]));

        let err = get_manga(ctx, Some(json!("m2"))).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_listings_build_cold_caches() {
        let (fx, ctx) = context();
        fx.store.upsert_manga(&remote_manga("m1", "One")).unwrap();
        fx.store
            .set_follow_state("m1", true, FollowState::Reading, 1)
            .unwrap();

        let library = library(Arc::clone(&ctx), None).await.unwrap();
        assert_eq!(library[0]["id"], "m1");
        assert_eq!(ctx.services.caches().library_loads(), 1);

        assert_eq!(updates(Arc::clone(&ctx), None).await.unwrap(), json!([]));
        assert_eq!(tags(Arc::clone(&ctx), None).await.unwrap(), json!([]));
        assert_eq!(history(ctx, None).await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_read_chapter_many() {
        let (_fx, ctx) = context();
        let body = read_chapter(ctx, Some(json!({"chapterIds": ["c1", "c2"]})))
            .await
            .unwrap();
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["read"], true);
    }

    #[tokio::test]
    async fn test_library_preference_frequency_change() {
        let (_fx, ctx) = context();
        let body = json!({"sort": 1, "order": 1, "updateFrequency": 6});
        let saved = update_library_preference(Arc::clone(&ctx), Some(body))
            .await
            .unwrap();
        assert_eq!(saved["updateFrequency"], 6);
        assert_eq!(ctx.services.prefs().library().update_frequency, 6);
        ctx.updater.stop();
    }

    #[tokio::test]
    async fn test_update_library_state() {
        let (_fx, ctx) = context();
        assert_eq!(
            get_update_library_state(Arc::clone(&ctx), None).await.unwrap(),
            Value::Null
        );

        let state = update_library(Arc::clone(&ctx), None).await.unwrap();
        assert_eq!(state, json!({"progress": 0, "total": 0, "current": ""}));

        ctx.updater.wait_idle().await;
        assert_eq!(get_update_library_state(ctx, None).await.unwrap(), Value::Null);
    }
}
