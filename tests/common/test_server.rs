//! In-process server fixture

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use mangahub::socket_server::HubHandle;
use mangahub::{
    App, AssetCache, Chapter, FollowState, HubError, LibraryStore, LibraryUpdater, Manga,
    MetadataSource, Preferences, Result, SearchPage, SearchQuery, ServerConfig, Services,
    SqliteStore, Tag,
};

/// Metadata source backed by maps the test fills in
#[derive(Default)]
pub struct ScriptedSource {
    pub manga: Mutex<HashMap<String, Manga>>,
    pub feeds: Mutex<HashMap<String, Vec<Chapter>>>,
    pub tags: Mutex<Vec<Tag>>,
    /// Titles whose refresh fails
    pub failing: Mutex<HashSet<String>>,
    /// Added to every manga fetch
    pub latency: Mutex<Option<Duration>>,
    pub manga_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn add_manga(&self, manga: Manga) {
        self.manga.lock().insert(manga.id.clone(), manga);
    }

    pub fn set_feed(&self, manga_id: &str, chapters: Vec<Chapter>) {
        self.feeds.lock().insert(manga_id.to_string(), chapters);
    }
}

#[async_trait]
impl MetadataSource for ScriptedSource {
    async fn manga(&self, id: &str) -> Result<Manga> {
        self.manga_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.lock().contains(id) {
            return Err(HubError::Upstream {
                message: format!("scripted failure for {}", id),
            });
        }
        self.manga
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::not_found("manga", id))
    }

    async fn chapter(&self, id: &str) -> Result<Chapter> {
        self.feeds
            .lock()
            .values()
            .flatten()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| HubError::not_found("chapter", id))
    }

    async fn chapter_feed(&self, manga_id: &str, _language: &str) -> Result<Vec<Chapter>> {
        Ok(self.feeds.lock().get(manga_id).cloned().unwrap_or_default())
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        Ok(self.tags.lock().clone())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
        let entries: Vec<Manga> = self.manga.lock().values().cloned().collect();
        Ok(SearchPage {
            total: entries.len() as u32,
            limit: query.limit.unwrap_or(36),
            offset: query.offset.unwrap_or(0),
            entries,
        })
    }
}

/// Image host stand-in that counts the requests it serves
pub struct FakeUpstream {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
}

pub const FAKE_IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-bytes";

async fn serve_image(State(hits): State<Arc<AtomicUsize>>) -> (StatusCode, [(&'static str, &'static str); 1], &'static [u8]) {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, [("content-type", "image/png")], FAKE_IMAGE)
}

async fn serve_missing(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
    hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = axum::Router::new()
            .route("/covers/{*rest}", get(serve_image))
            .route("/data/{*rest}", get(serve_image))
            .fallback(serve_missing)
            .with_state(Arc::clone(&hits));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{}", addr),
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A running server plus handles into its components
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<SqliteStore>,
    pub source: Arc<ScriptedSource>,
    pub services: Arc<Services>,
    pub updater: Arc<LibraryUpdater>,
    pub hub: HubHandle,
    pub temp: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_upstream("http://127.0.0.1:9").await
    }

    pub async fn start_with_upstream(upstream: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let static_dir = temp.path().join("static");
        std::fs::create_dir_all(&static_dir).unwrap();
        std::fs::write(static_dir.join("index.html"), "<html>mangahub</html>").unwrap();

        let mut config = ServerConfig::default();
        config.server.static_dir = static_dir;
        config.storage.data_dir = Some(temp.path().to_path_buf());
        config.scheduler.enabled = false;

        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let source = Arc::new(ScriptedSource::default());
        let prefs = Arc::new(Preferences::open(&config.storage.preferences_path()).unwrap());
        let assets = AssetCache::with_client(config.storage.cache_dir(), upstream, reqwest::Client::new());

        let app = App::new(
            config,
            store.clone() as Arc<dyn LibraryStore>,
            source.clone() as Arc<dyn MetadataSource>,
            prefs,
            assets,
        );
        let services = Arc::clone(&app.services);
        let updater = Arc::clone(&app.updater);
        let hub = app.hub.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.await;
            };
            app.serve(listener, shutdown).await.unwrap();
        });

        Self {
            addr,
            store,
            source,
            services,
            updater,
            hub,
            temp,
            shutdown: Some(tx),
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Store a followed title and teach the source about it
    pub fn follow(&self, id: &str, title: &str) {
        let manga = super::manga(id, title);
        self.store.upsert_manga(&manga).unwrap();
        self.store
            .set_follow_state(id, true, FollowState::Reading, 1)
            .unwrap();
        self.source.add_manga(manga);
    }

    /// Wait until the hub has exactly `n` members
    pub async fn wait_for_connections(&self, n: usize) {
        for _ in 0..500 {
            if self.hub.connection_count().await == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("hub never reached {} connections", n);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
