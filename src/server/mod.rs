//! HTTP surface and component wiring
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                               App                                     │
//! │                                                                       │
//! │   GET /ws ──► connection ──► Router ──► handlers ──► Services         │
//! │                   ▲              │                    │  │  │        │
//! │                   │              ▼                    ▼  ▼  ▼        │
//! │                   └──────────── Hub ◄──┐          store source caches │
//! │                                        │                              │
//! │                            LibraryUpdater (timer + single pass)       │
//! │                                                                       │
//! │   GET /0/*path ──► AssetCache ──► disk / upstream image host          │
//! │   /assets, fallback ──► static files, index.html                      │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `sync` - library update scheduler
//! - `assets` - asset reverse-proxy cache
//! - `watcher` - preference file hot reload

pub mod assets;
pub mod sync;
pub mod watcher;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::cache::Caches;
use crate::config::{ConnectionConfig, ServerConfig};
use crate::error::{HubError, Result};
use crate::prefs::Preferences;
use crate::services::Services;
use crate::socket_server::connection::handle_connection;
use crate::socket_server::hub::{self, HubHandle};
use crate::socket_server::router::{AppContext, Router};
use crate::source::MetadataSource;
use crate::store::LibraryStore;

pub use assets::{Asset, AssetCache};
pub use sync::{interval_from_hours, LibraryUpdater, UpdateState};
pub use watcher::{PrefsWatcher, WatcherHandle};

/// State shared by the HTTP handlers
#[derive(Clone)]
struct HttpState {
    hub: HubHandle,
    router: Arc<Router>,
    assets: Arc<AssetCache>,
    connection: ConnectionConfig,
}

/// The running components, built once at startup
pub struct App {
    pub services: Arc<Services>,
    pub updater: Arc<LibraryUpdater>,
    pub hub: HubHandle,
    hub_task: JoinHandle<()>,
    router: Arc<Router>,
    assets: Arc<AssetCache>,
    config: ServerConfig,
}

impl App {
    /// Wire the components together. Must run inside a tokio runtime.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn LibraryStore>,
        source: Arc<dyn MetadataSource>,
        prefs: Arc<Preferences>,
        assets: AssetCache,
    ) -> Self {
        let caches = Arc::new(Caches::new(Arc::clone(&store)));
        let services = Arc::new(Services::new(store, source, caches, prefs));

        let (hub, hub_task) = hub::spawn();
        let updater = LibraryUpdater::new(Arc::clone(&services), hub.clone());
        let ctx = Arc::new(AppContext {
            services: Arc::clone(&services),
            updater: Arc::clone(&updater),
        });
        let router = Arc::new(Router::new(ctx, hub.clone()));

        Self {
            services,
            updater,
            hub,
            hub_task,
            router,
            assets: Arc::new(assets),
            config,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The axum application: socket, asset proxy, static files
    pub fn http_router(&self) -> axum::Router {
        let state = HttpState {
            hub: self.hub.clone(),
            router: Arc::clone(&self.router),
            assets: Arc::clone(&self.assets),
            connection: self.config.connection.clone(),
        };
        let static_dir: &Path = &self.config.server.static_dir;

        axum::Router::new()
            .route("/ws", get(ws_upgrade))
            .route("/0/{*path}", get(proxy_asset))
            .nest_service("/assets", ServeDir::new(static_dir))
            .fallback_service(ServeFile::new(static_dir.join("index.html")))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve until `shutdown` resolves, then stop the scheduler and the hub
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.http_router();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Listening on http://{} (socket at ws://{}/ws)", addr, addr);
        }
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;
        self.shutdown().await;
        Ok(served?)
    }

    pub async fn shutdown(self) {
        self.updater.stop();
        self.hub.shutdown();
        if let Err(e) = self.hub_task.await {
            tracing::warn!("Hub task ended abnormally: {}", e);
        }
        tracing::info!("Server stopped");
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<HttpState>) -> Response {
    ws.on_upgrade(move |socket| {
        handle_connection(socket, state.hub, state.router, state.connection)
    })
}

async fn proxy_asset(State(state): State<HttpState>, UrlPath(path): UrlPath<String>) -> Response {
    match state.assets.fetch(&path).await {
        Ok(asset) => {
            let status = StatusCode::from_u16(asset.status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, [(header::CONTENT_TYPE, asset.content_type)], asset.body).into_response()
        }
        Err(HubError::InvalidRequest { message }) => {
            (StatusCode::BAD_REQUEST, message).into_response()
        }
        Err(e) => {
            tracing::warn!(path = %path, "Asset fetch failed: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}
