//! mangahub: self-hosted manga library backend
//!
//! Aggregates manga and chapter metadata from MangaDex, keeps it in a local
//! SQLite library and serves a bundled web client over a single WebSocket.
//!
//! # Components
//!
//! - [`socket_server`] - connection hub, task router and per-task handlers
//! - [`server::sync`] - background library update scheduler
//! - [`cache`] - lazily rebuilt library, updates and tag listings
//! - [`server::assets`] - write-through disk cache for cover and page images
//! - [`services`] - request/response operations over store, source and caches
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mangahub::{App, AssetCache, MangaDexClient, Preferences, ServerConfig, SqliteStore};
//!
//! let config = ServerConfig::default();
//! let store = Arc::new(SqliteStore::open(&config.storage.database_path())?);
//! let source = Arc::new(MangaDexClient::new(&config.source)?);
//! let prefs = Arc::new(Preferences::open(&config.storage.preferences_path())?);
//! let assets = AssetCache::new(config.storage.cache_dir(), &config.source)?;
//!
//! let app = App::new(config, store, source, prefs, assets);
//! app.updater.start();
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fs_utils;
pub mod models;
pub mod prefs;
pub mod server;
pub mod services;
pub mod socket_server;
pub mod source;
pub mod store;

// Re-export commonly used types
pub use cache::{Caches, LazyCache};
pub use config::ServerConfig;
pub use error::{HubError, Result};
pub use models::{Chapter, Entity, FollowState, History, Manga, Tag};
pub use prefs::{Preferences, Prefs};
pub use server::{App, AssetCache, LibraryUpdater, PrefsWatcher, UpdateState};
pub use services::{RefreshMode, Services};
pub use socket_server::protocol::{IncomingMessage, OutgoingMessage, Task};
pub use source::{AniListClient, MangaDexClient, MetadataSource, SearchPage, SearchQuery};
pub use store::{LibraryStore, SqliteStore};
