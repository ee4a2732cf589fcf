//! Lazily built, invalidation-driven projections of the library store.
//!
//! Three caches are kept: the library listing (followed titles), recent
//! updates (latest chapters of followed titles) and the tag catalog.
//!
//! # Contract
//!
//! - `get()` returns the cached value, building it synchronously on first use
//!   after the cache was empty. Readers see either nothing or a complete value.
//! - `invalidate()` clears the value and rebuilds it in the background, so the
//!   caller that mutated the store never waits for the rebuild.
//! - A build that raced with an invalidation is returned to its caller but not
//!   stored, so a stale value can never outlive the invalidation.
//!
//! # Library update passes
//!
//! Per-title refreshes made by a library update pass skip invalidation
//! (`RefreshMode::Batched`); the pass calls [`Caches::invalidate_listings`]
//! once at its end. Refreshing N titles then costs one rebuild, not N.
//! Interactive mutations made while a pass runs still invalidate right away.
//!
//! ```text
//! handler ──invalidate──► LazyCache ──spawn──► rebuild (blocking pool)
//!                             ▲
//! reader  ─────get────────────┘  (builds inline if empty)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::Result;
use crate::models::{Chapter, Manga, Tag};
use crate::store::{LibraryStore, RECENT_CHAPTERS_LIMIT};

type Loader<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// A single lazily populated value
pub struct LazyCache<T> {
    name: &'static str,
    value: Mutex<Option<Arc<T>>>,
    /// Serializes builds so concurrent readers share one load
    build_lock: Mutex<()>,
    /// Bumped by every invalidation
    generation: AtomicU64,
    loads: AtomicU64,
    loader: Loader<T>,
}

impl<T: Send + Sync + 'static> LazyCache<T> {
    pub fn new(
        name: &'static str,
        loader: impl Fn() -> Result<T> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            value: Mutex::new(None),
            build_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            loader: Box::new(loader),
        })
    }

    /// Cached value, built inline if empty
    pub fn get(&self) -> Result<Arc<T>> {
        if let Some(value) = self.value.lock().clone() {
            return Ok(value);
        }

        let _build = self.build_lock.lock();
        // Another reader may have finished the build while we waited
        if let Some(value) = self.value.lock().clone() {
            return Ok(value);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let start = Instant::now();
        self.loads.fetch_add(1, Ordering::SeqCst);
        let built = Arc::new((self.loader)()?);
        tracing::debug!(
            cache = self.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Cache rebuilt"
        );

        let mut slot = self.value.lock();
        if self.generation.load(Ordering::SeqCst) == generation {
            *slot = Some(Arc::clone(&built));
        }
        Ok(built)
    }

    /// Current value without building
    pub fn peek(&self) -> Option<Arc<T>> {
        self.value.lock().clone()
    }

    /// Number of times the loader ran
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Clear the value and rebuild it in the background
    pub fn invalidate(self: &Arc<Self>) {
        {
            let mut slot = self.value.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            *slot = None;
        }

        let this = Arc::clone(self);
        let repopulate = move || {
            if let Err(e) = this.get() {
                tracing::warn!(cache = this.name, "Cache rebuild failed: {}", e);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(repopulate);
            }
            Err(_) => {
                std::thread::spawn(repopulate);
            }
        }
    }
}

/// The three library projections
pub struct Caches {
    library: Arc<LazyCache<Vec<Manga>>>,
    updates: Arc<LazyCache<Vec<Chapter>>>,
    tags: Arc<LazyCache<Vec<Tag>>>,
}

impl Caches {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        let library_store = Arc::clone(&store);
        let updates_store = Arc::clone(&store);
        let tags_store = store;

        Self {
            library: LazyCache::new("library", move || library_store.followed_manga()),
            updates: LazyCache::new("updates", move || {
                updates_store.recent_chapters(RECENT_CHAPTERS_LIMIT)
            }),
            tags: LazyCache::new("tags", move || {
                let mut tags = tags_store.tags()?;
                tags.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(tags)
            }),
        }
    }

    pub fn library(&self) -> Result<Arc<Vec<Manga>>> {
        self.library.get()
    }

    pub fn updates(&self) -> Result<Arc<Vec<Chapter>>> {
        self.updates.get()
    }

    pub fn tags(&self) -> Result<Arc<Vec<Tag>>> {
        self.tags.get()
    }

    pub fn invalidate_library(&self) {
        self.library.invalidate();
    }

    pub fn invalidate_updates(&self) {
        self.updates.invalidate();
    }

    pub fn invalidate_tags(&self) {
        self.tags.invalidate();
    }

    /// Invalidate library and updates together
    pub fn invalidate_listings(&self) {
        self.library.invalidate();
        self.updates.invalidate();
    }

    pub fn library_loads(&self) -> u64 {
        self.library.load_count()
    }

    pub fn updates_loads(&self) -> u64 {
        self.updates.load_count()
    }
}
