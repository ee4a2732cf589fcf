//! Request/response operations over the store, the metadata source and the caches.
//!
//! Handlers and the library updater both go through [`Services`]; the methods
//! are split by entity across `manga`, `chapter` and `history`.

mod chapter;
mod history;
mod manga;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::cache::Caches;
use crate::error::Result;
use crate::models::{Manga, Tag};
use crate::prefs::{
    BrowsePreference, LibraryPreference, Preferences, Prefs, ReaderPreference,
};
use crate::source::{MetadataSource, SearchQuery};
use crate::store::LibraryStore;

/// How a metadata refresh treats the library caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Invalidate the affected caches right away
    Interactive,
    /// Leave invalidation to the surrounding library update pass
    Batched,
}

/// Browse listing: search results with local follow state overlaid
#[derive(Debug, Clone, Serialize)]
pub struct BrowseResult {
    pub entries: Vec<Manga>,
    pub query: SearchQuery,
    pub limit: u32,
    pub offset: u32,
    pub total: u32,
}

pub struct Services {
    store: Arc<dyn LibraryStore>,
    source: Arc<dyn MetadataSource>,
    caches: Arc<Caches>,
    prefs: Arc<Preferences>,
}

impl Services {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        source: Arc<dyn MetadataSource>,
        caches: Arc<Caches>,
        prefs: Arc<Preferences>,
    ) -> Self {
        Self {
            store,
            source,
            caches,
            prefs,
        }
    }

    pub fn store(&self) -> &Arc<dyn LibraryStore> {
        &self.store
    }

    pub fn caches(&self) -> &Arc<Caches> {
        &self.caches
    }

    pub fn prefs(&self) -> &Arc<Preferences> {
        &self.prefs
    }

    fn invalidate_listings(&self, mode: RefreshMode) {
        if mode == RefreshMode::Interactive {
            self.caches.invalidate_library();
            self.caches.invalidate_updates();
        }
    }

    // ========================================================================
    // Listings
    // ========================================================================

    pub fn library(&self) -> Result<Arc<Vec<Manga>>> {
        self.caches.library()
    }

    pub fn updates(&self) -> Result<Arc<Vec<crate::models::Chapter>>> {
        self.caches.updates()
    }

    pub fn tags(&self) -> Result<Arc<Vec<Tag>>> {
        self.caches.tags()
    }

    /// Refresh the tag catalog from the source
    pub async fn sync_tags(&self) -> Result<usize> {
        let tags = self.source.tags().await?;
        self.store.upsert_tags(&tags)?;
        self.caches.invalidate_tags();
        tracing::info!(count = tags.len(), "Synchronized tag catalog");
        Ok(tags.len())
    }

    /// Search the source, filling unset filters from the browse preference
    pub async fn browse(&self, mut query: SearchQuery) -> Result<BrowseResult> {
        let start = Instant::now();
        let defaults = self.prefs.browse();
        if query.origins.is_empty() {
            query.origins = defaults.origins.clone();
        }
        if query.ratings.is_empty() {
            query.ratings = defaults.ratings.clone();
        }
        if query.excluded_tags.is_empty() {
            query.excluded_tags = defaults.excluded_tags.clone();
        }

        let mut resolved = query.clone();
        let tag_ids: HashMap<String, String> = self
            .store
            .tags()?
            .into_iter()
            .map(|t| (t.name, t.id))
            .collect();
        let resolve = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .map(|n| tag_ids.get(n).cloned().unwrap_or_else(|| n.clone()))
                .collect()
        };
        resolved.included_tags = resolve(&query.included_tags);
        resolved.excluded_tags = resolve(&query.excluded_tags);

        let page = self.source.search(&resolved).await?;
        let mut entries = page.entries;

        let ids: Vec<String> = entries.iter().map(|m| m.id.clone()).collect();
        let stored: HashMap<String, Manga> = self
            .store
            .manga_by_ids(&ids)?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

        let mut refreshed = false;
        for entry in entries.iter_mut() {
            if let Some(local) = stored.get(&entry.id) {
                // Stored titles get the fresh metadata; entries get local state
                self.store.upsert_manga(entry)?;
                entry.followed = local.followed;
                entry.follow_state = local.follow_state;
                entry.followed_at = local.followed_at;
                entry.total_chapters = local.total_chapters;
                entry.read_chapters = local.read_chapters;
                entry.latest_chapter_at = local.latest_chapter_at;
                refreshed = true;
            }
        }
        if refreshed {
            self.caches.invalidate_library();
        }

        tracing::debug!(
            results = entries.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Browse search"
        );
        Ok(BrowseResult {
            entries,
            query,
            limit: page.limit,
            offset: page.offset,
            total: page.total,
        })
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    pub fn get_prefs(&self) -> Prefs {
        self.prefs.snapshot()
    }

    pub fn update_browse_prefs(&self, browse: BrowsePreference) -> Result<BrowsePreference> {
        self.prefs.update_browse(browse)
    }

    /// Returns the new section and whether the update frequency changed
    pub fn update_library_prefs(
        &self,
        library: LibraryPreference,
    ) -> Result<(LibraryPreference, bool)> {
        self.prefs.update_library(library)
    }

    pub fn update_reader_prefs(&self, reader: ReaderPreference) -> Result<ReaderPreference> {
        self.prefs.update_reader(reader)
    }
}
