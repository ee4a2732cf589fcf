use std::collections::HashMap;

use super::{RefreshMode, Services};
use crate::error::{HubError, Result};
use crate::models::Chapter;

impl Services {
    pub fn get_chapter(&self, id: &str) -> Result<Chapter> {
        self.store
            .chapter(id)?
            .ok_or_else(|| HubError::not_found("chapter", id))
    }

    /// Refresh one chapter (including its page list) from the source
    pub async fn update_chapter(&self, id: &str) -> Result<Chapter> {
        let mut chapter = self.store.chapter(id)?.unwrap_or_else(|| Chapter {
            id: id.to_string(),
            ..Default::default()
        });
        let fresh = self.source.chapter(id).await?;
        chapter.apply_metadata(fresh);
        self.store.upsert_chapters(std::slice::from_ref(&chapter))?;
        self.invalidate_listings(RefreshMode::Interactive);
        self.get_chapter(id)
    }

    pub fn get_chapters(&self, manga_id: &str) -> Result<Vec<Chapter>> {
        self.store.chapters_by_manga(manga_id)
    }

    /// Merge the source feed into the stored chapters of a title.
    ///
    /// Stored chapters keep their pages when the feed entry has none; chapters
    /// missing from the feed are left untouched.
    pub async fn update_chapters(&self, manga_id: &str, mode: RefreshMode) -> Result<Vec<Chapter>> {
        let language = self.prefs.browse().language;
        let feed = self.source.chapter_feed(manga_id, &language).await?;

        let mut existing: HashMap<String, Chapter> = self
            .store
            .chapters_by_manga(manga_id)?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let merged: Vec<Chapter> = feed
            .into_iter()
            .map(|fresh| match existing.remove(&fresh.id) {
                Some(mut stored) => {
                    stored.apply_metadata(fresh);
                    stored
                }
                None => fresh,
            })
            .collect();

        self.store.upsert_chapters(&merged)?;
        self.invalidate_listings(mode);
        tracing::debug!(manga = %manga_id, count = merged.len(), "Merged chapter feed");

        self.store.chapters_by_manga(manga_id)
    }
}
