use super::{RefreshMode, Services};
use crate::error::Result;
use crate::models::History;
use crate::store::HISTORY_LIMIT;

impl Services {
    pub fn history(&self) -> Result<Vec<History>> {
        self.store.history(HISTORY_LIMIT)
    }

    fn history_or_new(&self, chapter_id: &str) -> Result<History> {
        Ok(self
            .store
            .history_by_chapter(chapter_id)?
            .unwrap_or_else(|| History::new(chapter_id)))
    }

    /// Record the last page viewed in a chapter
    pub fn read_page(&self, chapter_id: &str, page: u32) -> Result<History> {
        let mut history = self.history_or_new(chapter_id)?;
        history.last_viewed = Some(page);
        let saved = self.store.save_history(&history)?;
        self.invalidate_listings(RefreshMode::Interactive);
        Ok(saved)
    }

    /// Mark chapters read or unread; resets the last viewed page
    pub fn set_read_state(&self, chapter_ids: &[String], read: bool) -> Result<Vec<History>> {
        let mut saved = Vec::with_capacity(chapter_ids.len());
        let result: Result<()> = chapter_ids.iter().try_for_each(|id| {
            let mut history = self.history_or_new(id)?;
            history.read = Some(read);
            history.last_viewed = Some(0);
            saved.push(self.store.save_history(&history)?);
            Ok(())
        });
        // Rows saved before a failure still change the listings
        if !saved.is_empty() {
            self.invalidate_listings(RefreshMode::Interactive);
        }
        result.map(|()| saved)
    }
}
