//! Persisted library store.
//!
//! `LibraryStore` is the seam between the request handlers and the relational
//! database. Writes are upserts keyed by primary key; listings return fully
//! joined rows so callers never issue follow-up queries per row.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::models::{Chapter, FollowState, History, Manga, Tag};

/// Default size of the recent-updates listing
pub const RECENT_CHAPTERS_LIMIT: usize = 360;

/// Default size of the reading-history listing
pub const HISTORY_LIMIT: usize = 1000;

/// Entries per title kept by the recent-updates and history listings
pub const ENTRIES_PER_MANGA: usize = 3;

pub trait LibraryStore: Send + Sync {
    /// One title with aggregate counts, `None` if never stored
    fn manga(&self, id: &str) -> Result<Option<Manga>>;

    /// Stored rows for the given ids, in no particular order
    fn manga_by_ids(&self, ids: &[String]) -> Result<Vec<Manga>>;

    /// Insert or update source-owned metadata; follow state is untouched
    fn upsert_manga(&self, manga: &Manga) -> Result<()>;

    fn set_follow_state(
        &self,
        id: &str,
        followed: bool,
        state: FollowState,
        followed_at: i64,
    ) -> Result<()>;

    /// Followed titles, most recently updated first
    fn followed_manga(&self) -> Result<Vec<Manga>>;

    fn chapter(&self, id: &str) -> Result<Option<Chapter>>;

    /// Chapters of one title with their history, newest chapter number first
    fn chapters_by_manga(&self, manga_id: &str) -> Result<Vec<Chapter>>;

    /// Upsert many chapters in one transaction
    fn upsert_chapters(&self, chapters: &[Chapter]) -> Result<()>;

    /// Latest chapters of followed titles, `ENTRIES_PER_MANGA` per title
    fn recent_chapters(&self, limit: usize) -> Result<Vec<Chapter>>;

    fn history_by_chapter(&self, chapter_id: &str) -> Result<Option<History>>;

    /// Upsert by chapter id and return the stored row
    fn save_history(&self, history: &History) -> Result<History>;

    /// Reading history, `ENTRIES_PER_MANGA` per title, most recent first
    fn history(&self, limit: usize) -> Result<Vec<History>>;

    fn tags(&self) -> Result<Vec<Tag>>;

    fn upsert_tags(&self, tags: &[Tag]) -> Result<()>;
}
