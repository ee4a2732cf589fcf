use std::time::Instant;

use super::{RefreshMode, Services};
use crate::error::{HubError, Result};
use crate::models::{FollowState, Manga};

impl Services {
    /// Stored title with its chapters
    pub fn get_manga(&self, id: &str) -> Result<Manga> {
        let mut manga = self
            .store
            .manga(id)?
            .ok_or_else(|| HubError::not_found("manga", id))?;
        manga.chapters = Some(self.store.chapters_by_manga(id)?);
        Ok(manga)
    }

    /// Refresh a title's metadata and chapter feed from the source
    pub async fn update_manga(&self, id: &str, mode: RefreshMode) -> Result<Manga> {
        let start = Instant::now();
        let mut manga = self.store.manga(id)?.unwrap_or_else(|| Manga::new(id));
        let fresh = self.source.manga(id).await?;
        manga.apply_metadata(fresh);
        self.fill_banner(&mut manga).await;
        self.store.upsert_manga(&manga)?;

        let chapters = match self.update_chapters(id, mode).await {
            Ok(chapters) => chapters,
            Err(e) => {
                // The metadata write above already landed
                self.invalidate_listings(mode);
                return Err(e);
            }
        };

        let mut manga = self
            .store
            .manga(id)?
            .ok_or_else(|| HubError::not_found("manga", id))?;
        manga.chapters = Some(chapters);

        tracing::debug!(
            manga = %id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Updated manga"
        );
        Ok(manga)
    }

    /// Look up a missing banner on AniList; failures only log
    async fn fill_banner(&self, manga: &mut Manga) {
        if !manga.banner.is_empty() {
            return;
        }
        let Some(anilist_id) = manga.links.get("al") else {
            return;
        };
        match self.source.banner(anilist_id).await {
            Ok(Some(banner)) => manga.banner = banner,
            Ok(None) => {}
            Err(e) => tracing::warn!(manga = %manga.id, "Banner lookup failed: {}", e),
        }
    }

    pub fn follow_manga(&self, id: &str, state: FollowState) -> Result<Manga> {
        let manga = self
            .store
            .manga(id)?
            .ok_or_else(|| HubError::not_found("manga", id))?;
        let followed_at = if manga.followed_at == 0 {
            chrono::Utc::now().timestamp()
        } else {
            manga.followed_at
        };
        self.store.set_follow_state(id, true, state, followed_at)?;
        self.invalidate_listings(RefreshMode::Interactive);
        self.get_manga(id)
    }

    pub fn unfollow_manga(&self, id: &str) -> Result<Manga> {
        if self.store.manga(id)?.is_none() {
            return Err(HubError::not_found("manga", id));
        }
        self.store.set_follow_state(id, false, FollowState::None, 0)?;
        self.invalidate_listings(RefreshMode::Interactive);
        self.get_manga(id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fixture, remote_chapter, remote_manga};
    use super::*;
    use crate::store::LibraryStore;

    #[tokio::test]
    async fn test_update_manga_fetches_metadata_and_feed() {
        let fx = fixture();
        fx.source
            .manga
            .lock()
            .insert("m1".to_string(), remote_manga("m1", "Remote"));
        fx.source.feeds.lock().insert(
            "m1".to_string(),
            vec![
                remote_chapter("c1", "m1", "1", 100),
                remote_chapter("c2", "m1", "2", 200),
            ],
        );

        let manga = fx
            .services
            .update_manga("m1", RefreshMode::Interactive)
            .await
            .unwrap();

        assert_eq!(manga.title, "Remote");
        assert_eq!(manga.total_chapters, 2);
        assert_eq!(manga.latest_chapter_at, Some(200));
        let chapters = manga.chapters.unwrap();
        assert_eq!(chapters[0].id, "c2");
    }

    fn with_anilist_link(id: &str, title: &str, anilist_id: &str) -> Manga {
        let mut manga = remote_manga(id, title);
        manga.links.insert("al".to_string(), anilist_id.to_string());
        manga
    }

    #[tokio::test]
    async fn test_feed_failure_still_refreshes_listing() {
        let fx = fixture();
        fx.store.upsert_manga(&remote_manga("m1", "Old")).unwrap();
        fx.store
            .set_follow_state("m1", true, FollowState::Reading, 1)
            .unwrap();
        assert_eq!(fx.services.library().unwrap()[0].title, "Old");

        fx.source
            .manga
            .lock()
            .insert("m1".to_string(), remote_manga("m1", "New"));
        *fx.source.feed_error.lock() = Some("feed down".to_string());

        let err = fx
            .services
            .update_manga("m1", RefreshMode::Interactive)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Upstream error: feed down");

        let mut title = String::new();
        for _ in 0..200 {
            title = fx.services.library().unwrap()[0].title.clone();
            if title == "New" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(title, "New");
    }

    #[tokio::test]
    async fn test_banner_filled_from_anilist() {
        let fx = fixture();
        fx.source
            .manga
            .lock()
            .insert("m1".to_string(), with_anilist_link("m1", "One", "97852"));
        fx.source
            .banners
            .lock()
            .insert("97852".to_string(), "https://img.anili.st/97852.jpg".to_string());

        let manga = fx
            .services
            .update_manga("m1", RefreshMode::Interactive)
            .await
            .unwrap();
        assert_eq!(manga.banner, "https://img.anili.st/97852.jpg");
        assert_eq!(
            fx.store.manga("m1").unwrap().unwrap().banner,
            "https://img.anili.st/97852.jpg"
        );
    }

    #[tokio::test]
    async fn test_banner_lookup_failure_does_not_fail_refresh() {
        let fx = fixture();
        fx.source
            .manga
            .lock()
            .insert("m1".to_string(), with_anilist_link("m1", "One", "unknown"));

        let manga = fx
            .services
            .update_manga("m1", RefreshMode::Interactive)
            .await
            .unwrap();
        assert_eq!(manga.title, "One");
        assert!(manga.banner.is_empty());
    }

    #[tokio::test]
    async fn test_stored_banner_is_kept() {
        let fx = fixture();
        let mut stored = remote_manga("m1", "One");
        stored.banner = "kept.jpg".to_string();
        fx.store.upsert_manga(&stored).unwrap();
        fx.source
            .manga
            .lock()
            .insert("m1".to_string(), with_anilist_link("m1", "One", "97852"));
        fx.source
            .banners
            .lock()
            .insert("97852".to_string(), "other.jpg".to_string());

        let manga = fx
            .services
            .update_manga("m1", RefreshMode::Interactive)
            .await
            .unwrap();
        assert_eq!(manga.banner, "kept.jpg");
    }

    #[tokio::test]
    async fn test_update_manga_unknown_source_entry() {
        let fx = fixture();
        let err = fx
            .services
            .update_manga("missing", RefreshMode::Interactive)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_follow_and_unfollow() {
        let fx = fixture();
        fx.store.upsert_manga(&remote_manga("m1", "One")).unwrap();

        let followed = fx.services.follow_manga("m1", FollowState::Reading).unwrap();
        assert!(followed.followed);
        assert!(followed.followed_at > 0);
        let first_followed_at = followed.followed_at;

        // Changing state keeps the original follow time
        let planning = fx.services.follow_manga("m1", FollowState::Planning).unwrap();
        assert_eq!(planning.follow_state, FollowState::Planning);
        assert_eq!(planning.followed_at, first_followed_at);

        let unfollowed = fx.services.unfollow_manga("m1").unwrap();
        assert!(!unfollowed.followed);
        assert_eq!(unfollowed.follow_state, FollowState::None);
        assert_eq!(unfollowed.followed_at, 0);
    }

    #[test]
    fn test_follow_unknown_manga() {
        let fx = fixture();
        let err = fx
            .services
            .follow_manga("nope", FollowState::Reading)
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
