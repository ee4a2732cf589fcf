//! Library value types exchanged with the store, the metadata source and clients.
//!
//! All types serialize with camelCase keys, the shape the web client consumes.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a followed title is being tracked. Encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FollowState {
    #[default]
    None,
    Reading,
    Planning,
    Completed,
    Dropped,
}

impl TryFrom<u8> for FollowState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Reading),
            2 => Ok(Self::Planning),
            3 => Ok(Self::Completed),
            4 => Ok(Self::Dropped),
            other => Err(format!("unknown follow state: {}", other)),
        }
    }
}

impl From<FollowState> for u8 {
    fn from(state: FollowState) -> u8 {
        match state {
            FollowState::None => 0,
            FollowState::Reading => 1,
            FollowState::Planning => 2,
            FollowState::Completed => 3,
            FollowState::Dropped => 4,
        }
    }
}

/// Author, artist or scanlation group
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// Tag catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manga {
    pub id: String,

    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,

    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub cover: String,
    /// Header image looked up on AniList; kept across metadata refreshes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub banner: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artists: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub demographic: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rating: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapters: Option<Vec<Chapter>>,

    // Aggregates computed by the store
    #[serde(default)]
    pub total_chapters: u32,
    #[serde(default)]
    pub read_chapters: u32,
    #[serde(default)]
    pub latest_chapter_at: Option<i64>,

    #[serde(default)]
    pub followed: bool,
    #[serde(default)]
    pub follow_state: FollowState,
    #[serde(default)]
    pub followed_at: i64,
}

impl Manga {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Replace source-owned metadata, keeping follow state and aggregates.
    pub fn apply_metadata(&mut self, fresh: Manga) {
        self.created_at = fresh.created_at;
        self.updated_at = fresh.updated_at;
        self.title = fresh.title;
        self.description = fresh.description;
        self.cover = fresh.cover;
        self.authors = fresh.authors;
        self.artists = fresh.artists;
        self.tags = fresh.tags;
        self.links = fresh.links;
        self.demographic = fresh.demographic;
        self.origin = fresh.origin;
        self.rating = fresh.rating;
        self.status = fresh.status;
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub manga_id: String,

    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub publish_at: i64,
    #[serde(default)]
    pub updated_at: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chapter: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Entity>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<History>,

    // Joined in by the recent-updates listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manga_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
}

impl Chapter {
    /// Replace source-owned metadata. Pages and hash are kept when the
    /// fresh copy has none (feed entries omit them).
    pub fn apply_metadata(&mut self, fresh: Chapter) {
        self.manga_id = fresh.manga_id;
        self.created_at = fresh.created_at;
        self.publish_at = fresh.publish_at;
        self.updated_at = fresh.updated_at;
        self.title = fresh.title;
        self.volume = fresh.volume;
        self.chapter = fresh.chapter;
        self.language = fresh.language;
        self.groups = fresh.groups;
        self.external_url = fresh.external_url;
        if !fresh.hash.is_empty() {
            self.hash = fresh.hash;
        }
        if !fresh.pages.is_empty() {
            self.pages = fresh.pages;
        }
    }

    fn number(&self) -> Option<f64> {
        self.chapter.parse::<f64>().ok()
    }
}

/// Sort newest chapter number first; unnumbered chapters sink to the end,
/// equal numbers fall back to newest publish time.
pub fn sort_by_chapter(chapters: &mut [Chapter]) {
    chapters.sort_by(|a, b| match (a.number(), b.number()) {
        (Some(x), Some(y)) => y
            .partial_cmp(&x)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.publish_at.cmp(&a.publish_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.publish_at.cmp(&a.publish_at),
    });
}

/// Reading progress for one chapter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    #[serde(default)]
    pub id: i64,
    pub chapter_id: String,

    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,

    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub last_viewed: Option<u32>,

    // Joined in by the history listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manga_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manga_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
}

impl History {
    pub fn new(chapter_id: impl Into<String>) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(id: &str, number: &str, publish_at: i64) -> Chapter {
        Chapter {
            id: id.to_string(),
            chapter: number.to_string(),
            publish_at,
            ..Default::default()
        }
    }

    #[test]
    fn test_follow_state_wire_format() {
        let json = serde_json::to_string(&FollowState::Planning).unwrap();
        assert_eq!(json, "2");

        let state: FollowState = serde_json::from_str("4").unwrap();
        assert_eq!(state, FollowState::Dropped);

        assert!(serde_json::from_str::<FollowState>("9").is_err());
    }

    #[test]
    fn test_manga_camel_case() {
        let mut manga = Manga::new("m1");
        manga.title = "Title".to_string();
        manga.follow_state = FollowState::Reading;

        let value = serde_json::to_value(&manga).unwrap();
        assert_eq!(value["followState"], 1);
        assert_eq!(value["totalChapters"], 0);
        assert!(value.get("description").is_none());
        assert!(value.get("chapters").is_none());
    }

    #[test]
    fn test_sort_by_chapter() {
        let mut chapters = vec![
            chapter("a", "1", 10),
            chapter("b", "", 50),
            chapter("c", "10.5", 5),
            chapter("d", "2", 20),
            chapter("e", "2", 30),
        ];
        sort_by_chapter(&mut chapters);

        let order: Vec<&str> = chapters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["c", "e", "d", "a", "b"]);
    }

    #[test]
    fn test_chapter_apply_metadata_keeps_pages() {
        let mut stored = chapter("a", "1", 10);
        stored.pages = vec!["p1.png".to_string()];
        stored.hash = "h".to_string();

        let fresh = Chapter {
            title: "New title".to_string(),
            ..chapter("a", "1", 11)
        };
        stored.apply_metadata(fresh);

        assert_eq!(stored.title, "New title");
        assert_eq!(stored.publish_at, 11);
        assert_eq!(stored.pages, vec!["p1.png".to_string()]);
        assert_eq!(stored.hash, "h");
    }
}
