//! SQLite implementation of `LibraryStore`.
//!
//! One connection behind a mutex. List-valued metadata (authors, groups, pages,
//! ...) is stored as JSON text.

use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use super::{LibraryStore, ENTRIES_PER_MANGA};
use crate::error::Result;
use crate::models::{sort_by_chapter, Chapter, FollowState, History, Manga, Tag};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS manga (
        id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL DEFAULT 0,
        title TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        cover TEXT NOT NULL DEFAULT '',
        banner TEXT NOT NULL DEFAULT '',
        authors TEXT NOT NULL DEFAULT '[]',
        artists TEXT NOT NULL DEFAULT '[]',
        tags TEXT NOT NULL DEFAULT '[]',
        links TEXT NOT NULL DEFAULT '{}',
        demographic TEXT NOT NULL DEFAULT '',
        origin TEXT NOT NULL DEFAULT '',
        rating TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT '',
        followed INTEGER NOT NULL DEFAULT 0,
        follow_state INTEGER NOT NULL DEFAULT 0,
        followed_at INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS chapter (
        id TEXT PRIMARY KEY,
        manga_id TEXT NOT NULL,
        created_at INTEGER NOT NULL DEFAULT 0,
        publish_at INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL DEFAULT 0,
        title TEXT NOT NULL DEFAULT '',
        volume TEXT NOT NULL DEFAULT '',
        chapter TEXT NOT NULL DEFAULT '',
        language TEXT NOT NULL DEFAULT '',
        groups TEXT NOT NULL DEFAULT '[]',
        hash TEXT NOT NULL DEFAULT '',
        external_url TEXT NOT NULL DEFAULT '',
        pages TEXT NOT NULL DEFAULT '[]'
    );
    CREATE INDEX IF NOT EXISTS idx_chapter_manga ON chapter(manga_id, publish_at);

    CREATE TABLE IF NOT EXISTS history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chapter_id TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL DEFAULT 0,
        read INTEGER,
        last_viewed INTEGER
    );

    CREATE TABLE IF NOT EXISTS tag (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );
"#;

const MANGA_SELECT: &str = "SELECT m.id, m.created_at, m.updated_at, m.title, m.description,
        m.cover, m.authors, m.artists, m.tags, m.links, m.demographic, m.origin, m.rating,
        m.status, m.followed, m.follow_state, m.followed_at,
        COUNT(c.id), COUNT(h.id), MAX(c.publish_at), m.banner
    FROM manga m
    LEFT JOIN chapter c ON c.manga_id = m.id
    LEFT JOIN history h ON h.chapter_id = c.id AND h.read = 1";

const CHAPTER_SELECT: &str = "SELECT c.id, c.manga_id, c.created_at, c.publish_at,
        c.updated_at, c.title, c.volume, c.chapter, c.language, c.groups, c.hash,
        c.external_url, c.pages,
        h.id, h.chapter_id, h.created_at, h.updated_at, h.read, h.last_viewed
    FROM chapter c
    LEFT JOIN history h ON h.chapter_id = c.id";

/// Decode a JSON text column
fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn follow_state_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<FollowState> {
    let raw: i64 = row.get(idx)?;
    u8::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
        .and_then(|v| {
            FollowState::try_from(v).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, e.into())
            })
        })
}

fn row_to_manga(row: &Row<'_>) -> rusqlite::Result<Manga> {
    Ok(Manga {
        id: row.get(0)?,
        created_at: row.get(1)?,
        updated_at: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        cover: row.get(5)?,
        banner: row.get(20)?,
        authors: json_column(row, 6)?,
        artists: json_column(row, 7)?,
        tags: json_column(row, 8)?,
        links: json_column(row, 9)?,
        demographic: row.get(10)?,
        origin: row.get(11)?,
        rating: row.get(12)?,
        status: row.get(13)?,
        chapters: None,
        followed: row.get(14)?,
        follow_state: follow_state_column(row, 15)?,
        followed_at: row.get(16)?,
        total_chapters: row.get(17)?,
        read_chapters: row.get(18)?,
        latest_chapter_at: row.get(19)?,
    })
}

/// Map a `CHAPTER_SELECT` row; history columns start at 13
fn row_to_chapter(row: &Row<'_>) -> rusqlite::Result<Chapter> {
    let history = match row.get::<_, Option<i64>>(13)? {
        Some(id) => Some(History {
            id,
            chapter_id: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
            read: row.get(17)?,
            last_viewed: row.get(18)?,
            ..Default::default()
        }),
        None => None,
    };

    Ok(Chapter {
        id: row.get(0)?,
        manga_id: row.get(1)?,
        created_at: row.get(2)?,
        publish_at: row.get(3)?,
        updated_at: row.get(4)?,
        title: row.get(5)?,
        volume: row.get(6)?,
        chapter: row.get(7)?,
        language: row.get(8)?,
        groups: json_column(row, 9)?,
        hash: row.get(10)?,
        external_url: row.get(11)?,
        pages: json_column(row, 12)?,
        history,
        manga_title: None,
        cover: None,
    })
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<History> {
    Ok(History {
        id: row.get(0)?,
        chapter_id: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        read: row.get(4)?,
        last_viewed: row.get(5)?,
        ..Default::default()
    })
}

/// SQLite-backed library store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        // Databases created before banners were stored
        if conn.prepare("SELECT banner FROM manga LIMIT 0").is_err() {
            conn.execute_batch("ALTER TABLE manga ADD COLUMN banner TEXT NOT NULL DEFAULT ''")?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl LibraryStore for SqliteStore {
    fn manga(&self, id: &str) -> Result<Option<Manga>> {
        let conn = self.conn.lock();
        let sql = format!("{} WHERE m.id = ?1 GROUP BY m.id", MANGA_SELECT);
        let manga = conn.query_row(&sql, params![id], row_to_manga).optional()?;
        Ok(manga)
    }

    fn manga_by_ids(&self, ids: &[String]) -> Result<Vec<Manga>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "{} WHERE m.id IN ({}) GROUP BY m.id",
            MANGA_SELECT, placeholders
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), row_to_manga)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn upsert_manga(&self, manga: &Manga) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO manga
                (id, created_at, updated_at, title, description, cover, authors, artists,
                 tags, links, demographic, origin, rating, status, banner)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO UPDATE SET
                created_at = excluded.created_at, updated_at = excluded.updated_at,
                title = excluded.title, description = excluded.description,
                cover = excluded.cover, authors = excluded.authors,
                artists = excluded.artists, tags = excluded.tags, links = excluded.links,
                demographic = excluded.demographic, origin = excluded.origin,
                rating = excluded.rating, status = excluded.status,
                banner = CASE WHEN excluded.banner = '' THEN manga.banner
                              ELSE excluded.banner END",
            params![
                manga.id,
                manga.created_at,
                manga.updated_at,
                manga.title,
                manga.description,
                manga.cover,
                serde_json::to_string(&manga.authors)?,
                serde_json::to_string(&manga.artists)?,
                serde_json::to_string(&manga.tags)?,
                serde_json::to_string(&manga.links)?,
                manga.demographic,
                manga.origin,
                manga.rating,
                manga.status,
                manga.banner,
            ],
        )?;
        Ok(())
    }

    fn set_follow_state(
        &self,
        id: &str,
        followed: bool,
        state: FollowState,
        followed_at: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE manga SET followed = ?2, follow_state = ?3, followed_at = ?4 WHERE id = ?1",
            params![id, followed, u8::from(state), followed_at],
        )?;
        Ok(())
    }

    fn followed_manga(&self) -> Result<Vec<Manga>> {
        let start = Instant::now();
        let sql = format!(
            "{} WHERE m.followed = 1 GROUP BY m.id ORDER BY MAX(c.publish_at) DESC, m.title ASC",
            MANGA_SELECT
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_manga)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        tracing::debug!(
            count = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded followed manga"
        );
        Ok(rows)
    }

    fn chapter(&self, id: &str) -> Result<Option<Chapter>> {
        let conn = self.conn.lock();
        let sql = format!("{} WHERE c.id = ?1", CHAPTER_SELECT);
        let chapter = conn.query_row(&sql, params![id], row_to_chapter).optional()?;
        Ok(chapter)
    }

    fn chapters_by_manga(&self, manga_id: &str) -> Result<Vec<Chapter>> {
        let mut rows = {
            let conn = self.conn.lock();
            let sql = format!("{} WHERE c.manga_id = ?1", CHAPTER_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![manga_id], row_to_chapter)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        sort_by_chapter(&mut rows);
        Ok(rows)
    }

    fn upsert_chapters(&self, chapters: &[Chapter]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO chapter
                    (id, manga_id, created_at, publish_at, updated_at, title, volume, chapter,
                     language, groups, hash, external_url, pages)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(id) DO UPDATE SET
                    manga_id = excluded.manga_id, created_at = excluded.created_at,
                    publish_at = excluded.publish_at, updated_at = excluded.updated_at,
                    title = excluded.title, volume = excluded.volume,
                    chapter = excluded.chapter, language = excluded.language,
                    groups = excluded.groups, hash = excluded.hash,
                    external_url = excluded.external_url, pages = excluded.pages",
            )?;

            for chapter in chapters {
                stmt.execute(params![
                    chapter.id,
                    chapter.manga_id,
                    chapter.created_at,
                    chapter.publish_at,
                    chapter.updated_at,
                    chapter.title,
                    chapter.volume,
                    chapter.chapter,
                    chapter.language,
                    serde_json::to_string(&chapter.groups)?,
                    chapter.hash,
                    chapter.external_url,
                    serde_json::to_string(&chapter.pages)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn recent_chapters(&self, limit: usize) -> Result<Vec<Chapter>> {
        let start = Instant::now();
        let conn = self.conn.lock();
        // Pages are left out of the listing; '[]' keeps the column layout of CHAPTER_SELECT
        let mut stmt = conn.prepare(
            "SELECT c.id, c.manga_id, c.created_at, c.publish_at, c.updated_at, c.title,
                    c.volume, c.chapter, c.language, c.groups, c.hash, c.external_url, '[]',
                    h.id, h.chapter_id, h.created_at, h.updated_at, h.read, h.last_viewed,
                    m.title, m.cover
             FROM (
                SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY manga_id ORDER BY publish_at DESC
                ) AS n
                FROM chapter
             ) c
             JOIN manga m ON m.id = c.manga_id
             LEFT JOIN history h ON h.chapter_id = c.id
             WHERE c.n <= ?1 AND m.followed = 1
             ORDER BY c.publish_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![ENTRIES_PER_MANGA as i64, limit as i64], |row| {
                let mut chapter = row_to_chapter(row)?;
                chapter.manga_title = row.get(19)?;
                chapter.cover = row.get(20)?;
                Ok(chapter)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        tracing::debug!(
            count = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded recent chapters"
        );
        Ok(rows)
    }

    fn history_by_chapter(&self, chapter_id: &str) -> Result<Option<History>> {
        let conn = self.conn.lock();
        let history = conn
            .query_row(
                "SELECT id, chapter_id, created_at, updated_at, read, last_viewed
                 FROM history WHERE chapter_id = ?1",
                params![chapter_id],
                row_to_history,
            )
            .optional()?;
        Ok(history)
    }

    fn save_history(&self, history: &History) -> Result<History> {
        let now = Self::now();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO history (chapter_id, created_at, updated_at, read, last_viewed)
             VALUES (?1, ?2, 0, ?3, ?4)
             ON CONFLICT(chapter_id) DO UPDATE SET
                updated_at = ?2, read = excluded.read, last_viewed = excluded.last_viewed",
            params![history.chapter_id, now, history.read, history.last_viewed],
        )?;
        let saved = conn.query_row(
            "SELECT id, chapter_id, created_at, updated_at, read, last_viewed
             FROM history WHERE chapter_id = ?1",
            params![history.chapter_id],
            row_to_history,
        )?;
        Ok(saved)
    }

    fn history(&self, limit: usize) -> Result<Vec<History>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "WITH result AS (
                SELECT h.id, h.chapter_id, h.created_at, h.updated_at, h.read, h.last_viewed,
                       c.manga_id, c.title, c.volume, c.chapter,
                       CASE WHEN h.updated_at > 0 THEN h.updated_at ELSE h.created_at END AS seen,
                       ROW_NUMBER() OVER (
                           PARTITION BY c.manga_id
                           ORDER BY CASE WHEN h.updated_at > 0 THEN h.updated_at
                                         ELSE h.created_at END DESC
                       ) AS n
                FROM history h
                LEFT JOIN chapter c ON c.id = h.chapter_id
                WHERE h.read = 1 OR h.last_viewed > 0
             )
             SELECT r.id, r.chapter_id, r.created_at, r.updated_at, r.read, r.last_viewed,
                    r.manga_id, r.title, r.volume, r.chapter, m.title, m.cover
             FROM result r
             LEFT JOIN manga m ON m.id = r.manga_id
             WHERE r.n <= ?1
             ORDER BY r.seen DESC, r.id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![ENTRIES_PER_MANGA as i64, limit as i64], |row| {
                let mut history = row_to_history(row)?;
                history.manga_id = row.get(6)?;
                history.title = row.get(7)?;
                history.volume = row.get(8)?;
                history.chapter = row.get(9)?;
                history.manga_title = row.get(10)?;
                history.cover = row.get(11)?;
                Ok(history)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn tags(&self) -> Result<Vec<Tag>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name FROM tag")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn upsert_tags(&self, tags: &[Tag]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("INSERT OR REPLACE INTO tag (id, name) VALUES (?1, ?2)")?;
            for tag in tags {
                stmt.execute(params![tag.id, tag.name])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
