//! User preferences persisted as a JSON file.
//!
//! The file is created with defaults on first start and rewritten atomically
//! on every update. Edits made to the file by hand are picked up by
//! `server::watcher`, which calls [`Preferences::reload`].

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};
use crate::fs_utils;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prefs {
    #[serde(default)]
    pub browse: BrowsePreference,
    #[serde(default)]
    pub library: LibraryPreference,
    #[serde(default)]
    pub reader: ReaderPreference,
}

/// Defaults applied to browse searches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowsePreference {
    /// Chapter language fetched from the source
    pub language: String,
    pub origins: Vec<String>,
    pub excluded_tags: Vec<String>,
    pub ratings: Vec<String>,
}

impl Default for BrowsePreference {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            origins: vec!["ja".to_string()],
            excluded_tags: vec!["Boys' Love".to_string()],
            ratings: vec![
                "safe".to_string(),
                "suggestive".to_string(),
                "erotica".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryPreference {
    pub sort: u8,
    pub order: u8,
    /// Hours between automatic library updates; 0 disables them
    pub update_frequency: u64,
    /// Unix seconds of the last completed library update
    pub last_updated: i64,
}

impl Default for LibraryPreference {
    fn default() -> Self {
        Self {
            sort: 6,
            order: 2,
            update_frequency: 2,
            last_updated: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReaderPreference {
    pub show_sidebar: bool,
    pub sidebar_position: u8,

    pub navigate_on_click: bool,
    pub direction: u8,
    pub scale: u8,
    pub max_width: String,
    pub max_height: String,
    pub gaps: String,
    pub zoom: String,

    pub max_preloads: u32,
    pub max_parallel: u32,

    pub keybinds: Keybinds,
    pub key_scroll_speed: String,
}

impl Default for ReaderPreference {
    fn default() -> Self {
        Self {
            show_sidebar: true,
            sidebar_position: 1,
            navigate_on_click: false,
            direction: 1,
            scale: 0,
            max_width: "1024".to_string(),
            max_height: "0".to_string(),
            gaps: "10".to_string(),
            zoom: "1.0".to_string(),
            max_preloads: 3,
            max_parallel: 6,
            keybinds: Keybinds::default(),
            key_scroll_speed: "40".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Keybinds {
    pub previous_chapter: String,
    pub next_chapter: String,
    pub previous_page: String,
    pub next_page: String,
}

impl Default for Keybinds {
    fn default() -> Self {
        Self {
            previous_chapter: "Comma".to_string(),
            next_chapter: "Period".to_string(),
            previous_page: "ArrowLeft".to_string(),
            next_page: "ArrowRight".to_string(),
        }
    }
}

/// Thread-safe preference store backed by a JSON file
pub struct Preferences {
    path: PathBuf,
    state: RwLock<Prefs>,
}

impl Preferences {
    /// Load preferences, writing the defaults first if the file is missing
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::write_file(path, &Prefs::default())?;
            tracing::info!(path = %path.display(), "Created default preferences");
        }
        let prefs = Self::read_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(prefs),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(path: &Path) -> Result<Prefs> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| HubError::Config {
            message: format!("Failed to parse preferences {}: {}", path.display(), e),
        })
    }

    fn write_file(path: &Path, prefs: &Prefs) -> Result<()> {
        let content = serde_json::to_vec_pretty(prefs)?;
        fs_utils::write_atomic(path, &content)?;
        Ok(())
    }

    /// Apply `f` to the preferences and persist the result
    fn update<T>(&self, f: impl FnOnce(&mut Prefs) -> T) -> Result<T> {
        let mut state = self.state.write();
        let mut next = state.clone();
        let out = f(&mut next);
        Self::write_file(&self.path, &next)?;
        *state = next;
        Ok(out)
    }

    pub fn snapshot(&self) -> Prefs {
        self.state.read().clone()
    }

    pub fn browse(&self) -> BrowsePreference {
        self.state.read().browse.clone()
    }

    pub fn library(&self) -> LibraryPreference {
        self.state.read().library.clone()
    }

    pub fn reader(&self) -> ReaderPreference {
        self.state.read().reader.clone()
    }

    pub fn update_browse(&self, browse: BrowsePreference) -> Result<BrowsePreference> {
        self.update(|p| {
            p.browse = browse;
            p.browse.clone()
        })
    }

    /// Replace the library section. `last_updated` is owned by the scheduler
    /// and survives client updates. Returns the new section and whether the
    /// update frequency changed.
    pub fn update_library(&self, library: LibraryPreference) -> Result<(LibraryPreference, bool)> {
        self.update(|p| {
            let changed = p.library.update_frequency != library.update_frequency;
            let last_updated = p.library.last_updated;
            p.library = library;
            p.library.last_updated = last_updated;
            (p.library.clone(), changed)
        })
    }

    pub fn update_reader(&self, reader: ReaderPreference) -> Result<ReaderPreference> {
        self.update(|p| {
            p.reader = reader;
            p.reader.clone()
        })
    }

    pub fn set_last_updated(&self, timestamp: i64) -> Result<()> {
        self.update(|p| p.library.last_updated = timestamp)
    }

    /// Re-read the file. Returns whether the update frequency changed.
    pub fn reload(&self) -> Result<bool> {
        let fresh = Self::read_file(&self.path)?;
        let mut state = self.state.write();
        let changed = state.library.update_frequency != fresh.library.update_frequency;
        *state = fresh;
        Ok(changed)
    }
}
