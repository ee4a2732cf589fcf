//! Filesystem helpers shared by the preference store and the asset cache
//!
//! - `atomic_rename`: replace a file in one step (Windows needs an explicit delete)
//! - `write_atomic`: write bytes through a sibling temp file, then rename
//! - `get_data_base_dir`: platform data directory for the library database and caches

use std::io;
use std::path::{Path, PathBuf};

/// Cross-platform atomic rename.
///
/// On Unix, `fs::rename` replaces the target if it exists. On Windows it fails
/// instead, so the target is removed first.
pub fn atomic_rename(src: &Path, dst: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        if dst.exists() {
            std::fs::remove_file(dst)?;
        }
    }
    std::fs::rename(src, dst)
}

/// Write `contents` to `path` so that readers never observe a partial file.
///
/// Parent directories are created as needed. The temp file lives next to the
/// target (same filesystem) and carries a random suffix, so concurrent writers
/// of the same path never share a temp file; the last rename wins.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use mangahub::fs_utils::write_atomic;
///
/// write_atomic(Path::new("/tmp/mangahub/prefs.json"), b"{}")?;
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));

    if let Err(e) = std::fs::write(&tmp, contents) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = atomic_rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Get the platform-appropriate data directory.
///
/// - **Linux**: `$XDG_DATA_HOME/mangahub` or `~/.local/share/mangahub`
/// - **macOS**: `~/Library/Application Support/mangahub`
/// - **Windows**: `%APPDATA%\mangahub`
/// - **Fallback**: system temp directory + `mangahub`
pub fn get_data_base_dir() -> PathBuf {
    if let Some(data) = dirs::data_dir() {
        return data.join("mangahub");
    }
    std::env::temp_dir().join("mangahub")
}
