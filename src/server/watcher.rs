//! Preference file hot reload
//!
//! Watches the directory holding the preference file (editors replace files
//! rather than write in place, so the file itself is not a stable target) and
//! reloads the preferences when it changes.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │   notify    │────>│  debouncer  │────>│ Preferences  │────>│ on_frequency_    │
//! │   watcher   │     │  (250ms)    │     │   reload()   │     │ change(hours)    │
//! └─────────────┘     └─────────────┘     └──────────────┘     └──────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};

use crate::error::{HubError, Result};
use crate::prefs::Preferences;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub debounce_duration: Duration,
    /// How often the worker thread checks for shutdown
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(250),
            poll_interval: Duration::from_millis(100),
        }
    }
}

pub struct PrefsWatcher {
    path: PathBuf,
    config: WatcherConfig,
}

/// Stops the watcher thread when dropped
pub struct WatcherHandle {
    running: Arc<AtomicBool>,
}

impl WatcherHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watcher_error(e: impl std::fmt::Display) -> HubError {
    HubError::Watcher {
        message: e.to_string(),
    }
}

impl PrefsWatcher {
    pub fn new(prefs: &Preferences) -> Self {
        Self::with_config(prefs, WatcherConfig::default())
    }

    pub fn with_config(prefs: &Preferences, config: WatcherConfig) -> Self {
        Self {
            path: prefs.path().to_path_buf(),
            config,
        }
    }

    /// Watch until the handle is dropped. `on_frequency_change` receives the
    /// new `updateFrequency` whenever a reload changes it.
    pub fn start<F>(self, prefs: Arc<Preferences>, on_frequency_change: F) -> Result<WatcherHandle>
    where
        F: Fn(u64) + Send + 'static,
    {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| watcher_error(format!("not a file path: {}", self.path.display())))?;

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(self.config.debounce_duration, tx).map_err(watcher_error)?;
        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watcher_error)?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let poll_interval = self.config.poll_interval;
        tracing::info!(path = %self.path.display(), "Watching preferences");

        std::thread::spawn(move || {
            // The debouncer stops watching when dropped
            let _debouncer = debouncer;

            while thread_running.load(Ordering::SeqCst) {
                match rx.recv_timeout(poll_interval) {
                    Ok(Ok(events)) => {
                        let touched = events.iter().any(|event| {
                            matches!(event.kind, DebouncedEventKind::Any)
                                && event.path.file_name() == Some(file_name.as_os_str())
                        });
                        if !touched {
                            continue;
                        }

                        match prefs.reload() {
                            Ok(true) => {
                                let hours = prefs.library().update_frequency;
                                tracing::info!(hours, "Update frequency changed on disk");
                                on_frequency_change(hours);
                            }
                            Ok(false) => tracing::debug!("Preferences reloaded"),
                            // Keep the previous values until the file parses again
                            Err(e) => tracing::warn!("Ignoring unreadable preferences: {}", e),
                        }
                    }
                    Ok(Err(e)) => tracing::error!("Watcher error: {:?}", e),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            tracing::debug!("Preference watcher stopped");
        });

        Ok(WatcherHandle { running })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_frequency_edit_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("preferences.json");
        let prefs = Arc::new(Preferences::open(&path).unwrap());

        let (tx, rx) = std::sync::mpsc::channel();
        let config = WatcherConfig {
            debounce_duration: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
        };
        let _handle = PrefsWatcher::with_config(&prefs, config)
            .start(Arc::clone(&prefs), move |hours| {
                let _ = tx.send(hours);
            })
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        std::fs::write(&path, r#"{"library": {"updateFrequency": 12}}"#).unwrap();

        let hours = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(hours, 12);
        assert_eq!(prefs.library().update_frequency, 12);
    }

    #[test]
    fn test_other_files_are_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("preferences.json");
        let prefs = Arc::new(Preferences::open(&path).unwrap());

        let (tx, rx) = std::sync::mpsc::channel();
        let config = WatcherConfig {
            debounce_duration: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
        };
        let _handle = PrefsWatcher::with_config(&prefs, config)
            .start(Arc::clone(&prefs), move |hours| {
                let _ = tx.send(hours);
            })
            .unwrap();

        std::fs::write(temp.path().join("other.json"), "{}").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }
}
