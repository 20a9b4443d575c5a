//! Configuration file watching
//!
//! The notify backend delivers file-system events on its own thread. The
//! watcher only forwards a notification over a channel; reloading and
//! applying the configuration happens on the driver's task.

use crate::{Error, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default quiet period before a burst of file events is reported
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches one configuration file for changes
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
    events: mpsc::UnboundedReceiver<()>,
    // Dropping the watcher stops the backend thread
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `path`
    ///
    /// The parent directory is watched rather than the file itself so that
    /// editors which save by replacing the file are still noticed.
    pub fn new<P: AsRef<Path>>(path: P, debounce: Duration) -> Result<Self> {
        let path = std::fs::canonicalize(path.as_ref())?;
        let file_name: OsString = path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| Error::Config(format!("{} is not a file", path.display())))?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::Config(format!("{} has no parent directory", path.display())))?;

        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_)
                ) && event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if relevant {
                    let _ = tx.send(());
                }
            }
            Err(e) => tracing::error!("Config watcher error: {}", e),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!("Watching {} for changes", path.display());
        Ok(Self {
            path,
            debounce,
            events,
            _watcher: watcher,
        })
    }

    /// The watched file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next change, folding a burst of events into one
    ///
    /// Returns `None` once the backend has shut down.
    pub async fn changed(&mut self) -> Option<()> {
        self.events.recv().await?;
        tokio::time::sleep(self.debounce).await;
        while self.events.try_recv().is_ok() {}
        tracing::debug!("{} changed", self.path.display());
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bots.json");
        std::fs::write(&path, r#"{"servers": []}"#).unwrap();

        let mut watcher = ConfigWatcher::new(&path, Duration::from_millis(50)).unwrap();
        std::fs::write(&path, r#"{"servers": [] }"#).unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(5), watcher.changed()).await;
        assert_eq!(changed.unwrap(), Some(()));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigWatcher::new(dir.path().join("nope.toml"), DEFAULT_DEBOUNCE).is_err());
    }
}
