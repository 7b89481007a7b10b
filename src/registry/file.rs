//! Route files watched for changes.

use async_trait::async_trait;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::registry::{Backend, RegistryError};

/// Reads service routes from `path` and overrides from `manual_path`,
/// pushing a fresh snapshot whenever either file changes.
pub struct FileBackend {
    path: PathBuf,
    manual_path: Option<PathBuf>,
    /// Dropping a watcher stops it.
    watchers: Mutex<Vec<RecommendedWatcher>>,
}

impl FileBackend {
    pub fn new(path: impl AsRef<Path>, manual_path: Option<&str>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            manual_path: manual_path.map(PathBuf::from),
            watchers: Mutex::new(Vec::new()),
        }
    }

    fn watch(&self, path: &Path) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(4);

        match std::fs::read_to_string(path) {
            Ok(text) => {
                let _ = tx.try_send(text);
            }
            Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to read route file"),
        }

        let watched = path.to_path_buf();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match std::fs::read_to_string(&watched) {
                        Ok(text) => {
                            tracing::debug!(path = ?watched, "Route file changed");
                            // Runs on the notify thread, outside the runtime.
                            if tx.blocking_send(text).is_err() {
                                tracing::debug!(path = ?watched, "Route watch receiver gone");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(path = ?watched, error = %e, "Failed to reload route file");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(path = ?watched, error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .and_then(|mut watcher| {
            watcher.watch(path, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        });

        match watcher {
            Ok(watcher) => {
                tracing::info!(path = ?path, "Route file watcher started");
                if let Ok(mut watchers) = self.watchers.lock() {
                    watchers.push(watcher);
                }
            }
            Err(e) => {
                tracing::error!(path = ?path, error = %e, "Cannot watch route file, changes will be ignored");
            }
        }
        rx
    }
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    /// Succeeds once the route file is readable.
    async fn register(&self) -> Result<(), RegistryError> {
        tokio::fs::metadata(&self.path)
            .await
            .map(|_| ())
            .map_err(|source| RegistryError::Io {
                path: self.path.display().to_string(),
                source,
            })
    }

    async fn deregister(&self) -> Result<(), RegistryError> {
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.clear();
        }
        Ok(())
    }

    fn watch_services(&self) -> mpsc::Receiver<String> {
        self.watch(&self.path)
    }

    fn watch_manual(&self) -> mpsc::Receiver<String> {
        match &self.manual_path {
            Some(path) => self.watch(path),
            None => mpsc::channel(1).1,
        }
    }
}
