//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched, so saves that rename a temporary file over
//! the original are seen as well.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ServerConfig;
use crate::observability::metrics;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Quiet period before a changed file is read.
pub const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Monitors one configuration file and emits each valid new version.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ServerConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ServerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    ///
    /// Events are coalesced: the file is read once it has been quiet for
    /// [`SETTLE_DELAY`]. Must be called from within a Tokio runtime.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = watch_dir(&self.path);
        let file_name = self.path.file_name().map(OsString::from);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = ?e, "Config watch error");
                        return;
                    }
                };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                if touches(&event, file_name.as_deref()) {
                    let _ = event_tx.send(());
                }
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tokio::spawn(reload_loop(self.path.clone(), event_rx, self.update_tx));

        tracing::info!(path = ?self.path, dir = ?dir, "Config watcher started");
        Ok(watcher)
    }
}

/// Load the file after each settled burst of change events. Ends when the
/// notify watcher is dropped.
async fn reload_loop(
    path: PathBuf,
    mut events: mpsc::UnboundedReceiver<()>,
    tx: mpsc::UnboundedSender<ServerConfig>,
) {
    while events.recv().await.is_some() {
        if !settle(&mut events, SETTLE_DELAY).await {
            break;
        }

        tracing::info!(path = ?path, "Config file changed; reloading");
        match load_config(&path) {
            Ok(config) => {
                if tx.send(config).is_err() {
                    tracing::debug!("Config update receiver dropped");
                    break;
                }
            }
            Err(e) => {
                metrics::record_config_reload(false);
                tracing::error!(
                    path = ?path,
                    error = %e,
                    "Failed to reload config. Keeping current configuration."
                );
            }
        }
    }
    tracing::debug!(path = ?path, "Config watcher stopped");
}

/// Swallow events until none arrives for `quiet`. Returns false once the
/// sender side is gone.
async fn settle(events: &mut mpsc::UnboundedReceiver<()>, quiet: Duration) -> bool {
    loop {
        match tokio::time::timeout(quiet, events.recv()).await {
            Ok(Some(())) => continue,
            Ok(None) => return false,
            Err(_) => return true,
        }
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn touches(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    match file_name {
        Some(name) => event.paths.iter().any(|p| p.file_name() == Some(name)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind};

    #[test]
    fn test_watch_dir_of_bare_file_name() {
        assert_eq!(watch_dir(Path::new("server.toml")), PathBuf::from("."));
        assert_eq!(watch_dir(Path::new("/etc/ssr/server.toml")), PathBuf::from("/etc/ssr"));
    }

    #[test]
    fn test_only_events_for_the_config_file_count() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/ssr/other.toml"));
        assert!(!touches(&event, Some(std::ffi::OsStr::new("server.toml"))));

        let event = event.add_path(PathBuf::from("/etc/ssr/server.toml"));
        assert!(touches(&event, Some(std::ffi::OsStr::new("server.toml"))));
    }

    #[tokio::test]
    async fn test_burst_of_events_settles_once() {
        let quiet = Duration::from_millis(20);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for _ in 0..5 {
            tx.send(()).unwrap();
        }

        assert!(rx.recv().await.is_some());
        assert!(settle(&mut rx, quiet).await);
        assert!(rx.try_recv().is_err());

        drop(tx);
        assert!(!settle(&mut rx, quiet).await);
    }

    #[tokio::test]
    async fn test_truncate_then_write_emits_final_version_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "port = 4000\n").unwrap();

        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let _watcher = watcher.run().unwrap();

        std::fs::write(&path, "").unwrap();
        std::fs::write(&path, "port = 4200\n").unwrap();

        let config = tokio::time::timeout(Duration::from_secs(10), updates.recv())
            .await
            .expect("no update emitted")
            .unwrap();
        assert_eq!(config.port, 4200);
    }

    #[tokio::test]
    async fn test_rewrite_emits_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "port = 4000\n").unwrap();

        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let _watcher = watcher.run().unwrap();

        std::fs::write(&path, "port = 4100\n").unwrap();

        // A truncate-then-write save can surface an intermediate version.
        let latest = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(config) = updates.recv().await {
                if config.port == 4100 {
                    return Some(config);
                }
            }
            None
        })
        .await
        .expect("no update emitted");
        assert!(latest.is_some());
    }
}
