//! Filesystem watcher driving [`ConfigManager`] reloads.
//!
//! The containing directory is watched rather than the file itself, so a
//! file that is removed and recreated, or swapped in through a symlink
//! change of a mounted volume, is still picked up.

use super::manager::{ConfigError, ConfigManager, ReloadOutcome};

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Keeps the watcher alive. Dropping it stops reloads.
pub struct ConfigWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl<T: Send + Sync + 'static> ConfigManager<T> {
    /// Watch the configuration file's directory and reload on change.
    ///
    /// Bursts of events within `debounce` collapse into one reload attempt.
    pub fn watch(self: &Arc<Self>, debounce: Duration) -> Result<ConfigWatcher, ConfigError> {
        let dir = watch_dir(self.path());
        let manager: Weak<Self> = Arc::downgrade(self);

        let watch_error = |source| ConfigError::Watch {
            path: dir.clone(),
            source,
        };

        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            match result {
                Ok(events) if events.is_empty() => {}
                Ok(events) => {
                    tracing::debug!("Configuration watcher saw {} events", events.len());
                    match manager.reload() {
                        Ok(ReloadOutcome::Unchanged) => {}
                        Ok(ReloadOutcome::Reloaded { version }) => {
                            tracing::debug!("Configuration now at version {}", version);
                        }
                        Err(e) => {
                            tracing::error!("Configuration reload failed, keeping previous: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Configuration watch error: {}", e);
                }
            }
        })
        .map_err(watch_error)?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        tracing::info!("Watching {} for configuration changes", dir.display());

        Ok(ConfigWatcher {
            _debouncer: debouncer,
        })
    }
}

fn watch_dir(path: &Path) -> std::path::PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::SAMPLE;
    use crate::catalog::Catalog;
    use std::sync::mpsc;

    fn manager_in(dir: &Path) -> Arc<ConfigManager<Catalog>> {
        let path = dir.join("catalog.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        Arc::new(ConfigManager::new(path, |b: &[u8]| Ok(Catalog::from_yaml(b)?)).unwrap())
    }

    #[test]
    fn test_watch_dir() {
        assert_eq!(watch_dir(Path::new("catalog.yaml")), Path::new("."));
        assert_eq!(watch_dir(Path::new("/etc/board/catalog.yaml")), Path::new("/etc/board"));
    }

    #[test]
    fn test_watcher_reloads_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        manager.on_update(move |catalog: Arc<Catalog>| {
            let _ = tx.lock().send(catalog.components.len());
        });

        let _watcher = manager.watch(Duration::from_millis(50)).unwrap();
        std::fs::write(manager.path(), "components:\n  - name: A\n  - name: B\n").unwrap();

        // A write may surface as several events; wait for the complete document.
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while rx.recv_timeout(deadline - std::time::Instant::now()).unwrap() != 2 {}
        assert!(manager.get().component("b").is_some());
    }

    #[test]
    fn test_watcher_survives_remove_and_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        manager.on_update(move |catalog: Arc<Catalog>| {
            let _ = tx.lock().send(catalog.components.first().map(|c| c.slug.clone()));
        });

        let _watcher = manager.watch(Duration::from_millis(50)).unwrap();
        std::fs::remove_file(manager.path()).unwrap();
        std::fs::write(manager.path(), "components:\n  - name: Swapped\n").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while rx.recv_timeout(deadline - std::time::Instant::now()).unwrap().as_deref() != Some("swapped") {}
        assert!(manager.get().component("swapped").is_some());
    }

    #[test]
    fn test_write_burst_collapses_into_one_reload() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path());
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        manager.on_update(move |catalog: Arc<Catalog>| {
            let _ = tx.lock().send(catalog.components.len());
        });

        let _watcher = manager.watch(Duration::from_millis(500)).unwrap();
        for count in 1..=5 {
            let names: String = (0..count).map(|i| format!("  - name: C{}\n", i)).collect();
            std::fs::write(manager.path(), format!("components:\n{}", names)).unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        assert_eq!(rx.recv_timeout(deadline - std::time::Instant::now()).unwrap(), 5);

        // Quiet period longer than the debounce: no trailing reloads.
        assert!(rx.recv_timeout(Duration::from_millis(1500)).is_err());
        assert_eq!(manager.version(), 2);
    }
}
