//! Versioned, hot-reloadable configuration holder.

use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by document loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Loader<T> = Box<dyn Fn(&[u8]) -> Result<T, BoxError> + Send + Sync>;
type Listener<T> = Arc<dyn Fn(Arc<T>) + Send + Sync>;

/// Configuration reload errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: BoxError },
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        source: notify::Error,
    },
}

/// Result of a successful reload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// File content hashed the same as the current snapshot.
    Unchanged,
    Reloaded { version: u64 },
}

struct Current<T> {
    document: Arc<T>,
    version: u64,
}

/// Holds the current configuration document and swaps it on reload.
///
/// Readers clone an `Arc` under a read lock and never wait on parsing. A
/// failed reload leaves the previous document in place.
pub struct ConfigManager<T> {
    path: PathBuf,
    loader: Loader<T>,
    current: RwLock<Current<T>>,
    /// Hash of the last applied content. Also serializes reloads.
    last_hash: Mutex<String>,
    listeners: RwLock<Vec<Listener<T>>>,
}

impl<T: Send + Sync + 'static> ConfigManager<T> {
    /// Load the document at `path` with `loader`.
    ///
    /// Fails when the initial load fails since there is nothing to fall back on.
    pub fn new<F>(path: impl Into<PathBuf>, loader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&[u8]) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let path = path.into();
        let bytes = read(&path)?;
        let hash = content_hash(&bytes);
        let document = loader(&bytes).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

        tracing::info!("Loaded configuration from {} ({})", path.display(), short(&hash));

        Ok(Self {
            path,
            loader: Box::new(loader),
            current: RwLock::new(Current {
                document: Arc::new(document),
                version: 1,
            }),
            last_hash: Mutex::new(hash),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// The current document.
    pub fn get(&self) -> Arc<T> {
        self.current.read().document.clone()
    }

    /// Version of the current document, starting at 1.
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a listener called with the new document after every reload.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(Arc<T>) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(callback));
    }

    /// Re-read the file and swap in the new document if its content changed.
    pub fn reload(&self) -> Result<ReloadOutcome, ConfigError> {
        let mut last_hash = self.last_hash.lock();

        let bytes = read(&self.path)?;
        let hash = content_hash(&bytes);
        if *last_hash == hash {
            tracing::debug!("Configuration {} unchanged, skipping reload", self.path.display());
            return Ok(ReloadOutcome::Unchanged);
        }

        let document = Arc::new((self.loader)(&bytes).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?);

        let version = {
            let mut current = self.current.write();
            current.document = document.clone();
            current.version += 1;
            current.version
        };
        *last_hash = hash;

        tracing::info!(
            "Reloaded configuration from {} (version {}, {})",
            self.path.display(),
            version,
            short(&last_hash)
        );

        // Listeners run outside the snapshot lock; the hash lock keeps
        // notifications in reload order.
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(document.clone());
        }

        Ok(ReloadOutcome::Reloaded { version })
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::SAMPLE;
    use crate::catalog::Catalog;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn catalog_loader(bytes: &[u8]) -> Result<Catalog, BoxError> {
        Ok(Catalog::from_yaml(bytes)?)
    }

    fn setup() -> (TempDir, PathBuf, ConfigManager<Catalog>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let manager = ConfigManager::new(&path, catalog_loader).unwrap();
        (dir, path, manager)
    }

    fn counting(manager: &ConfigManager<Catalog>) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        manager.on_update(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        calls
    }

    #[test]
    fn test_identical_content_skips_reload() {
        let (_dir, path, manager) = setup();
        let calls = counting(&manager);

        // Rewriting the same bytes still changes mtime; only the hash matters.
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(manager.reload().unwrap(), ReloadOutcome::Unchanged);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.version(), 1);
    }

    #[test]
    fn test_changed_content_notifies_once() {
        let (_dir, path, manager) = setup();
        let seen: Arc<parking_lot::Mutex<Vec<usize>>> = Arc::default();
        let s = seen.clone();
        manager.on_update(move |catalog: Arc<Catalog>| s.lock().push(catalog.components.len()));

        std::fs::write(&path, "components:\n  - name: A\n  - name: B\n").unwrap();
        assert_eq!(manager.reload().unwrap(), ReloadOutcome::Reloaded { version: 2 });

        assert_eq!(*seen.lock(), vec![2]);
        assert!(manager.get().component("a").is_some());
    }

    #[test]
    fn test_invalid_content_keeps_previous() {
        let (_dir, path, manager) = setup();
        let calls = counting(&manager);
        let before = manager.get();

        std::fs::write(&path, "components: [ {name: ").unwrap();
        assert!(matches!(manager.reload(), Err(ConfigError::Parse { .. })));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(*manager.get(), *before);
        assert_eq!(manager.version(), 1);

        // Fixing the file afterwards applies normally.
        std::fs::write(&path, "components:\n  - name: Fixed\n").unwrap();
        assert_eq!(manager.reload().unwrap(), ReloadOutcome::Reloaded { version: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_file_keeps_previous() {
        let (_dir, path, manager) = setup();
        let calls = counting(&manager);

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(manager.reload(), Err(ConfigError::Read { .. })));
        assert!(manager.get().component("build-farm").is_some());

        // Recreated with the same bytes: nothing changed.
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(manager.reload().unwrap(), ReloadOutcome::Unchanged);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_initial_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigManager::new(dir.path().join("absent.yaml"), catalog_loader);
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let (_dir, path, manager) = setup();
        let order: Arc<parking_lot::Mutex<Vec<&'static str>>> = Arc::default();
        for name in ["first", "second"] {
            let o = order.clone();
            manager.on_update(move |_| o.lock().push(name));
        }

        std::fs::write(&path, "components: []\n").unwrap();
        manager.reload().unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_readers_see_new_document_while_listener_runs() {
        let (_dir, path, manager) = setup();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let entered_tx = parking_lot::Mutex::new(entered_tx);
        let release_rx = parking_lot::Mutex::new(release_rx);
        manager.on_update(move |_| {
            let _ = entered_tx.lock().send(());
            let _ = release_rx.lock().recv();
        });

        std::fs::write(&path, "components:
  - name: Blocked
").unwrap();
        std::thread::scope(|scope| {
            let reload = scope.spawn(|| manager.reload());
            entered_rx.recv_timeout(std::time::Duration::from_secs(10)).unwrap();

            // The listener is still parked; readers must not wait on it.
            assert!(manager.get().component("blocked").is_some());
            assert_eq!(manager.version(), 2);

            release_tx.send(()).unwrap();
            assert_eq!(reload.join().unwrap().unwrap(), ReloadOutcome::Reloaded { version: 2 });
        });
    }
}
