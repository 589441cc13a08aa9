//! Durable "a run is in progress" marker.
//!
//! The marker is the only cross-process source of truth for admission. The
//! admission process creates it; the worker deletes it when a run ends. Both
//! talk to it through the [`MarkerStore`] trait so the backing store can be
//! swapped (shared volume, object store, in-memory for tests).

use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::errors::{PipeguardError, Result};
use crate::fs::{FileSystem, RealFileSystem};

/// Fixed key of the processing marker.
pub const PROCESSING_MARKER: &str = "_complete";

/// Key-existence store with an optional message per key.
///
/// Every failure is reported as [`PipeguardError::MarkerStoreUnavailable`];
/// callers decide whether to fail open or closed.
pub trait MarkerStore: Send + Sync + Debug {
    fn exists(&self, key: &str) -> Result<bool>;

    /// Message stored with the marker, or `None` if the marker is absent.
    fn read(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, message: &str) -> Result<()>;

    /// Time since the marker was last written, or `None` if it is absent.
    fn age(&self, key: &str) -> Result<Option<Duration>>;

    /// Delete the marker. Deleting an absent marker succeeds.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Marker store backed by files in a directory, one file per key.
#[derive(Debug, Clone)]
pub struct FsMarkerStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl FsMarkerStore {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    /// Store on the real filesystem.
    pub fn on_disk(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(RealFileSystem))
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let mut components = Path::new(key).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(key)),
            _ => Err(PipeguardError::MarkerStoreUnavailable(format!(
                "invalid marker key '{key}'"
            ))),
        }
    }
}

fn unavailable(err: anyhow::Error) -> PipeguardError {
    PipeguardError::MarkerStoreUnavailable(format!("{err:#}"))
}

impl MarkerStore for FsMarkerStore {
    fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        self.fs.try_exists(&path).map_err(unavailable)
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if !self.fs.try_exists(&path).map_err(unavailable)? {
            return Ok(None);
        }
        // The marker may vanish between the two calls; treat that as absent.
        match self.fs.read_to_string(&path) {
            Ok(message) => Ok(Some(message)),
            Err(err) => {
                if self.fs.try_exists(&path).map_err(unavailable)? {
                    Err(unavailable(err))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn put(&self, key: &str, message: &str) -> Result<()> {
        let path = self.path_for(key)?;
        self.fs
            .write(&path, message.as_bytes())
            .map_err(unavailable)?;
        debug!(key, path = ?path, "marker written");
        Ok(())
    }

    fn age(&self, key: &str) -> Result<Option<Duration>> {
        let path = self.path_for(key)?;
        let modified = self.fs.modified(&path).map_err(unavailable)?;
        // A clock that runs behind the writer reads as a brand-new marker.
        Ok(modified.map(|at| SystemTime::now().duration_since(at).unwrap_or_default()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let removed = self.fs.remove_file(&path).map_err(unavailable)?;
        debug!(key, removed, "marker delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn store() -> (FsMarkerStore, MockFileSystem) {
        let fs = MockFileSystem::new();
        (FsMarkerStore::new("/markers", Arc::new(fs.clone())), fs)
    }

    #[test]
    fn put_then_read_returns_message() {
        let (store, _) = store();
        assert!(!store.exists(PROCESSING_MARKER).unwrap());

        store.put(PROCESSING_MARKER, "processing 2 files").unwrap();

        assert!(store.exists(PROCESSING_MARKER).unwrap());
        assert_eq!(
            store.read(PROCESSING_MARKER).unwrap().as_deref(),
            Some("processing 2 files")
        );
    }

    #[test]
    fn deleting_absent_marker_is_a_noop() {
        let (store, _) = store();
        store.delete(PROCESSING_MARKER).unwrap();
        store.put(PROCESSING_MARKER, "").unwrap();
        store.delete(PROCESSING_MARKER).unwrap();
        store.delete(PROCESSING_MARKER).unwrap();
        assert!(!store.exists(PROCESSING_MARKER).unwrap());
    }

    #[test]
    fn age_tracks_the_last_write() {
        let (store, fs) = store();
        assert_eq!(store.age(PROCESSING_MARKER).unwrap(), None);

        store.put(PROCESSING_MARKER, "busy").unwrap();
        fs.set_modified(
            "/markers/_complete",
            SystemTime::now() - Duration::from_secs(90),
        );

        let age = store.age(PROCESSING_MARKER).unwrap().unwrap();
        assert!(age >= Duration::from_secs(90), "{age:?}");
    }

    #[test]
    fn outage_is_reported_as_unavailable() {
        let (store, fs) = store();
        fs.set_unavailable(true);
        assert!(matches!(
            store.exists(PROCESSING_MARKER),
            Err(PipeguardError::MarkerStoreUnavailable(_))
        ));
    }

    #[test]
    fn keys_cannot_escape_the_root() {
        let (store, _) = store();
        assert!(store.put("../elsewhere", "x").is_err());
        assert!(store.put("a/b", "x").is_err());
    }
}
