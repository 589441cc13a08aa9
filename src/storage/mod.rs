//! Payload storage collaborator.
//!
//! The admission gate hands accepted files to a [`Storage`]; the worker uses
//! the same collaborator for per-run scratch space and its cleanup. The
//! bundled [`LocalStorage`] lands files under `<root>/landing/<folder>/` and
//! keeps scratch data under `<root>/staging/<run_id>/`.

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use globset::{Glob, GlobMatcher};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConfigFile;
use crate::errors::{PipeguardError, Result};
use crate::fs::{FileSystem, RealFileSystem};

/// A file submitted for processing.
#[derive(Debug, Clone)]
pub struct PendingItem {
    pub name: String,
    pub content: Vec<u8>,
}

impl PendingItem {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A file that was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredItem {
    /// Storage key, `<folder>/<file name>`.
    pub key: String,
    pub filename: String,
    pub folder: String,
    pub size: u64,
    /// blake3 digest of the content, hex encoded.
    pub digest: String,
}

/// A file that was not persisted, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Stored(StoredItem),
    Skipped(SkippedItem),
}

pub trait Storage: Send + Sync + Debug {
    /// Persist one submitted item.
    fn store(&self, submission_id: Uuid, item: &PendingItem) -> Result<Placement>;

    /// Scratch directory reserved for a run.
    fn scratch_dir(&self, run_id: Uuid) -> PathBuf;

    /// Create the run's scratch directory and return its path.
    fn prepare_scratch(&self, run_id: Uuid) -> Result<PathBuf>;

    /// Remove everything a run left in its scratch directory. Succeeds when
    /// there is nothing to remove.
    fn cleanup_scratch(&self, run_id: Uuid) -> Result<()>;

    /// Remove the scratch space of every run. Used when the id of an
    /// interrupted run is unknown.
    fn purge_scratch(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Route {
    matcher: GlobMatcher,
    folder: String,
}

/// [`Storage`] on a local (or mounted) filesystem.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    routes: Vec<Route>,
    default_folder: Option<String>,
    fs: Arc<dyn FileSystem>,
}

fn storage_err(err: anyhow::Error) -> PipeguardError {
    PipeguardError::StorageError(format!("{err:#}"))
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            routes: Vec::new(),
            default_folder: None,
            fs,
        }
    }

    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut storage = Self::new(&cfg.paths.storage_root, Arc::new(RealFileSystem));
        for rule in cfg.storage.route.iter() {
            storage = storage.with_route(&rule.pattern, &rule.folder)?;
        }
        if let Some(folder) = &cfg.storage.default_folder {
            storage = storage.with_default_folder(folder);
        }
        Ok(storage)
    }

    /// Add a routing rule; rules are tried in insertion order.
    pub fn with_route(mut self, pattern: &str, folder: &str) -> Result<Self> {
        let matcher = Glob::new(pattern)
            .map_err(|e| PipeguardError::ConfigError(format!("invalid route '{pattern}': {e}")))?
            .compile_matcher();
        self.routes.push(Route {
            matcher,
            folder: folder.to_string(),
        });
        Ok(self)
    }

    pub fn with_default_folder(mut self, folder: &str) -> Self {
        self.default_folder = Some(folder.to_string());
        self
    }

    fn landing_dir(&self) -> PathBuf {
        self.root.join("landing")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    fn folder_for(&self, filename: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.matcher.is_match(filename))
            .map(|r| r.folder.as_str())
            .or(self.default_folder.as_deref())
    }
}

/// Strip any directory components a client may have sent along.
fn bare_file_name(name: &str) -> Option<&str> {
    let normalized = name.rsplit(|c| c == '/' || c == '\\').next()?;
    let trimmed = normalized.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        None
    } else {
        Some(trimmed)
    }
}

impl Storage for LocalStorage {
    fn store(&self, submission_id: Uuid, item: &PendingItem) -> Result<Placement> {
        let Some(filename) = bare_file_name(&item.name) else {
            return Ok(Placement::Skipped(SkippedItem {
                filename: item.name.clone(),
                reason: "missing file name".to_string(),
            }));
        };

        let Some(folder) = self.folder_for(filename) else {
            debug!(%submission_id, filename, "no landing folder for file; skipping");
            return Ok(Placement::Skipped(SkippedItem {
                filename: filename.to_string(),
                reason: "unrecognized file name pattern".to_string(),
            }));
        };

        let path = self.landing_dir().join(folder).join(filename);
        self.fs.write(&path, &item.content).map_err(storage_err)?;

        let stored = StoredItem {
            key: format!("{folder}/{filename}"),
            filename: filename.to_string(),
            folder: folder.to_string(),
            size: item.content.len() as u64,
            digest: blake3::hash(&item.content).to_hex().to_string(),
        };
        info!(
            %submission_id,
            key = %stored.key,
            size = stored.size,
            "stored submitted file"
        );
        Ok(Placement::Stored(stored))
    }

    fn scratch_dir(&self, run_id: Uuid) -> PathBuf {
        self.staging_dir().join(run_id.to_string())
    }

    fn prepare_scratch(&self, run_id: Uuid) -> Result<PathBuf> {
        let dir = self.scratch_dir(run_id);
        self.fs.create_dir_all(&dir).map_err(storage_err)?;
        debug!(%run_id, dir = ?dir, "scratch space ready");
        Ok(dir)
    }

    fn cleanup_scratch(&self, run_id: Uuid) -> Result<()> {
        let dir = self.scratch_dir(run_id);
        self.fs.remove_dir_all(&dir).map_err(storage_err)?;
        debug!(%run_id, dir = ?dir, "scratch space removed");
        Ok(())
    }

    fn purge_scratch(&self) -> Result<()> {
        let dir = self.staging_dir();
        self.fs.remove_dir_all(&dir).map_err(storage_err)?;
        info!(dir = ?dir, "purged all run scratch space");
        Ok(())
    }
}
