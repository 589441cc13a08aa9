// src/fs/mod.rs

use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use uuid::Uuid;

pub mod mock;

/// Abstract filesystem interface used by the marker store, the trigger slot
/// and the run journal.
pub trait FileSystem: Send + Sync + Debug {
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Create or truncate `path`, creating parent directories as needed.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Create `path` only if it does not exist yet.
    ///
    /// Returns `Ok(false)` when the file was already present; the existing
    /// file is left untouched. Readers never observe a partially written
    /// file at `path`.
    fn write_new(&self, path: &Path, contents: &[u8]) -> Result<bool>;

    /// Last modification time, or `None` when `path` does not exist.
    fn modified(&self, path: &Path) -> Result<Option<SystemTime>>;

    /// Existence check that surfaces IO errors instead of folding them into
    /// `false`.
    fn try_exists(&self, path: &Path) -> Result<bool>;

    /// Remove a file. Removing a missing file is not an error; the return
    /// value says whether something was actually removed.
    fn remove_file(&self, path: &Path) -> Result<bool>;

    /// Remove a directory tree. Missing directories are ignored.
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let mut file =
            fs::File::create(path).with_context(|| format!("creating file {:?}", path))?;
        file.write_all(contents)
            .with_context(|| format!("writing to file {:?}", path))?;
        file.sync_all()
            .with_context(|| format!("syncing file {:?}", path))?;
        Ok(())
    }

    fn write_new(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        let parent = path
            .parent()
            .with_context(|| format!("no parent directory for {:?}", path))?;
        fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;

        // Write the body under a private name, then publish it with a hard
        // link, which fails instead of replacing an existing file.
        let staged = staging_path(path);
        let published = write_staged(&staged, contents)
            .and_then(|()| match fs::hard_link(&staged, path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e).with_context(|| format!("publishing file {:?}", path)),
            });
        if let Err(e) = fs::remove_file(&staged) {
            if e.kind() != ErrorKind::NotFound {
                return Err(e).with_context(|| format!("removing staged file {:?}", staged));
            }
        }
        published
    }

    fn modified(&self, path: &Path) -> Result<Option<SystemTime>> {
        match fs::metadata(path) {
            Ok(meta) => meta
                .modified()
                .map(Some)
                .with_context(|| format!("reading mtime of {:?}", path)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading metadata of {:?}", path)),
        }
    }

    fn try_exists(&self, path: &Path) -> Result<bool> {
        path.try_exists()
            .with_context(|| format!("checking existence of {:?}", path))
    }

    fn remove_file(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("removing file {:?}", path)),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing dir {:?}", path)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("creating dir {:?}", path))
    }
}

/// Hidden sibling of `path` used while its body is written.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
}

fn write_staged(staged: &Path, contents: &[u8]) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staged)
        .with_context(|| format!("creating file {:?}", staged))?;
    file.write_all(contents)
        .with_context(|| format!("writing to file {:?}", staged))?;
    file.sync_all()
        .with_context(|| format!("syncing file {:?}", staged))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_new_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot/complete");
        let fs = RealFileSystem;

        assert!(fs.write_new(&path, b"first").unwrap());
        assert!(!fs.write_new(&path, b"second").unwrap());
        assert_eq!(fs.read_to_string(&path).unwrap(), "first");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("complete")]);
    }

    #[test]
    fn modified_is_none_for_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        let path = dir.path().join("marker");

        assert_eq!(fs.modified(&path).unwrap(), None);
        fs.write(&path, b"x").unwrap();
        assert!(fs.modified(&path).unwrap().is_some());
    }

    #[test]
    fn removing_missing_entries_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;

        assert!(!fs.remove_file(&dir.path().join("nope")).unwrap());
        fs.remove_dir_all(&dir.path().join("nope-dir")).unwrap();
    }
}
