// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

#[derive(Debug, Clone)]
struct MockFile {
    content: Vec<u8>,
    modified: SystemTime,
}

impl MockFile {
    fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            modified: SystemTime::now(),
        }
    }
}

/// In-memory filesystem for tests.
///
/// Only files are tracked; directories exist implicitly. Calling
/// [`MockFileSystem::set_unavailable`] makes every operation fail, which is how
/// tests simulate a marker store outage.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockFile>>>,
    unavailable: Arc<AtomicBool>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let mut files = self.files.lock().unwrap();
        files.insert(path.as_ref().to_path_buf(), MockFile::new(content.into()));
    }

    /// Backdate (or postdate) an existing file. Missing files are ignored.
    pub fn set_modified(&self, path: impl AsRef<Path>, modified: SystemTime) {
        if let Some(file) = self.files.lock().unwrap().get_mut(path.as_ref()) {
            file.modified = modified;
        }
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.files.lock().unwrap().contains_key(path.as_ref())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self, path: &Path) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(anyhow!("mock filesystem unavailable: {:?}", path))
        } else {
            Ok(())
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.check_available(path)?;
        let files = self.files.lock().unwrap();
        match files.get(path) {
            Some(file) => {
                String::from_utf8(file.content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.check_available(path)?;
        self.add_file(path, contents);
        Ok(())
    }

    fn write_new(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        self.check_available(path)?;
        let mut files = self.files.lock().unwrap();
        if files.contains_key(path) {
            return Ok(false);
        }
        files.insert(path.to_path_buf(), MockFile::new(contents.to_vec()));
        Ok(true)
    }

    fn modified(&self, path: &Path) -> Result<Option<SystemTime>> {
        self.check_available(path)?;
        Ok(self.files.lock().unwrap().get(path).map(|f| f.modified))
    }

    fn try_exists(&self, path: &Path) -> Result<bool> {
        self.check_available(path)?;
        Ok(self.contains(path))
    }

    fn remove_file(&self, path: &Path) -> Result<bool> {
        self.check_available(path)?;
        let mut files = self.files.lock().unwrap();
        Ok(files.remove(path).is_some())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.check_available(path)?;
        let mut files = self.files.lock().unwrap();
        files.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.check_available(path)
    }
}
