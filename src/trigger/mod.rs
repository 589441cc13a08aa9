//! Single-slot trigger mailbox between the admission process and the worker.
//!
//! The slot holds at most one [`TriggerSignal`]. Posting into an occupied slot
//! is rejected rather than overwriting, so a second submission can never
//! silently replace the one the worker is about to run.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{PipeguardError, Result};
use crate::fs::{FileSystem, RealFileSystem};

/// Well-known trigger file name inside the trigger directory.
pub const TRIGGER_FILE_NAME: &str = "complete";

/// Payload of the trigger slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSignal {
    pub submission_id: Uuid,
    /// Identifiers of the accepted items, in submission order.
    pub items: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TriggerSignal {
    pub fn new(submission_id: Uuid, items: Vec<String>) -> Self {
        Self {
            submission_id,
            items,
            created_at: Utc::now(),
        }
    }

    /// Signal for a trigger file whose contents could not be decoded (e.g. one
    /// created by hand with `touch`).
    pub fn anonymous() -> Self {
        Self::new(Uuid::nil(), Vec::new())
    }
}

/// Capacity-1 mailbox contract.
pub trait TriggerSlot: Send + Sync + Debug {
    /// Put a signal into the slot. Fails with
    /// [`PipeguardError::TriggerOccupied`] when a signal is already waiting.
    fn post(&self, signal: &TriggerSignal) -> Result<()>;

    /// Read the waiting signal without consuming it.
    fn peek(&self) -> Result<Option<TriggerSignal>>;

    fn is_present(&self) -> Result<bool>;

    /// Empty the slot. Clearing an empty slot succeeds.
    fn clear(&self) -> Result<()>;
}

/// Trigger slot backed by a single file in a watched directory.
#[derive(Debug, Clone)]
pub struct FileTriggerSlot {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl FileTriggerSlot {
    pub fn new(dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            dir: dir.into(),
            fs,
        }
    }

    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, Arc::new(RealFileSystem))
    }

    /// Directory the watcher subscribes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(TRIGGER_FILE_NAME)
    }
}

fn trigger_err(err: anyhow::Error) -> PipeguardError {
    PipeguardError::TriggerError(format!("{err:#}"))
}

impl TriggerSlot for FileTriggerSlot {
    fn post(&self, signal: &TriggerSignal) -> Result<()> {
        let body = serde_json::to_vec_pretty(signal)
            .map_err(|e| PipeguardError::TriggerError(e.to_string()))?;
        let path = self.path();
        if self.fs.write_new(&path, &body).map_err(trigger_err)? {
            debug!(path = ?path, submission_id = %signal.submission_id, "trigger posted");
            Ok(())
        } else {
            Err(PipeguardError::TriggerOccupied)
        }
    }

    fn peek(&self) -> Result<Option<TriggerSignal>> {
        let path = self.path();
        if !self.fs.try_exists(&path).map_err(trigger_err)? {
            return Ok(None);
        }
        let body = match self.fs.read_to_string(&path) {
            Ok(b) => b,
            // Cleared between the existence check and the read.
            Err(_) if !self.fs.try_exists(&path).map_err(trigger_err)? => return Ok(None),
            Err(e) => return Err(trigger_err(e)),
        };
        match serde_json::from_str::<TriggerSignal>(&body) {
            Ok(signal) => Ok(Some(signal)),
            Err(e) => {
                warn!(path = ?path, error = %e, "trigger file is not a signal document; treating as anonymous trigger");
                Ok(Some(TriggerSignal::anonymous()))
            }
        }
    }

    fn is_present(&self) -> Result<bool> {
        self.fs.try_exists(&self.path()).map_err(trigger_err)
    }

    fn clear(&self) -> Result<()> {
        let removed = self.fs.remove_file(&self.path()).map_err(trigger_err)?;
        debug!(removed, "trigger cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn slot() -> (FileTriggerSlot, MockFileSystem) {
        let fs = MockFileSystem::new();
        (FileTriggerSlot::new("/trigger", Arc::new(fs.clone())), fs)
    }

    #[test]
    fn second_post_is_rejected_and_first_signal_kept() {
        let (slot, _) = slot();
        let first = TriggerSignal::new(Uuid::new_v4(), vec!["a.csv".into()]);
        let second = TriggerSignal::new(Uuid::new_v4(), vec!["b.csv".into()]);

        slot.post(&first).unwrap();
        assert!(matches!(slot.post(&second), Err(PipeguardError::TriggerOccupied)));
        assert_eq!(slot.peek().unwrap(), Some(first));
    }

    #[test]
    fn clear_is_idempotent() {
        let (slot, _) = slot();
        slot.clear().unwrap();
        slot.post(&TriggerSignal::anonymous()).unwrap();
        slot.clear().unwrap();
        slot.clear().unwrap();
        assert!(!slot.is_present().unwrap());
        assert_eq!(slot.peek().unwrap(), None);
    }

    #[test]
    fn concurrent_peek_never_sees_a_half_written_signal() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let slot = FileTriggerSlot::on_disk(dir.path());
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let slot = slot.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                while !done.load(Ordering::SeqCst) {
                    if let Some(signal) = slot.peek().unwrap() {
                        seen.push(signal);
                    }
                }
                seen
            })
        };

        let items: Vec<String> = (0..200).map(|i| format!("landing/file-{i}.csv")).collect();
        for _ in 0..50 {
            slot.post(&TriggerSignal::new(Uuid::new_v4(), items.clone()))
                .unwrap();
            slot.clear().unwrap();
        }
        done.store(true, Ordering::SeqCst);

        for signal in reader.join().unwrap() {
            assert!(!signal.submission_id.is_nil());
            assert_eq!(signal.items.len(), items.len());
        }
    }

    #[test]
    fn hand_written_trigger_is_anonymous() {
        let (slot, fs) = slot();
        fs.add_file("/trigger/complete", "trigger");
        let signal = slot.peek().unwrap().unwrap();
        assert!(signal.submission_id.is_nil());
        assert!(signal.items.is_empty());
    }
}
