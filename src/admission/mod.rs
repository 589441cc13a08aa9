//! Admission gate and status endpoint (the upload-side process).
//!
//! The gate is the authoritative single-flight check: it refuses a
//! submission whenever the processing marker exists, and fails closed when
//! the marker store cannot be read. The status endpoint reads the same
//! marker but fails open.

pub mod status;

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AdmissionSection;
use crate::errors::PipeguardError;
use crate::marker::{MarkerStore, PROCESSING_MARKER};
use crate::storage::{PendingItem, Placement, SkippedItem, Storage, StoredItem};
use crate::trigger::{TriggerSignal, TriggerSlot};

pub use status::{ProcessingStatus, StatusEndpoint, StatusState};

/// Why a submission was not accepted.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// A run is already in progress.
    #[error("{message}")]
    Conflict { message: String, retry_hint: String },

    /// The marker store could not be consulted; the gate refuses rather than
    /// risk a second run.
    #[error("marker store unavailable: {0}")]
    MarkerStoreUnavailable(String),

    #[error("no valid files were submitted")]
    NothingAccepted { skipped: Vec<SkippedItem> },

    #[error("failed to store '{filename}': {reason}")]
    Storage { filename: String, reason: String },

    /// Files were stored and the marker written, but the worker could not be
    /// signalled.
    #[error("files uploaded but failed to trigger pipeline: {0}")]
    Trigger(String),
}

/// Successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct Acceptance {
    pub submission_id: Uuid,
    pub message: String,
    pub accepted: Vec<StoredItem>,
    pub skipped: Vec<SkippedItem>,
}

impl Acceptance {
    /// Identifiers of the accepted items.
    pub fn accepted_keys(&self) -> Vec<String> {
        self.accepted.iter().map(|i| i.key.clone()).collect()
    }
}

/// Checks the marker store and, on acceptance, persists the payload, writes
/// the marker and posts the trigger.
#[derive(Debug)]
pub struct AdmissionGate {
    markers: Arc<dyn MarkerStore>,
    trigger: Arc<dyn TriggerSlot>,
    storage: Arc<dyn Storage>,
    texts: AdmissionSection,
    // Serializes submissions handled by this process.
    serial: Mutex<()>,
}

impl AdmissionGate {
    pub fn new(
        markers: Arc<dyn MarkerStore>,
        trigger: Arc<dyn TriggerSlot>,
        storage: Arc<dyn Storage>,
        texts: AdmissionSection,
    ) -> Self {
        Self {
            markers,
            trigger,
            storage,
            texts,
            serial: Mutex::new(()),
        }
    }

    /// Submit a batch of files for processing.
    ///
    /// Blocking: touches the marker store, the trigger slot and storage.
    /// Async callers should go through `spawn_blocking`.
    pub fn submit(&self, items: Vec<PendingItem>) -> Result<Acceptance, AdmissionError> {
        let _serial = self
            .serial
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match self.markers.exists(PROCESSING_MARKER) {
            Ok(false) => {}
            Ok(true) => {
                warn!("submission rejected: processing already in progress");
                return Err(AdmissionError::Conflict {
                    message: self.texts.conflict_message.clone(),
                    retry_hint: self.texts.retry_hint.clone(),
                });
            }
            Err(err) => {
                error!(error = %err, "submission rejected: cannot verify marker state");
                return Err(AdmissionError::MarkerStoreUnavailable(err.to_string()));
            }
        }

        let submission_id = Uuid::new_v4();
        let mut accepted = Vec::new();
        let mut skipped = Vec::new();

        for item in items.iter() {
            match self.storage.store(submission_id, item) {
                Ok(Placement::Stored(stored)) => accepted.push(stored),
                Ok(Placement::Skipped(skip)) => {
                    warn!(
                        %submission_id,
                        filename = %skip.filename,
                        reason = %skip.reason,
                        "skipping submitted file"
                    );
                    skipped.push(skip);
                }
                Err(err) => {
                    error!(%submission_id, filename = %item.name, error = %err, "failed to store file");
                    return Err(AdmissionError::Storage {
                        filename: item.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if accepted.is_empty() {
            return Err(AdmissionError::NothingAccepted { skipped });
        }

        let marker_message = format!(
            "Processing {} file(s) from submission {} (accepted {}).",
            accepted.len(),
            submission_id,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        self.markers
            .put(PROCESSING_MARKER, &marker_message)
            .map_err(|err| {
                error!(%submission_id, error = %err, "failed to write processing marker");
                AdmissionError::MarkerStoreUnavailable(err.to_string())
            })?;

        let keys: Vec<String> = accepted.iter().map(|i| i.key.clone()).collect();
        let signal = TriggerSignal::new(submission_id, keys);
        self.trigger.post(&signal).map_err(|err| {
            error!(%submission_id, error = %err, "failed to post pipeline trigger");
            match err {
                PipeguardError::TriggerOccupied => AdmissionError::Trigger(
                    "a previous trigger is still waiting for the worker".to_string(),
                ),
                other => AdmissionError::Trigger(other.to_string()),
            }
        })?;

        info!(
            %submission_id,
            accepted = accepted.len(),
            skipped = skipped.len(),
            "submission accepted; pipeline triggered"
        );

        Ok(Acceptance {
            submission_id,
            message: "Files uploaded successfully and pipeline triggered.".to_string(),
            accepted,
            skipped,
        })
    }
}
