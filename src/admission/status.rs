use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::marker::{MarkerStore, PROCESSING_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Processing,
    Ready,
    /// The marker store could not be read; reported as not processing.
    Unknown,
}

/// Client-facing processing status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingStatus {
    pub is_processing: bool,
    pub message: String,
    pub status: StatusState,
}

impl ProcessingStatus {
    /// Status reported when the marker store cannot be consulted.
    pub fn unknown() -> Self {
        Self {
            is_processing: false,
            message: "Unable to determine system status".to_string(),
            status: StatusState::Unknown,
        }
    }
}

/// Read-only view of the processing marker.
#[derive(Debug, Clone)]
pub struct StatusEndpoint {
    markers: Arc<dyn MarkerStore>,
}

impl StatusEndpoint {
    pub fn new(markers: Arc<dyn MarkerStore>) -> Self {
        Self { markers }
    }

    /// Current status. Fails open: a marker store error is reported as
    /// `is_processing = false` with state `unknown`.
    pub fn status(&self) -> ProcessingStatus {
        match self.markers.read(PROCESSING_MARKER) {
            Ok(Some(message)) => ProcessingStatus {
                is_processing: true,
                message: if message.trim().is_empty() {
                    "Processing in progress.".to_string()
                } else {
                    message
                },
                status: StatusState::Processing,
            },
            Ok(None) => ProcessingStatus {
                is_processing: false,
                message: "System ready for uploads.".to_string(),
                status: StatusState::Ready,
            },
            Err(err) => {
                warn!(error = %err, "error checking processing status; reporting ready");
                ProcessingStatus::unknown()
            }
        }
    }
}
