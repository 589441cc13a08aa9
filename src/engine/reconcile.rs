// src/engine/reconcile.rs

//! Startup recovery.
//!
//! A worker that dies mid-run leaves the processing marker (and usually the
//! trigger) behind, which blocks every future submission. Before the worker
//! starts watching, [`Orchestrator::reconcile`] inspects both and applies the
//! configured [`OrphanPolicy`].

use anyhow::anyhow;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::Orchestrator;
use crate::errors::{PipeguardError, Result};
use crate::marker::PROCESSING_MARKER;
use crate::stages::PipelineRun;
use crate::types::OrphanPolicy;

/// What reconciliation found and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Neither marker nor trigger was present.
    Clean,
    /// An orphaned run was cleared and recorded as interrupted.
    Cleared { run: PipelineRun },
    /// The trigger was kept so the pipeline re-runs from the first stage.
    Resumed { submission_id: Uuid },
    /// A marker without a trigger was deleted.
    ClearedStaleMarker,
    /// A marker without a trigger was written too recently to call it stale;
    /// an admission may be about to post its trigger.
    KeptFreshMarker,
}

impl Orchestrator {
    /// Inspect the marker and trigger left by a previous worker.
    ///
    /// Holds the execution lock for its duration, so it refuses to run while
    /// a pipeline is active.
    pub fn reconcile(&self, policy: OrphanPolicy) -> Result<Reconciliation> {
        let Some(_permit) = self.lock.try_acquire() else {
            return Err(PipeguardError::Other(anyhow!(
                "cannot reconcile while a run is in progress"
            )));
        };

        let signal = self.trigger.peek()?;
        let marker = self.markers.exists(PROCESSING_MARKER)?;

        let Some(signal) = signal else {
            if !marker {
                info!("no leftover marker or trigger; starting clean");
                return Ok(Reconciliation::Clean);
            }
            return self.clear_stale_marker();
        };

        match policy {
            OrphanPolicy::Resume => {
                warn!(
                    submission_id = %signal.submission_id,
                    marker,
                    "found an unfinished submission; it will be re-run from the first stage"
                );
                Ok(Reconciliation::Resumed {
                    submission_id: signal.submission_id,
                })
            }
            OrphanPolicy::Clear => {
                self.trigger.clear()?;
                self.storage.purge_scratch()?;
                self.markers.delete(PROCESSING_MARKER)?;

                let run = PipelineRun::interrupted(signal.submission_id);
                if let Some(journal) = &self.journal {
                    if let Err(err) = journal.record(&run) {
                        warn!(error = %err, "failed to journal interrupted run");
                    }
                }
                error!(
                    submission_id = %signal.submission_id,
                    items = signal.items.len(),
                    "previous run was interrupted; cleared marker and trigger, submission must be re-uploaded"
                );
                Ok(Reconciliation::Cleared { run })
            }
        }
    }

    fn clear_stale_marker(&self) -> Result<Reconciliation> {
        if let Some(age) = self.markers.age(PROCESSING_MARKER)? {
            if age < self.marker_grace {
                info!(
                    ?age,
                    "processing marker without a trigger is recent; leaving it for the admission in flight"
                );
                return Ok(Reconciliation::KeptFreshMarker);
            }
        }
        warn!("processing marker present without a trigger; clearing it");
        self.markers.delete(PROCESSING_MARKER)?;
        Ok(Reconciliation::ClearedStaleMarker)
    }
}
