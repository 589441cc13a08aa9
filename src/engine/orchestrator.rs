// src/engine/orchestrator.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ConfigFile;
use crate::engine::lock::{ExecutionLock, LockPermit};
use crate::engine::OrchestratorState;
use crate::errors::Result;
use crate::journal::RunJournal;
use crate::marker::{FsMarkerStore, MarkerStore, PROCESSING_MARKER};
use crate::stages::{Pipeline, PipelineRun, RunContext};
use crate::storage::{LocalStorage, Storage};
use crate::trigger::{FileTriggerSlot, TriggerSlot};

/// Result of trying to start a run after a detection.
#[derive(Debug)]
pub enum BeginOutcome {
    Started(ActiveRun),
    /// The execution lock is held by a run in progress.
    AlreadyRunning,
    /// The lock was free but the trigger slot is empty (stale detection).
    NoTrigger,
}

/// A run that owns the execution lock and has not been executed yet.
///
/// Dropping it without calling [`Orchestrator::execute`] still performs the
/// full cleanup.
#[derive(Debug)]
pub struct ActiveRun {
    context: RunContext,
    guard: RunGuard,
}

impl ActiveRun {
    pub fn run_id(&self) -> Uuid {
        self.context.run_id
    }

    pub fn submission_id(&self) -> Uuid {
        self.context.signal.submission_id
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }
}

/// Scoped ownership of a run.
///
/// Drop clears the trigger, removes the run's scratch space, releases the
/// execution lock and finally deletes the processing marker. The marker goes
/// last so that a new submission can only be admitted once the worker is
/// ready to pick it up.
pub struct RunGuard {
    run_id: Uuid,
    permit: Option<LockPermit>,
    markers: Arc<dyn MarkerStore>,
    trigger: Arc<dyn TriggerSlot>,
    storage: Arc<dyn Storage>,
}

impl fmt::Debug for RunGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunGuard")
            .field("run_id", &self.run_id)
            .field("holds_lock", &self.permit.is_some())
            .finish()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let run_id = self.run_id;

        if let Err(err) = self.trigger.clear() {
            error!(%run_id, error = %err, "failed to clear trigger during cleanup");
        }
        if let Err(err) = self.storage.cleanup_scratch(run_id) {
            warn!(%run_id, error = %err, "failed to remove run scratch space");
        }

        drop(self.permit.take());

        match self.markers.delete(PROCESSING_MARKER) {
            Ok(()) => info!(%run_id, "processing marker cleared; ready for new submissions"),
            Err(err) => error!(
                %run_id,
                error = %err,
                "failed to delete processing marker; submissions stay blocked until it is removed"
            ),
        }
    }
}

/// Runs the pipeline for detected triggers, one at a time.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    pub(crate) lock: ExecutionLock,
    pub(crate) markers: Arc<dyn MarkerStore>,
    pub(crate) trigger: Arc<dyn TriggerSlot>,
    pub(crate) storage: Arc<dyn Storage>,
    pipeline: Pipeline,
    pub(crate) journal: Option<RunJournal>,
    /// Markers younger than this survive startup reconciliation.
    pub(crate) marker_grace: Duration,
}

impl Orchestrator {
    pub fn new(
        markers: Arc<dyn MarkerStore>,
        trigger: Arc<dyn TriggerSlot>,
        storage: Arc<dyn Storage>,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            lock: ExecutionLock::new(),
            markers,
            trigger,
            storage,
            pipeline,
            journal: None,
            marker_grace: Duration::ZERO,
        }
    }

    /// Production wiring: on-disk marker store, trigger slot, storage, command
    /// stages and run journal, all taken from `cfg`.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let orchestrator = Self::new(
            Arc::new(FsMarkerStore::on_disk(&cfg.paths.marker_dir)),
            Arc::new(FileTriggerSlot::on_disk(&cfg.paths.trigger_dir)),
            Arc::new(LocalStorage::from_config(cfg)?),
            Pipeline::from_config(cfg)?,
        );
        Ok(orchestrator
            .with_journal(RunJournal::on_disk(&cfg.paths.journal))
            .with_marker_grace(cfg.worker.settle_delay))
    }

    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Leave markers younger than `grace` alone during reconciliation. An
    /// admission process writes the marker shortly before the trigger.
    pub fn with_marker_grace(mut self, grace: Duration) -> Self {
        self.marker_grace = grace;
        self
    }

    pub fn state(&self) -> OrchestratorState {
        if self.lock.is_held() {
            OrchestratorState::Running
        } else {
            OrchestratorState::Idle
        }
    }

    /// Attempt the Idle -> Running transition.
    ///
    /// Never blocks on the lock. A detection that finds the slot empty
    /// releases the lock again without touching the marker.
    pub fn try_begin(&self) -> Result<BeginOutcome> {
        let Some(permit) = self.lock.try_acquire() else {
            return Ok(BeginOutcome::AlreadyRunning);
        };

        let Some(signal) = self.trigger.peek()? else {
            debug!("detection found no trigger; ignoring");
            return Ok(BeginOutcome::NoTrigger);
        };

        match self.markers.exists(PROCESSING_MARKER) {
            Ok(true) => {}
            Ok(false) => warn!(
                submission_id = %signal.submission_id,
                "trigger present without a processing marker; running anyway"
            ),
            Err(err) => warn!(
                submission_id = %signal.submission_id,
                error = %err,
                "could not check processing marker; running anyway"
            ),
        }

        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            submission_id = %signal.submission_id,
            items = signal.items.len(),
            "execution lock acquired"
        );

        let guard = RunGuard {
            run_id,
            permit: Some(permit),
            markers: Arc::clone(&self.markers),
            trigger: Arc::clone(&self.trigger),
            storage: Arc::clone(&self.storage),
        };

        // Returning early drops the guard, which performs the full cleanup.
        let scratch_dir = match self.storage.prepare_scratch(run_id) {
            Ok(dir) => dir,
            Err(err) => {
                error!(
                    %run_id,
                    submission_id = %signal.submission_id,
                    error = %err,
                    "could not prepare scratch space; submission dropped"
                );
                return Err(err);
            }
        };

        Ok(BeginOutcome::Started(ActiveRun {
            context: RunContext::new(run_id, signal, scratch_dir),
            guard,
        }))
    }

    /// Execute every stage of `run`, journal the result and clean up.
    pub async fn execute(&self, run: ActiveRun) -> PipelineRun {
        let ActiveRun { context, guard } = run;

        let report = self.pipeline.execute(context).await;

        if let Some(journal) = &self.journal {
            if let Err(err) = journal.record(&report) {
                warn!(run_id = %report.run_id, error = %err, "failed to write run journal");
            }
        }

        drop(guard);
        report
    }

    /// Handle one detection to completion. Returns `None` when no run was
    /// started.
    pub async fn run_if_triggered(&self) -> Result<Option<PipelineRun>> {
        match self.try_begin()? {
            BeginOutcome::Started(run) => Ok(Some(self.execute(run).await)),
            BeginOutcome::AlreadyRunning | BeginOutcome::NoTrigger => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::errors::PipeguardError;
    use crate::fs::mock::MockFileSystem;
    use crate::stages::{Stage, StageFuture, StageReport};
    use crate::storage::{PendingItem, Placement};
    use crate::trigger::TriggerSignal;
    use crate::types::StageKind;

    struct Ok1;

    impl Stage for Ok1 {
        fn kind(&self) -> StageKind {
            StageKind::Etl
        }

        fn run(&self, _ctx: RunContext) -> StageFuture<'_> {
            Box::pin(async { Ok(StageReport::success("done")) })
        }
    }

    fn setup() -> (Orchestrator, FsMarkerStore, FileTriggerSlot) {
        let fs = Arc::new(MockFileSystem::new());
        let markers = FsMarkerStore::new("/markers", fs.clone());
        let slot = FileTriggerSlot::new("/trigger", fs.clone());
        let storage = LocalStorage::new("/data", fs);
        let pipeline = Pipeline::new(vec![Arc::new(Ok1) as Arc<dyn Stage>]).unwrap();
        let orch = Orchestrator::new(
            Arc::new(markers.clone()),
            Arc::new(slot.clone()),
            Arc::new(storage),
            pipeline,
        );
        (orch, markers, slot)
    }

    #[test]
    fn stale_detection_leaves_marker_alone() {
        let (orch, markers, _slot) = setup();
        markers.put(PROCESSING_MARKER, "busy").unwrap();

        let outcome = orch.try_begin().unwrap();

        assert!(matches!(outcome, BeginOutcome::NoTrigger));
        assert!(markers.exists(PROCESSING_MARKER).unwrap());
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }

    #[test]
    fn dropping_an_unexecuted_run_still_cleans_up() {
        let (orch, markers, slot) = setup();
        markers.put(PROCESSING_MARKER, "busy").unwrap();
        slot.post(&TriggerSignal::new(Uuid::new_v4(), vec![])).unwrap();

        let BeginOutcome::Started(run) = orch.try_begin().unwrap() else {
            panic!("expected a run to start");
        };
        assert_eq!(orch.state(), OrchestratorState::Running);
        assert!(matches!(orch.try_begin().unwrap(), BeginOutcome::AlreadyRunning));

        drop(run);

        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert!(!markers.exists(PROCESSING_MARKER).unwrap());
        assert!(!slot.is_present().unwrap());
    }

    /// Storage whose scratch area cannot be created.
    #[derive(Debug)]
    struct ReadOnlyScratch;

    impl Storage for ReadOnlyScratch {
        fn store(&self, _submission_id: Uuid, _item: &PendingItem) -> Result<Placement> {
            unreachable!("the worker never stores items")
        }

        fn scratch_dir(&self, run_id: Uuid) -> PathBuf {
            PathBuf::from("/readonly").join(run_id.to_string())
        }

        fn prepare_scratch(&self, _run_id: Uuid) -> Result<PathBuf> {
            Err(PipeguardError::StorageError("read-only filesystem".into()))
        }

        fn cleanup_scratch(&self, _run_id: Uuid) -> Result<()> {
            Ok(())
        }

        fn purge_scratch(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn scratch_failure_aborts_the_run_and_cleans_up() {
        let fs = Arc::new(MockFileSystem::new());
        let markers = FsMarkerStore::new("/markers", fs.clone());
        let slot = FileTriggerSlot::new("/trigger", fs);
        let pipeline = Pipeline::new(vec![Arc::new(Ok1) as Arc<dyn Stage>]).unwrap();
        let orch = Orchestrator::new(
            Arc::new(markers.clone()),
            Arc::new(slot.clone()),
            Arc::new(ReadOnlyScratch),
            pipeline,
        );
        markers.put(PROCESSING_MARKER, "busy").unwrap();
        slot.post(&TriggerSignal::new(Uuid::new_v4(), vec![])).unwrap();

        assert!(matches!(orch.try_begin(), Err(PipeguardError::StorageError(_))));

        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert!(!markers.exists(PROCESSING_MARKER).unwrap());
        assert!(!slot.is_present().unwrap());
    }

    #[tokio::test]
    async fn run_if_triggered_executes_and_clears() {
        let (orch, markers, slot) = setup();
        markers.put(PROCESSING_MARKER, "busy").unwrap();
        slot.post(&TriggerSignal::new(Uuid::new_v4(), vec!["a/b.csv".into()]))
            .unwrap();

        let run = orch.run_if_triggered().await.unwrap().unwrap();

        assert!(run.succeeded());
        assert!(!markers.exists(PROCESSING_MARKER).unwrap());
        assert!(orch.run_if_triggered().await.unwrap().is_none());
    }
}
