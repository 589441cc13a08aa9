// src/engine/runtime.rs

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::orchestrator::{BeginOutcome, Orchestrator};
use crate::engine::{DetectionSource, RuntimeOptions, WorkerEvent};
use crate::errors::{PipeguardError, Result};
use crate::stages::PipelineRun;

/// Counters reported when the runtime stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Detections dropped because a run was already in progress.
    pub discarded: usize,
    pub last_run: Option<PipelineRun>,
}

impl WorkerSummary {
    pub fn runs(&self) -> usize {
        self.succeeded + self.failed
    }

    fn record(&mut self, run: PipelineRun) {
        if run.succeeded() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.last_run = Some(run);
    }
}

/// The worker's main loop.
///
/// Consumes [`WorkerEvent`]s from the trigger watcher, finished runs and the
/// Ctrl-C handler. Runs execute on their own task so the loop keeps draining
/// (and discarding) detections while a pipeline is active.
pub struct WorkerRuntime {
    orchestrator: Orchestrator,
    options: RuntimeOptions,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    active: Option<(Uuid, JoinHandle<()>)>,
    summary: WorkerSummary,
    /// Why a `--once` worker could not start its run.
    start_error: Option<PipeguardError>,
}

impl WorkerRuntime {
    pub fn new(orchestrator: Orchestrator, options: RuntimeOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            orchestrator,
            options,
            events_tx,
            events_rx,
            active: None,
            summary: WorkerSummary::default(),
            start_error: None,
        }
    }

    /// Sender for producers (watcher, signal handler, tests).
    pub fn sender(&self) -> mpsc::Sender<WorkerEvent> {
        self.events_tx.clone()
    }

    pub async fn run(mut self) -> Result<WorkerSummary> {
        info!("pipeguard worker runtime started");

        while let Some(event) = self.events_rx.recv().await {
            debug!(?event, "runtime received event");

            let keep_running = match event {
                WorkerEvent::TriggerDetected { source } => self.handle_detection(source).await,
                WorkerEvent::RunFinished { run } => self.handle_run_finished(*run),
                WorkerEvent::ShutdownRequested => {
                    info!("shutdown requested, stopping runtime");
                    false
                }
            };

            if !keep_running {
                break;
            }
        }

        self.wait_for_active_run().await;

        info!(
            succeeded = self.summary.succeeded,
            failed = self.summary.failed,
            discarded = self.summary.discarded,
            "pipeguard worker runtime exiting"
        );
        match self.start_error {
            Some(err) => Err(err),
            None => Ok(self.summary),
        }
    }

    async fn handle_detection(&mut self, source: DetectionSource) -> bool {
        if self.active.as_ref().is_some_and(|(_, handle)| handle.is_finished()) {
            debug!("previous run task already finished");
            self.active = None;
        }

        if let Some((run_id, _)) = &self.active {
            self.summary.discarded += 1;
            match source {
                DetectionSource::FileEvent => {
                    info!(%run_id, ?source, "trigger detected while a run is active; discarding")
                }
                DetectionSource::Rescan | DetectionSource::Startup => {
                    debug!(%run_id, ?source, "trigger still present for active run")
                }
            }
            return true;
        }

        // Marker and trigger checks touch the filesystem.
        let orchestrator = self.orchestrator.clone();
        let outcome = tokio::task::spawn_blocking(move || orchestrator.try_begin())
            .await
            .unwrap_or_else(|join_err| {
                Err(PipeguardError::Other(anyhow!(
                    "run start task failed: {join_err}"
                )))
            });

        match outcome {
            Ok(BeginOutcome::Started(run)) => {
                let run_id = run.run_id();
                info!(%run_id, ?source, "starting pipeline run");

                let orchestrator = self.orchestrator.clone();
                let tx = self.events_tx.clone();
                let handle = tokio::spawn(async move {
                    let report = orchestrator.execute(run).await;
                    if tx
                        .send(WorkerEvent::RunFinished {
                            run: Box::new(report),
                        })
                        .await
                        .is_err()
                    {
                        debug!("runtime gone before run report could be delivered");
                    }
                });
                self.active = Some((run_id, handle));
                true
            }
            Ok(BeginOutcome::AlreadyRunning) => {
                self.summary.discarded += 1;
                info!(?source, "execution lock busy; discarding detection");
                true
            }
            Ok(BeginOutcome::NoTrigger) => {
                if self.options.exit_when_idle {
                    info!("no trigger present and exit_when_idle=true, stopping");
                    return false;
                }
                true
            }
            Err(err) => {
                error!(?source, error = %err, "failed to start pipeline run");
                if self.options.exit_when_idle {
                    self.start_error = Some(err);
                    return false;
                }
                true
            }
        }
    }

    fn handle_run_finished(&mut self, run: PipelineRun) -> bool {
        if self
            .active
            .as_ref()
            .is_some_and(|(run_id, _)| *run_id == run.run_id)
        {
            self.active = None;
        }
        self.summary.record(run);

        if self.options.exit_when_idle && self.active.is_none() {
            info!("runtime idle and exit_when_idle=true, stopping");
            return false;
        }
        true
    }

    /// Runs are never cancelled; shutdown waits for the active one.
    async fn wait_for_active_run(&mut self) {
        let Some((run_id, handle)) = self.active.take() else {
            return;
        };
        info!(%run_id, "waiting for in-flight run to finish before exiting");
        if let Err(err) = handle.await {
            error!(%run_id, error = %err, "run task failed");
        }
        while let Ok(event) = self.events_rx.try_recv() {
            if let WorkerEvent::RunFinished { run } = event {
                self.summary.record(*run);
            }
        }
    }
}
