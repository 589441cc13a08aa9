// src/engine/mod.rs

//! Worker-side coordination.
//!
//! - [`lock`]: the in-process execution lock.
//! - [`orchestrator`]: turns a detected trigger into exactly one pipeline run
//!   and guarantees cleanup on every exit path.
//! - [`reconcile`]: startup recovery for runs interrupted by a crash.
//! - [`runtime`]: the event loop joining the trigger watcher, the
//!   orchestrator and shutdown signals.

pub mod lock;
pub mod orchestrator;
pub mod reconcile;
pub mod runtime;

use crate::stages::PipelineRun;

pub use lock::{ExecutionLock, LockPermit};
pub use orchestrator::{ActiveRun, BeginOutcome, Orchestrator, RunGuard};
pub use reconcile::Reconciliation;
pub use runtime::{WorkerRuntime, WorkerSummary};

/// Where a trigger detection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    /// Trigger already present when the worker started.
    Startup,
    /// Filesystem notification for the trigger file.
    FileEvent,
    /// Periodic fallback scan of the trigger directory.
    Rescan,
}

/// Events consumed by [`WorkerRuntime`].
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    TriggerDetected { source: DetectionSource },
    RunFinished { run: Box<PipelineRun> },
    ShutdownRequested,
}

/// Options that influence how the worker runtime behaves.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Stop after the first run (or after the first detection that finds no
    /// trigger). Used by `pipeguard worker --once`.
    pub exit_when_idle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Running,
}
