//! Pipeline stages and their run records.
//!
//! The orchestrator knows nothing about what a stage does. A [`Stage`] takes
//! the current [`RunContext`] and reports success or failure with a message;
//! [`runner`] sequences them and turns errors and panics into recorded
//! failures. [`command`] provides the production stage, a shell command.

pub mod command;
pub mod runner;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trigger::TriggerSignal;
use crate::types::StageKind;

pub use command::CommandStage;
pub use runner::{Pipeline, StageRunner};

/// What a stage reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub success: bool,
    pub message: String,
}

impl StageReport {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

pub type StageFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<StageReport>> + Send + 'a>>;

/// An opaque pipeline stage.
///
/// Returning `Err` (or panicking) is recorded the same way as a
/// `StageReport` with `success == false`.
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    fn run(&self, ctx: RunContext) -> StageFuture<'_>;
}

/// Explicit per-run state handed from stage to stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: Uuid,
    pub signal: TriggerSignal,
    /// Scratch space owned by this run; removed when the run ends.
    pub scratch_dir: PathBuf,
    /// Stages that already finished successfully, in order.
    pub completed: Vec<StageKind>,
}

impl RunContext {
    pub fn new(run_id: Uuid, signal: TriggerSignal, scratch_dir: PathBuf) -> Self {
        Self {
            run_id,
            signal,
            scratch_dir,
            completed: Vec::new(),
        }
    }

    /// Context for the stage after `finished`.
    pub fn advance(&self, finished: StageKind) -> Self {
        let mut next = self.clone();
        next.completed.push(finished);
        next
    }
}

/// Recorded outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub message: String,
}

impl StageResult {
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed { stage: StageKind },
    /// The worker went away before the run reached cleanup.
    Interrupted,
}

/// Record of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub submission_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageResult>,
    pub outcome: RunOutcome,
}

impl PipelineRun {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    pub fn executed_stages(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.stage).collect()
    }

    /// Record for a run found orphaned at worker startup.
    pub fn interrupted(submission_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            submission_id,
            started_at: now,
            finished_at: now,
            stages: Vec::new(),
            outcome: RunOutcome::Interrupted,
        }
    }
}
