#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use pipeguard::stages::{RunContext, Stage, StageFuture, StageReport};
use pipeguard::types::StageKind;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

/// One recorded stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub run_id: Uuid,
    pub submission_id: Uuid,
    pub stage: StageKind,
    /// Stages the context reported as completed when this one started.
    pub completed: Vec<StageKind>,
}

/// Shared record of every stage invocation, across runs.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<Execution>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Execution> {
        self.entries.lock().unwrap().clone()
    }

    pub fn stages(&self) -> Vec<StageKind> {
        self.entries().into_iter().map(|e| e.stage).collect()
    }

    /// Distinct run ids, in first-seen order.
    pub fn runs(&self) -> Vec<Uuid> {
        let mut runs = Vec::new();
        for e in self.entries() {
            if !runs.contains(&e.run_id) {
                runs.push(e.run_id);
            }
        }
        runs
    }

    fn push(&self, execution: Execution) {
        self.entries.lock().unwrap().push(execution);
    }
}

/// Lets a test hold a stage open until it says otherwise.
#[derive(Debug, Clone)]
pub struct Blocker {
    started: Arc<Notify>,
    release: Arc<Semaphore>,
}

impl Blocker {
    pub fn new() -> Self {
        Self {
            started: Arc::new(Notify::new()),
            release: Arc::new(Semaphore::new(0)),
        }
    }

    /// Resolves once the blocked stage has started.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

impl Default for Blocker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub enum StageBehaviour {
    Succeed,
    Fail(String),
    Error(String),
    Panic,
    /// Wait for [`Blocker::release`], then succeed.
    Block(Blocker),
}

/// A stage that does what it is told and records the call.
pub struct ScriptedStage {
    kind: StageKind,
    behaviour: StageBehaviour,
    log: ExecutionLog,
}

impl ScriptedStage {
    pub fn new(kind: StageKind, behaviour: StageBehaviour, log: &ExecutionLog) -> Self {
        Self {
            kind,
            behaviour,
            log: log.clone(),
        }
    }
}

impl Stage for ScriptedStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn run(&self, ctx: RunContext) -> StageFuture<'_> {
        Box::pin(async move {
            self.log.push(Execution {
                run_id: ctx.run_id,
                submission_id: ctx.signal.submission_id,
                stage: self.kind,
                completed: ctx.completed.clone(),
            });
            match &self.behaviour {
                StageBehaviour::Succeed => Ok(StageReport::success(format!("{} ok", self.kind))),
                StageBehaviour::Fail(msg) => Ok(StageReport::failure(msg.clone())),
                StageBehaviour::Error(msg) => Err(anyhow::anyhow!(msg.clone())),
                StageBehaviour::Panic => panic!("{} panicked", self.kind),
                StageBehaviour::Block(blocker) => {
                    blocker.started.notify_one();
                    let permit = blocker.release.acquire().await?;
                    permit.forget();
                    Ok(StageReport::success(format!("{} ok", self.kind)))
                }
            }
        })
    }
}

/// All five stages, each with `behaviour_for(kind)`.
pub fn pipeline_stages(
    log: &ExecutionLog,
    mut behaviour_for: impl FnMut(StageKind) -> StageBehaviour,
) -> Vec<Arc<dyn Stage>> {
    StageKind::ALL
        .into_iter()
        .map(|kind| Arc::new(ScriptedStage::new(kind, behaviour_for(kind), log)) as Arc<dyn Stage>)
        .collect()
}

/// All five stages succeeding.
pub fn succeeding_stages(log: &ExecutionLog) -> Vec<Arc<dyn Stage>> {
    pipeline_stages(log, |_| StageBehaviour::Succeed)
}
