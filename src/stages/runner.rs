//! Sequential, fail-fast stage execution.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::ConfigFile;
use crate::errors::{PipeguardError, Result};
use crate::stages::command::CommandStage;
use crate::stages::{PipelineRun, RunContext, RunOutcome, Stage, StageReport, StageResult};

/// Executes a single stage and records its outcome.
pub struct StageRunner;

impl StageRunner {
    /// Run `stage` to a terminal state.
    ///
    /// The stage runs in its own Tokio task so that a panic inside it is
    /// observed as a `JoinError` and recorded as a failure instead of
    /// unwinding through the orchestrator.
    pub async fn run(stage: Arc<dyn Stage>, ctx: RunContext) -> StageResult {
        let kind = stage.kind();
        let run_id = ctx.run_id;
        let started_at = Utc::now();

        let joined = tokio::spawn(async move { stage.run(ctx).await }).await;

        let report = match joined {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => {
                error!(%run_id, stage = %kind, error = %err, "stage returned an error");
                StageReport::failure(format!("{err:#}"))
            }
            Err(join_err) => {
                error!(%run_id, stage = %kind, error = %join_err, "stage task aborted");
                StageReport::failure(format!("stage aborted: {join_err}"))
            }
        };

        StageResult {
            stage: kind,
            started_at,
            finished_at: Utc::now(),
            success: report.success,
            message: report.message,
        }
    }
}

/// The ordered list of stages making up one pipeline.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<_> = self.stages.iter().map(|s| s.kind()).collect();
        f.debug_struct("Pipeline").field("stages", &kinds).finish()
    }
}

impl Pipeline {
    /// Build a pipeline. Stages must be given in pipeline order, each kind at
    /// most once.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self> {
        for pair in stages.windows(2) {
            let (prev, next) = (pair[0].kind(), pair[1].kind());
            if next <= prev {
                return Err(PipeguardError::ConfigError(format!(
                    "stage '{next}' cannot run after '{prev}'"
                )));
            }
        }
        Ok(Self { stages })
    }

    /// One [`CommandStage`] per configured stage.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let stages = cfg
            .stages
            .iter()
            .map(|(kind, stage_cfg)| {
                Arc::new(CommandStage::from_config(*kind, stage_cfg)) as Arc<dyn Stage>
            })
            .collect();
        Self::new(stages)
    }

    /// Run every stage in order, stopping at the first failure.
    pub async fn execute(&self, ctx: RunContext) -> PipelineRun {
        let total = self.stages.len();
        let started_at = Utc::now();
        let run_id = ctx.run_id;
        let submission_id = ctx.signal.submission_id;
        let mut results = Vec::with_capacity(total);
        let mut outcome = RunOutcome::Succeeded;
        let mut ctx = ctx;

        info!(%run_id, %submission_id, stages = total, "starting pipeline run");

        for (i, stage) in self.stages.iter().enumerate() {
            let kind = stage.kind();
            info!(%run_id, stage = %kind, "step {}/{}: running {}", i + 1, total, kind.label());

            let result = StageRunner::run(Arc::clone(stage), ctx.clone()).await;
            let elapsed = result.duration().as_secs_f64();
            let success = result.success;

            if success {
                info!(
                    %run_id,
                    stage = %kind,
                    elapsed_secs = elapsed,
                    "step {}/{}: {} completed",
                    i + 1,
                    total,
                    kind.label()
                );
                ctx = ctx.advance(kind);
            } else {
                warn!(
                    %run_id,
                    stage = %kind,
                    elapsed_secs = elapsed,
                    message = %result.message,
                    "step {}/{}: {} failed; skipping remaining stages",
                    i + 1,
                    total,
                    kind.label()
                );
                outcome = RunOutcome::Failed { stage: kind };
            }

            results.push(result);
            if !success {
                break;
            }
        }

        let run = PipelineRun {
            run_id,
            submission_id,
            started_at,
            finished_at: Utc::now(),
            stages: results,
            outcome,
        };

        let total_secs = (run.finished_at - run.started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        match &run.outcome {
            RunOutcome::Succeeded => {
                info!(%run_id, elapsed_secs = total_secs, "pipeline run succeeded")
            }
            other => {
                error!(%run_id, elapsed_secs = total_secs, outcome = ?other, "pipeline run failed")
            }
        }

        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageFuture;
    use crate::trigger::TriggerSignal;
    use crate::types::StageKind;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use uuid::Uuid;

    enum Behaviour {
        Succeed,
        Fail,
        Error,
        Panic,
    }

    struct TestStage {
        kind: StageKind,
        behaviour: Behaviour,
        seen: Arc<Mutex<Vec<(StageKind, Vec<StageKind>)>>>,
    }

    impl Stage for TestStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        fn run(&self, ctx: RunContext) -> StageFuture<'_> {
            Box::pin(async move {
                self.seen.lock().unwrap().push((self.kind, ctx.completed.clone()));
                match self.behaviour {
                    Behaviour::Succeed => Ok(StageReport::success("ok")),
                    Behaviour::Fail => Ok(StageReport::failure("bad input")),
                    Behaviour::Error => Err(anyhow::anyhow!("connection refused")),
                    Behaviour::Panic => panic!("stage blew up"),
                }
            })
        }
    }

    type Seen = Arc<Mutex<Vec<(StageKind, Vec<StageKind>)>>>;

    fn pipeline(behaviours: Vec<(StageKind, Behaviour)>) -> (Pipeline, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let stages = behaviours
            .into_iter()
            .map(|(kind, behaviour)| {
                Arc::new(TestStage {
                    kind,
                    behaviour,
                    seen: Arc::clone(&seen),
                }) as Arc<dyn Stage>
            })
            .collect();
        (Pipeline::new(stages).unwrap(), seen)
    }

    fn ctx() -> RunContext {
        RunContext::new(
            Uuid::new_v4(),
            TriggerSignal::new(Uuid::new_v4(), vec!["a.csv".into()]),
            PathBuf::from("/tmp/scratch"),
        )
    }

    #[tokio::test]
    async fn all_stages_run_in_order_with_growing_context() {
        let (pipeline, seen) = pipeline(
            StageKind::ALL
                .into_iter()
                .map(|k| (k, Behaviour::Succeed))
                .collect(),
        );

        let run = pipeline.execute(ctx()).await;

        assert!(run.succeeded());
        assert_eq!(run.executed_stages(), StageKind::ALL.to_vec());
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1, Vec::<StageKind>::new());
        assert_eq!(seen[2].1, vec![StageKind::Etl, StageKind::BasketMining]);
    }

    #[tokio::test]
    async fn failure_skips_later_stages() {
        let (pipeline, seen) = pipeline(vec![
            (StageKind::Etl, Behaviour::Succeed),
            (StageKind::BasketMining, Behaviour::Fail),
            (StageKind::Elasticity, Behaviour::Succeed),
        ]);

        let run = pipeline.execute(ctx()).await;

        assert_eq!(
            run.outcome,
            RunOutcome::Failed {
                stage: StageKind::BasketMining
            }
        );
        assert_eq!(run.stages.len(), 2);
        assert_eq!(run.stages[1].message, "bad input");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn errors_and_panics_become_recorded_failures() {
        let (failing, _) = pipeline(vec![(StageKind::Etl, Behaviour::Error)]);
        let run = failing.execute(ctx()).await;
        assert!(!run.stages[0].success);
        assert!(run.stages[0].message.contains("connection refused"));

        let (panicking, _) = pipeline(vec![(StageKind::Etl, Behaviour::Panic)]);
        let run = panicking.execute(ctx()).await;
        assert!(!run.succeeded());
        assert!(run.stages[0].message.contains("stage aborted"));
    }

    #[test]
    fn out_of_order_stages_are_rejected() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let make = |kind| {
            Arc::new(TestStage {
                kind,
                behaviour: Behaviour::Succeed,
                seen: Arc::clone(&seen),
            }) as Arc<dyn Stage>
        };
        let result = Pipeline::new(vec![make(StageKind::Elasticity), make(StageKind::Etl)]);
        assert!(result.is_err());
    }
}
