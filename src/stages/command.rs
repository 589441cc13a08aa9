//! Stage implemented as a shell command.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::StageConfig;
use crate::stages::{RunContext, Stage, StageFuture, StageReport};
use crate::types::StageKind;

/// How many trailing stderr lines end up in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `sh -c <cmd>` (or `cmd /C` on Windows) with the run context exported
/// as environment variables:
///
/// - `PIPEGUARD_RUN_ID`
/// - `PIPEGUARD_SUBMISSION_ID`
/// - `PIPEGUARD_STAGE`
/// - `PIPEGUARD_SCRATCH_DIR`
/// - `PIPEGUARD_ITEMS` (newline separated storage keys)
///
/// Exit status 0 is success. Otherwise the tail of stderr becomes the
/// failure message.
#[derive(Debug, Clone)]
pub struct CommandStage {
    kind: StageKind,
    cmd: String,
    workdir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl CommandStage {
    pub fn new(kind: StageKind, cmd: impl Into<String>) -> Self {
        Self {
            kind,
            cmd: cmd.into(),
            workdir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn from_config(kind: StageKind, cfg: &StageConfig) -> Self {
        Self {
            kind,
            cmd: cfg.cmd.clone(),
            workdir: cfg.workdir.clone(),
            env: cfg.env.clone(),
        }
    }

    fn build_command(&self, ctx: &RunContext) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.env)
            .env("PIPEGUARD_RUN_ID", ctx.run_id.to_string())
            .env("PIPEGUARD_SUBMISSION_ID", ctx.signal.submission_id.to_string())
            .env("PIPEGUARD_STAGE", self.kind.key())
            .env("PIPEGUARD_SCRATCH_DIR", &ctx.scratch_dir)
            .env("PIPEGUARD_ITEMS", ctx.signal.items.join("\n"));

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run_inner(&self, ctx: RunContext) -> Result<StageReport> {
        let run_id = ctx.run_id;
        let stage = self.kind;

        info!(%run_id, %stage, cmd = %self.cmd, "starting stage process");

        let mut child = self
            .build_command(&ctx)
            .spawn()
            .with_context(|| format!("spawning process for stage '{stage}'"))?;

        // Stream stdout into the log; stages can be chatty.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(%run_id, %stage, "stdout: {}", line);
                }
            });
        }

        // Keep the tail of stderr for the failure message.
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(%run_id, %stage, "stderr: {}", line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for process of stage '{stage}'"))?;

        let stderr_tail = match stderr_task {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        let code = status.code().unwrap_or(-1);
        info!(%run_id, %stage, exit_code = code, success = status.success(), "stage process exited");

        if status.success() {
            Ok(StageReport::success(format!("{} completed", stage.label())))
        } else if stderr_tail.is_empty() {
            Ok(StageReport::failure(format!(
                "{} exited with code {code}",
                stage.label()
            )))
        } else {
            Ok(StageReport::failure(format!(
                "{} exited with code {code}: {stderr_tail}",
                stage.label()
            )))
        }
    }
}

impl Stage for CommandStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn run(&self, ctx: RunContext) -> StageFuture<'_> {
        Box::pin(self.run_inner(ctx))
    }
}
