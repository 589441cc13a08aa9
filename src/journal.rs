//! Last-run report written by the worker.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::fs::{FileSystem, RealFileSystem};
use crate::stages::PipelineRun;

/// Keeps the most recent [`PipelineRun`] as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct RunJournal {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl RunJournal {
    pub fn new(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
        }
    }

    pub fn on_disk(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Arc::new(RealFileSystem))
    }

    pub fn record(&self, run: &PipelineRun) -> Result<()> {
        let body = serde_json::to_vec_pretty(run).context("serializing run report")?;
        self.fs.write(&self.path, &body)?;
        debug!(run_id = %run.run_id, path = ?self.path, "run report written");
        Ok(())
    }

    pub fn last(&self) -> Result<Option<PipelineRun>> {
        if !self.fs.try_exists(&self.path)? {
            return Ok(None);
        }
        let body = self.fs.read_to_string(&self.path)?;
        let run = serde_json::from_str(&body)
            .with_context(|| format!("parsing run report {:?}", self.path))?;
        Ok(Some(run))
    }
}
