// src/lib.rs

pub mod admission;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod journal;
pub mod logging;
pub mod marker;
pub mod server;
pub mod stages;
pub mod storage;
pub mod trigger;
pub mod types;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, load_and_validate};
use crate::engine::{
    DetectionSource, Orchestrator, Reconciliation, RuntimeOptions, WorkerEvent, WorkerRuntime,
};
use crate::journal::RunJournal;
use crate::server::AppState;
use crate::trigger::FileTriggerSlot;
use crate::watch::{WatchSettings, spawn_watcher};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    match args.command {
        Command::Check => {
            print_check(&cfg);
            Ok(())
        }
        Command::Serve { host, port } => run_server(cfg, host, port).await,
        Command::Worker { once } => run_worker(cfg, once).await,
    }
}

async fn run_server(cfg: ConfigFile, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut server = cfg.server.clone();
    if let Some(host) = host {
        server.host = host;
    }
    if let Some(port) = port {
        server.port = port;
    }

    let state = AppState::from_config(&cfg)?;
    server::serve(state, &server, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested, stopping server");
    })
    .await
}

async fn run_worker(cfg: ConfigFile, once: bool) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&cfg)?;

    let reconciliation = {
        let orchestrator = orchestrator.clone();
        let policy = cfg.worker.orphan_policy;
        tokio::task::spawn_blocking(move || orchestrator.reconcile(policy)).await??
    };
    if let Reconciliation::Resumed { submission_id } = reconciliation {
        info!(%submission_id, "unfinished submission will be picked up by the startup scan");
    }

    let options = RuntimeOptions {
        exit_when_idle: once,
    };
    let runtime = WorkerRuntime::new(orchestrator, options);
    let rt_tx = runtime.sender();

    // --once inspects the slot a single time instead of watching it.
    let _watcher_handle = if once {
        rt_tx
            .send(WorkerEvent::TriggerDetected {
                source: DetectionSource::Startup,
            })
            .await?;
        None
    } else {
        Some(spawn_watcher(
            FileTriggerSlot::on_disk(&cfg.paths.trigger_dir),
            WatchSettings::from(&cfg.worker),
            rt_tx.clone(),
        )?)
    };

    // Ctrl-C -> graceful shutdown; an active run is awaited.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(WorkerEvent::ShutdownRequested).await;
        });
    }

    let summary = runtime.run().await?;

    if once {
        if let Some(run) = summary.last_run.filter(|r| !r.succeeded()) {
            bail!("pipeline run {} ended with {:?}", run.run_id, run.outcome);
        }
    }
    Ok(())
}

/// Print the validated config and the last recorded run.
fn print_check(cfg: &ConfigFile) {
    println!("pipeguard check");
    println!("  paths.marker_dir   = {}", cfg.paths.marker_dir.display());
    println!("  paths.trigger_dir  = {}", cfg.paths.trigger_dir.display());
    println!("  paths.storage_root = {}", cfg.paths.storage_root.display());
    println!("  paths.journal      = {}", cfg.paths.journal.display());
    println!("  server             = {}:{}", cfg.server.host, cfg.server.port);
    println!(
        "  worker             = rescan {:?}, settle {:?}, orphan_policy {:?}",
        cfg.worker.rescan_interval, cfg.worker.settle_delay, cfg.worker.orphan_policy
    );
    println!();

    println!("routes ({}):", cfg.storage.route.len());
    for rule in cfg.storage.route.iter() {
        println!("  - {} -> {}", rule.pattern, rule.folder);
    }
    if let Some(folder) = &cfg.storage.default_folder {
        println!("  - (default) -> {folder}");
    }
    println!();

    println!("stages ({}):", cfg.stages.len());
    for (kind, stage) in cfg.stages.iter() {
        println!("  {}. {} ({})", kind.position(), kind.label(), kind.key());
        println!("      cmd: {}", stage.cmd);
        if let Some(dir) = &stage.workdir {
            println!("      workdir: {}", dir.display());
        }
        if !stage.env.is_empty() {
            println!("      env: {:?}", stage.env.keys().collect::<Vec<_>>());
        }
    }
    println!();

    match RunJournal::on_disk(&cfg.paths.journal).last() {
        Ok(Some(run)) => println!(
            "last run: {} ({:?}, {} stage(s), finished {})",
            run.run_id,
            run.outcome,
            run.stages.len(),
            run.finished_at
        ),
        Ok(None) => println!("last run: none recorded"),
        Err(err) => println!("last run: unreadable ({err:#})"),
    }
}
