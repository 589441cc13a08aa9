use globset::Glob;

use crate::config::model::{ConfigFile, RawConfigFile, StageConfig, WorkerSettings};
use crate::errors::{PipeguardError, Result};
use crate::types::{parse_duration, StageKind};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::PipeguardError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let stages = validate_stages(&raw)?;
        let worker = validate_worker(&raw)?;
        validate_paths(&raw)?;
        validate_routes(&raw)?;
        Ok(ConfigFile::new_unchecked(
            raw.paths,
            raw.admission,
            raw.server,
            worker,
            raw.storage,
            stages,
        ))
    }
}

/// Every pipeline stage needs a command, and no unknown stage names are
/// allowed. Returns the stages in pipeline order.
fn validate_stages(cfg: &RawConfigFile) -> Result<Vec<(StageKind, StageConfig)>> {
    for name in cfg.stage.keys() {
        name.parse::<StageKind>()
            .map_err(|e| PipeguardError::ConfigError(format!("[stage.{name}]: {e}")))?;
    }

    let mut stages = Vec::with_capacity(StageKind::ALL.len());
    for kind in StageKind::ALL {
        let stage = cfg.stage.get(kind.key()).ok_or_else(|| {
            PipeguardError::ConfigError(format!(
                "missing [stage.{}] section; every pipeline stage needs a command",
                kind.key()
            ))
        })?;
        if stage.cmd.trim().is_empty() {
            return Err(PipeguardError::ConfigError(format!(
                "[stage.{}].cmd must not be empty",
                kind.key()
            )));
        }
        stages.push((kind, stage.clone()));
    }
    Ok(stages)
}

fn validate_worker(cfg: &RawConfigFile) -> Result<WorkerSettings> {
    let rescan_interval = parse_duration(&cfg.worker.rescan_interval)
        .map_err(|e| PipeguardError::ConfigError(format!("[worker].rescan_interval: {e}")))?;
    if rescan_interval.is_zero() {
        return Err(PipeguardError::ConfigError(
            "[worker].rescan_interval must be greater than zero".to_string(),
        ));
    }

    let settle_delay = parse_duration(&cfg.worker.settle_delay)
        .map_err(|e| PipeguardError::ConfigError(format!("[worker].settle_delay: {e}")))?;

    Ok(WorkerSettings {
        rescan_interval,
        settle_delay,
        orphan_policy: cfg.worker.orphan_policy,
    })
}

fn validate_paths(cfg: &RawConfigFile) -> Result<()> {
    // The watcher reacts to files in the trigger directory; keep the marker
    // out of it.
    if cfg.paths.marker_dir == cfg.paths.trigger_dir {
        return Err(PipeguardError::ConfigError(format!(
            "[paths].marker_dir and [paths].trigger_dir must differ (both {:?})",
            cfg.paths.marker_dir
        )));
    }
    Ok(())
}

fn validate_routes(cfg: &RawConfigFile) -> Result<()> {
    for rule in cfg.storage.route.iter() {
        Glob::new(&rule.pattern).map_err(|e| {
            PipeguardError::ConfigError(format!(
                "invalid [[storage.route]] pattern '{}': {}",
                rule.pattern, e
            ))
        })?;
        validate_folder_name(&rule.folder)?;
    }
    if let Some(folder) = &cfg.storage.default_folder {
        validate_folder_name(folder)?;
    }
    Ok(())
}

fn validate_folder_name(folder: &str) -> Result<()> {
    let bad = folder.trim().is_empty()
        || folder.starts_with('/')
        || folder.split(['/', '\\']).any(|part| part == "..");
    if bad {
        return Err(PipeguardError::ConfigError(format!(
            "storage folder '{folder}' must be a non-empty relative path without '..'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrphanPolicy;
    use std::time::Duration;

    const FULL: &str = r#"
[worker]
rescan_interval = "2s"
orphan_policy = "resume"

[[storage.route]]
pattern = "*Sales Transaction List*"
folder = "raw_sales_by_transaction"

[stage.etl]
cmd = "echo etl"
[stage.basket_mining]
cmd = "echo mba"
[stage.elasticity]
cmd = "echo ped"
[stage.optimization]
cmd = "echo nlp"
[stage.forecasting]
cmd = "echo hw"
"#;

    fn parse(src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(src)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn full_config_validates_in_pipeline_order() {
        let cfg = parse(FULL).unwrap();
        let order: Vec<_> = cfg.stages.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, StageKind::ALL.to_vec());
        assert_eq!(cfg.stage(StageKind::BasketMining).unwrap().cmd, "echo mba");
        assert_eq!(cfg.worker.rescan_interval, Duration::from_secs(2));
        assert_eq!(cfg.worker.settle_delay, Duration::from_millis(500));
        assert_eq!(cfg.worker.orphan_policy, OrphanPolicy::Resume);
        assert_eq!(cfg.server.port, 8000);
    }

    #[test]
    fn missing_stage_is_rejected() {
        let src = FULL.replace("[stage.forecasting]\ncmd = \"echo hw\"\n", "");
        match parse(&src) {
            Err(PipeguardError::ConfigError(msg)) => assert!(msg.contains("stage.forecasting")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let src = format!("{FULL}\n[stage.nlp]\ncmd = \"echo\"\n");
        match parse(&src) {
            Err(PipeguardError::ConfigError(msg)) => assert!(msg.contains("nlp")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn zero_rescan_interval_is_rejected() {
        let src = FULL.replace("\"2s\"", "\"0s\"");
        assert!(matches!(parse(&src), Err(PipeguardError::ConfigError(_))));
    }

    #[test]
    fn escaping_folder_is_rejected() {
        let src = FULL.replace("raw_sales_by_transaction", "../outside");
        assert!(matches!(parse(&src), Err(PipeguardError::ConfigError(_))));
    }
}
