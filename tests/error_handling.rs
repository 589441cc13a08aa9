// tests/error_handling.rs

use std::io::Write;

use pipeguard::config::{load_and_validate, load_from_path};
use pipeguard::errors::PipeguardError;
use pipeguard::types::StageKind;
use pipeguard_test_utils::builders::ConfigBuilder;

#[test]
fn missing_config_file_is_an_io_error() {
    let err = load_from_path("/definitely/not/here/Pipeguard.toml").unwrap_err();
    assert!(matches!(err, PipeguardError::IoError(_)));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[stage.etl\ncmd = ").unwrap();

    let err = load_from_path(file.path()).unwrap_err();
    assert!(matches!(err, PipeguardError::TomlError(_)));
}

#[test]
fn missing_stage_is_a_config_error() {
    let err = ConfigBuilder::new()
        .without_stage(StageKind::Forecasting)
        .try_build()
        .unwrap_err();

    let PipeguardError::ConfigError(msg) = err else {
        panic!("expected ConfigError");
    };
    assert!(msg.contains("forecasting"));
}

#[test]
fn blank_stage_command_is_a_config_error() {
    let err = ConfigBuilder::new()
        .with_stage_cmd(StageKind::Elasticity, "   ")
        .try_build()
        .unwrap_err();
    assert!(matches!(err, PipeguardError::ConfigError(_)));
}

#[test]
fn bad_durations_are_config_errors() {
    let err = ConfigBuilder::new()
        .with_rescan_interval("soon")
        .try_build()
        .unwrap_err();
    assert!(matches!(err, PipeguardError::ConfigError(_)));
}

#[test]
fn relative_paths_resolve_next_to_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Pipeguard.toml");
    std::fs::write(
        &path,
        r#"
[paths]
trigger_dir = "watch/trigger"

[stage.etl]
cmd = "true"
[stage.basket_mining]
cmd = "true"
[stage.elasticity]
cmd = "true"
[stage.optimization]
cmd = "true"
[stage.forecasting]
cmd = "true"
"#,
    )
    .unwrap();

    let cfg = load_and_validate(&path).unwrap();

    assert_eq!(cfg.paths.trigger_dir, dir.path().join("watch/trigger"));
    assert_eq!(cfg.paths.marker_dir, dir.path().join("state/markers"));
    assert_eq!(cfg.stages.len(), 5);
}
