// Integration tests for configuration loading and validation

mod common;

use common::temp_path;
use pool_backtester::{
    ConfigError, Objective, ParamValues, PreFlightValidator, SimulationConfig, SimulationError, SourceKind,
};
use std::fs;

#[test]
fn test_default_config_file_creation() {
    let (_dir, path) = temp_path("config.toml");

    let created = SimulationConfig::load_or_create(&path).expect("Failed to create config");
    assert!(path.exists());

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("[entry]"));
    assert!(content.contains("[exit.momentum]"));
    assert!(content.contains("[sweep.parameters]"));

    let loaded = SimulationConfig::from_file(&path).expect("Failed to load config");
    assert_eq!(created, loaded);
}

#[test]
fn test_config_file_loading() {
    let (_dir, path) = temp_path("config.toml");
    fs::write(
        &path,
        r#"
[data]
source = "json"
path = "observations.json"
max_assets = 25

[entry]
quorum = 6
no_sell_ratio = "excluded"

[exit]
take_profit = 2.5
stop_loss = 0.7

[scheduler]
workers = 4
checkpoint_interval_secs = 30

[sweep]
objective = "weighted_return"

[sweep.parameters]
holder_delta_30s = [10, 20]
"exit.trailing_stop" = 0.85
"#,
    )
    .unwrap();

    let config = SimulationConfig::from_file(&path).expect("Failed to load config");
    assert_eq!(config.data.source, SourceKind::Json);
    assert_eq!(config.data.max_assets, Some(25));
    assert_eq!(config.entry.quorum, 6);
    assert_eq!(config.entry.max_delay, 200);
    assert_eq!(config.exit.take_profit, 2.5);
    assert_eq!(config.exit.trailing_stop, 0.9);
    assert_eq!(config.scheduler.workers, 4);
    assert!(config.scheduler.checkpointing);
    assert_eq!(config.sweep.objective, Objective::WeightedReturn);
    assert_eq!(config.sweep.parameters.len(), 2);
    assert_eq!(config.sweep.parameters["exit.trailing_stop"], ParamValues::Fixed(0.85));

    let strategy = config.strategy();
    assert_eq!(strategy.entry.quorum, 6);
    assert_eq!(strategy.exit.stop_loss, 0.7);
}

#[test]
fn test_invalid_values_are_rejected_on_load() {
    let (_dir, path) = temp_path("config.toml");
    fs::write(&path, "[entry]\nquorum = 11\n").unwrap();

    let result = SimulationConfig::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_malformed_toml() {
    let (_dir, path) = temp_path("config.toml");
    fs::write(&path, "[entry\nquorum = ").unwrap();

    let err: SimulationError = SimulationConfig::from_file(&path).unwrap_err().into();
    assert!(matches!(err, SimulationError::ConfigParse(_)));
    assert_eq!(err.category(), "config");
    assert!(err.is_fatal());
}

#[test]
fn test_missing_config_file() {
    let (_dir, path) = temp_path("absent.toml");
    let result = SimulationConfig::from_file(&path);
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_preflight_flags_missing_data() {
    let (dir, path) = temp_path("config.toml");
    let mut config = SimulationConfig::load_or_create(&path).unwrap();
    config.data.path = dir.path().join("nope.db").to_string_lossy().to_string();
    config.output.dir = dir.path().join("results").to_string_lossy().to_string();
    config.scheduler.checkpoint_dir = dir.path().join("checkpoints").to_string_lossy().to_string();

    let result = PreFlightValidator::new(config).validate_for_run();
    assert!(!result.passed);
    assert!(matches!(result.into_result(), Err(SimulationError::ConfigValidation(_))));
}
