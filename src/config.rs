// Configuration management for the pool backtester

use crate::optimization::{default_sweep_space, Objective, ParamValues};
use crate::simulation::{EntryParameterSet, ExitPolicy, StrategyParameters};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Sqlite,
    Json,
}

fn default_source() -> SourceKind { SourceKind::Sqlite }
fn default_data_path() -> String { "data/observations.db".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_source")]
    pub source: SourceKind,
    #[serde(default = "default_data_path")]
    pub path: String,
    /// Only the first N assets (by id) are loaded
    #[serde(default)]
    pub max_assets: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            path: default_data_path(),
            max_assets: None,
        }
    }
}

fn default_checkpoint_interval_secs() -> u64 { 60 }
fn default_checkpoint_dir() -> String { "checkpoints".to_string() }
fn default_true() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker threads; 0 uses every available core
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
    #[serde(default = "default_true")]
    pub checkpointing: bool,
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            checkpoint_dir: default_checkpoint_dir(),
            checkpointing: true,
            show_progress: true,
        }
    }
}

fn default_output_dir() -> String { "results".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_true")]
    pub export_csv: bool,
    #[serde(default = "default_true")]
    pub export_json: bool,
    #[serde(default = "default_true")]
    pub write_report: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            export_csv: true,
            export_json: true,
            write_report: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default)]
    pub objective: Objective,
    /// Parameter name to a fixed value or a list of candidates
    #[serde(default = "default_sweep_space")]
    pub parameters: BTreeMap<String, ParamValues>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            objective: Objective::default(),
            parameters: default_sweep_space(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub entry: EntryParameterSet,
    #[serde(default)]
    pub exit: ExitPolicy,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl SimulationConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("{}: {}", path.as_ref().display(), e)))?;

        let config: SimulationConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::FileWrite(e.to_string()))?;
            }
        }
        fs::write(path, content)
            .map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }

    /// Load configuration from file, or create default if file doesn't exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            tracing::info!("📁 Created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    /// The single-run strategy described by `[entry]` and `[exit]`
    pub fn strategy(&self) -> StrategyParameters {
        StrategyParameters::new(self.entry.clone(), self.exit.clone())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy()
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.data.path.trim().is_empty() {
            return Err(ConfigError::Validation("data.path must not be empty".to_string()));
        }

        if self.data.max_assets == Some(0) {
            return Err(ConfigError::Validation("data.max_assets must be greater than 0".to_string()));
        }

        if self.scheduler.checkpoint_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "scheduler.checkpoint_interval_secs must be greater than 0".to_string(),
            ));
        }

        for (name, values) in &self.sweep.parameters {
            if let ParamValues::Sweep(candidates) = values {
                if candidates.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "sweep parameter '{}' has no candidate values",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}
