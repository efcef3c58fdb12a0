//! Pre-flight validation for simulation runs
//!
//! Checks configuration, data source and output locations before any work
//! is scheduled, so fatal problems surface before a long run starts.

use crate::config::{SimulationConfig, SourceKind};
use crate::data::AssetSeries;
use crate::error::{SimResult, SimulationError};
use crate::optimization::ParameterSpace;
use crate::types::WINDOW_30S;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// Sweeps larger than this get a warning
const LARGE_SWEEP: usize = 500;

/// Validation result with detailed findings
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub passed: bool,
    pub checks: Vec<ValidationCheck>,
}

#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub level: ValidationLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationLevel {
    Critical, // Must pass for the run to start
    Warning,  // Run continues, results may be degraded
    Info,
}

impl ValidationCheck {
    fn ok(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
            level: ValidationLevel::Info,
        }
    }

    fn failed(name: &str, message: impl Into<String>, level: ValidationLevel) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.into(),
            level,
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        ValidationResult {
            passed: true,
            checks: Vec::new(),
        }
    }

    pub fn add_check(&mut self, check: ValidationCheck) {
        if !check.passed && check.level == ValidationLevel::Critical {
            self.passed = false;
        }
        self.checks.push(check);
    }

    pub fn critical_failures(&self) -> Vec<&ValidationCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.level == ValidationLevel::Critical)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.level == ValidationLevel::Warning)
            .collect()
    }

    pub fn display(&self) {
        info!("🔍 Pre-flight Validation");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        for check in &self.checks {
            let icon = if check.passed {
                "✅"
            } else {
                match check.level {
                    ValidationLevel::Critical => "❌",
                    ValidationLevel::Warning => "⚠️",
                    ValidationLevel::Info => "ℹ️",
                }
            };

            info!("{} {} - {}", icon, check.name, check.message);
        }

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if !self.passed {
            let failures = self.critical_failures();
            error!("❌ Validation failed: {} critical issue(s)", failures.len());
            for failure in failures {
                error!("   • {}: {}", failure.name, failure.message);
            }
        } else {
            let warnings = self.warnings();
            if !warnings.is_empty() {
                warn!("⚠️  {} warning(s) detected", warnings.len());
                for warning in warnings {
                    warn!("   • {}: {}", warning.name, warning.message);
                }
            }
            info!("✅ All critical checks passed");
        }
    }

    /// `ConfigValidation` listing every critical failure, if any
    pub fn into_result(self) -> SimResult<()> {
        if self.passed {
            return Ok(());
        }
        let reasons: Vec<String> = self
            .critical_failures()
            .iter()
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect();
        Err(SimulationError::ConfigValidation(reasons.join("; ")))
    }
}

/// Pre-flight validator for simulation runs and sweeps
pub struct PreFlightValidator {
    config: SimulationConfig,
}

impl PreFlightValidator {
    pub fn new(config: SimulationConfig) -> Self {
        PreFlightValidator { config }
    }

    /// Checks for a single two-phase run
    pub fn validate_for_run(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        result.add_check(self.check_parameters());
        result.add_check(self.check_data_source());
        result.add_check(self.check_delay_window());
        result.add_check(self.check_directory("Output Directory", &self.config.output.dir));
        if self.config.scheduler.checkpointing {
            result.add_check(self.check_directory("Checkpoint Directory", &self.config.scheduler.checkpoint_dir));
        }

        result
    }

    /// Run checks plus the sweep space
    pub fn validate_for_sweep(&self) -> ValidationResult {
        let mut result = self.validate_for_run();
        result.add_check(self.check_sweep_space());
        result
    }

    /// Checks on loaded data
    pub fn validate_series(&self, series: &[AssetSeries]) -> ValidationResult {
        let mut result = ValidationResult::new();

        let required = self.config.entry.min_series_len();
        let incomplete = series.iter().filter(|s| !s.is_complete()).count();
        let long_enough = series
            .iter()
            .filter(|s| s.is_complete() && s.len() >= required)
            .count();

        if series.is_empty() {
            result.add_check(ValidationCheck::failed("Assets", "No assets loaded", ValidationLevel::Critical));
            return result;
        }

        if incomplete > 0 {
            result.add_check(ValidationCheck::failed(
                "Required Fields",
                format!("{} of {} assets lack marketCap or holdersCount", incomplete, series.len()),
                ValidationLevel::Warning,
            ));
        } else {
            result.add_check(ValidationCheck::ok("Required Fields", "Present on every asset"));
        }

        if long_enough == 0 {
            result.add_check(ValidationCheck::failed(
                "Series Length",
                format!("No asset has the {} rows a scan needs", required),
                ValidationLevel::Warning,
            ));
        } else {
            result.add_check(ValidationCheck::ok(
                "Series Length",
                format!("{} of {} assets have at least {} rows", long_enough, series.len(), required),
            ));
        }

        result
    }

    // Individual check methods

    fn check_parameters(&self) -> ValidationCheck {
        match self.config.validate() {
            Ok(()) => ValidationCheck::ok(
                "Parameters",
                format!(
                    "quorum {}/10, delays {}..={}, TP {:.2}x, SL {:.2}x",
                    self.config.entry.quorum,
                    self.config.entry.min_delay,
                    self.config.entry.max_delay,
                    self.config.exit.take_profit,
                    self.config.exit.stop_loss
                ),
            ),
            Err(e) => ValidationCheck::failed("Parameters", e.to_string(), ValidationLevel::Critical),
        }
    }

    fn check_data_source(&self) -> ValidationCheck {
        let path = Path::new(&self.config.data.path);
        let kind = match self.config.data.source {
            SourceKind::Sqlite => "SQLite cache",
            SourceKind::Json => "JSON file",
        };

        if !path.exists() {
            return ValidationCheck::failed(
                "Data Source",
                format!("{} not found at {}", kind, path.display()),
                ValidationLevel::Critical,
            );
        }

        match fs::metadata(path) {
            Ok(meta) if meta.len() == 0 => ValidationCheck::failed(
                "Data Source",
                format!("{} at {} is empty", kind, path.display()),
                ValidationLevel::Critical,
            ),
            Ok(meta) => ValidationCheck::ok(
                "Data Source",
                format!("{} {} ({} KB)", kind, path.display(), meta.len() / 1024),
            ),
            Err(e) => ValidationCheck::failed(
                "Data Source",
                format!("Cannot read {}: {}", path.display(), e),
                ValidationLevel::Critical,
            ),
        }
    }

    fn check_delay_window(&self) -> ValidationCheck {
        if self.config.entry.min_delay < WINDOW_30S {
            ValidationCheck::failed(
                "Delay Window",
                format!(
                    "min_delay {} < {}: 30s window metrics never pass before row {}",
                    self.config.entry.min_delay, WINDOW_30S, WINDOW_30S
                ),
                ValidationLevel::Warning,
            )
        } else {
            ValidationCheck::ok(
                "Delay Window",
                format!("rows {}..={}", self.config.entry.min_delay, self.config.entry.max_delay),
            )
        }
    }

    fn check_directory(&self, name: &str, dir: &str) -> ValidationCheck {
        match fs::create_dir_all(dir) {
            Ok(()) => ValidationCheck::ok(name, dir.to_string()),
            Err(e) => ValidationCheck::failed(name, format!("Cannot create {}: {}", dir, e), ValidationLevel::Critical),
        }
    }

    fn check_sweep_space(&self) -> ValidationCheck {
        let space = ParameterSpace::new(self.config.sweep.parameters.clone());
        if let Err(e) = space.validate(&self.config.strategy()) {
            return ValidationCheck::failed("Sweep Space", e.to_string(), ValidationLevel::Critical);
        }

        let count = space.combination_count();
        if count > LARGE_SWEEP {
            ValidationCheck::failed(
                "Sweep Space",
                format!("{} combinations, this will take a while", count),
                ValidationLevel::Warning,
            )
        } else {
            ValidationCheck::ok(
                "Sweep Space",
                format!("{} combinations over {}", count, space.swept_names().join(", ")),
            )
        }
    }
}
