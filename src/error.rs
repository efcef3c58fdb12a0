//! Unified error handling for the pool backtester
//!
//! Every fallible operation in the crate returns [`SimResult`]. Variants are
//! grouped by category so the CLI can decide whether a failure aborts the run
//! or is absorbed at a unit boundary.

use std::fmt;
use std::io;

/// Main error type for the simulator
#[derive(Debug)]
pub enum SimulationError {
    // Configuration errors
    ConfigNotFound(String),
    ConfigParse(String),
    ConfigValidation(String),

    // Data source errors
    DataSourceUnavailable(String),
    NoData(String),
    DataQuality(String),

    // Database errors
    DatabaseQuery(String),

    // Computation errors
    UnitFailed(String, String), // (unit_id, cause)
    StepFailed(usize, String),  // (row index, cause)

    // Scheduler errors
    BatchFailed(String),
    Interrupted { completed: usize, total: usize },
    Checkpoint(String),

    // Parameter errors
    InvalidParameter(String, String), // (parameter_name, reason)
    UnknownParameter(String),

    // IO errors
    FileRead(String),
    FileWrite(String),
    DirectoryCreate(String),

    // General errors
    Internal(String),
}

impl SimulationError {
    /// Get a user-friendly error message with helpful context
    pub fn user_message(&self) -> String {
        match self {
            SimulationError::ConfigNotFound(path) => {
                format!(
                    "Configuration file not found: {}\n\n\
                    💡 Quick fix:\n\
                    1. Run: pool-sim init\n\
                    2. Edit the generated config.toml\n\
                    3. Try again",
                    path
                )
            }
            SimulationError::ConfigValidation(msg) => {
                format!(
                    "Configuration validation error: {}\n\n\
                    💡 Check config.toml for:\n\
                    - Positive delays with min_delay <= max_delay\n\
                    - A quorum between 1 and 10\n\
                    - stop_loss < 1.0 < take_profit",
                    msg
                )
            }
            SimulationError::DataSourceUnavailable(msg) => {
                format!(
                    "Observation source unavailable: {}\n\n\
                    💡 Try:\n\
                    1. Check [data] path in config.toml\n\
                    2. Run: pool-sim import <file.json> to build the SQLite cache",
                    msg
                )
            }
            SimulationError::NoData(msg) => {
                format!(
                    "No observations to simulate: {}\n\n\
                    💡 The source returned no rows. Check --limit and the source file.",
                    msg
                )
            }
            SimulationError::Interrupted { completed, total } => {
                format!(
                    "Run interrupted after {}/{} units\n\n\
                    💡 Progress was checkpointed. Run the same command again to resume,\n\
                    or pass --force-new to start over.",
                    completed, total
                )
            }
            SimulationError::BatchFailed(msg) => {
                format!(
                    "Worker batch failed: {}\n\n\
                    💡 Finished units were checkpointed. Run the same command again\n\
                    to retry the rest.",
                    msg
                )
            }
            SimulationError::UnknownParameter(name) => {
                format!(
                    "Unknown parameter: {}\n\n\
                    💡 Entry parameters are addressed by field name (e.g. holder_delta_30s),\n\
                    exit parameters as exit.<field>, exit.momentum.<field> or\n\
                    exit.stop_loss_override.<field>",
                    name
                )
            }
            _ => self.to_string(),
        }
    }

    /// Fatal errors abort the run before any unit is processed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SimulationError::ConfigNotFound(_)
                | SimulationError::ConfigParse(_)
                | SimulationError::ConfigValidation(_)
                | SimulationError::DataSourceUnavailable(_)
                | SimulationError::NoData(_)
                | SimulationError::InvalidParameter(_, _)
                | SimulationError::UnknownParameter(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            SimulationError::ConfigNotFound(_)
            | SimulationError::ConfigParse(_)
            | SimulationError::ConfigValidation(_) => "config",

            SimulationError::DataSourceUnavailable(_)
            | SimulationError::NoData(_)
            | SimulationError::DataQuality(_) => "data",

            SimulationError::DatabaseQuery(_) => "database",

            SimulationError::UnitFailed(_, _) | SimulationError::StepFailed(_, _) => "computation",

            SimulationError::BatchFailed(_)
            | SimulationError::Interrupted { .. }
            | SimulationError::Checkpoint(_) => "scheduler",

            SimulationError::InvalidParameter(_, _) | SimulationError::UnknownParameter(_) => {
                "parameters"
            }

            SimulationError::FileRead(_)
            | SimulationError::FileWrite(_)
            | SimulationError::DirectoryCreate(_) => "io",

            SimulationError::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path)
            }
            SimulationError::ConfigParse(msg) => {
                write!(f, "Configuration parse error: {}", msg)
            }
            SimulationError::ConfigValidation(msg) => {
                write!(f, "Configuration validation error: {}", msg)
            }

            SimulationError::DataSourceUnavailable(msg) => {
                write!(f, "Observation source unavailable: {}", msg)
            }
            SimulationError::NoData(msg) => {
                write!(f, "No data: {}", msg)
            }
            SimulationError::DataQuality(msg) => {
                write!(f, "Data quality error: {}", msg)
            }

            SimulationError::DatabaseQuery(msg) => {
                write!(f, "Database query error: {}", msg)
            }

            SimulationError::UnitFailed(id, cause) => {
                write!(f, "Unit {} failed: {}", id, cause)
            }
            SimulationError::StepFailed(index, cause) => {
                write!(f, "Step {} failed: {}", index, cause)
            }

            SimulationError::BatchFailed(msg) => {
                write!(f, "Batch failed: {}", msg)
            }
            SimulationError::Interrupted { completed, total } => {
                write!(f, "Interrupted after {}/{} units", completed, total)
            }
            SimulationError::Checkpoint(msg) => {
                write!(f, "Checkpoint error: {}", msg)
            }

            SimulationError::InvalidParameter(param, reason) => {
                write!(f, "Invalid parameter '{}': {}", param, reason)
            }
            SimulationError::UnknownParameter(name) => {
                write!(f, "Unknown parameter '{}'", name)
            }

            SimulationError::FileRead(msg) => {
                write!(f, "File read error: {}", msg)
            }
            SimulationError::FileWrite(msg) => {
                write!(f, "File write error: {}", msg)
            }
            SimulationError::DirectoryCreate(msg) => {
                write!(f, "Directory creation error: {}", msg)
            }

            SimulationError::Internal(msg) => {
                write!(f, "Internal error: {}", msg)
            }
        }
    }
}

impl std::error::Error for SimulationError {}

// Conversion implementations for common error types

impl From<io::Error> for SimulationError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SimulationError::FileRead(err.to_string()),
            io::ErrorKind::PermissionDenied => SimulationError::FileWrite(err.to_string()),
            _ => SimulationError::Internal(format!("IO error: {}", err)),
        }
    }
}

impl From<rusqlite::Error> for SimulationError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => SimulationError::DatabaseQuery(msg),
            rusqlite::Error::QueryReturnedNoRows => {
                SimulationError::DatabaseQuery("Query returned no rows".to_string())
            }
            _ => SimulationError::DatabaseQuery(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for SimulationError {
    fn from(err: serde_json::Error) -> Self {
        SimulationError::DataQuality(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for SimulationError {
    fn from(err: toml::de::Error) -> Self {
        SimulationError::ConfigParse(format!("TOML parse error: {}", err))
    }
}

impl From<csv::Error> for SimulationError {
    fn from(err: csv::Error) -> Self {
        SimulationError::FileWrite(format!("CSV error: {}", err))
    }
}

impl From<tokio::task::JoinError> for SimulationError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            SimulationError::BatchFailed(format!("worker panicked: {}", err))
        } else {
            SimulationError::Internal(format!("worker task cancelled: {}", err))
        }
    }
}

impl From<crate::config::ConfigError> for SimulationError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::FileRead(msg) => SimulationError::ConfigNotFound(msg),
            ConfigError::FileWrite(msg) => SimulationError::FileWrite(msg),
            ConfigError::Parse(msg) => SimulationError::ConfigParse(msg),
            ConfigError::Serialize(msg) => SimulationError::Internal(msg),
            ConfigError::Validation(msg) => SimulationError::ConfigValidation(msg),
        }
    }
}

impl From<String> for SimulationError {
    fn from(msg: String) -> Self {
        SimulationError::Internal(msg)
    }
}

impl From<&str> for SimulationError {
    fn from(msg: &str) -> Self {
        SimulationError::Internal(msg.to_string())
    }
}

/// Result type alias using SimulationError
pub type SimResult<T> = Result<T, SimulationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimulationError::ConfigNotFound("config.toml".to_string());
        assert!(err.to_string().contains("config.toml"));

        let err = SimulationError::Interrupted { completed: 3, total: 10 };
        assert_eq!(err.to_string(), "Interrupted after 3/10 units");
    }

    #[test]
    fn test_error_category() {
        let err = SimulationError::ConfigValidation("test".to_string());
        assert_eq!(err.category(), "config");

        let err = SimulationError::DatabaseQuery("test".to_string());
        assert_eq!(err.category(), "database");

        let err = SimulationError::UnitFailed("pool".to_string(), "boom".to_string());
        assert_eq!(err.category(), "computation");
    }

    #[test]
    fn test_fatal() {
        assert!(SimulationError::NoData("empty".to_string()).is_fatal());
        assert!(SimulationError::DataSourceUnavailable("gone".to_string()).is_fatal());
        assert!(!SimulationError::StepFailed(4, "nan".to_string()).is_fatal());
        assert!(!SimulationError::BatchFailed("panic".to_string()).is_fatal());
    }

    #[test]
    fn test_user_message() {
        let err = SimulationError::Interrupted { completed: 5, total: 9 };
        let msg = err.user_message();
        assert!(msg.contains("5/9"));
        assert!(msg.contains("💡"));
    }

    #[tokio::test]
    async fn test_panicked_worker_is_batch_failure() {
        let join_err = tokio::task::spawn_blocking::<_, ()>(|| panic!("boom")).await.unwrap_err();
        let err: SimulationError = join_err.into();
        assert!(matches!(err, SimulationError::BatchFailed(_)));
        assert_eq!(err.category(), "scheduler");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "test");
        let sim_err: SimulationError = io_err.into();
        assert!(matches!(sim_err, SimulationError::FileRead(_)));
    }
}
