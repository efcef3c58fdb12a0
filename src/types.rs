// Common types and constants used across the simulator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset of the early market-cap sample used by the "too big, too fast" filter
pub const EARLY_MC_INDEX: usize = 10;
/// Market-cap ceiling at the early sample
pub const EARLY_MC_LIMIT: f64 = 400_000.0;
/// Number of rows inspected after an exit for quality grading
pub const POST_EXIT_WINDOW: usize = 300;
/// Fraction of the post-entry peak treated as an achievable exit
pub const REALISTIC_EXIT_FRACTION: f64 = 0.8;
/// Window (in rows) for the 30s change metrics
pub const WINDOW_30S: usize = 30;
/// Profit ratio below which a trade is still "low performance"
pub const LOW_PERFORMANCE_CEILING: f64 = 1.2;
/// Opportunity count at which the weighted score stops growing
pub const OPPORTUNITY_SATURATION: f64 = 100.0;
/// Scale applied to the saturating opportunity component of the weighted score
pub const OPPORTUNITY_SCORE_SCALE: f64 = 10.0;

/// Run class used to separate checkpoints of single runs from grid sweeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunClass {
    Normal,
    Grid,
}

impl RunClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunClass::Normal => "normal",
            RunClass::Grid => "grid",
        }
    }
}

impl fmt::Display for RunClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a checkpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    EntryScan,
    ExitSimulation,
    Sweep,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::EntryScan => "entry_scan",
            Stage::ExitSimulation => "exit_simulation",
            Stage::Sweep => "sweep",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an existing incomplete checkpoint should be picked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeMode {
    #[default]
    Resume,
    ForceNew,
}
