// Pool Backtester Library
//
// Two-phase entry/exit simulation over per-asset market time series, with a
// checkpointed parallel scheduler and grid parameter sweeps

pub mod analytics;    // Metrics aggregation, reports and export
pub mod config;
pub mod data;         // Observation sources and preprocessing
pub mod engine;       // Two-phase pipeline
pub mod error;        // Unified error handling
pub mod optimization; // Grid sweeps
pub mod progress;     // Progress bars
pub mod scheduler;    // Parallel batch scheduler with checkpoints
pub mod simulation;   // Entry scanner and exit state machine
pub mod types;
pub mod validation;   // Pre-flight validation

// Re-export error types
pub use error::{SimResult, SimulationError};

// Re-export configuration
pub use config::{ConfigError, DataConfig, OutputConfig, SchedulerConfig, SimulationConfig, SourceKind, SweepConfig};

// Re-export validation types
pub use validation::{PreFlightValidator, ValidationCheck, ValidationLevel, ValidationResult};

// Re-export data types
pub use data::{
    load_series, preprocess, AssetSeries, JsonFileSource, Observation, ObservationSource, ObservationStore,
    RawObservation, RawTimestamp,
};

// Re-export simulation components
pub use simulation::{
    BuySellRatio, EntryMetrics, EntryOpportunity, EntryParameterSet, EntryScanner, ExitMetrics, ExitPolicy,
    ExitQuality, ExitReason, ExitStateMachine, MomentumParameterSet, NoSellPolicy, ScanVerdict, ScreeningMetric,
    StopLossOverride, StrategyParameters, TradeOutcome,
};

// Re-export scheduler components
pub use scheduler::{
    BatchScheduler, CheckpointKey, CheckpointState, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
    ProgressEvent, SchedulerOptions, SchedulerReport, UnitOutcome, UnitProcessor, WorkUnit,
};

// Re-export analytics and optimization
pub use analytics::{summarize, PerformanceSummary, ReasonBreakdown, ReturnBuckets, ReturnSample};
pub use engine::{BacktestEngine, PhaseStats, PipelineReport};
pub use optimization::{GridSweepDriver, Objective, ParamValues, ParameterSpace, SweepReport, SweepResult};

pub use progress::{ScanProgress, Spinner, SweepProgress};
pub use types::{ResumeMode, RunClass, Stage};
