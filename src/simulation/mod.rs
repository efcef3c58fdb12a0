// Simulation core: entry screening and exit management

pub mod entry;
pub mod exit;
pub mod params;

pub use entry::{
    BuySellRatio, EntryMetrics, EntryOpportunity, EntryScanner, InitialMetrics, OpportunityReturns,
    ScanVerdict,
};
pub use exit::{ExitMetrics, ExitQuality, ExitReason, ExitStateMachine, TradeOutcome};
pub use params::{
    fingerprint_of, merge_json_overrides, EntryParameterSet, ExitPolicy, MomentumParameterSet, NoSellPolicy,
    ScreeningMetric, StopLossOverride, StrategyParameters, PERMISSIVE_THRESHOLD,
};
