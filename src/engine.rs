//! Two-phase pipeline: entry scan over asset series, then exit simulation
//! over the opportunities it found.
//!
//! Each phase runs on its own [`BatchScheduler`] pass with its own checkpoint
//! key, so an interrupted exit phase resumes without rescanning.

use crate::analytics::{summarize, PerformanceSummary};
use crate::data::AssetSeries;
use crate::error::{SimResult, SimulationError};
use crate::scheduler::{BatchScheduler, CheckpointKey, CheckpointStore, SchedulerOptions, SchedulerReport};
use crate::simulation::{fingerprint_of, EntryOpportunity, EntryScanner, ExitStateMachine, StrategyParameters, TradeOutcome};
use crate::types::{RunClass, Stage};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Scheduler counters for one phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub total: usize,
    pub processed_this_run: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub batch_errors: usize,
    pub unfinished: usize,
    pub resumed: bool,
}

impl<R> From<&SchedulerReport<R>> for PhaseStats {
    fn from(report: &SchedulerReport<R>) -> Self {
        Self {
            total: report.total_units,
            processed_this_run: report.processed_this_run,
            succeeded: report.succeeded,
            failed: report.failed,
            skipped: report.skipped,
            batch_errors: report.batch_errors,
            unfinished: report.unfinished,
            resumed: report.resumed,
        }
    }
}

/// Everything one parameter set produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub parameters: StrategyParameters,
    /// Ordered by asset id
    pub opportunities: Vec<EntryOpportunity>,
    /// Ordered by asset id
    pub trades: Vec<TradeOutcome>,
    pub scan: PhaseStats,
    pub exit: PhaseStats,
    pub opportunity_summary: PerformanceSummary,
    pub trade_summary: PerformanceSummary,
}

pub struct BacktestEngine {
    options: SchedulerOptions,
    store: Option<Arc<dyn CheckpointStore>>,
    run_class: RunClass,
    data_tag: String,
}

impl BacktestEngine {
    pub fn new(options: SchedulerOptions, store: Option<Arc<dyn CheckpointStore>>) -> Self {
        Self {
            options,
            store,
            run_class: RunClass::Normal,
            data_tag: String::new(),
        }
    }

    pub fn with_run_class(mut self, run_class: RunClass) -> Self {
        self.run_class = run_class;
        self
    }

    /// Identifies the input data in checkpoint keys (e.g. source path and asset limit)
    pub fn with_data_tag(mut self, tag: impl Into<String>) -> Self {
        self.data_tag = tag.into();
        self
    }

    pub async fn run(&self, params: &StrategyParameters, series: &[Arc<AssetSeries>]) -> SimResult<PipelineReport> {
        self.run_until(params, series, std::future::pending::<()>()).await
    }

    /// Run both phases, stopping with `Interrupted` if `shutdown` resolves
    pub async fn run_until<F>(
        &self,
        params: &StrategyParameters,
        series: &[Arc<AssetSeries>],
        shutdown: F,
    ) -> SimResult<PipelineReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!("🔍 Phase 1: scanning {} assets for entries", series.len());
        let scan_key = CheckpointKey::new(
            self.run_class,
            Stage::EntryScan,
            fingerprint_of(&(&params.entry, &self.data_tag)),
        );
        let scanner = BatchScheduler::new(self.options.clone().with_label("assets"), self.store.clone());
        let scan_report = scanner
            .run(
                scan_key,
                series.to_vec(),
                Arc::new(EntryScanner::new(params.entry.clone())),
                &mut shutdown,
            )
            .await?;
        let scan = PhaseStats::from(&scan_report);
        if scan.unfinished > 0 {
            // exits over a partial opportunity set would be checkpointed as final
            return Err(SimulationError::BatchFailed(format!(
                "{}/{} assets left unscanned; rerun to resume the scan",
                scan.unfinished, scan.total
            )));
        }
        let opportunities = scan_report.results;
        info!("📊 Found {} entry opportunities", opportunities.len());

        info!("📈 Phase 2: simulating exits for {} opportunities", opportunities.len());
        let exit_key = CheckpointKey::new(
            self.run_class,
            Stage::ExitSimulation,
            fingerprint_of(&(params, &self.data_tag)),
        );
        let simulator = BatchScheduler::new(self.options.clone().with_label("opportunities"), self.store.clone());
        let exit_report = simulator
            .run(
                exit_key,
                opportunities.clone(),
                Arc::new(ExitStateMachine::new(params.exit.clone())),
                &mut shutdown,
            )
            .await?;
        let exit = PhaseStats::from(&exit_report);
        let trades = exit_report.results;

        let opportunity_summary = summarize(&opportunities);
        let trade_summary = summarize(&trades);
        info!(
            "✅ Pipeline complete: {} opportunities, {} trades, avg realistic {:.3}x",
            opportunities.len(),
            trades.len(),
            trade_summary.avg_realistic_return
        );

        Ok(PipelineReport {
            parameters: params.clone(),
            opportunities,
            trades,
            scan,
            exit,
            opportunity_summary,
            trade_summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Observation;
    use crate::scheduler::MemoryCheckpointStore;
    use crate::simulation::EntryParameterSet;
    use chrono::{Duration, TimeZone, Utc};

    fn rising_series(id: &str, len: usize) -> Arc<AssetSeries> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let observations = (0..len)
            .map(|i| {
                let mut obs = Observation::zeroed(start + Duration::seconds(i as i64));
                obs.market_cap = 1000.0 + i as f64 * 10.0;
                obs.holders_count = 10.0 + i as f64;
                obs
            })
            .collect();
        Arc::new(AssetSeries::new(id, observations))
    }

    fn permissive_params() -> StrategyParameters {
        let mut entry = EntryParameterSet::permissive();
        entry.quorum = 1;
        entry.min_delay = 10;
        StrategyParameters::new(entry, Default::default())
    }

    #[tokio::test]
    async fn test_pipeline_produces_one_trade_per_opportunity() {
        let series = vec![rising_series("a", 250), rising_series("b", 250), rising_series("short", 50)];
        let engine = BacktestEngine::new(SchedulerOptions::default(), None);
        let report = engine.run(&permissive_params(), &series).await.unwrap();

        assert_eq!(report.scan.total, 3);
        assert_eq!(report.scan.skipped, 1);
        assert_eq!(report.opportunities.len(), 2);
        assert_eq!(report.trades.len(), 2);
        assert!(report.opportunities.iter().all(|o| o.entry_index == 10));
        assert_eq!(report.trade_summary.count, 2);
    }

    #[tokio::test]
    async fn test_completed_pipeline_resumes_without_work() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let series = vec![rising_series("a", 250)];
        let engine = BacktestEngine::new(SchedulerOptions::default(), Some(store));

        let first = engine.run(&permissive_params(), &series).await.unwrap();
        let second = engine.run(&permissive_params(), &series).await.unwrap();

        assert_eq!(second.scan.processed_this_run, 0);
        assert_eq!(second.exit.processed_this_run, 0);
        assert_eq!(first.trades.len(), second.trades.len());
        assert_eq!(first.trades[0].exit_reason, second.trades[0].exit_reason);
        assert_eq!(first.trades[0].exit_index, second.trades[0].exit_index);
    }
}
