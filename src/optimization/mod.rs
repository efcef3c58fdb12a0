//! Grid sweep driver
//!
//! Runs the full entry/exit pipeline once per parameter combination, keeps a
//! sweep-level checkpoint of finished combinations and ranks the results by
//! the configured [`Objective`].

use crate::analytics::PerformanceSummary;
use crate::data::AssetSeries;
use crate::engine::{BacktestEngine, PhaseStats};
use crate::error::{SimResult, SimulationError};
use crate::progress::SweepProgress;
use crate::scheduler::{CheckpointKey, CheckpointState, CheckpointStore, SchedulerOptions};
use crate::simulation::{fingerprint_of, StrategyParameters};
use crate::types::{ResumeMode, RunClass, Stage};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

pub mod grid;

pub use grid::{default_sweep_space, ParamValues, ParameterCombination, ParameterSpace};

/// What a sweep ranks combinations by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Average realistic return of the entry opportunities
    #[default]
    AvgRealisticReturn,
    /// Realistic return blended with a saturating opportunity count
    WeightedReturn,
    /// Total profit of the simulated trades
    TotalProfit,
}

impl Objective {
    pub fn name(&self) -> &'static str {
        match self {
            Objective::AvgRealisticReturn => "avg_realistic_return",
            Objective::WeightedReturn => "weighted_return",
            Objective::TotalProfit => "total_profit",
        }
    }

    pub fn score(&self, opportunities: &PerformanceSummary, trades: &PerformanceSummary) -> f64 {
        match self {
            Objective::AvgRealisticReturn => opportunities.avg_realistic_return,
            Objective::WeightedReturn => opportunities.weighted_return,
            Objective::TotalProfit => trades.total_profit,
        }
    }
}

/// Outcome of one combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub key: String,
    pub parameters: BTreeMap<String, f64>,
    pub fingerprint: String,
    pub score: f64,
    /// 1-based, assigned after ranking
    pub rank: usize,
    pub opportunity_summary: PerformanceSummary,
    pub trade_summary: PerformanceSummary,
    pub scan: PhaseStats,
    pub exit: PhaseStats,
}

/// Ranked results of a whole sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub objective: Objective,
    pub total_combinations: usize,
    /// Combinations evaluated by this invocation
    pub evaluated_this_run: usize,
    pub failed: usize,
    pub resumed: bool,
    /// Best first
    pub ranking: Vec<SweepResult>,
}

impl SweepReport {
    pub fn best(&self) -> Option<&SweepResult> {
        self.ranking.first()
    }
}

/// Descending by score, ties broken by combination key
pub fn rank(results: &mut [SweepResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
}

pub struct GridSweepDriver {
    base: StrategyParameters,
    space: ParameterSpace,
    objective: Objective,
    options: SchedulerOptions,
    store: Option<Arc<dyn CheckpointStore>>,
    data_tag: String,
}

impl GridSweepDriver {
    pub fn new(
        base: StrategyParameters,
        space: ParameterSpace,
        objective: Objective,
        options: SchedulerOptions,
        store: Option<Arc<dyn CheckpointStore>>,
    ) -> Self {
        Self {
            base,
            space,
            objective,
            options,
            store,
            data_tag: String::new(),
        }
    }

    pub fn with_data_tag(mut self, tag: impl Into<String>) -> Self {
        self.data_tag = tag.into();
        self
    }

    fn key(&self) -> CheckpointKey {
        CheckpointKey::new(
            RunClass::Grid,
            Stage::Sweep,
            fingerprint_of(&(&self.base, &self.space, self.objective, &self.data_tag)),
        )
    }

    pub async fn run(&self, series: &[Arc<AssetSeries>]) -> SimResult<SweepReport> {
        self.run_until(series, std::future::pending::<()>()).await
    }

    /// Evaluate every combination not already finished
    pub async fn run_until<F>(&self, series: &[Arc<AssetSeries>], shutdown: F) -> SimResult<SweepReport>
    where
        F: Future<Output = ()>,
    {
        self.space.validate(&self.base)?;
        let combinations = self.space.combinations();
        let total = combinations.len();
        let key = self.key();

        let (mut state, resumed) = match self.restore(&key, total)? {
            Some(state) if state.completed => {
                info!("✅ Sweep already complete ({} results)", state.results.len());
                return Ok(self.report(state, 0, true));
            }
            Some(state) => (state, true),
            None => (CheckpointState::new(key, total), false),
        };

        if resumed {
            info!("🔄 Resuming sweep: {}/{} combinations done", state.processed(), total);
        }
        info!(
            "🔧 Sweeping {} combinations over {} ({})",
            total,
            self.space.swept_names().join(", "),
            self.objective.name()
        );

        // inner passes run silently and without their own checkpoints
        let inner = SchedulerOptions {
            show_progress: false,
            resume: ResumeMode::ForceNew,
            ..self.options.clone()
        };
        let engine = BacktestEngine::new(inner, None).with_run_class(RunClass::Grid);

        let progress = SweepProgress::new(total, self.options.show_progress);
        let mut best = best_score(&state);
        progress.update(state.processed(), best, "");

        tokio::pin!(shutdown);
        let mut evaluated = 0;

        for combination in combinations {
            let combo_key = combination.key();
            if state.is_done(&combo_key) {
                continue;
            }
            progress.update(state.processed(), best, &combo_key);

            let params = combination.apply(&self.base)?;
            match engine.run_until(&params, series, &mut shutdown).await {
                Ok(pipeline) => {
                    let score = self
                        .objective
                        .score(&pipeline.opportunity_summary, &pipeline.trade_summary);
                    info!(
                        "📊 {} -> {} = {:.4} ({} opportunities, {} trades)",
                        combo_key,
                        self.objective.name(),
                        score,
                        pipeline.opportunities.len(),
                        pipeline.trades.len()
                    );
                    best = Some(best.map_or(score, |b| b.max(score)));
                    state.results.insert(
                        combo_key.clone(),
                        SweepResult {
                            key: combo_key.clone(),
                            parameters: combination.values.clone(),
                            fingerprint: params.fingerprint(),
                            score,
                            rank: 0,
                            opportunity_summary: pipeline.opportunity_summary,
                            trade_summary: pipeline.trade_summary,
                            scan: pipeline.scan,
                            exit: pipeline.exit,
                        },
                    );
                    state.succeeded += 1;
                }
                Err(SimulationError::Interrupted { .. }) => {
                    self.save(&state)?;
                    progress.finish_with_error("interrupted");
                    warn!("⚠️  Sweep interrupted; {}/{} combinations saved", state.processed(), total);
                    return Err(SimulationError::Interrupted {
                        completed: state.processed(),
                        total,
                    });
                }
                Err(e) => {
                    warn!("❌ Combination {} failed: {}", combo_key, e);
                    state.failed += 1;
                }
            }

            state.completed_units.insert(combo_key);
            evaluated += 1;
            self.save(&state)?;
            info!("💾 Sweep checkpoint: {}/{} combinations", state.processed(), total);
        }

        progress.finish(best);
        state.completed = true;
        if let Some(store) = &self.store {
            let mut stored = state.to_stored()?;
            store.finalize(&mut stored)?;
        }

        Ok(self.report(state, evaluated, resumed))
    }

    fn restore(&self, key: &CheckpointKey, total: usize) -> SimResult<Option<CheckpointState<SweepResult>>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        if self.options.resume == ResumeMode::ForceNew {
            return Ok(None);
        }

        if let Some(stored) = store.latest_incomplete(key)? {
            let mut state: CheckpointState<SweepResult> = stored.decode()?;
            state.total_units = total;
            return Ok(Some(state));
        }
        match store.latest_completed(key)? {
            Some(stored) => Ok(Some(stored.decode()?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &CheckpointState<SweepResult>) -> SimResult<()> {
        if let Some(store) = &self.store {
            let mut stored = state.to_stored()?;
            stored.updated_at = chrono::Utc::now();
            store.save(&stored)?;
        }
        Ok(())
    }

    fn report(&self, state: CheckpointState<SweepResult>, evaluated: usize, resumed: bool) -> SweepReport {
        let mut ranking: Vec<SweepResult> = state.results.into_values().collect();
        rank(&mut ranking);
        if let Some(best) = ranking.first() {
            info!("🏆 Best combination: {} ({} = {:.4})", best.key, self.objective.name(), best.score);
        }

        SweepReport {
            objective: self.objective,
            total_combinations: state.total_units,
            evaluated_this_run: evaluated,
            failed: state.failed,
            resumed,
            ranking,
        }
    }
}

fn best_score(state: &CheckpointState<SweepResult>) -> Option<f64> {
    state.results.values().map(|r| r.score).reduce(f64::max)
}
