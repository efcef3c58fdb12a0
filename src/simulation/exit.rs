//! Exit state machine
//!
//! Walks forward from an entry row and applies, in priority order, the
//! trailing take-profit, low-performance and stop-loss rules, falling back to
//! a forced exit at the last row. Every walk yields exactly one
//! [`TradeOutcome`].

use super::entry::{EntryMetrics, EntryOpportunity};
use super::params::{ExitPolicy, MomentumParameterSet, StopLossOverride};
use crate::data::Observation;
use crate::error::{SimResult, SimulationError};
use crate::scheduler::{UnitOutcome, UnitProcessor};
use crate::types::{LOW_PERFORMANCE_CEILING, POST_EXIT_WINDOW, REALISTIC_EXIT_FRACTION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Post-exit upside below which a stop-loss exit counts as good
const STOP_LOSS_GOOD_BELOW: f64 = 2.0;
/// Post-exit upside below which a take-profit or low-performance exit counts as good
const PROFIT_EXIT_GOOD_BELOW: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "Momentum Lost + Price Drop")]
    MomentumLost,
    #[serde(rename = "Low Performance")]
    LowPerformance,
    #[serde(rename = "Stop Loss")]
    StopLoss,
    #[serde(rename = "Force Sell")]
    ForceSell,
}

impl ExitReason {
    pub const ALL: [ExitReason; 4] = [
        ExitReason::MomentumLost,
        ExitReason::LowPerformance,
        ExitReason::StopLoss,
        ExitReason::ForceSell,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ExitReason::MomentumLost => "Momentum Lost + Price Drop",
            ExitReason::LowPerformance => "Low Performance",
            ExitReason::StopLoss => "Stop Loss",
            ExitReason::ForceSell => "Force Sell",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether an exit left too much upside on the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitQuality {
    Good,
    Bad,
    Ungraded,
}

impl ExitQuality {
    pub fn grade(reason: ExitReason, post_exit_max_ratio: f64) -> Self {
        let limit = match reason {
            ExitReason::StopLoss => STOP_LOSS_GOOD_BELOW,
            ExitReason::MomentumLost | ExitReason::LowPerformance => PROFIT_EXIT_GOOD_BELOW,
            ExitReason::ForceSell => return ExitQuality::Ungraded,
        };
        if post_exit_max_ratio < limit {
            ExitQuality::Good
        } else {
            ExitQuality::Bad
        }
    }
}

/// Metrics read at every step of the walk
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitMetrics {
    pub mc_change_5s: f64,
    pub holder_change_5s: f64,
    pub holder_change_30s: f64,
    pub holder_change_60s: f64,
    pub buy_volume_5s: f64,
    pub net_volume_5s: f64,
    pub price_change: f64,
}

impl ExitMetrics {
    pub fn from_observation(obs: &Observation) -> Self {
        Self {
            mc_change_5s: obs.market_cap_change_5s,
            holder_change_5s: obs.holder_delta_5s,
            holder_change_30s: obs.holder_delta_30s,
            holder_change_60s: obs.holder_delta_60s,
            buy_volume_5s: obs.buy_volume_5s,
            net_volume_5s: obs.net_volume_5s,
            price_change: obs.price_change_percent,
        }
    }

    fn first_non_finite(&self) -> Option<&'static str> {
        [
            ("mc_change_5s", self.mc_change_5s),
            ("holder_change_5s", self.holder_change_5s),
            ("holder_change_30s", self.holder_change_30s),
            ("holder_change_60s", self.holder_change_60s),
            ("buy_volume_5s", self.buy_volume_5s),
            ("net_volume_5s", self.net_volume_5s),
            ("price_change", self.price_change),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|(name, _)| name)
    }

    /// Count of momentum signals above their thresholds
    pub fn momentum_signals(&self, momentum: &MomentumParameterSet) -> usize {
        [
            self.mc_change_5s > momentum.mc_change_threshold,
            self.holder_change_30s > momentum.holder_change_threshold,
            self.buy_volume_5s > momentum.buy_volume_threshold,
            self.net_volume_5s > momentum.net_volume_threshold,
        ]
        .iter()
        .filter(|hit| **hit)
        .count()
    }

    pub fn momentum_is_strong(&self, momentum: &MomentumParameterSet) -> bool {
        self.momentum_signals(momentum) >= momentum.required_strong
    }

    /// Holder growth strong enough to veto a stop-loss
    pub fn overrides_stop_loss(&self, guard: &StopLossOverride) -> bool {
        let volume_ok = self.buy_volume_5s > guard.buy_volume_moderate;
        let strong = self.holder_change_30s > guard.holder_growth_30s_strong
            && self.holder_change_60s > guard.holder_growth_60s_strong;
        let moderate = self.holder_change_30s > guard.holder_growth_30s_moderate
            && self.holder_change_60s > guard.holder_growth_60s_moderate;
        volume_ok && (strong || moderate)
    }
}

/// Terminal record of one simulated trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub asset_id: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_index: usize,
    pub exit_index: usize,
    pub exit_reason: ExitReason,
    pub profit_ratio: f64,
    pub profit_sol: f64,
    pub max_profit_ratio: f64,
    pub post_exit_max_ratio: f64,
    /// Rows after the exit at which the post-exit maximum occurred
    pub post_exit_peak_offset: usize,
    pub trade_duration_secs: f64,
    pub exit_quality: ExitQuality,
    pub entry_metrics: EntryMetrics,
    pub exit_metrics: ExitMetrics,
}

impl TradeOutcome {
    pub fn is_profitable(&self) -> bool {
        self.profit_ratio > 1.0
    }

    /// 80% of the best ratio seen while holding
    pub fn realistic_return(&self) -> f64 {
        REALISTIC_EXIT_FRACTION * self.max_profit_ratio
    }
}

/// Running state of one walk
struct WalkState {
    entry_price: f64,
    peak_price: f64,
    max_profit_ratio: f64,
    take_profit_armed: bool,
}

/// A step that ends the walk
struct ExitSignal {
    reason: ExitReason,
    ratio: f64,
    metrics: ExitMetrics,
}

#[derive(Debug, Clone)]
pub struct ExitStateMachine {
    policy: ExitPolicy,
}

impl ExitStateMachine {
    pub fn new(policy: ExitPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ExitPolicy {
        &self.policy
    }

    /// Walk the opportunity's post-entry rows to an exit
    pub fn run(&self, opportunity: &EntryOpportunity) -> TradeOutcome {
        let rows = &opportunity.post_entry;
        let entry_price = opportunity.entry_market_cap;
        let mut state = WalkState {
            entry_price,
            peak_price: entry_price,
            max_profit_ratio: if entry_price > 0.0 { 1.0 } else { 0.0 },
            take_profit_armed: false,
        };

        for (offset, obs) in rows.iter().enumerate() {
            match self.step(&mut state, offset, obs) {
                Ok(Some(signal)) => {
                    return self.finish(opportunity, &state, offset, signal);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "⚠️  {} row {}: {}; holding",
                        opportunity.asset_id,
                        opportunity.entry_index + offset,
                        e
                    );
                }
            }
        }

        // forced exit at the last row
        let last = rows.len().saturating_sub(1);
        let (ratio, metrics) = match rows.last() {
            Some(obs) => (ratio_of(obs.market_cap, entry_price), ExitMetrics::from_observation(obs)),
            None => (1.0, ExitMetrics::from_observation(&Observation::zeroed(opportunity.entry_time))),
        };
        let signal = ExitSignal {
            reason: ExitReason::ForceSell,
            ratio,
            metrics,
        };
        self.finish(opportunity, &state, last, signal)
    }

    fn step(&self, state: &mut WalkState, offset: usize, obs: &Observation) -> SimResult<Option<ExitSignal>> {
        let price = obs.market_cap;
        if !price.is_finite() {
            return Err(SimulationError::StepFailed(offset, format!("market cap is {}", price)));
        }
        let metrics = ExitMetrics::from_observation(obs);
        if let Some(field) = metrics.first_non_finite() {
            return Err(SimulationError::StepFailed(offset, format!("{} is not finite", field)));
        }

        let ratio = ratio_of(price, state.entry_price);
        state.peak_price = state.peak_price.max(price);
        state.max_profit_ratio = state.max_profit_ratio.max(ratio);
        if ratio >= self.policy.take_profit {
            state.take_profit_armed = true;
        }

        let exit = |reason| Ok(Some(ExitSignal { reason, ratio, metrics }));

        if state.take_profit_armed
            && !metrics.momentum_is_strong(&self.policy.momentum)
            && price < self.policy.trailing_stop * state.peak_price
        {
            return exit(ExitReason::MomentumLost);
        }

        if ratio >= self.policy.take_profit {
            return Ok(None);
        }

        if ratio > self.policy.stop_loss && ratio < LOW_PERFORMANCE_CEILING {
            let threshold = self.policy.momentum.low_performance_holder_growth;
            if metrics.holder_change_30s < threshold && metrics.holder_change_60s < threshold * 2.0 {
                return exit(ExitReason::LowPerformance);
            }
        } else if ratio <= self.policy.stop_loss {
            if metrics.overrides_stop_loss(&self.policy.stop_loss_override) {
                debug!("stop-loss vetoed at row {} by holder growth", offset);
            } else {
                return exit(ExitReason::StopLoss);
            }
        }

        Ok(None)
    }

    fn finish(
        &self,
        opportunity: &EntryOpportunity,
        state: &WalkState,
        offset: usize,
        signal: ExitSignal,
    ) -> TradeOutcome {
        let rows = &opportunity.post_entry;
        let (exit_time, exit_price) = rows
            .get(offset)
            .map(|obs| (obs.timestamp, obs.market_cap))
            .unwrap_or((opportunity.entry_time, opportunity.entry_market_cap));

        let (post_exit_max_ratio, post_exit_peak_offset) = post_exit_peak(rows, offset, exit_price);
        let trade_duration_secs = (exit_time - opportunity.entry_time).num_milliseconds() as f64 / 1000.0;

        debug!(
            "{} exit '{}' at row {} ratio {:.3}",
            opportunity.asset_id,
            signal.reason,
            opportunity.entry_index + offset,
            signal.ratio
        );

        TradeOutcome {
            asset_id: opportunity.asset_id.clone(),
            entry_time: opportunity.entry_time,
            exit_time,
            entry_price: opportunity.entry_market_cap,
            exit_price,
            entry_index: opportunity.entry_index,
            exit_index: opportunity.entry_index + offset,
            exit_reason: signal.reason,
            profit_ratio: signal.ratio,
            profit_sol: (signal.ratio - 1.0) * self.policy.initial_investment,
            max_profit_ratio: state.max_profit_ratio.max(signal.ratio),
            post_exit_max_ratio,
            post_exit_peak_offset,
            trade_duration_secs,
            exit_quality: ExitQuality::grade(signal.reason, post_exit_max_ratio),
            entry_metrics: opportunity.entry_metrics.clone(),
            exit_metrics: signal.metrics,
        }
    }
}

fn ratio_of(price: f64, entry_price: f64) -> f64 {
    if entry_price > 0.0 {
        price / entry_price
    } else {
        0.0
    }
}

/// Highest price in the window after `offset`, relative to the exit price
fn post_exit_peak(rows: &[Observation], offset: usize, exit_price: f64) -> (f64, usize) {
    let start = offset + 1;
    let end = (offset + POST_EXIT_WINDOW + 1).min(rows.len());
    if start >= end || exit_price <= 0.0 {
        return (1.0, 0);
    }

    let mut best = (rows[start].market_cap, start);
    for (i, obs) in rows.iter().enumerate().take(end).skip(start + 1) {
        if obs.market_cap > best.0 {
            best = (obs.market_cap, i);
        }
    }
    (best.0 / exit_price, best.1 - offset)
}

impl UnitProcessor<EntryOpportunity> for ExitStateMachine {
    type Output = TradeOutcome;

    fn process(&self, opportunity: &EntryOpportunity) -> SimResult<UnitOutcome<TradeOutcome>> {
        Ok(UnitOutcome::Success(self.run(opportunity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::entry::{BuySellRatio, InitialMetrics};
    use chrono::{Duration, TimeZone};

    fn opportunity(ratios: &[f64]) -> EntryOpportunity {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let post_entry = ratios
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut obs = Observation::zeroed(start + Duration::seconds(i as i64));
                obs.market_cap = r * 1000.0;
                obs
            })
            .collect();
        EntryOpportunity {
            asset_id: "pool".to_string(),
            entry_time: start,
            entry_market_cap: 1000.0,
            entry_index: 60,
            entry_metrics: EntryMetrics {
                mc_growth_from_start: 0.0,
                holder_growth_from_start: 0.0,
                holder_delta_30s: None,
                mc_change_5s: 0.0,
                mc_change_30s: None,
                buy_volume_5s: 0.0,
                large_buy_5s: 0.0,
                net_volume_5s: 0.0,
                price_change: 0.0,
                buy_sell_ratio_10s: BuySellRatio::NoSells,
            },
            initial_metrics: InitialMetrics {
                market_cap: 500.0,
                holders_count: 1.0,
            },
            early_market_cap: None,
            post_entry,
        }
    }

    #[test]
    fn test_force_sell_at_last_row() {
        let opp = opportunity(&[1.0, 1.1, 1.05, 1.3, 1.25]);
        let trade = ExitStateMachine::new(ExitPolicy::default()).run(&opp);

        assert_eq!(trade.exit_reason, ExitReason::ForceSell);
        assert_eq!(trade.exit_index, 64);
        assert!((trade.profit_ratio - 1.25).abs() < 1e-9);
        assert!((trade.max_profit_ratio - 1.3).abs() < 1e-9);
        assert_eq!(trade.exit_quality, ExitQuality::Ungraded);
        assert_eq!(trade.trade_duration_secs, 4.0);
    }

    #[test]
    fn test_stop_loss() {
        let opp = opportunity(&[1.0, 0.9, 0.6, 0.5, 1.5]);
        let trade = ExitStateMachine::new(ExitPolicy::default()).run(&opp);

        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_index, 62);
        assert!((trade.profit_sol + 0.4).abs() < 1e-9);
        // 1.5 / 0.6 = 2.5 upside foregone
        assert!((trade.post_exit_max_ratio - 2.5).abs() < 1e-9);
        assert_eq!(trade.post_exit_peak_offset, 2);
        assert_eq!(trade.exit_quality, ExitQuality::Bad);
    }

    #[test]
    fn test_stop_loss_vetoed_by_holder_growth() {
        let mut opp = opportunity(&[1.0, 0.6, 0.6, 0.7]);
        for obs in opp.post_entry.iter_mut() {
            obs.holder_delta_30s = 25.0;
            obs.holder_delta_60s = 35.0;
            obs.buy_volume_5s = 20.0;
        }
        let trade = ExitStateMachine::new(ExitPolicy::default()).run(&opp);
        assert_eq!(trade.exit_reason, ExitReason::ForceSell);
    }

    #[test]
    fn test_low_performance() {
        let mut opp = opportunity(&[1.0, 1.05, 1.1]);
        opp.post_entry[1].holder_delta_30s = -3.0;
        opp.post_entry[1].holder_delta_60s = -1.0;
        let trade = ExitStateMachine::new(ExitPolicy::default()).run(&opp);

        assert_eq!(trade.exit_reason, ExitReason::LowPerformance);
        assert_eq!(trade.exit_index, 61);
        assert_eq!(trade.exit_quality, ExitQuality::Good);
    }

    #[test]
    fn test_trailing_take_profit() {
        let opp = opportunity(&[1.0, 1.5, 1.9, 2.0, 1.85, 1.7, 1.6]);
        let trade = ExitStateMachine::new(ExitPolicy::default()).run(&opp);

        assert_eq!(trade.exit_reason, ExitReason::MomentumLost);
        assert_eq!(trade.exit_index, 65);
        assert!((trade.max_profit_ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_strong_momentum_holds_above_take_profit() {
        let mut opp = opportunity(&[1.0, 2.0, 3.0, 1.9, 1.5, 1.4]);
        for obs in opp.post_entry.iter_mut() {
            obs.market_cap_change_5s = 10.0;
        }
        let trade = ExitStateMachine::new(ExitPolicy::default()).run(&opp);
        assert_ne!(trade.exit_reason, ExitReason::MomentumLost);
        assert_eq!(trade.exit_reason, ExitReason::ForceSell);
    }

    #[test]
    fn test_non_finite_step_is_skipped() {
        let mut opp = opportunity(&[1.0, 0.5, 1.0]);
        opp.post_entry[1].holder_delta_30s = f64::NAN;
        let trade = ExitStateMachine::new(ExitPolicy::default()).run(&opp);
        assert_eq!(trade.exit_reason, ExitReason::ForceSell);
    }

    #[test]
    fn test_empty_post_entry_exits_at_entry() {
        let opp = opportunity(&[]);
        let trade = ExitStateMachine::new(ExitPolicy::default()).run(&opp);
        assert_eq!(trade.exit_reason, ExitReason::ForceSell);
        assert_eq!(trade.exit_index, 60);
        assert_eq!(trade.profit_ratio, 1.0);
    }

    #[test]
    fn test_quality_grades() {
        assert_eq!(ExitQuality::grade(ExitReason::StopLoss, 1.9), ExitQuality::Good);
        assert_eq!(ExitQuality::grade(ExitReason::StopLoss, 2.0), ExitQuality::Bad);
        assert_eq!(ExitQuality::grade(ExitReason::MomentumLost, 1.4), ExitQuality::Good);
        assert_eq!(ExitQuality::grade(ExitReason::LowPerformance, 1.5), ExitQuality::Bad);
        assert_eq!(ExitQuality::grade(ExitReason::ForceSell, 9.0), ExitQuality::Ungraded);
    }

    #[test]
    fn test_exit_reason_serialization() {
        let json = serde_json::to_string(&ExitReason::MomentumLost).unwrap();
        assert_eq!(json, "\"Momentum Lost + Price Drop\"");
        assert_eq!(ExitReason::ForceSell.to_string(), "Force Sell");
    }
}
