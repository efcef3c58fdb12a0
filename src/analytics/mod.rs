// Performance analytics over simulated trades and raw entry opportunities

use crate::simulation::{EntryOpportunity, ExitQuality, ExitReason, TradeOutcome};
use crate::types::{OPPORTUNITY_SATURATION, OPPORTUNITY_SCORE_SCALE};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

pub mod export;
pub mod report;

pub use export::{write_json, write_opportunities_csv, write_trades_csv};
pub use report::{render_report, write_report};

/// Weight of the average realistic return in the weighted score
const REALISTIC_WEIGHT: f64 = 0.7;
/// Weight of the saturating opportunity count in the weighted score
const OPPORTUNITY_WEIGHT: f64 = 0.3;

const UNDER_1_8X: f64 = 1.8;
const OVER_3X: f64 = 3.0;
const OVER_6X: f64 = 6.0;

/// Anything the aggregator can summarize
pub trait ReturnSample {
    /// Return multiple (1.0 = break even)
    fn return_multiple(&self) -> f64;

    fn realistic_return(&self) -> f64;

    /// Seconds from entry to exit (or to the peak for opportunities)
    fn holding_secs(&self) -> f64;

    fn exit_reason(&self) -> Option<ExitReason> {
        None
    }

    fn exit_quality(&self) -> Option<ExitQuality> {
        None
    }

    /// One line for the report's detail section
    fn detail_line(&self) -> String {
        format!("{:.2}x", self.return_multiple())
    }
}

impl ReturnSample for TradeOutcome {
    fn return_multiple(&self) -> f64 {
        self.profit_ratio
    }

    fn realistic_return(&self) -> f64 {
        TradeOutcome::realistic_return(self)
    }

    fn holding_secs(&self) -> f64 {
        self.trade_duration_secs
    }

    fn exit_reason(&self) -> Option<ExitReason> {
        Some(self.exit_reason)
    }

    fn exit_quality(&self) -> Option<ExitQuality> {
        Some(self.exit_quality)
    }

    fn detail_line(&self) -> String {
        format!(
            "{} | {} -> {} | {:.3}x (max {:.3}x, post-exit {:.3}x) | {} | {:.0}s | {:?}",
            self.asset_id,
            self.entry_time.format("%Y-%m-%d %H:%M:%S"),
            self.exit_time.format("%H:%M:%S"),
            self.profit_ratio,
            self.max_profit_ratio,
            self.post_exit_max_ratio,
            self.exit_reason,
            self.trade_duration_secs,
            self.exit_quality,
        )
    }
}

impl ReturnSample for EntryOpportunity {
    fn return_multiple(&self) -> f64 {
        self.returns().max_return
    }

    fn realistic_return(&self) -> f64 {
        self.returns().realistic_return
    }

    fn holding_secs(&self) -> f64 {
        self.returns().time_to_peak_secs
    }

    fn detail_line(&self) -> String {
        let returns = self.returns();
        format!(
            "{} | entry {} @ {:.0} (delay {}) | peak {:.0} | {:.3}x (realistic {:.3}x) | {:.0}s to peak",
            self.asset_id,
            self.entry_time.format("%Y-%m-%d %H:%M:%S"),
            self.entry_market_cap,
            self.entry_index,
            returns.peak_market_cap,
            returns.max_return,
            returns.realistic_return,
            returns.time_to_peak_secs,
        )
    }
}

/// Histogram of return multiples
///
/// Buckets: `<1x`, `1-1.8x`, `1.8-3x`, one per whole multiple from 3x to
/// 10x, and `>=10x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnBuckets {
    pub labels: Vec<String>,
    pub counts: Vec<usize>,
    pub percentages: Vec<f64>,
}

impl ReturnBuckets {
    pub const COUNT: usize = 11;

    pub fn labels() -> Vec<String> {
        let mut labels = vec!["<1x".to_string(), "1-1.8x".to_string(), "1.8-3x".to_string()];
        for lower in 3..10 {
            labels.push(format!("{}-{}x", lower, lower + 1));
        }
        labels.push(">=10x".to_string());
        labels
    }

    pub fn bucket_of(multiple: f64) -> usize {
        if multiple < 1.0 {
            0
        } else if multiple < UNDER_1_8X {
            1
        } else if multiple < OVER_3X {
            2
        } else if multiple < 10.0 {
            3 + (multiple - OVER_3X).floor() as usize
        } else {
            Self::COUNT - 1
        }
    }

    pub fn from_multiples(multiples: &[f64]) -> Self {
        let mut counts = vec![0usize; Self::COUNT];
        for &m in multiples {
            counts[Self::bucket_of(m)] += 1;
        }
        let total = multiples.len();
        let percentages = counts.iter().map(|&c| percentage(c, total)).collect();

        Self {
            labels: Self::labels(),
            counts,
            percentages,
        }
    }

    /// Label, count and percentage per bucket
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize, f64)> {
        self.labels
            .iter()
            .zip(self.counts.iter())
            .zip(self.percentages.iter())
            .map(|((label, count), pct)| (label.as_str(), *count, *pct))
    }
}

/// Statistics for trades that ended with one exit reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonBreakdown {
    pub reason: ExitReason,
    pub count: usize,
    pub percentage: f64,
    pub profitable: usize,
    pub losing: usize,
    pub total_profit: f64,
    pub avg_profit: f64,
    pub best: f64,
    pub worst: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityCounts {
    pub good: usize,
    pub bad: usize,
    pub ungraded: usize,
}

/// Aggregate performance of a set of samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub count: usize,
    pub winners: usize,
    pub losers: usize,
    pub win_rate_pct: f64,
    pub total_return: f64,
    pub avg_return: f64,
    pub total_realistic_return: f64,
    pub avg_realistic_return: f64,
    /// Sum of `return - 1` in stake units
    pub total_profit: f64,
    pub avg_profit: f64,
    pub over_3x: usize,
    pub over_6x: usize,
    pub under_1_8x: usize,
    /// `over_3x / under_1_8x`; `None` when nothing is under 1.8x
    pub over_3x_to_under_1_8x: Option<f64>,
    pub buckets: ReturnBuckets,
    pub max_drawdown: f64,
    pub avg_holding_secs: f64,
    /// Only reasons that occurred, in [`ExitReason::ALL`] order
    pub exit_reasons: Vec<ReasonBreakdown>,
    pub quality: QualityCounts,
    pub weighted_return: f64,
}

impl PerformanceSummary {
    fn empty() -> Self {
        Self {
            count: 0,
            winners: 0,
            losers: 0,
            win_rate_pct: 0.0,
            total_return: 0.0,
            avg_return: 0.0,
            total_realistic_return: 0.0,
            avg_realistic_return: 0.0,
            total_profit: 0.0,
            avg_profit: 0.0,
            over_3x: 0,
            over_6x: 0,
            under_1_8x: 0,
            over_3x_to_under_1_8x: None,
            buckets: ReturnBuckets::from_multiples(&[]),
            max_drawdown: 0.0,
            avg_holding_secs: 0.0,
            exit_reasons: Vec::new(),
            quality: QualityCounts::default(),
            weighted_return: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn reason(&self, reason: ExitReason) -> Option<&ReasonBreakdown> {
        self.exit_reasons.iter().find(|b| b.reason == reason)
    }
}

/// Summarize samples in the order given
pub fn summarize<S: ReturnSample>(samples: &[S]) -> PerformanceSummary {
    if samples.is_empty() {
        return PerformanceSummary::empty();
    }

    let n = samples.len();
    let returns: Array1<f64> = samples.iter().map(|s| s.return_multiple()).collect();
    let realistic: Array1<f64> = samples.iter().map(|s| s.realistic_return()).collect();
    let holding: Array1<f64> = samples.iter().map(|s| s.holding_secs()).collect();
    let profits = returns.mapv(|r| r - 1.0);

    let winners = returns.iter().filter(|&&r| r > 1.0).count();
    let over_3x = returns.iter().filter(|&&r| r >= OVER_3X).count();
    let over_6x = returns.iter().filter(|&&r| r >= OVER_6X).count();
    let under_1_8x = returns.iter().filter(|&&r| r < UNDER_1_8X).count();
    let over_3x_to_under_1_8x = if under_1_8x > 0 {
        Some(over_3x as f64 / under_1_8x as f64)
    } else {
        None
    };

    let avg_realistic_return = realistic.sum() / n as f64;

    PerformanceSummary {
        count: n,
        winners,
        losers: n - winners,
        win_rate_pct: percentage(winners, n),
        total_return: returns.sum(),
        avg_return: returns.sum() / n as f64,
        total_realistic_return: realistic.sum(),
        avg_realistic_return,
        total_profit: profits.sum(),
        avg_profit: profits.sum() / n as f64,
        over_3x,
        over_6x,
        under_1_8x,
        over_3x_to_under_1_8x,
        buckets: ReturnBuckets::from_multiples(returns.as_slice().unwrap_or(&[])),
        max_drawdown: max_drawdown(&profits),
        avg_holding_secs: holding.sum() / n as f64,
        exit_reasons: reason_breakdown(samples),
        quality: quality_counts(samples),
        weighted_return: weighted_return(avg_realistic_return, n),
    }
}

/// `0.7 × avg_realistic + 0.3 × min(n / 100, 1) × 10`
pub fn weighted_return(avg_realistic_return: f64, sample_count: usize) -> f64 {
    let saturation = (sample_count as f64 / OPPORTUNITY_SATURATION).min(1.0);
    REALISTIC_WEIGHT * avg_realistic_return + OPPORTUNITY_WEIGHT * saturation * OPPORTUNITY_SCORE_SCALE
}

/// Largest fall of the cumulative profit curve from its running peak
///
/// The peak starts at zero, so an opening loss counts as drawdown.
pub fn max_drawdown(profits: &Array1<f64>) -> f64 {
    let mut cumulative = 0.0;
    let mut peak = 0.0_f64;
    let mut worst = 0.0_f64;
    for p in profits.iter() {
        cumulative += p;
        peak = peak.max(cumulative);
        worst = worst.max(peak - cumulative);
    }
    worst
}

fn reason_breakdown<S: ReturnSample>(samples: &[S]) -> Vec<ReasonBreakdown> {
    let total = samples.len();
    ExitReason::ALL
        .iter()
        .filter_map(|&reason| {
            let returns: Vec<f64> = samples
                .iter()
                .filter(|s| s.exit_reason() == Some(reason))
                .map(|s| s.return_multiple())
                .collect();
            if returns.is_empty() {
                return None;
            }

            let count = returns.len();
            let profitable = returns.iter().filter(|&&r| r > 1.0).count();
            let total_profit: f64 = returns.iter().map(|r| r - 1.0).sum();
            Some(ReasonBreakdown {
                reason,
                count,
                percentage: percentage(count, total),
                profitable,
                losing: count - profitable,
                total_profit,
                avg_profit: total_profit / count as f64,
                best: returns.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                worst: returns.iter().copied().fold(f64::INFINITY, f64::min),
            })
        })
        .collect()
}

fn quality_counts<S: ReturnSample>(samples: &[S]) -> QualityCounts {
    let mut counts = QualityCounts::default();
    for quality in samples.iter().filter_map(|s| s.exit_quality()) {
        match quality {
            ExitQuality::Good => counts.good += 1,
            ExitQuality::Bad => counts.bad += 1,
            ExitQuality::Ungraded => counts.ungraded += 1,
        }
    }
    counts
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
