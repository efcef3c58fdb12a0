//! Entry scanner
//!
//! Walks an asset's series over the configured delay window and emits the
//! first index at which enough screening thresholds are exceeded.

use super::params::{EntryParameterSet, NoSellPolicy, ScreeningMetric};
use crate::data::{AssetSeries, Observation};
use crate::error::SimResult;
use crate::scheduler::{UnitOutcome, UnitProcessor, WorkUnit};
use crate::types::{REALISTIC_EXIT_FRACTION, WINDOW_30S};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// 10s buy/sell volume ratio; zero sell volume has no finite ratio
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuySellRatio {
    Ratio(f64),
    NoSells,
}

impl BuySellRatio {
    pub fn from_volumes(buy: f64, sell: f64) -> Self {
        if sell == 0.0 {
            BuySellRatio::NoSells
        } else {
            BuySellRatio::Ratio(buy / sell)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            BuySellRatio::Ratio(r) => Some(*r),
            BuySellRatio::NoSells => None,
        }
    }
}

impl fmt::Display for BuySellRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuySellRatio::Ratio(r) => write!(f, "{:.3}", r),
            BuySellRatio::NoSells => f.write_str("no-sells"),
        }
    }
}

/// Screening metrics evaluated at one candidate index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetrics {
    pub mc_growth_from_start: f64,
    pub holder_growth_from_start: f64,
    /// `None` before the 30s window is filled
    pub holder_delta_30s: Option<f64>,
    pub mc_change_5s: f64,
    /// `None` before the 30s window is filled
    pub mc_change_30s: Option<f64>,
    pub buy_volume_5s: f64,
    pub large_buy_5s: f64,
    pub net_volume_5s: f64,
    pub price_change: f64,
    pub buy_sell_ratio_10s: BuySellRatio,
}

impl EntryMetrics {
    /// Snapshot at row `index`, or `None` past the end of the series
    pub fn at(observations: &[Observation], index: usize) -> Option<Self> {
        let first = observations.first()?;
        let current = observations.get(index)?;

        let mc_growth_from_start = if first.market_cap > 0.0 {
            (current.market_cap / first.market_cap - 1.0) * 100.0
        } else {
            0.0
        };

        let window = index.checked_sub(WINDOW_30S).map(|i| &observations[i]);
        let mc_change_30s = window.map(|past| {
            if past.market_cap > 0.0 {
                (current.market_cap / past.market_cap - 1.0) * 100.0
            } else {
                0.0
            }
        });
        let holder_delta_30s = window.map(|past| current.holders_count - past.holders_count);

        Some(EntryMetrics {
            mc_growth_from_start,
            holder_growth_from_start: current.holders_count - first.holders_count,
            holder_delta_30s,
            mc_change_5s: current.market_cap_change_5s,
            mc_change_30s,
            buy_volume_5s: current.buy_volume_5s,
            large_buy_5s: current.large_buy_5s,
            net_volume_5s: current.net_volume_5s,
            price_change: current.price_change_percent,
            buy_sell_ratio_10s: BuySellRatio::from_volumes(current.buy_volume_10s, current.sell_volume_10s),
        })
    }

    /// Whether `metric` strictly exceeds its threshold
    pub fn exceeds(&self, metric: ScreeningMetric, params: &EntryParameterSet) -> bool {
        let threshold = params.threshold(metric);
        let value = match metric {
            ScreeningMetric::McGrowthFromStart => Some(self.mc_growth_from_start),
            ScreeningMetric::HolderGrowthFromStart => Some(self.holder_growth_from_start),
            ScreeningMetric::HolderDelta30s => self.holder_delta_30s,
            ScreeningMetric::McChange5s => Some(self.mc_change_5s),
            ScreeningMetric::McChange30s => self.mc_change_30s,
            ScreeningMetric::BuyVolume5s => Some(self.buy_volume_5s),
            ScreeningMetric::LargeBuy5s => Some(self.large_buy_5s),
            ScreeningMetric::NetVolume5s => Some(self.net_volume_5s),
            ScreeningMetric::PriceChange => Some(self.price_change),
            ScreeningMetric::BuySellRatio10s => match self.buy_sell_ratio_10s {
                BuySellRatio::Ratio(r) => Some(r),
                BuySellRatio::NoSells => {
                    return params.no_sell_ratio == NoSellPolicy::Satisfied;
                }
            },
        };
        value.map_or(false, |v| v > threshold)
    }

    /// Number of the ten thresholds exceeded
    pub fn passing_count(&self, params: &EntryParameterSet) -> usize {
        ScreeningMetric::ALL
            .iter()
            .filter(|metric| self.exceeds(**metric, params))
            .count()
    }
}

/// Values at the first row of the series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialMetrics {
    pub market_cap: f64,
    pub holders_count: f64,
}

/// A qualifying entry point plus the rows the exit walk needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryOpportunity {
    pub asset_id: String,
    pub entry_time: DateTime<Utc>,
    pub entry_market_cap: f64,
    pub entry_index: usize,
    pub entry_metrics: EntryMetrics,
    pub initial_metrics: InitialMetrics,
    /// Market cap at the early filter offset, if the series reached it
    pub early_market_cap: Option<f64>,
    /// Rows from the entry index (inclusive) to the end of the series
    pub post_entry: Vec<Observation>,
}

/// Upside reached after entry, ignoring any exit rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpportunityReturns {
    pub peak_market_cap: f64,
    pub max_return: f64,
    pub realistic_return: f64,
    pub time_to_peak_secs: f64,
}

impl EntryOpportunity {
    pub fn returns(&self) -> OpportunityReturns {
        let peak = self
            .post_entry
            .iter()
            .enumerate()
            .fold(None::<(usize, f64)>, |best, (i, obs)| match best {
                Some((_, mc)) if mc >= obs.market_cap => best,
                _ => Some((i, obs.market_cap)),
            });

        let Some((peak_index, peak_market_cap)) = peak else {
            return OpportunityReturns {
                peak_market_cap: self.entry_market_cap,
                max_return: 1.0,
                realistic_return: 1.0,
                time_to_peak_secs: 0.0,
            };
        };

        let (max_return, realistic_return) = if self.entry_market_cap > 0.0 {
            (
                peak_market_cap / self.entry_market_cap,
                REALISTIC_EXIT_FRACTION * peak_market_cap / self.entry_market_cap,
            )
        } else {
            (0.0, 0.0)
        };

        let time_to_peak_secs = (self.post_entry[peak_index].timestamp - self.entry_time)
            .num_milliseconds() as f64
            / 1000.0;

        OpportunityReturns {
            peak_market_cap,
            max_return,
            realistic_return,
            time_to_peak_secs,
        }
    }
}

impl WorkUnit for EntryOpportunity {
    fn unit_id(&self) -> String {
        self.asset_id.clone()
    }
}

/// Why a scan ended
#[derive(Debug, Clone, PartialEq)]
pub enum ScanVerdict {
    Opportunity(Box<EntryOpportunity>),
    MissingFields(Vec<String>),
    TooShort { len: usize, required: usize },
    EarlyCapExceeded { market_cap: f64 },
    NoQualifyingDelay,
}

/// Screens asset series against an [`EntryParameterSet`]
#[derive(Debug, Clone)]
pub struct EntryScanner {
    params: EntryParameterSet,
}

impl EntryScanner {
    pub fn new(params: EntryParameterSet) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EntryParameterSet {
        &self.params
    }

    /// At most one opportunity per series
    pub fn scan(&self, series: &AssetSeries) -> Option<EntryOpportunity> {
        match self.evaluate(series) {
            ScanVerdict::Opportunity(opportunity) => Some(*opportunity),
            _ => None,
        }
    }

    /// Scan with the reason for a miss
    pub fn evaluate(&self, series: &AssetSeries) -> ScanVerdict {
        if !series.is_complete() {
            return ScanVerdict::MissingFields(series.missing_required.clone());
        }

        let required = self.params.min_series_len();
        if series.len() < required {
            return ScanVerdict::TooShort {
                len: series.len(),
                required,
            };
        }

        let observations = &series.observations;
        let early_market_cap = observations.get(self.params.early_mc_index).map(|o| o.market_cap);
        if let Some(market_cap) = early_market_cap {
            if market_cap > self.params.early_mc_limit {
                return ScanVerdict::EarlyCapExceeded { market_cap };
            }
        }

        for delay in self.params.min_delay..=self.params.max_delay {
            let Some(metrics) = EntryMetrics::at(observations, delay) else {
                break;
            };
            let passing = metrics.passing_count(&self.params);
            if passing < self.params.quorum {
                continue;
            }

            debug!(
                "🎯 {} qualifies at delay {} ({}/{} thresholds)",
                series.asset_id,
                delay,
                passing,
                ScreeningMetric::ALL.len()
            );
            let entry = &observations[delay];
            return ScanVerdict::Opportunity(Box::new(EntryOpportunity {
                asset_id: series.asset_id.clone(),
                entry_time: entry.timestamp,
                entry_market_cap: entry.market_cap,
                entry_index: delay,
                entry_metrics: metrics,
                initial_metrics: InitialMetrics {
                    market_cap: observations[0].market_cap,
                    holders_count: observations[0].holders_count,
                },
                early_market_cap,
                post_entry: observations[delay..].to_vec(),
            }));
        }

        ScanVerdict::NoQualifyingDelay
    }
}

impl UnitProcessor<Arc<AssetSeries>> for EntryScanner {
    type Output = EntryOpportunity;

    fn process(&self, series: &Arc<AssetSeries>) -> SimResult<UnitOutcome<EntryOpportunity>> {
        Ok(match self.evaluate(series) {
            ScanVerdict::Opportunity(opportunity) => UnitOutcome::Success(*opportunity),
            ScanVerdict::MissingFields(fields) => {
                debug!("{} skipped, missing {:?}", series.asset_id, fields);
                UnitOutcome::Skipped
            }
            ScanVerdict::TooShort { len, required } => {
                debug!("{} skipped, {} rows < {}", series.asset_id, len, required);
                UnitOutcome::Skipped
            }
            ScanVerdict::EarlyCapExceeded { .. } | ScanVerdict::NoQualifyingDelay => UnitOutcome::NoResult,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn flat_series(len: usize, market_cap: f64) -> AssetSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let observations = (0..len)
            .map(|i| {
                let mut obs = Observation::zeroed(start + Duration::seconds(i as i64));
                obs.market_cap = market_cap;
                obs.holders_count = 10.0;
                obs
            })
            .collect();
        AssetSeries::new("flat", observations)
    }

    fn permissive(quorum: usize, min_delay: usize) -> EntryParameterSet {
        let mut params = EntryParameterSet::permissive();
        params.quorum = quorum;
        params.min_delay = min_delay;
        params
    }

    #[test]
    fn test_buy_sell_ratio_sentinel() {
        assert_eq!(BuySellRatio::from_volumes(3.0, 0.0), BuySellRatio::NoSells);
        assert_eq!(BuySellRatio::from_volumes(3.0, 2.0).value(), Some(1.5));
    }

    #[test]
    fn test_no_sell_policy() {
        let series = flat_series(50, 1000.0);
        let metrics = EntryMetrics::at(&series.observations, 40).unwrap();
        let mut params = EntryParameterSet::default();
        assert!(metrics.exceeds(ScreeningMetric::BuySellRatio10s, &params));

        params.no_sell_ratio = NoSellPolicy::Excluded;
        assert!(!metrics.exceeds(ScreeningMetric::BuySellRatio10s, &params));
    }

    #[test]
    fn test_window_metrics_absent_before_30_rows() {
        let series = flat_series(50, 1000.0);
        let early = EntryMetrics::at(&series.observations, 10).unwrap();
        assert_eq!(early.mc_change_30s, None);
        assert_eq!(early.holder_delta_30s, None);

        let params = EntryParameterSet::permissive();
        assert!(!early.exceeds(ScreeningMetric::McChange30s, &params));
        assert_eq!(early.passing_count(&params), 8);

        let later = EntryMetrics::at(&series.observations, 30).unwrap();
        assert_eq!(later.mc_change_30s, Some(0.0));
        assert_eq!(later.passing_count(&params), 10);
    }

    #[test]
    fn test_strict_comparison() {
        let series = flat_series(50, 1000.0);
        let metrics = EntryMetrics::at(&series.observations, 40).unwrap();
        let mut params = EntryParameterSet::default();
        params.buy_volume_5s = 0.0;
        assert!(!metrics.exceeds(ScreeningMetric::BuyVolume5s, &params));
    }

    #[test]
    fn test_early_cap_rejection() {
        let series = flat_series(250, 500_000.0);
        let scanner = EntryScanner::new(permissive(1, 10));
        assert_eq!(
            scanner.evaluate(&series),
            ScanVerdict::EarlyCapExceeded { market_cap: 500_000.0 }
        );
    }

    #[test]
    fn test_too_short_and_missing_fields_skip() {
        let scanner = EntryScanner::new(permissive(1, 10));
        let short = Arc::new(flat_series(100, 1000.0));
        assert!(matches!(scanner.process(&short).unwrap(), UnitOutcome::Skipped));

        let mut incomplete = flat_series(250, 1000.0);
        incomplete.missing_required = vec!["marketCap".to_string()];
        assert!(matches!(
            scanner.process(&Arc::new(incomplete)).unwrap(),
            UnitOutcome::Skipped
        ));
    }

    #[test]
    fn test_opportunity_fields() {
        let series = flat_series(250, 1000.0);
        let scanner = EntryScanner::new(permissive(1, 10));
        let opportunity = scanner.scan(&series).unwrap();

        assert_eq!(opportunity.entry_index, 10);
        assert_eq!(opportunity.post_entry.len(), 240);
        assert_eq!(opportunity.initial_metrics.market_cap, 1000.0);
        assert_eq!(opportunity.early_market_cap, Some(1000.0));
        assert_eq!(opportunity.unit_id(), "flat");
    }

    #[test]
    fn test_returns() {
        let mut series = flat_series(250, 1000.0);
        series.observations[100].market_cap = 3000.0;
        let scanner = EntryScanner::new(permissive(1, 10));
        let returns = scanner.scan(&series).unwrap().returns();

        assert_eq!(returns.peak_market_cap, 3000.0);
        assert!((returns.max_return - 3.0).abs() < 1e-9);
        assert!((returns.realistic_return - 2.4).abs() < 1e-9);
        assert_eq!(returns.time_to_peak_secs, 90.0);
    }

    #[test]
    fn test_returns_without_post_entry_rows() {
        let series = flat_series(250, 1000.0);
        let mut opportunity = EntryScanner::new(permissive(1, 10)).scan(&series).unwrap();
        opportunity.post_entry.clear();
        let returns = opportunity.returns();
        assert_eq!(returns.max_return, 1.0);
        assert_eq!(returns.realistic_return, 1.0);
    }
}
