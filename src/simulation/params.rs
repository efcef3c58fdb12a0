//! Typed strategy parameters for both simulation phases

use crate::error::{SimResult, SimulationError};
use crate::types::{EARLY_MC_INDEX, EARLY_MC_LIMIT};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Threshold used by [`EntryParameterSet::permissive`]; every metric exceeds it
pub const PERMISSIVE_THRESHOLD: f64 = -999.0;

/// The ten screening metrics evaluated by the entry scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningMetric {
    McGrowthFromStart,
    HolderGrowthFromStart,
    HolderDelta30s,
    McChange5s,
    McChange30s,
    BuyVolume5s,
    LargeBuy5s,
    NetVolume5s,
    PriceChange,
    BuySellRatio10s,
}

impl ScreeningMetric {
    pub const ALL: [ScreeningMetric; 10] = [
        ScreeningMetric::McGrowthFromStart,
        ScreeningMetric::HolderGrowthFromStart,
        ScreeningMetric::HolderDelta30s,
        ScreeningMetric::McChange5s,
        ScreeningMetric::McChange30s,
        ScreeningMetric::BuyVolume5s,
        ScreeningMetric::LargeBuy5s,
        ScreeningMetric::NetVolume5s,
        ScreeningMetric::PriceChange,
        ScreeningMetric::BuySellRatio10s,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScreeningMetric::McGrowthFromStart => "mc_growth_from_start",
            ScreeningMetric::HolderGrowthFromStart => "holder_growth_from_start",
            ScreeningMetric::HolderDelta30s => "holder_delta_30s",
            ScreeningMetric::McChange5s => "mc_change_5s",
            ScreeningMetric::McChange30s => "mc_change_30s",
            ScreeningMetric::BuyVolume5s => "buy_volume_5s",
            ScreeningMetric::LargeBuy5s => "large_buy_5s",
            ScreeningMetric::NetVolume5s => "net_volume_5s",
            ScreeningMetric::PriceChange => "price_change",
            ScreeningMetric::BuySellRatio10s => "buy_sell_ratio_10s",
        }
    }
}

impl fmt::Display for ScreeningMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a buy/sell ratio with zero sell volume compares against its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoSellPolicy {
    /// No sells at all counts as exceeding any threshold
    #[default]
    Satisfied,
    /// The metric is left out of the quorum count
    Excluded,
}

fn default_price_change() -> f64 { 1.0 }
fn default_mc_change_5s() -> f64 { 5.0 }
fn default_mc_change_30s() -> f64 { 10.0 }
fn default_holder_delta_30s() -> f64 { 20.0 }
fn default_buy_volume_5s() -> f64 { 5.0 }
fn default_net_volume_5s() -> f64 { 0.0 }
fn default_buy_sell_ratio_10s() -> f64 { 1.5 }
fn default_mc_growth_from_start() -> f64 { 10.0 }
fn default_holder_growth_from_start() -> f64 { 20.0 }
fn default_large_buy_5s() -> f64 { 1.0 }
fn default_quorum() -> usize { 7 }
fn default_min_delay() -> usize { 60 }
fn default_max_delay() -> usize { 200 }
fn default_exit_lookahead() -> usize { 10 }
fn default_early_mc_index() -> usize { EARLY_MC_INDEX }
fn default_early_mc_limit() -> f64 { EARLY_MC_LIMIT }

/// Entry screening thresholds plus the scan window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryParameterSet {
    #[serde(default = "default_price_change")]
    pub price_change: f64,
    #[serde(default = "default_mc_change_5s")]
    pub mc_change_5s: f64,
    #[serde(default = "default_mc_change_30s")]
    pub mc_change_30s: f64,
    #[serde(default = "default_holder_delta_30s")]
    pub holder_delta_30s: f64,
    #[serde(default = "default_buy_volume_5s")]
    pub buy_volume_5s: f64,
    #[serde(default = "default_net_volume_5s")]
    pub net_volume_5s: f64,
    #[serde(default = "default_buy_sell_ratio_10s")]
    pub buy_sell_ratio_10s: f64,
    #[serde(default = "default_mc_growth_from_start")]
    pub mc_growth_from_start: f64,
    #[serde(default = "default_holder_growth_from_start")]
    pub holder_growth_from_start: f64,
    #[serde(default = "default_large_buy_5s")]
    pub large_buy_5s: f64,

    /// How many of the ten thresholds must be exceeded
    #[serde(default = "default_quorum")]
    pub quorum: usize,
    #[serde(default = "default_min_delay")]
    pub min_delay: usize,
    #[serde(default = "default_max_delay")]
    pub max_delay: usize,
    /// Rows required past `max_delay` before an asset is scanned at all
    #[serde(default = "default_exit_lookahead")]
    pub exit_lookahead: usize,
    #[serde(default = "default_early_mc_index")]
    pub early_mc_index: usize,
    #[serde(default = "default_early_mc_limit")]
    pub early_mc_limit: f64,
    #[serde(default)]
    pub no_sell_ratio: NoSellPolicy,
}

impl Default for EntryParameterSet {
    fn default() -> Self {
        Self {
            price_change: default_price_change(),
            mc_change_5s: default_mc_change_5s(),
            mc_change_30s: default_mc_change_30s(),
            holder_delta_30s: default_holder_delta_30s(),
            buy_volume_5s: default_buy_volume_5s(),
            net_volume_5s: default_net_volume_5s(),
            buy_sell_ratio_10s: default_buy_sell_ratio_10s(),
            mc_growth_from_start: default_mc_growth_from_start(),
            holder_growth_from_start: default_holder_growth_from_start(),
            large_buy_5s: default_large_buy_5s(),
            quorum: default_quorum(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            exit_lookahead: default_exit_lookahead(),
            early_mc_index: default_early_mc_index(),
            early_mc_limit: default_early_mc_limit(),
            no_sell_ratio: NoSellPolicy::default(),
        }
    }
}

impl EntryParameterSet {
    /// Every threshold at -999, so every present metric passes
    pub fn permissive() -> Self {
        let mut params = Self::default();
        for metric in ScreeningMetric::ALL {
            *params.threshold_mut(metric) = PERMISSIVE_THRESHOLD;
        }
        params
    }

    pub fn threshold(&self, metric: ScreeningMetric) -> f64 {
        match metric {
            ScreeningMetric::McGrowthFromStart => self.mc_growth_from_start,
            ScreeningMetric::HolderGrowthFromStart => self.holder_growth_from_start,
            ScreeningMetric::HolderDelta30s => self.holder_delta_30s,
            ScreeningMetric::McChange5s => self.mc_change_5s,
            ScreeningMetric::McChange30s => self.mc_change_30s,
            ScreeningMetric::BuyVolume5s => self.buy_volume_5s,
            ScreeningMetric::LargeBuy5s => self.large_buy_5s,
            ScreeningMetric::NetVolume5s => self.net_volume_5s,
            ScreeningMetric::PriceChange => self.price_change,
            ScreeningMetric::BuySellRatio10s => self.buy_sell_ratio_10s,
        }
    }

    fn threshold_mut(&mut self, metric: ScreeningMetric) -> &mut f64 {
        match metric {
            ScreeningMetric::McGrowthFromStart => &mut self.mc_growth_from_start,
            ScreeningMetric::HolderGrowthFromStart => &mut self.holder_growth_from_start,
            ScreeningMetric::HolderDelta30s => &mut self.holder_delta_30s,
            ScreeningMetric::McChange5s => &mut self.mc_change_5s,
            ScreeningMetric::McChange30s => &mut self.mc_change_30s,
            ScreeningMetric::BuyVolume5s => &mut self.buy_volume_5s,
            ScreeningMetric::LargeBuy5s => &mut self.large_buy_5s,
            ScreeningMetric::NetVolume5s => &mut self.net_volume_5s,
            ScreeningMetric::PriceChange => &mut self.price_change,
            ScreeningMetric::BuySellRatio10s => &mut self.buy_sell_ratio_10s,
        }
    }

    /// Shortest series the scanner will look at
    pub fn min_series_len(&self) -> usize {
        self.max_delay.max(self.min_delay) + self.exit_lookahead
    }

    /// Set a field by name; used by the grid sweep
    pub fn set(&mut self, name: &str, value: f64) -> SimResult<()> {
        if let Some(metric) = ScreeningMetric::ALL.iter().find(|m| m.name() == name) {
            *self.threshold_mut(*metric) = value;
            return Ok(());
        }
        match name {
            "quorum" => self.quorum = as_count(name, value)?,
            "min_delay" => self.min_delay = as_count(name, value)?,
            "max_delay" => self.max_delay = as_count(name, value)?,
            "exit_lookahead" => self.exit_lookahead = as_count(name, value)?,
            "early_mc_index" => self.early_mc_index = as_count(name, value)?,
            "early_mc_limit" => self.early_mc_limit = value,
            _ => return Err(SimulationError::UnknownParameter(name.to_string())),
        }
        Ok(())
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.quorum == 0 || self.quorum > ScreeningMetric::ALL.len() {
            return Err(SimulationError::InvalidParameter(
                "quorum".to_string(),
                format!("must be between 1 and {}", ScreeningMetric::ALL.len()),
            ));
        }
        if self.min_delay > self.max_delay {
            return Err(SimulationError::InvalidParameter(
                "min_delay".to_string(),
                format!("{} is greater than max_delay {}", self.min_delay, self.max_delay),
            ));
        }
        for metric in ScreeningMetric::ALL {
            if self.threshold(metric).is_nan() {
                return Err(SimulationError::InvalidParameter(
                    metric.name().to_string(),
                    "threshold is NaN".to_string(),
                ));
            }
        }
        if self.early_mc_limit <= 0.0 {
            return Err(SimulationError::InvalidParameter(
                "early_mc_limit".to_string(),
                "must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn as_count(name: &str, value: f64) -> SimResult<usize> {
    if value < 0.0 || value.fract() != 0.0 || !value.is_finite() {
        return Err(SimulationError::InvalidParameter(
            name.to_string(),
            format!("{} is not a non-negative integer", value),
        ));
    }
    Ok(value as usize)
}

fn default_holder_growth_30s_strong() -> f64 { 10.0 }
fn default_holder_growth_60s_strong() -> f64 { 50.0 }
fn default_holder_growth_30s_moderate() -> f64 { 20.0 }
fn default_holder_growth_60s_moderate() -> f64 { 30.0 }
fn default_buy_volume_moderate() -> f64 { 15.0 }

/// Holder-growth and volume levels that veto a stop-loss exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopLossOverride {
    #[serde(default = "default_holder_growth_30s_strong")]
    pub holder_growth_30s_strong: f64,
    #[serde(default = "default_holder_growth_60s_strong")]
    pub holder_growth_60s_strong: f64,
    #[serde(default = "default_holder_growth_30s_moderate")]
    pub holder_growth_30s_moderate: f64,
    #[serde(default = "default_holder_growth_60s_moderate")]
    pub holder_growth_60s_moderate: f64,
    /// Buy volume floor shared by both override variants
    #[serde(default = "default_buy_volume_moderate")]
    pub buy_volume_moderate: f64,
}

impl Default for StopLossOverride {
    fn default() -> Self {
        Self {
            holder_growth_30s_strong: default_holder_growth_30s_strong(),
            holder_growth_60s_strong: default_holder_growth_60s_strong(),
            holder_growth_30s_moderate: default_holder_growth_30s_moderate(),
            holder_growth_60s_moderate: default_holder_growth_60s_moderate(),
            buy_volume_moderate: default_buy_volume_moderate(),
        }
    }
}

impl StopLossOverride {
    fn set(&mut self, name: &str, value: f64) -> SimResult<()> {
        match name {
            "holder_growth_30s_strong" => self.holder_growth_30s_strong = value,
            "holder_growth_60s_strong" => self.holder_growth_60s_strong = value,
            "holder_growth_30s_moderate" => self.holder_growth_30s_moderate = value,
            "holder_growth_60s_moderate" => self.holder_growth_60s_moderate = value,
            "buy_volume_moderate" => self.buy_volume_moderate = value,
            _ => {
                return Err(SimulationError::UnknownParameter(format!(
                    "exit.stop_loss_override.{}",
                    name
                )))
            }
        }
        Ok(())
    }
}

fn default_mc_change_threshold() -> f64 { 6.0 }
fn default_holder_change_threshold() -> f64 { 24.5 }
fn default_buy_volume_threshold() -> f64 { 13.0 }
fn default_net_volume_threshold() -> f64 { 3.0 }
fn default_required_strong() -> usize { 1 }
fn default_low_performance_holder_growth() -> f64 { 0.0 }

/// Momentum thresholds checked while above take-profit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MomentumParameterSet {
    #[serde(default = "default_mc_change_threshold")]
    pub mc_change_threshold: f64,
    #[serde(default = "default_holder_change_threshold")]
    pub holder_change_threshold: f64,
    #[serde(default = "default_buy_volume_threshold")]
    pub buy_volume_threshold: f64,
    #[serde(default = "default_net_volume_threshold")]
    pub net_volume_threshold: f64,
    /// Signals needed for momentum to count as strong
    #[serde(default = "default_required_strong")]
    pub required_strong: usize,
    /// 30s holder growth below which a flat trade is cut
    #[serde(default = "default_low_performance_holder_growth")]
    pub low_performance_holder_growth: f64,
}

impl Default for MomentumParameterSet {
    fn default() -> Self {
        Self {
            mc_change_threshold: default_mc_change_threshold(),
            holder_change_threshold: default_holder_change_threshold(),
            buy_volume_threshold: default_buy_volume_threshold(),
            net_volume_threshold: default_net_volume_threshold(),
            required_strong: default_required_strong(),
            low_performance_holder_growth: default_low_performance_holder_growth(),
        }
    }
}

impl MomentumParameterSet {
    fn set(&mut self, name: &str, value: f64) -> SimResult<()> {
        match name {
            "mc_change_threshold" => self.mc_change_threshold = value,
            "holder_change_threshold" => self.holder_change_threshold = value,
            "buy_volume_threshold" => self.buy_volume_threshold = value,
            "net_volume_threshold" => self.net_volume_threshold = value,
            "required_strong" => self.required_strong = as_count(name, value)?,
            "low_performance_holder_growth" => self.low_performance_holder_growth = value,
            _ => {
                return Err(SimulationError::UnknownParameter(format!(
                    "exit.momentum.{}",
                    name
                )))
            }
        }
        Ok(())
    }
}

fn default_initial_investment() -> f64 { 1.0 }
fn default_take_profit() -> f64 { 1.9 }
fn default_stop_loss() -> f64 { 0.65 }
fn default_trailing_stop() -> f64 { 0.9 }

/// Exit rules applied by the exit state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExitPolicy {
    #[serde(default = "default_initial_investment")]
    pub initial_investment: f64,
    #[serde(default = "default_take_profit")]
    pub take_profit: f64,
    #[serde(default = "default_stop_loss")]
    pub stop_loss: f64,
    /// Fraction of the running peak price that triggers the trailing exit
    #[serde(default = "default_trailing_stop")]
    pub trailing_stop: f64,
    #[serde(default)]
    pub stop_loss_override: StopLossOverride,
    #[serde(default)]
    pub momentum: MomentumParameterSet,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self {
            initial_investment: default_initial_investment(),
            take_profit: default_take_profit(),
            stop_loss: default_stop_loss(),
            trailing_stop: default_trailing_stop(),
            stop_loss_override: StopLossOverride::default(),
            momentum: MomentumParameterSet::default(),
        }
    }
}

impl ExitPolicy {
    /// Set a field by dotted name relative to the policy
    pub fn set(&mut self, name: &str, value: f64) -> SimResult<()> {
        if let Some(rest) = name.strip_prefix("momentum.") {
            return self.momentum.set(rest, value);
        }
        if let Some(rest) = name.strip_prefix("stop_loss_override.") {
            return self.stop_loss_override.set(rest, value);
        }
        match name {
            "initial_investment" => self.initial_investment = value,
            "take_profit" => self.take_profit = value,
            "stop_loss" => self.stop_loss = value,
            "trailing_stop" => self.trailing_stop = value,
            _ => return Err(SimulationError::UnknownParameter(format!("exit.{}", name))),
        }
        Ok(())
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.initial_investment <= 0.0 {
            return Err(SimulationError::InvalidParameter(
                "initial_investment".to_string(),
                "must be positive".to_string(),
            ));
        }
        if !(self.stop_loss > 0.0 && self.stop_loss < 1.0) {
            return Err(SimulationError::InvalidParameter(
                "stop_loss".to_string(),
                format!("{} is outside (0, 1)", self.stop_loss),
            ));
        }
        if self.take_profit <= 1.0 {
            return Err(SimulationError::InvalidParameter(
                "take_profit".to_string(),
                format!("{} must be above 1.0", self.take_profit),
            ));
        }
        if !(self.trailing_stop > 0.0 && self.trailing_stop <= 1.0) {
            return Err(SimulationError::InvalidParameter(
                "trailing_stop".to_string(),
                format!("{} is outside (0, 1]", self.trailing_stop),
            ));
        }
        if self.momentum.required_strong > 4 {
            return Err(SimulationError::InvalidParameter(
                "momentum.required_strong".to_string(),
                "at most 4 momentum signals exist".to_string(),
            ));
        }
        Ok(())
    }
}

/// Both phases' parameters; one grid-sweep combination resolves to one of these
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyParameters {
    #[serde(default)]
    pub entry: EntryParameterSet,
    #[serde(default)]
    pub exit: ExitPolicy,
}

impl StrategyParameters {
    pub fn new(entry: EntryParameterSet, exit: ExitPolicy) -> Self {
        Self { entry, exit }
    }

    /// Set a parameter addressed as `<entry field>`, `entry.<field>` or `exit.<path>`
    pub fn set(&mut self, name: &str, value: f64) -> SimResult<()> {
        if let Some(rest) = name.strip_prefix("exit.") {
            self.exit.set(rest, value)
        } else {
            self.entry.set(name.strip_prefix("entry.").unwrap_or(name), value)
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        self.entry.validate()?;
        self.exit.validate()
    }

    /// Stable short hash of the parameters, used to key checkpoints
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }
}

/// 16 hex digit hash of a value's JSON encoding
pub fn fingerprint_of<T: Serialize + ?Sized>(value: &T) -> String {
    let encoded = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    encoded.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Merge a JSON object of overrides onto a serializable parameter set
pub fn merge_json_overrides<T>(base: &T, overrides: &str) -> SimResult<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let patch: serde_json::Value = serde_json::from_str(overrides)?;
    let mut value = serde_json::to_value(base)?;
    merge_values(&mut value, patch);
    Ok(serde_json::from_value(value)?)
}

fn merge_values(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_values(existing, value)
                    }
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_defaults() {
        let params = EntryParameterSet::default();
        assert_eq!(params.quorum, 7);
        assert_eq!(params.min_delay, 60);
        assert_eq!(params.max_delay, 200);
        assert_eq!(params.early_mc_limit, 400_000.0);
        assert_eq!(params.min_series_len(), 210);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_permissive_sets_all_thresholds() {
        let params = EntryParameterSet::permissive();
        for metric in ScreeningMetric::ALL {
            assert_eq!(params.threshold(metric), PERMISSIVE_THRESHOLD);
        }
    }

    #[test]
    fn test_set_by_name() {
        let mut params = StrategyParameters::default();
        params.set("holder_delta_30s", 40.0).unwrap();
        params.set("entry.quorum", 5.0).unwrap();
        params.set("exit.take_profit", 2.5).unwrap();
        params.set("exit.momentum.required_strong", 2.0).unwrap();
        params.set("exit.stop_loss_override.buy_volume_moderate", 20.0).unwrap();

        assert_eq!(params.entry.holder_delta_30s, 40.0);
        assert_eq!(params.entry.quorum, 5);
        assert_eq!(params.exit.take_profit, 2.5);
        assert_eq!(params.exit.momentum.required_strong, 2);
        assert_eq!(params.exit.stop_loss_override.buy_volume_moderate, 20.0);
    }

    #[test]
    fn test_set_rejects_unknown_and_fractional_counts() {
        let mut params = StrategyParameters::default();
        assert!(matches!(
            params.set("nonsense", 1.0),
            Err(SimulationError::UnknownParameter(_))
        ));
        assert!(matches!(
            params.set("exit.momentum.bogus", 1.0),
            Err(SimulationError::UnknownParameter(_))
        ));
        assert!(matches!(
            params.set("quorum", 2.5),
            Err(SimulationError::InvalidParameter(_, _))
        ));
    }

    #[test]
    fn test_validation() {
        let mut entry = EntryParameterSet::default();
        entry.quorum = 11;
        assert!(entry.validate().is_err());

        let mut entry = EntryParameterSet::default();
        entry.min_delay = 300;
        assert!(entry.validate().is_err());

        let mut exit = ExitPolicy::default();
        exit.stop_loss = 1.2;
        assert!(exit.validate().is_err());
        assert!(ExitPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_json_overrides() {
        let base = ExitPolicy::default();
        let merged = merge_json_overrides(&base, r#"{"take_profit": 3.0, "momentum": {"required_strong": 2}}"#)
            .unwrap();
        assert_eq!(merged.take_profit, 3.0);
        assert_eq!(merged.momentum.required_strong, 2);
        assert_eq!(merged.momentum.mc_change_threshold, 6.0);

        let rejected = merge_json_overrides(&base, r#"{"takeprofit": 3.0}"#);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_fingerprint_changes_with_params() {
        let a = StrategyParameters::default();
        let mut b = StrategyParameters::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.set("holder_delta_30s", 33.0).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
