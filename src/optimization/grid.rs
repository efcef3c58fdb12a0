// Parameter space and cross-product enumeration for grid sweeps

use crate::error::{SimResult, SimulationError};
use crate::simulation::{StrategyParameters, PERMISSIVE_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parameter either held fixed or swept over candidate values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValues {
    Fixed(f64),
    Sweep(Vec<f64>),
}

impl ParamValues {
    pub fn candidates(&self) -> Vec<f64> {
        match self {
            ParamValues::Fixed(v) => vec![*v],
            ParamValues::Sweep(values) => values.clone(),
        }
    }

    pub fn is_swept(&self) -> bool {
        matches!(self, ParamValues::Sweep(_))
    }
}

/// The sweep used when `[sweep.parameters]` is not configured
pub fn default_sweep_space() -> BTreeMap<String, ParamValues> {
    BTreeMap::from([
        ("holder_delta_30s".to_string(), ParamValues::Sweep(vec![10.0, 20.0, 30.0, 40.0])),
        ("large_buy_5s".to_string(), ParamValues::Sweep(vec![0.0, 1.0, 2.0])),
        ("net_volume_5s".to_string(), ParamValues::Sweep(vec![0.0])),
        ("price_change".to_string(), ParamValues::Fixed(1.0)),
        ("mc_change_30s".to_string(), ParamValues::Fixed(10.0)),
        ("buy_sell_ratio_10s".to_string(), ParamValues::Fixed(PERMISSIVE_THRESHOLD)),
        ("mc_growth_from_start".to_string(), ParamValues::Fixed(10.0)),
        ("holder_growth_from_start".to_string(), ParamValues::Fixed(20.0)),
        ("buy_volume_5s".to_string(), ParamValues::Fixed(0.0)),
    ])
}

/// One point of the grid: every parameter resolved to a single value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterCombination {
    pub values: BTreeMap<String, f64>,
}

impl ParameterCombination {
    /// `name=value` pairs in name order, e.g. `holder_delta_30s=20,large_buy_5s=1`
    pub fn key(&self) -> String {
        self.values
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Apply onto a copy of `base`
    pub fn apply(&self, base: &StrategyParameters) -> SimResult<StrategyParameters> {
        let mut params = base.clone();
        for (name, value) in &self.values {
            params.set(name, *value)?;
        }
        Ok(params)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    parameters: BTreeMap<String, ParamValues>,
}

impl ParameterSpace {
    pub fn new(parameters: BTreeMap<String, ParamValues>) -> Self {
        Self { parameters }
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamValues> {
        &self.parameters
    }

    /// Names of the parameters that actually vary
    pub fn swept_names(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|(_, values)| values.is_swept())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn combination_count(&self) -> usize {
        self.parameters
            .values()
            .map(|values| values.candidates().len())
            .product()
    }

    /// Reject empty candidate lists, unknown names and combinations that
    /// produce invalid parameters
    pub fn validate(&self, base: &StrategyParameters) -> SimResult<()> {
        for (name, values) in &self.parameters {
            if values.candidates().is_empty() {
                return Err(SimulationError::InvalidParameter(
                    name.clone(),
                    "sweep list is empty".to_string(),
                ));
            }
        }

        for combination in self.combinations() {
            combination.apply(base)?.validate()?;
        }
        Ok(())
    }

    /// Cross-product of all candidates
    ///
    /// Names are taken in lexicographic order and the last name varies
    /// fastest, so the order is stable across runs.
    pub fn combinations(&self) -> Vec<ParameterCombination> {
        let mut combinations = vec![BTreeMap::new()];
        for (name, values) in &self.parameters {
            let candidates = values.candidates();
            combinations = combinations
                .into_iter()
                .flat_map(|partial| {
                    candidates.iter().map(move |value| {
                        let mut next = partial.clone();
                        next.insert(name.clone(), *value);
                        next
                    })
                })
                .collect();
        }

        combinations
            .into_iter()
            .map(|values| ParameterCombination { values })
            .collect()
    }
}

impl From<BTreeMap<String, ParamValues>> for ParameterSpace {
    fn from(parameters: BTreeMap<String, ParamValues>) -> Self {
        Self::new(parameters)
    }
}
