//! Observation data model and upstream sources
//!
//! Raw rows come from an [`ObservationSource`] (SQLite cache or JSON file),
//! are grouped per asset and normalized by [`preprocess`] into
//! [`AssetSeries`] values that the simulation consumes.

use crate::error::{SimResult, SimulationError};
use crate::scheduler::WorkUnit;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::info;

pub mod json_source;
pub mod preprocess;
pub mod store;

pub use json_source::JsonFileSource;
pub use preprocess::preprocess;
pub use store::ObservationStore;

/// Timestamp as delivered by a source: epoch milliseconds or text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Text(String),
}

impl RawTimestamp {
    /// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` or epoch milliseconds
    pub fn parse(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            RawTimestamp::Text(text) => {
                let text = text.trim();
                if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
                    return Some(ts.with_timezone(&Utc));
                }
                for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
                    if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                        return Some(naive.and_utc());
                    }
                }
                text.parse::<i64>()
                    .ok()
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            }
        }
    }
}

impl fmt::Display for RawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawTimestamp::Millis(ms) => write!(f, "{}", ms),
            RawTimestamp::Text(text) => f.write_str(text),
        }
    }
}

/// One unnormalized row; any numeric field may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawObservation {
    pub pool_address: String,
    pub timestamp: Option<RawTimestamp>,
    pub market_cap: Option<f64>,
    pub holders_count: Option<f64>,
    pub buy_volume_5s: Option<f64>,
    pub buy_volume_10s: Option<f64>,
    pub sell_volume_5s: Option<f64>,
    pub sell_volume_10s: Option<f64>,
    pub net_volume_5s: Option<f64>,
    pub net_volume_10s: Option<f64>,
    pub ma_market_cap_10s: Option<f64>,
    pub ma_market_cap_30s: Option<f64>,
    pub ma_market_cap_60s: Option<f64>,
    pub market_cap_change_5s: Option<f64>,
    pub market_cap_change_10s: Option<f64>,
    pub market_cap_change_30s: Option<f64>,
    pub market_cap_change_60s: Option<f64>,
    pub holder_delta_5s: Option<f64>,
    pub holder_delta_10s: Option<f64>,
    pub holder_delta_30s: Option<f64>,
    pub holder_delta_60s: Option<f64>,
    pub price_change_percent: Option<f64>,
    pub large_buy_5s: Option<f64>,
}

/// One normalized row of an asset's time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub market_cap: f64,
    pub holders_count: f64,
    pub buy_volume_5s: f64,
    pub buy_volume_10s: f64,
    pub sell_volume_5s: f64,
    pub sell_volume_10s: f64,
    pub net_volume_5s: f64,
    pub net_volume_10s: f64,
    pub ma_market_cap_10s: f64,
    pub ma_market_cap_30s: f64,
    pub ma_market_cap_60s: f64,
    pub market_cap_change_5s: f64,
    pub market_cap_change_10s: f64,
    pub market_cap_change_30s: f64,
    pub market_cap_change_60s: f64,
    pub holder_delta_5s: f64,
    pub holder_delta_10s: f64,
    pub holder_delta_30s: f64,
    pub holder_delta_60s: f64,
    pub price_change_percent: f64,
    pub large_buy_5s: f64,
}

impl Observation {
    /// An all-zero row at the given time
    pub fn zeroed(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            market_cap: 0.0,
            holders_count: 0.0,
            buy_volume_5s: 0.0,
            buy_volume_10s: 0.0,
            sell_volume_5s: 0.0,
            sell_volume_10s: 0.0,
            net_volume_5s: 0.0,
            net_volume_10s: 0.0,
            ma_market_cap_10s: 0.0,
            ma_market_cap_30s: 0.0,
            ma_market_cap_60s: 0.0,
            market_cap_change_5s: 0.0,
            market_cap_change_10s: 0.0,
            market_cap_change_30s: 0.0,
            market_cap_change_60s: 0.0,
            holder_delta_5s: 0.0,
            holder_delta_10s: 0.0,
            holder_delta_30s: 0.0,
            holder_delta_60s: 0.0,
            price_change_percent: 0.0,
            large_buy_5s: 0.0,
        }
    }
}

/// Ordered, timestamp-unique observations of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSeries {
    pub asset_id: String,
    pub observations: Vec<Observation>,
    /// Required fields absent from every row; such assets are not scanned
    #[serde(default)]
    pub missing_required: Vec<String>,
}

impl AssetSeries {
    pub fn new(asset_id: impl Into<String>, observations: Vec<Observation>) -> Self {
        Self {
            asset_id: asset_id.into(),
            observations,
            missing_required: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required.is_empty()
    }
}

impl WorkUnit for AssetSeries {
    fn unit_id(&self) -> String {
        self.asset_id.clone()
    }
}

/// Upstream provider of raw observations, pulled once per run
pub trait ObservationSource {
    /// Fetch rows for at most `max_assets` assets (lowest asset ids first)
    fn fetch(&self, max_assets: Option<usize>) -> SimResult<Vec<RawObservation>>;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Keep only rows of the first `max_assets` asset ids
pub(crate) fn limit_assets(rows: Vec<RawObservation>, max_assets: Option<usize>) -> Vec<RawObservation> {
    match max_assets {
        None => rows,
        Some(limit) => {
            let keep: BTreeSet<String> = rows
                .iter()
                .map(|row| row.pool_address.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .take(limit)
                .collect();
            rows.into_iter()
                .filter(|row| keep.contains(&row.pool_address))
                .collect()
        }
    }
}

/// Pull from a source and normalize; an empty pull is fatal
pub fn load_series(source: &dyn ObservationSource, max_assets: Option<usize>) -> SimResult<Vec<AssetSeries>> {
    info!("📥 Loading observations from {}", source.describe());
    let rows = source.fetch(max_assets)?;
    if rows.is_empty() {
        return Err(SimulationError::NoData(format!(
            "{} returned no observations",
            source.describe()
        )));
    }

    let row_count = rows.len();
    let series = preprocess(rows);
    if series.iter().all(|s| s.is_empty()) {
        return Err(SimulationError::NoData(format!(
            "no parseable observations among {} rows",
            row_count
        )));
    }

    info!("📊 Loaded {} rows across {} assets", row_count, series.len());
    Ok(series)
}
