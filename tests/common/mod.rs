// Common test utilities and helpers
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use pool_backtester::{
    AssetSeries, EntryParameterSet, ExitPolicy, Observation, RawObservation, RawTimestamp, StrategyParameters,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub fn series_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// One row per second with the given market caps and 10 holders throughout
pub fn series_from_caps(id: &str, caps: &[f64]) -> AssetSeries {
    let start = series_start();
    let observations = caps
        .iter()
        .enumerate()
        .map(|(i, cap)| {
            let mut obs = Observation::zeroed(start + Duration::seconds(i as i64));
            obs.market_cap = *cap;
            obs.holders_count = 10.0;
            obs
        })
        .collect();
    AssetSeries::new(id, observations)
}

pub fn flat_series(id: &str, len: usize, market_cap: f64) -> AssetSeries {
    series_from_caps(id, &vec![market_cap; len])
}

/// Market cap and holders climbing steadily
pub fn rising_series(id: &str, len: usize) -> AssetSeries {
    let caps: Vec<f64> = (0..len).map(|i| 1000.0 + i as f64 * 10.0).collect();
    let mut series = series_from_caps(id, &caps);
    for (i, obs) in series.observations.iter_mut().enumerate() {
        obs.holders_count = 10.0 + i as f64;
    }
    series
}

/// Flat at `entry_cap` up to `entry_index`, then follows `path`, then holds its last value
pub fn series_with_path(id: &str, entry_index: usize, entry_cap: f64, path: &[f64], len: usize) -> AssetSeries {
    let mut caps = vec![entry_cap; entry_index + 1];
    caps.extend_from_slice(path);
    let tail = *caps.last().unwrap();
    caps.resize(len.max(caps.len()), tail);
    series_from_caps(id, &caps)
}

pub fn shared(series: Vec<AssetSeries>) -> Vec<Arc<AssetSeries>> {
    series.into_iter().map(Arc::new).collect()
}

/// Raw rows for one pool, one per second, with only the required fields set
pub fn raw_rows(pool: &str, len: usize, base_cap: f64) -> Vec<RawObservation> {
    let start_ms = series_start().timestamp_millis();
    (0..len)
        .map(|i| RawObservation {
            pool_address: pool.to_string(),
            timestamp: Some(RawTimestamp::Millis(start_ms + i as i64 * 1000)),
            market_cap: Some(base_cap + i as f64),
            holders_count: Some(10.0 + i as f64),
            ..Default::default()
        })
        .collect()
}

/// Random-walk market caps around `base`
pub fn noisy_caps(base: f64, count: usize, volatility: f64) -> Vec<f64> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut caps = Vec::with_capacity(count);
    let mut current = base;

    for _ in 0..count {
        let change_pct = rng.gen_range(-volatility..volatility);
        current *= 1.0 + change_pct;
        caps.push(current);
    }

    caps
}

/// Every threshold at the permissive floor
pub fn permissive_entry(quorum: usize, min_delay: usize) -> EntryParameterSet {
    let mut entry = EntryParameterSet::permissive();
    entry.quorum = quorum;
    entry.min_delay = min_delay;
    entry
}

pub fn permissive_params(quorum: usize, min_delay: usize) -> StrategyParameters {
    StrategyParameters::new(permissive_entry(quorum, min_delay), ExitPolicy::default())
}

/// Create a temporary directory and a path inside it
pub fn temp_path(name: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join(name);
    (temp_dir, path)
}
