// Time-series preprocessing: grouping, ordering, zero-filling and derived windows

use super::{AssetSeries, Observation, RawObservation};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Normalize a flat collection of rows into one series per asset
///
/// Assets come back in ascending id order. Rows with unparseable timestamps
/// are dropped; duplicate timestamps keep the last row seen.
pub fn preprocess(raw: Vec<RawObservation>) -> Vec<AssetSeries> {
    let mut groups: BTreeMap<String, Vec<RawObservation>> = BTreeMap::new();
    for row in raw {
        groups.entry(row.pool_address.clone()).or_default().push(row);
    }

    groups
        .into_iter()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(asset_id, rows)| normalize_asset(asset_id, rows))
        .collect()
}

fn normalize_asset(asset_id: String, rows: Vec<RawObservation>) -> AssetSeries {
    let total = rows.len();
    let mut timed: Vec<(DateTime<Utc>, RawObservation)> = rows
        .into_iter()
        .filter_map(|row| {
            let ts = row.timestamp.as_ref().and_then(|t| t.parse());
            ts.map(|ts| (ts, row))
        })
        .collect();

    if timed.len() < total {
        warn!(
            "⚠️  {}: dropped {} rows with unparseable timestamps",
            asset_id,
            total - timed.len()
        );
    }

    // stable sort, then keep the last row for each timestamp
    timed.sort_by_key(|(ts, _)| *ts);
    let mut deduped: Vec<(DateTime<Utc>, RawObservation)> = Vec::with_capacity(timed.len());
    for (ts, row) in timed {
        match deduped.last_mut() {
            Some(last) if last.0 == ts => *last = (ts, row),
            _ => deduped.push((ts, row)),
        }
    }

    let mut missing_required = Vec::new();
    let market_cap = column(&deduped, |r| r.market_cap);
    let holders = column(&deduped, |r| r.holders_count);
    if !market_cap.present {
        missing_required.push("marketCap".to_string());
    }
    if !holders.present {
        missing_required.push("holdersCount".to_string());
    }

    let buy_5s = column(&deduped, |r| r.buy_volume_5s);
    let buy_10s = column(&deduped, |r| r.buy_volume_10s);
    let sell_5s = column(&deduped, |r| r.sell_volume_5s);
    let sell_10s = column(&deduped, |r| r.sell_volume_10s);

    let net_5s = column(&deduped, |r| r.net_volume_5s)
        .or_derive(|| difference(&buy_5s.values, &sell_5s.values));
    let net_10s = column(&deduped, |r| r.net_volume_10s)
        .or_derive(|| difference(&buy_10s.values, &sell_10s.values));

    let mc_change_5s = column(&deduped, |r| r.market_cap_change_5s)
        .or_derive(|| pct_change(&market_cap.values, 5));
    let mc_change_10s = column(&deduped, |r| r.market_cap_change_10s)
        .or_derive(|| pct_change(&market_cap.values, 10));
    let mc_change_30s = column(&deduped, |r| r.market_cap_change_30s)
        .or_derive(|| pct_change(&market_cap.values, 30));
    let mc_change_60s = column(&deduped, |r| r.market_cap_change_60s)
        .or_derive(|| pct_change(&market_cap.values, 60));

    let holder_5s = column(&deduped, |r| r.holder_delta_5s)
        .or_derive(|| window_delta(&holders.values, 5));
    let holder_10s = column(&deduped, |r| r.holder_delta_10s)
        .or_derive(|| window_delta(&holders.values, 10));
    let holder_30s = column(&deduped, |r| r.holder_delta_30s)
        .or_derive(|| window_delta(&holders.values, 30));
    let holder_60s = column(&deduped, |r| r.holder_delta_60s)
        .or_derive(|| window_delta(&holders.values, 60));

    let ma_10s = column(&deduped, |r| r.ma_market_cap_10s);
    let ma_30s = column(&deduped, |r| r.ma_market_cap_30s);
    let ma_60s = column(&deduped, |r| r.ma_market_cap_60s);
    let price_change = column(&deduped, |r| r.price_change_percent);
    let large_buy = column(&deduped, |r| r.large_buy_5s);

    let observations = deduped
        .iter()
        .enumerate()
        .map(|(i, (ts, _))| Observation {
            timestamp: *ts,
            market_cap: market_cap.values[i],
            holders_count: holders.values[i],
            buy_volume_5s: buy_5s.values[i],
            buy_volume_10s: buy_10s.values[i],
            sell_volume_5s: sell_5s.values[i],
            sell_volume_10s: sell_10s.values[i],
            net_volume_5s: net_5s.values[i],
            net_volume_10s: net_10s.values[i],
            ma_market_cap_10s: ma_10s.values[i],
            ma_market_cap_30s: ma_30s.values[i],
            ma_market_cap_60s: ma_60s.values[i],
            market_cap_change_5s: mc_change_5s.values[i],
            market_cap_change_10s: mc_change_10s.values[i],
            market_cap_change_30s: mc_change_30s.values[i],
            market_cap_change_60s: mc_change_60s.values[i],
            holder_delta_5s: holder_5s.values[i],
            holder_delta_10s: holder_10s.values[i],
            holder_delta_30s: holder_30s.values[i],
            holder_delta_60s: holder_60s.values[i],
            price_change_percent: price_change.values[i],
            large_buy_5s: large_buy.values[i],
        })
        .collect::<Vec<_>>();

    debug!(
        "{}: {} observations, missing required {:?}",
        asset_id,
        observations.len(),
        missing_required
    );

    AssetSeries {
        asset_id,
        observations,
        missing_required,
    }
}

struct Column {
    values: Vec<f64>,
    present: bool,
}

impl Column {
    /// Replace an entirely absent column with derived values
    fn or_derive(self, derive: impl FnOnce() -> Vec<f64>) -> Column {
        if self.present {
            self
        } else {
            Column {
                values: derive(),
                present: false,
            }
        }
    }
}

fn column(
    rows: &[(DateTime<Utc>, RawObservation)],
    field: impl Fn(&RawObservation) -> Option<f64>,
) -> Column {
    let present = rows.iter().any(|(_, row)| field(row).is_some());
    let values = rows
        .iter()
        .map(|(_, row)| field(row).filter(|v| v.is_finite()).unwrap_or(0.0))
        .collect();
    Column { values, present }
}

fn difference(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x - y).collect()
}

/// Percent change against the value `window` rows earlier (0 when unavailable)
pub fn pct_change(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if i < window || values[i - window] == 0.0 {
                0.0
            } else {
                (values[i] / values[i - window] - 1.0) * 100.0
            }
        })
        .collect()
}

/// Absolute change against the value `window` rows earlier (0 when unavailable)
pub fn window_delta(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| if i < window { 0.0 } else { values[i] - values[i - window] })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawTimestamp;

    fn row(pool: &str, ms: i64, mc: f64) -> RawObservation {
        RawObservation {
            pool_address: pool.to_string(),
            timestamp: Some(RawTimestamp::Millis(ms)),
            market_cap: Some(mc),
            holders_count: Some(ms as f64 / 1000.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_groups_sorts_and_dedupes() {
        let rows = vec![
            row("b", 3000, 30.0),
            row("a", 2000, 20.0),
            row("a", 1000, 10.0),
            row("a", 2000, 25.0),
        ];
        let series = preprocess(rows);

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].asset_id, "a");
        assert_eq!(series[0].len(), 2);
        assert_eq!(series[0].observations[0].market_cap, 10.0);
        // last duplicate wins
        assert_eq!(series[0].observations[1].market_cap, 25.0);
        assert!(series[0].is_complete());
    }

    #[test]
    fn test_missing_fields_default_to_zero_and_derive() {
        let rows = (0..40)
            .map(|i| {
                let mut r = row("a", i * 1000, 100.0 + i as f64);
                r.buy_volume_5s = Some(3.0);
                r.sell_volume_5s = Some(1.0);
                r
            })
            .collect();
        let series = preprocess(rows);
        let obs = &series[0].observations;

        assert_eq!(obs[0].price_change_percent, 0.0);
        assert_eq!(obs[0].large_buy_5s, 0.0);
        assert_eq!(obs[0].net_volume_5s, 2.0);
        assert_eq!(obs[4].market_cap_change_5s, 0.0);
        assert!((obs[5].market_cap_change_5s - 5.0).abs() < 1e-9);
        assert_eq!(obs[35].holder_delta_30s, 30.0);
        assert_eq!(obs[10].holder_delta_30s, 0.0);
    }

    #[test]
    fn test_present_fields_are_not_overwritten() {
        let mut rows = vec![row("a", 0, 100.0), row("a", 1000, 200.0)];
        rows[1].market_cap_change_5s = Some(42.0);
        let series = preprocess(rows);
        assert_eq!(series[0].observations[0].market_cap_change_5s, 0.0);
        assert_eq!(series[0].observations[1].market_cap_change_5s, 42.0);
    }

    #[test]
    fn test_missing_required_and_bad_timestamps() {
        let mut bad = row("a", 0, 1.0);
        bad.timestamp = Some(RawTimestamp::Text("not a time".to_string()));
        let mut no_mc = row("a", 1000, 1.0);
        no_mc.market_cap = None;

        let series = preprocess(vec![bad, no_mc]);
        assert_eq!(series[0].len(), 1);
        assert_eq!(series[0].missing_required, vec!["marketCap".to_string()]);
    }

    #[test]
    fn test_pct_change_guards_zero_base() {
        let changes = pct_change(&[0.0, 0.0, 10.0], 1);
        assert_eq!(changes, vec![0.0, 0.0, 0.0]);
    }
}
