// CSV and JSON export of simulation results

use crate::error::{SimResult, SimulationError};
use crate::simulation::{EntryOpportunity, TradeOutcome};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Flat CSV row for one trade
#[derive(Debug, Serialize)]
struct TradeRow<'a> {
    asset_id: &'a str,
    entry_time: String,
    exit_time: String,
    entry_index: usize,
    exit_index: usize,
    entry_price: f64,
    exit_price: f64,
    exit_reason: &'static str,
    profit_ratio: f64,
    profit_sol: f64,
    max_profit_ratio: f64,
    realistic_return: f64,
    post_exit_max_ratio: f64,
    post_exit_peak_offset: usize,
    trade_duration_secs: f64,
    exit_quality: String,
    entry_mc_growth_from_start: f64,
    entry_holder_growth_from_start: f64,
    entry_buy_sell_ratio_10s: String,
    exit_mc_change_5s: f64,
    exit_holder_change_30s: f64,
    exit_buy_volume_5s: f64,
    exit_net_volume_5s: f64,
}

impl<'a> From<&'a TradeOutcome> for TradeRow<'a> {
    fn from(t: &'a TradeOutcome) -> Self {
        Self {
            asset_id: &t.asset_id,
            entry_time: t.entry_time.to_rfc3339(),
            exit_time: t.exit_time.to_rfc3339(),
            entry_index: t.entry_index,
            exit_index: t.exit_index,
            entry_price: t.entry_price,
            exit_price: t.exit_price,
            exit_reason: t.exit_reason.label(),
            profit_ratio: t.profit_ratio,
            profit_sol: t.profit_sol,
            max_profit_ratio: t.max_profit_ratio,
            realistic_return: t.realistic_return(),
            post_exit_max_ratio: t.post_exit_max_ratio,
            post_exit_peak_offset: t.post_exit_peak_offset,
            trade_duration_secs: t.trade_duration_secs,
            exit_quality: format!("{:?}", t.exit_quality).to_lowercase(),
            entry_mc_growth_from_start: t.entry_metrics.mc_growth_from_start,
            entry_holder_growth_from_start: t.entry_metrics.holder_growth_from_start,
            entry_buy_sell_ratio_10s: t.entry_metrics.buy_sell_ratio_10s.to_string(),
            exit_mc_change_5s: t.exit_metrics.mc_change_5s,
            exit_holder_change_30s: t.exit_metrics.holder_change_30s,
            exit_buy_volume_5s: t.exit_metrics.buy_volume_5s,
            exit_net_volume_5s: t.exit_metrics.net_volume_5s,
        }
    }
}

/// Flat CSV row for one entry opportunity
#[derive(Debug, Serialize)]
struct OpportunityRow<'a> {
    asset_id: &'a str,
    entry_time: String,
    entry_index: usize,
    entry_market_cap: f64,
    peak_market_cap: f64,
    max_return: f64,
    realistic_return: f64,
    time_to_peak_secs: f64,
    initial_market_cap: f64,
    initial_holders: f64,
    early_market_cap: Option<f64>,
    mc_growth_from_start: f64,
    holder_growth_from_start: f64,
    mc_change_5s: f64,
    mc_change_30s: Option<f64>,
    holder_delta_30s: Option<f64>,
    buy_volume_5s: f64,
    net_volume_5s: f64,
    buy_sell_ratio_10s: String,
    large_buy_5s: f64,
    price_change: f64,
}

impl<'a> From<&'a EntryOpportunity> for OpportunityRow<'a> {
    fn from(o: &'a EntryOpportunity) -> Self {
        let returns = o.returns();
        let m = &o.entry_metrics;
        Self {
            asset_id: &o.asset_id,
            entry_time: o.entry_time.to_rfc3339(),
            entry_index: o.entry_index,
            entry_market_cap: o.entry_market_cap,
            peak_market_cap: returns.peak_market_cap,
            max_return: returns.max_return,
            realistic_return: returns.realistic_return,
            time_to_peak_secs: returns.time_to_peak_secs,
            initial_market_cap: o.initial_metrics.market_cap,
            initial_holders: o.initial_metrics.holders_count,
            early_market_cap: o.early_market_cap,
            mc_growth_from_start: m.mc_growth_from_start,
            holder_growth_from_start: m.holder_growth_from_start,
            mc_change_5s: m.mc_change_5s,
            mc_change_30s: m.mc_change_30s,
            holder_delta_30s: m.holder_delta_30s,
            buy_volume_5s: m.buy_volume_5s,
            net_volume_5s: m.net_volume_5s,
            buy_sell_ratio_10s: m.buy_sell_ratio_10s.to_string(),
            large_buy_5s: m.large_buy_5s,
            price_change: m.price_change,
        }
    }
}

fn ensure_parent(path: &Path) -> SimResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| SimulationError::DirectoryCreate(format!("{}: {}", parent.display(), e)))?;
        }
    }
    Ok(())
}

fn write_rows<P, R, I>(path: P, rows: I) -> SimResult<usize>
where
    P: AsRef<Path>,
    R: Serialize,
    I: IntoIterator<Item = R>,
{
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut writer = csv::Writer::from_path(path)?;
    let mut written = 0;
    for row in rows {
        writer.serialize(row)?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

pub fn write_trades_csv<P: AsRef<Path>>(path: P, trades: &[TradeOutcome]) -> SimResult<()> {
    let written = write_rows(&path, trades.iter().map(TradeRow::from))?;
    info!("💾 Wrote {} trades to {}", written, path.as_ref().display());
    Ok(())
}

pub fn write_opportunities_csv<P: AsRef<Path>>(path: P, opportunities: &[EntryOpportunity]) -> SimResult<()> {
    let written = write_rows(&path, opportunities.iter().map(OpportunityRow::from))?;
    info!("💾 Wrote {} opportunities to {}", written, path.as_ref().display());
    Ok(())
}

/// Pretty-printed JSON of any serializable value
pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> SimResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|e| SimulationError::FileWrite(format!("{}: {}", path.display(), e)))?;
    info!("💾 Wrote {}", path.display());
    Ok(())
}
