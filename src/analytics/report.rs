// Plain-text performance report

use super::{PerformanceSummary, ReturnSample};
use crate::error::{SimResult, SimulationError};
use std::fmt;
use std::fs;
use std::path::Path;

const RULE: &str = "============================================================";
const HISTOGRAM_WIDTH: f64 = 40.0;

struct Report<'a, S> {
    title: &'a str,
    summary: &'a PerformanceSummary,
    samples: &'a [S],
}

impl<S: ReturnSample> fmt::Display for Report<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.summary;

        writeln!(f, "{}", RULE)?;
        writeln!(f, "📊 {}", self.title)?;
        writeln!(f, "{}", RULE)?;

        if s.is_empty() {
            writeln!(f, "No results.")?;
            return Ok(());
        }

        writeln!(f, "Samples:              {}", s.count)?;
        writeln!(f, "Winners / losers:     {} / {} ({:.1}% win rate)", s.winners, s.losers, s.win_rate_pct)?;
        writeln!(f, "Average return:       {:.3}x", s.avg_return)?;
        writeln!(f, "Average realistic:    {:.3}x", s.avg_realistic_return)?;
        writeln!(f, "Total profit:         {:.3} (avg {:.3})", s.total_profit, s.avg_profit)?;
        writeln!(f, "Max drawdown:         {:.3}", s.max_drawdown)?;
        writeln!(f, "Avg holding time:     {:.1}s", s.avg_holding_secs)?;
        writeln!(f, "Weighted return:      {:.4}", s.weighted_return)?;
        writeln!(f)?;

        writeln!(f, "Return distribution")?;
        for (label, count, pct) in s.buckets.iter() {
            let bar = "#".repeat((pct / 100.0 * HISTOGRAM_WIDTH).round() as usize);
            writeln!(f, "  {:>7} {:>6} ({:>5.1}%) {}", label, count, pct, bar)?;
        }
        writeln!(f)?;

        writeln!(f, ">=3x: {}   >=6x: {}   <1.8x: {}", s.over_3x, s.over_6x, s.under_1_8x)?;
        match s.over_3x_to_under_1_8x {
            Some(ratio) => writeln!(f, ">=3x : <1.8x ratio: {:.3}", ratio)?,
            None => writeln!(f, ">=3x : <1.8x ratio: n/a (nothing under 1.8x)")?,
        }

        if !s.exit_reasons.is_empty() {
            writeln!(f)?;
            writeln!(f, "Exit reasons")?;
            for b in &s.exit_reasons {
                writeln!(
                    f,
                    "  {:<28} {:>5} ({:>5.1}%)  +{} / -{}  total {:.3}  avg {:.3}  best {:.3}x  worst {:.3}x",
                    b.reason.label(),
                    b.count,
                    b.percentage,
                    b.profitable,
                    b.losing,
                    b.total_profit,
                    b.avg_profit,
                    b.best,
                    b.worst
                )?;
            }

            let q = &s.quality;
            writeln!(f, "Exit quality: {} good, {} bad, {} ungraded", q.good, q.bad, q.ungraded)?;
        }

        writeln!(f)?;
        writeln!(f, "Details")?;
        for sample in self.samples {
            writeln!(f, "  {}", sample.detail_line())?;
        }
        Ok(())
    }
}

/// Render a summary plus one detail line per sample
pub fn render_report<S: ReturnSample>(title: &str, summary: &PerformanceSummary, samples: &[S]) -> String {
    Report {
        title,
        summary,
        samples,
    }
    .to_string()
}

pub fn write_report<P: AsRef<Path>>(path: P, contents: &str) -> SimResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SimulationError::DirectoryCreate(format!("{}: {}", parent.display(), e)))?;
    }
    fs::write(path, contents).map_err(|e| SimulationError::FileWrite(format!("{}: {}", path.display(), e)))
}
