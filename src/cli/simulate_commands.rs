// Simulation command implementations
use chrono::Utc;
use pool_backtester::analytics::{render_report, write_json, write_opportunities_csv, write_report, write_trades_csv};
use pool_backtester::simulation::merge_json_overrides;
use pool_backtester::{
    load_series, AssetSeries, BacktestEngine, CheckpointStore, FileCheckpointStore, GridSweepDriver, JsonFileSource,
    ObservationSource, ObservationStore, ParameterSpace, PipelineReport, PreFlightValidator, ResumeMode,
    SchedulerOptions, SimResult, SimulationConfig, SimulationError, SourceKind, Spinner, SweepReport,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Flags shared by `run` and `sweep`
#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    pub limit: Option<usize>,
    pub force_new: bool,
    pub entry_params: Option<String>,
    pub exit_params: Option<String>,
}

impl RunFlags {
    fn resume_mode(&self) -> ResumeMode {
        if self.force_new {
            ResumeMode::ForceNew
        } else {
            ResumeMode::Resume
        }
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("⚠️  Could not install Ctrl-C handler; interrupts will not checkpoint");
        std::future::pending::<()>().await;
    }
    warn!("🛑 Received shutdown signal, checkpointing...");
}

pub fn init_workspace(config_path: &str) -> SimResult<()> {
    info!("🔧 Initializing workspace...");

    if Path::new(config_path).exists() {
        warn!("⚠️  {} already exists, skipping", config_path);
    }
    let config = SimulationConfig::load_or_create(config_path)?;

    for dir in [&config.output.dir, &config.scheduler.checkpoint_dir] {
        std::fs::create_dir_all(dir).map_err(|e| SimulationError::DirectoryCreate(format!("{}: {}", dir, e)))?;
    }
    if let Some(parent) = Path::new(&config.data.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SimulationError::DirectoryCreate(format!("{}: {}", parent.display(), e)))?;
        }
    }

    info!("✅ Workspace initialized successfully!");
    info!("💡 Next steps:");
    info!("   1. Run: pool-sim import <observations.json>");
    info!("   2. Run: pool-sim run");
    info!("   3. Run: pool-sim sweep");
    Ok(())
}

/// Copy a JSON export into the SQLite cache named by `[data] path`
pub fn import_observations(input: &str, config: &SimulationConfig) -> SimResult<()> {
    if config.data.source != SourceKind::Sqlite {
        warn!("⚠️  [data] source is json; the imported cache will only be used with source = \"sqlite\"");
    }

    let spinner = Spinner::new(&format!("Reading {}...", input));
    let rows = JsonFileSource::new(input).read_all()?;
    spinner.update(&format!("Importing {} rows...", rows.len()));

    let store = ObservationStore::open(&config.data.path)?;
    let inserted = store.insert_observations(&rows)?;
    let pools = store.pool_ids(0)?.len();
    spinner.finish(&format!("Imported {} rows ({} pools) into {}", inserted, pools, config.data.path));
    Ok(())
}

/// Run only the pre-flight checks
pub fn validate_setup(config: &SimulationConfig, sweep: bool) -> SimResult<()> {
    let validator = PreFlightValidator::new(config.clone());
    let result = if sweep {
        validator.validate_for_sweep()
    } else {
        validator.validate_for_run()
    };
    result.display();
    result.into_result()
}

pub async fn run_simulation(config: &SimulationConfig, flags: &RunFlags) -> SimResult<()> {
    let config = apply_overrides(config, flags)?;
    validate_setup(&config, false)?;

    let (series, data_tag) = load_assets(&config, flags)?;
    let engine = BacktestEngine::new(scheduler_options(&config, flags), checkpoint_store(&config)?)
        .with_data_tag(data_tag);

    let report = engine.run_until(&config.strategy(), &series, ctrl_c()).await?;
    log_phase_counts(&report);
    export_run(&config, &report)
}

pub async fn run_sweep(config: &SimulationConfig, flags: &RunFlags) -> SimResult<()> {
    let config = apply_overrides(config, flags)?;
    validate_setup(&config, true)?;

    let (series, data_tag) = load_assets(&config, flags)?;
    let driver = GridSweepDriver::new(
        config.strategy(),
        ParameterSpace::new(config.sweep.parameters.clone()),
        config.sweep.objective,
        scheduler_options(&config, flags),
        checkpoint_store(&config)?,
    )
    .with_data_tag(data_tag);

    let report = driver.run_until(&series, ctrl_c()).await?;
    log_ranking(&report);
    export_sweep(&config, &report)
}

fn apply_overrides(config: &SimulationConfig, flags: &RunFlags) -> SimResult<SimulationConfig> {
    let mut config = config.clone();
    if let Some(json) = &flags.entry_params {
        config.entry = merge_json_overrides(&config.entry, json)
            .map_err(|e| SimulationError::ConfigValidation(format!("--entry-params: {}", e)))?;
        info!("🔧 Entry parameters overridden: {}", json);
    }
    if let Some(json) = &flags.exit_params {
        config.exit = merge_json_overrides(&config.exit, json)
            .map_err(|e| SimulationError::ConfigValidation(format!("--exit-params: {}", e)))?;
        info!("🔧 Exit parameters overridden: {}", json);
    }
    config.validate()?;
    Ok(config)
}

fn scheduler_options(config: &SimulationConfig, flags: &RunFlags) -> SchedulerOptions {
    SchedulerOptions::from_config(&config.scheduler, flags.resume_mode())
}

fn checkpoint_store(config: &SimulationConfig) -> SimResult<Option<Arc<dyn CheckpointStore>>> {
    if !config.scheduler.checkpointing {
        return Ok(None);
    }
    let store = FileCheckpointStore::new(&config.scheduler.checkpoint_dir)?;
    Ok(Some(Arc::new(store)))
}

fn load_assets(config: &SimulationConfig, flags: &RunFlags) -> SimResult<(Vec<Arc<AssetSeries>>, String)> {
    let limit = flags.limit.or(config.data.max_assets);
    let source: Box<dyn ObservationSource> = match config.data.source {
        SourceKind::Sqlite => Box::new(ObservationStore::open_existing(&config.data.path)?),
        SourceKind::Json => Box::new(JsonFileSource::new(&config.data.path)),
    };

    let spinner = Spinner::new(&format!("Loading {}...", source.describe()));
    let series = match load_series(source.as_ref(), limit) {
        Ok(series) => series,
        Err(e) => {
            spinner.finish_with_error(&e.to_string());
            return Err(e);
        }
    };
    spinner.finish(&format!("Loaded {} assets", series.len()));

    let checks = PreFlightValidator::new(config.clone()).validate_series(&series);
    checks.display();
    checks.into_result()?;

    let data_tag = format!("{}|{:?}", source.describe(), limit);
    Ok((series.into_iter().map(Arc::new).collect(), data_tag))
}

fn log_phase_counts(report: &PipelineReport) {
    info!(
        "📊 Scan: {} assets, {} opportunities, {} no entry, {} skipped{}",
        report.scan.total,
        report.scan.succeeded,
        report.scan.failed,
        report.scan.skipped,
        if report.scan.resumed { " (resumed)" } else { "" }
    );
    info!(
        "📊 Exits: {} trades, {} failed{}",
        report.exit.succeeded,
        report.exit.failed,
        if report.exit.resumed { " (resumed)" } else { "" }
    );
    if report.scan.batch_errors + report.exit.batch_errors > 0 {
        warn!(
            "⚠️  {} batch error(s); {} units unfinished",
            report.scan.batch_errors + report.exit.batch_errors,
            report.scan.unfinished + report.exit.unfinished
        );
    }
}

fn output_dir(config: &SimulationConfig, prefix: &str) -> PathBuf {
    Path::new(&config.output.dir).join(format!("{}_{}", prefix, Utc::now().format("%Y%m%d_%H%M%S")))
}

fn export_run(config: &SimulationConfig, report: &PipelineReport) -> SimResult<()> {
    let dir = output_dir(config, "run");

    let opportunity_report = render_report("Entry opportunities", &report.opportunity_summary, &report.opportunities);
    let trade_report = render_report("Simulated trades", &report.trade_summary, &report.trades);
    println!("{}", trade_report);

    if config.output.write_report {
        write_report(dir.join("report.txt"), &format!("{}\n{}", opportunity_report, trade_report))?;
    }
    if config.output.export_csv {
        write_opportunities_csv(dir.join("opportunities.csv"), &report.opportunities)?;
        write_trades_csv(dir.join("trades.csv"), &report.trades)?;
    }
    if config.output.export_json {
        write_json(
            dir.join("summary.json"),
            &json!({
                "parameters": report.parameters,
                "fingerprint": report.parameters.fingerprint(),
                "scan": report.scan,
                "exit": report.exit,
                "opportunities": report.opportunity_summary,
                "trades": report.trade_summary,
            }),
        )?;
    }

    info!("📁 Results written to {}", dir.display());
    Ok(())
}

fn log_ranking(report: &SweepReport) {
    info!(
        "🏆 Sweep finished: {} combinations ({} this run, {} failed)",
        report.total_combinations, report.evaluated_this_run, report.failed
    );
    for result in report.ranking.iter().take(5) {
        info!(
            "   #{} {:.4} | {} | {} opportunities, {} trades",
            result.rank, result.score, result.key, result.opportunity_summary.count, result.trade_summary.count
        );
    }
}

fn export_sweep(config: &SimulationConfig, report: &SweepReport) -> SimResult<()> {
    let dir = output_dir(config, "sweep");
    write_json(dir.join("ranking.json"), report)?;

    if config.output.write_report {
        let mut text = format!(
            "Grid sweep ranked by {}\n{} combinations\n\n",
            report.objective.name(),
            report.total_combinations
        );
        for result in &report.ranking {
            text.push_str(&format!(
                "#{:<4} {:>10.4}  {}  ({} opportunities, avg realistic {:.3}x, {} trades, profit {:.3})\n",
                result.rank,
                result.score,
                result.key,
                result.opportunity_summary.count,
                result.opportunity_summary.avg_realistic_return,
                result.trade_summary.count,
                result.trade_summary.total_profit
            ));
        }
        write_report(dir.join("sweep_report.txt"), &text)?;
    }

    info!("📁 Sweep results written to {}", dir.display());
    Ok(())
}
