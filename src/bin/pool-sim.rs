// Pool Backtester - command line entry point

use clap::{Parser, Subcommand};
use pool_backtester::{SimulationConfig, SimulationError};
use tracing::{error, info, warn, Level};

// Load command modules from cli directory
#[path = "../cli/simulate_commands.rs"]
mod simulate_commands;

use simulate_commands::RunFlags;

/// Exit code for a run stopped by Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "pool-sim")]
#[command(version)]
#[command(about = "Entry/exit backtesting over pool market time series", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct RunArgs {
    /// Only load the first N assets
    #[arg(short, long)]
    limit: Option<usize>,

    /// Ignore existing checkpoints and start over
    #[arg(long)]
    force_new: bool,

    /// JSON object merged onto [entry], e.g. '{"quorum": 5}'
    #[arg(long)]
    entry_params: Option<String>,

    /// JSON object merged onto [exit], e.g. '{"momentum": {"required_strong": 2}}'
    #[arg(long)]
    exit_params: Option<String>,
}

impl From<RunArgs> for RunFlags {
    fn from(args: RunArgs) -> Self {
        RunFlags {
            limit: args.limit,
            force_new: args.force_new,
            entry_params: args.entry_params,
            exit_params: args.exit_params,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default config and working directories
    Init,

    /// Import a JSON observation export into the SQLite cache
    Import {
        /// JSON array of observation rows
        input: String,
    },

    /// Run the entry scan and exit simulation once
    Run {
        #[command(flatten)]
        args: RunArgs,

        /// Run the [sweep] grid instead of a single parameter set
        #[arg(long)]
        grid: bool,
    },

    /// Run the [sweep] parameter grid
    Sweep {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Run pre-flight checks only
    Validate {
        /// Include the sweep space
        #[arg(long)]
        sweep: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("🚀 Pool Backtester v{}", env!("CARGO_PKG_VERSION"));
    info!("📁 Config: {}", cli.config);

    if let Err(e) = execute(cli).await {
        match e {
            SimulationError::Interrupted { .. } => {
                warn!("⚠️  {}", e.user_message());
                std::process::exit(EXIT_INTERRUPTED);
            }
            _ => {
                error!("❌ {} error", e.category());
                error!("{}", e.user_message());
                std::process::exit(1);
            }
        }
    }
}

async fn execute(cli: Cli) -> Result<(), SimulationError> {
    match cli.command {
        // Init doesn't require config (it creates it)
        Commands::Init => simulate_commands::init_workspace(&cli.config),

        Commands::Import { input } => {
            let config = load_config(&cli.config)?;
            simulate_commands::import_observations(&input, &config)
        }

        Commands::Run { args, grid } => {
            let config = load_config(&cli.config)?;
            let flags = RunFlags::from(args);
            if grid {
                simulate_commands::run_sweep(&config, &flags).await
            } else {
                simulate_commands::run_simulation(&config, &flags).await
            }
        }

        Commands::Sweep { args } => {
            let config = load_config(&cli.config)?;
            simulate_commands::run_sweep(&config, &RunFlags::from(args)).await
        }

        Commands::Validate { sweep } => {
            let config = load_config(&cli.config)?;
            simulate_commands::validate_setup(&config, sweep)
        }
    }
}

/// Load config, mapping a missing file to a helpful error
fn load_config(path: &str) -> Result<SimulationConfig, SimulationError> {
    if !std::path::Path::new(path).exists() {
        return Err(SimulationError::ConfigNotFound(path.to_string()));
    }
    Ok(SimulationConfig::from_file(path)?)
}
