use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;
use crate::error::AppError;
use crate::models::{EnrichConfig, Horizon, Timeframe};
use crate::utils::{get_batch_size, get_database_path, get_worker_count};

#[derive(Parser)]
#[command(name = "candle-enricher")]
#[command(about = "Incremental multi-timeframe enrichment of OHLCV candle tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Enrich every pending row once, then exit
    Enrich {
        #[command(flatten)]
        engine: EngineArgs,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enrich repeatedly until Ctrl-C
    Watch {
        #[command(flatten)]
        engine: EngineArgs,

        /// Seconds to sleep between runs
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },
    /// Show watermark and pending range per table (writes nothing)
    Status {
        #[command(flatten)]
        engine: EngineArgs,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// SQLite database path [env: OHLCV_DB_PATH, default: ohlcv.db]
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Only these symbols (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,

    /// Timeframes to process: all, or a list such as D1,M15
    #[arg(long, default_value = "all")]
    pub timeframes: String,

    /// Concurrent table workers [env: ENRICH_WORKERS, default: 4]
    #[arg(long)]
    pub workers: Option<usize>,

    /// Rows written per transaction [env: ENRICH_BATCH_SIZE, default: 50000]
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Momentum horizons, e.g. 1h,2h,1d
    #[arg(long, default_value = "1h,2h,1d")]
    pub movement_horizons: String,

    /// Range horizons, e.g. 15m,60m,2h,1d
    #[arg(long, default_value = "15m,60m,2h,1d")]
    pub range_horizons: String,

    /// Retries for a batch hitting a transient storage error
    #[arg(long, default_value_t = crate::constants::DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Days behind the watermark re-checked for late D1 baselines
    #[arg(long, default_value_t = crate::constants::DEFAULT_PROVISIONAL_LOOKBACK_DAYS)]
    pub provisional_lookback_days: u32,
}

impl EngineArgs {
    /// Merge flags, environment and defaults into a validated config
    pub fn into_config(self) -> Result<EnrichConfig, AppError> {
        let timeframes = Timeframe::parse_list(&self.timeframes).map_err(AppError::Config)?;
        let config = EnrichConfig {
            database_path: self.db.unwrap_or_else(get_database_path),
            batch_size: self.batch_size.unwrap_or_else(get_batch_size),
            workers: self.workers.unwrap_or_else(get_worker_count),
            max_retries: self.max_retries,
            provisional_lookback_days: self.provisional_lookback_days,
            movement_horizons: Horizon::parse_list(&self.movement_horizons)?,
            range_horizons: Horizon::parse_list(&self.range_horizons)?,
            symbols: self.symbols.map(|symbols| {
                symbols
                    .into_iter()
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            timeframes,
            ..EnrichConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

pub fn run() {
    let cli = Cli::parse();

    let (engine, action) = match cli.command {
        Commands::Enrich { engine, json } => (engine, Action::Enrich { json }),
        Commands::Watch {
            engine,
            interval_secs,
        } => (engine, Action::Watch { interval_secs }),
        Commands::Status { engine, json } => (engine, Action::Status { json }),
    };

    let config = match engine.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    match action {
        Action::Enrich { json } => commands::enrich::run(config, json),
        Action::Watch { interval_secs } => commands::watch::run(config, interval_secs),
        Action::Status { json } => commands::status::run(config, json),
    }
}

enum Action {
    Enrich { json: bool },
    Watch { interval_secs: u64 },
    Status { json: bool },
}
