use super::{Horizon, Timeframe};
use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_PROVISIONAL_LOOKBACK_DAYS, DEFAULT_WORKERS,
    RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS,
};
use crate::error::AppError;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for an enrichment run
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// SQLite database holding the candle tables
    pub database_path: PathBuf,

    /// Pending rows written per transaction (memory bound, not correctness)
    pub batch_size: usize,

    /// Concurrent (symbol, timeframe) units
    pub workers: usize,

    /// Retries for a batch that hit a transient storage error
    pub max_retries: u32,

    /// First retry delay (doubles each attempt)
    pub retry_base_delay: Duration,

    /// Retry delay cap
    pub retry_max_delay: Duration,

    /// Days behind the watermark re-checked for late-arriving D1 baselines
    pub provisional_lookback_days: u32,

    /// Momentum horizons (move_h, move_h_atr)
    pub movement_horizons: Vec<Horizon>,

    /// Range horizons (range_h, range_h_atr)
    pub range_horizons: Vec<Horizon>,

    /// Only enrich these symbols (None = all)
    pub symbols: Option<Vec<String>>,

    /// Only enrich these timeframes
    pub timeframes: Vec<Timeframe>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(crate::constants::DEFAULT_DATABASE_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            retry_max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
            provisional_lookback_days: DEFAULT_PROVISIONAL_LOOKBACK_DAYS,
            movement_horizons: Horizon::default_movement(),
            range_horizons: Horizon::default_range(),
            symbols: None,
            timeframes: Timeframe::all(),
        }
    }
}

impl EnrichConfig {
    /// Create config for a database with default tuning
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            database_path,
            ..Self::default()
        }
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 {
            return Err(AppError::Config("batch_size must be at least 1".to_string()));
        }
        if self.workers == 0 {
            return Err(AppError::Config("workers must be at least 1".to_string()));
        }
        if self.timeframes.is_empty() {
            return Err(AppError::Config("no timeframes selected".to_string()));
        }
        if self.range_horizons.is_empty() {
            return Err(AppError::Config(
                "at least one range horizon is required".to_string(),
            ));
        }
        if let Some(symbols) = &self.symbols {
            if let Some(bad) = symbols.iter().find(|s| !super::table::is_identifier(s)) {
                return Err(AppError::Config(format!("invalid symbol '{}'", bad)));
            }
        }
        Ok(())
    }

    /// True when the table's symbol and timeframe pass the configured filters
    pub fn selects(&self, table: &super::TableId) -> bool {
        let symbol_ok = self
            .symbols
            .as_ref()
            .map_or(true, |symbols| symbols.iter().any(|s| s == &table.symbol));
        symbol_ok && self.timeframes.contains(&table.timeframe)
    }
}
