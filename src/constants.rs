//! Column names and tuning constants
//!
//! ## Table Layout
//! Ingestion owns `timestamp, open, high, low, close, volume`. Every other
//! column is a nullable `REAL` added by the engine:
//! - Baseline: `atr_20d`, `avg_volume_20d`, `rvol` (computed on D1, inherited intraday)
//! - Momentum: `move_{h}`, `move_{h}_atr`
//! - Range: `range_{h}`, `range_{h}_atr`

/// Every candle table name starts with this prefix
pub const TABLE_PREFIX: &str = "candles_";

/// SQL type used for every derived column
pub const DERIVED_COLUMN_TYPE: &str = "REAL";

/// 20-period average true range (D1)
pub const ATR_COLUMN: &str = "atr_20d";

/// 20-period average volume (D1)
pub const AVG_VOLUME_COLUMN: &str = "avg_volume_20d";

/// Relative volume: volume / avg_volume_20d (D1)
pub const RVOL_COLUMN: &str = "rvol";

/// Baseline columns in write order
pub const BASELINE_COLUMNS: [&str; 3] = [ATR_COLUMN, AVG_VOLUME_COLUMN, RVOL_COLUMN];

/// Look-back of the baseline rolling means, in D1 bars
pub const BASELINE_PERIOD: usize = 20;

/// Look-back buffer for D1 tables (calendar days)
pub const DAILY_BUFFER_DAYS: i64 = 30;

/// Minimum look-back buffer for intraday tables (minutes)
pub const INTRADAY_MIN_BUFFER_MINUTES: i64 = 1440;

/// Intraday buffer expressed in bars: buffer = max(1 day, 100 bars)
pub const INTRADAY_BUFFER_BARS: i64 = 100;

/// Default number of pending rows written per transaction
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

/// Default number of concurrent table workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default retries for a batch hitting a transient storage error
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First retry delay; doubles per attempt up to `RETRY_MAX_DELAY_MS`
pub const RETRY_BASE_DELAY_MS: u64 = 250;

/// Upper bound of the retry delay
pub const RETRY_MAX_DELAY_MS: u64 = 5_000;

/// How far behind the watermark intraday rows are re-checked for a baseline
/// that arrived after they were enriched (calendar days)
pub const DEFAULT_PROVISIONAL_LOOKBACK_DAYS: u32 = 7;

/// Default database file when neither flag nor environment is set
pub const DEFAULT_DATABASE_PATH: &str = "ohlcv.db";

/// Seconds in one calendar day
pub const SECONDS_PER_DAY: i64 = 86_400;
