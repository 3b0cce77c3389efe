use crate::error::AppError;
use crate::models::{Candle, RowUpdate};
use async_trait::async_trait;

/// A batch write in progress; dropping it without `commit` rolls back
#[async_trait]
pub trait StorageTransaction: Send {
    /// Overwrite `columns` on the rows whose timestamps appear in `rows`
    async fn write_columns(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[RowUpdate],
    ) -> Result<usize, AppError>;

    async fn commit(&mut self) -> Result<(), AppError>;
}

/// Everything the enrichment engine needs from persistence
///
/// Timestamps are epoch seconds. All bounds are inclusive.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    type Tx: StorageTransaction;

    /// Table names starting with `prefix`, sorted
    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>, AppError>;

    async fn table_columns(&self, table: &str) -> Result<Vec<String>, AppError>;

    /// Add a nullable column; no-op when it already exists
    async fn add_column(&self, table: &str, column: &str, sql_type: &str) -> Result<(), AppError>;

    /// Candles in `[from, to]` ordered by timestamp, with `derived` populated
    async fn read_range(
        &self,
        table: &str,
        from: i64,
        to: i64,
        derived: &[String],
    ) -> Result<Vec<Candle>, AppError>;

    async fn min_timestamp(&self, table: &str) -> Result<Option<i64>, AppError>;

    /// Contiguous watermark: the latest timestamp before the first row with
    /// a NULL in any of `columns` (or the table maximum if there is none)
    async fn max_enriched_timestamp(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Option<i64>, AppError>;

    /// First and last timestamp with a NULL in any of `columns`
    async fn unenriched_bounds(
        &self,
        table: &str,
        columns: &[String],
    ) -> Result<Option<(i64, i64)>, AppError>;

    /// Timestamp of the `n`-th row strictly after `after` (1-based); None
    /// when fewer rows follow
    async fn nth_timestamp_after(
        &self,
        table: &str,
        after: Option<i64>,
        n: usize,
    ) -> Result<Option<i64>, AppError>;

    /// Timestamp of the row `n` rows before `anchor` (`n = 0` is the anchor
    /// row itself); clamps to the first row
    async fn nth_timestamp_back(
        &self,
        table: &str,
        anchor: i64,
        n: usize,
    ) -> Result<Option<i64>, AppError>;

    /// Timestamps in `[from, to]` where `column` is NULL
    async fn null_timestamps(
        &self,
        table: &str,
        column: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<i64>, AppError>;

    async fn begin(&self) -> Result<Self::Tx, AppError>;
}
