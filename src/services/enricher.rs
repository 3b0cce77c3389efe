//! Per-table enrichment state machine
//!
//! ```text
//! EnsureSchema -> Resolve --None--> Done
//!                   ^  |
//!                   |  Some(range)
//!                   |  v
//!                   +- Batch (load, compute, write, commit; retried as a unit)
//! ```
//!
//! A batch is one transaction, so an interrupted run leaves the watermark
//! where the last commit put it and the next run resumes from there.

use crate::constants::DERIVED_COLUMN_TYPE;
use crate::error::AppError;
use crate::models::{EnrichConfig, RowUpdate, TableId, TableReport, TableStatus};
use crate::services::backoff::ExponentialBackoff;
use crate::services::baseline::compute_baseline;
use crate::services::catalog::{ColumnPlan, TimeframeCatalog};
use crate::services::joiner::{join_baseline, BaselineIndex};
use crate::services::storage::{StorageGateway, StorageTransaction};
use crate::services::watermark::{self, PendingRange, ResolveOptions};
use crate::services::window_metrics::compute_window_metrics;
use crate::worker::ShutdownSignal;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Columns ingestion must have created before a table can be enriched
const INGESTION_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

enum Phase {
    EnsureSchema,
    Resolve,
    Batch(PendingRange),
    Done(TableStatus),
}

/// Read-only view of a table's progress (nothing is written)
#[derive(Debug, Clone, Serialize)]
pub struct TableInspection {
    pub table: String,
    pub watermark: Option<i64>,
    pub missing_columns: Vec<String>,
    pub pending: Option<PendingRange>,
}

/// Enriches single tables; cheap to clone and share across workers
pub struct Enricher<S> {
    store: Arc<S>,
    catalog: Arc<TimeframeCatalog>,
    config: Arc<EnrichConfig>,
}

impl<S> Clone for Enricher<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            catalog: Arc::clone(&self.catalog),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: StorageGateway> Enricher<S> {
    pub fn new(store: Arc<S>, catalog: Arc<TimeframeCatalog>, config: Arc<EnrichConfig>) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EnrichConfig {
        &self.config
    }

    fn resolve_options(&self, has_daily: bool) -> ResolveOptions {
        ResolveOptions {
            batch_size: self.config.batch_size,
            provisional_lookback_days: self.config.provisional_lookback_days,
            has_daily,
        }
    }

    fn plan_for(&self, table: &TableId) -> Result<&ColumnPlan, AppError> {
        self.catalog.plan(table.timeframe).ok_or_else(|| {
            AppError::Config(format!("timeframe {} is not enabled", table.timeframe))
        })
    }

    /// Run a table until nothing is pending, it fails, or shutdown is requested
    ///
    /// `has_daily` tells intraday tables whether a D1 sibling exists to
    /// inherit the baseline from.
    #[instrument(skip(self, table, shutdown), fields(table = %table))]
    pub async fn enrich_table(
        &self,
        table: &TableId,
        has_daily: bool,
        shutdown: &ShutdownSignal,
    ) -> TableReport {
        let mut report = TableReport::new(table, TableStatus::UpToDate);
        let plan = match self.plan_for(table) {
            Ok(plan) => plan,
            Err(e) => return report_failure(report, e, None),
        };
        let options = self.resolve_options(has_daily);
        let name = table.name();

        let mut phase = Phase::EnsureSchema;
        let mut previous: Option<PendingRange> = None;

        loop {
            phase = match phase {
                Phase::EnsureSchema => match self.ensure_schema(&name, plan).await {
                    Ok(()) => Phase::Resolve,
                    Err(e) => return report_failure(report, e, None),
                },

                Phase::Resolve => {
                    let store = self.store.as_ref();
                    let options = &options;
                    let resolved = self
                        .retry_storage(&name, move || watermark::resolve(store, table, plan, options))
                        .await;
                    match resolved {
                        Ok(None) => {
                            let status = if report.batches > 0 {
                                TableStatus::Enriched
                            } else {
                                TableStatus::UpToDate
                            };
                            Phase::Done(status)
                        }
                        Ok(Some(range)) => {
                            if report.batches == 0 {
                                report.watermark_before = range.last_enriched;
                            }
                            report.watermark_after = range.last_enriched;

                            if previous.as_ref() == Some(&range) {
                                warn!(
                                    pending_from = ?range.pending_start(),
                                    "Committed batch did not advance the watermark, stopping"
                                );
                                report.pending_from = range.pending_start();
                                Phase::Done(TableStatus::Stalled)
                            } else if shutdown.is_triggered() {
                                report.pending_from = range.pending_start();
                                Phase::Done(TableStatus::Cancelled)
                            } else {
                                Phase::Batch(range)
                            }
                        }
                        Err(e) => {
                            // earlier batches may have committed; report where the table really stands
                            let pending_from = match self.locate_watermark(&name, plan).await {
                                Some((watermark, next)) => {
                                    report.watermark_after = watermark;
                                    next
                                }
                                None => None,
                            };
                            return report_failure(report, e, pending_from);
                        }
                    }
                }

                Phase::Batch(range) => {
                    let pending = &range;
                    let committed = self
                        .retry_storage(&name, move || self.run_batch(table, plan, pending, has_daily))
                        .await;
                    match committed {
                        Ok(written) => {
                            report.batches += 1;
                            report.rows_written += written;
                            debug!(
                                rows = written,
                                pending_end = range.pending_end,
                                "Committed batch"
                            );
                            previous = Some(range);
                            Phase::Resolve
                        }
                        Err(e) => return report_failure(report, e, range.pending_start()),
                    }
                }

                Phase::Done(status) => {
                    report.status = status;
                    if matches!(status, TableStatus::Enriched | TableStatus::UpToDate) {
                        let columns = plan.watermark_columns();
                        if let Ok(watermark) =
                            self.store.max_enriched_timestamp(&name, &columns).await
                        {
                            report.watermark_after = watermark;
                            if report.batches == 0 {
                                report.watermark_before = watermark;
                            }
                        }
                    }
                    if report.batches > 0 {
                        info!(
                            status = status.as_str(),
                            rows = report.rows_written,
                            batches = report.batches,
                            "Table enrichment finished"
                        );
                    }
                    return report;
                }
            };
        }
    }

    /// Add every missing derived column of the plan
    pub async fn ensure_schema(&self, table: &str, plan: &ColumnPlan) -> Result<(), AppError> {
        let as_schema_error = |e: AppError| match e {
            AppError::Schema { .. } => e,
            other => AppError::Schema {
                table: table.to_string(),
                message: other.to_string(),
            },
        };

        let existing = self.store.table_columns(table).await.map_err(as_schema_error)?;
        if let Some(missing) = INGESTION_COLUMNS
            .iter()
            .find(|c| !existing.iter().any(|e| e == *c))
        {
            return Err(AppError::Schema {
                table: table.to_string(),
                message: format!("missing ingestion column '{}'", missing),
            });
        }

        for column in plan.derived_columns() {
            if !existing.contains(&column) {
                self.store
                    .add_column(table, &column, DERIVED_COLUMN_TYPE)
                    .await
                    .map_err(as_schema_error)?;
            }
        }
        Ok(())
    }

    /// Run `operation` again with backoff while it fails with a transient
    /// storage error
    async fn retry_storage<T, F, Fut>(&self, table: &str, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut backoff = ExponentialBackoff::new(
            self.config.retry_base_delay,
            self.config.retry_max_delay,
            self.config.max_retries,
        );

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, attempt = backoff.attempts() + 1, "Storage step failed");
                    if !backoff.wait(table).await {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Current watermark and the first row after it; None when storage
    /// cannot answer either
    async fn locate_watermark(
        &self,
        table: &str,
        plan: &ColumnPlan,
    ) -> Option<(Option<i64>, Option<i64>)> {
        let watermark = self
            .store
            .max_enriched_timestamp(table, &plan.watermark_columns())
            .await
            .ok()?;
        let next = self.store.nth_timestamp_after(table, watermark, 1).await.ok()?;
        Some((watermark, next))
    }

    /// Load the buffered slice, compute, and commit the write set
    async fn run_batch(
        &self,
        table: &TableId,
        plan: &ColumnPlan,
        range: &PendingRange,
        has_daily: bool,
    ) -> Result<usize, AppError> {
        let name = table.name();
        let candles = self
            .store
            .read_range(&name, range.buffered_start, range.load_end(), &[])
            .await?;

        let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
            return Ok(0);
        };

        let frame = if table.timeframe.is_daily() {
            compute_baseline(&candles)
        } else {
            let index = if has_daily {
                BaselineIndex::load(
                    self.store.as_ref(),
                    &table.daily_sibling(),
                    first.timestamp,
                    last.timestamp,
                )
                .await?
            } else {
                BaselineIndex::default()
            };
            let inherited = join_baseline(&candles, &index);
            compute_window_metrics(&candles, plan, &inherited)
        };

        let rows: Vec<RowUpdate> = candles
            .iter()
            .enumerate()
            .filter(|(_, candle)| range.should_write(candle.timestamp))
            .map(|(i, candle)| RowUpdate {
                timestamp: candle.timestamp,
                values: frame.row(i),
            })
            .collect();

        let mut transaction = self.store.begin().await?;
        let written = transaction
            .write_columns(&name, frame.columns(), &rows)
            .await?;
        transaction.commit().await?;

        Ok(written)
    }

    /// Report watermark and next pending range without writing anything
    pub async fn inspect_table(
        &self,
        table: &TableId,
        has_daily: bool,
    ) -> Result<TableInspection, AppError> {
        let plan = self.plan_for(table)?;
        let name = table.name();

        let existing = self.store.table_columns(&name).await?;
        let missing_columns: Vec<String> = plan
            .derived_columns()
            .into_iter()
            .filter(|c| !existing.contains(c))
            .collect();

        let (watermark, pending) = if missing_columns.is_empty() {
            let watermark = self
                .store
                .max_enriched_timestamp(&name, &plan.watermark_columns())
                .await?;
            let options = self.resolve_options(has_daily);
            let pending = watermark::resolve(self.store.as_ref(), table, plan, &options).await?;
            (watermark, pending)
        } else {
            // columns not created yet: every row is pending
            let pending =
                watermark::fresh_range(self.store.as_ref(), &name, self.config.batch_size).await?;
            (None, pending)
        };

        Ok(TableInspection {
            table: name,
            watermark,
            missing_columns,
            pending,
        })
    }
}

fn report_failure(
    mut report: TableReport,
    error: AppError,
    pending_from: Option<i64>,
) -> TableReport {
    error!(
        table = %report.table,
        error = %error,
        pending_from = ?pending_from,
        "Table enrichment failed"
    );
    report.status = TableStatus::Failed;
    report.pending_from = pending_from;
    report.with_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SECONDS_PER_DAY;
    use crate::models::{Candle, Timeframe};
    use crate::services::database::{SqliteBatch, SqliteCandleStore};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    // 2025-06-02 00:00 UTC
    const DAY0: i64 = 1_748_822_400;
    const M15: i64 = 900;

    fn price(step: i64) -> f64 {
        1.10 + (step as f64 * 0.37).sin() * 0.02 + step as f64 * 0.0001
    }

    fn daily_candles(days: std::ops::Range<i64>) -> Vec<Candle> {
        days.map(|d| {
            let close = price(d);
            Candle::new(
                DAY0 + d * SECONDS_PER_DAY,
                price(d - 1),
                close + 0.004,
                close - 0.005,
                close,
                1000.0 + (d % 5) as f64 * 100.0,
            )
        })
        .collect()
    }

    fn m15_candles(bars: std::ops::Range<i64>) -> Vec<Candle> {
        bars.map(|i| {
            let close = price(i);
            Candle::new(DAY0 + i * M15, price(i - 1), close + 0.001, close - 0.0012, close, 50.0)
        })
        .collect()
    }

    fn test_config(batch_size: usize) -> EnrichConfig {
        EnrichConfig {
            batch_size,
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
            ..EnrichConfig::default()
        }
    }

    fn enricher_for<S: StorageGateway>(store: Arc<S>, config: EnrichConfig) -> Enricher<S> {
        let catalog = TimeframeCatalog::from_config(&config).unwrap();
        Enricher::new(store, Arc::new(catalog), Arc::new(config))
    }

    fn daily() -> TableId {
        TableId::new("EURUSD", Timeframe::Day1)
    }

    fn m15() -> TableId {
        TableId::new("EURUSD", Timeframe::Minute15)
    }

    async fn seeded(dir: &TempDir, name: &str, days: i64, m15_bars: i64) -> Arc<SqliteCandleStore> {
        let store = SqliteCandleStore::new(dir.path().join(name)).await.unwrap();
        store.create_candle_table(&daily().name()).await.unwrap();
        store
            .append_candles(&daily().name(), &daily_candles(0..days))
            .await
            .unwrap();
        store.create_candle_table(&m15().name()).await.unwrap();
        store
            .append_candles(&m15().name(), &m15_candles(0..m15_bars))
            .await
            .unwrap();
        Arc::new(store)
    }

    async fn snapshot<S: StorageGateway>(enricher: &Enricher<S>, table: &TableId) -> Vec<Candle> {
        let columns = enricher.plan_for(table).unwrap().derived_columns();
        enricher
            .store()
            .read_range(&table.name(), i64::MIN, i64::MAX, &columns)
            .await
            .unwrap()
    }

    async fn enrich_symbol<S: StorageGateway>(enricher: &Enricher<S>) -> (TableReport, TableReport) {
        let shutdown = ShutdownSignal::new();
        let d1 = enricher.enrich_table(&daily(), true, &shutdown).await;
        let m15 = enricher.enrich_table(&m15(), true, &shutdown).await;
        (d1, m15)
    }

    #[tokio::test]
    async fn test_enrich_then_idempotent() {
        let temp_dir = tempdir().unwrap();
        let store = seeded(&temp_dir, "a.db", 30, 96 * 5).await;
        let enricher = enricher_for(store, test_config(50_000));

        let (d1, intraday) = enrich_symbol(&enricher).await;
        assert_eq!(d1.status, TableStatus::Enriched);
        assert_eq!(d1.rows_written, 30);
        assert_eq!(intraday.status, TableStatus::Enriched);
        assert_eq!(intraday.rows_written, 480);
        assert_eq!(intraday.watermark_after, Some(DAY0 + 479 * M15));

        let first = snapshot(&enricher, &m15()).await;
        let (d1_again, m15_again) = enrich_symbol(&enricher).await;
        assert_eq!(d1_again.status, TableStatus::UpToDate);
        assert_eq!(m15_again.status, TableStatus::UpToDate);
        assert_eq!(m15_again.rows_written, 0);
        assert_eq!(snapshot(&enricher, &m15()).await, first);

        // every intraday row inherits its date's D1 baseline
        let d1_rows = snapshot(&enricher, &daily()).await;
        for row in &first {
            let day = (row.timestamp - DAY0) / SECONDS_PER_DAY;
            assert_eq!(row.metric("atr_20d"), d1_rows[day as usize].metric("atr_20d"));
            assert_eq!(
                row.metric("move_1h_atr"),
                row.metric("move_1h").map(|m| m / row.metric("atr_20d").unwrap())
            );
        }
    }

    #[tokio::test]
    async fn test_small_batches_match_single_pass() {
        let temp_dir = tempdir().unwrap();
        let single = enricher_for(seeded(&temp_dir, "single.db", 40, 96 * 6).await, test_config(50_000));
        let batched = enricher_for(seeded(&temp_dir, "batched.db", 40, 96 * 6).await, test_config(7));

        enrich_symbol(&single).await;
        let (d1, intraday) = enrich_symbol(&batched).await;
        assert_eq!(d1.batches, 6);
        assert!(intraday.batches > 1);

        assert_eq!(snapshot(&single, &daily()).await, snapshot(&batched, &daily()).await);
        assert_eq!(snapshot(&single, &m15()).await, snapshot(&batched, &m15()).await);
    }

    #[tokio::test]
    async fn test_appended_rows_match_full_recompute() {
        let temp_dir = tempdir().unwrap();
        let full = enricher_for(seeded(&temp_dir, "full.db", 40, 96 * 6).await, test_config(50_000));
        let incremental = enricher_for(seeded(&temp_dir, "inc.db", 25, 96 * 4).await, test_config(50_000));

        enrich_symbol(&full).await;
        let (_, first) = enrich_symbol(&incremental).await;

        let store = incremental.store();
        store
            .append_candles(&daily().name(), &daily_candles(25..40))
            .await
            .unwrap();
        store
            .append_candles(&m15().name(), &m15_candles(96 * 4..96 * 6))
            .await
            .unwrap();
        let (_, second) = enrich_symbol(&incremental).await;

        // watermark only moves forward and covers every row
        assert!(second.watermark_after > first.watermark_after);
        assert_eq!(second.watermark_before, first.watermark_after);
        assert_eq!(snapshot(&full, &daily()).await, snapshot(&incremental, &daily()).await);
        assert_eq!(snapshot(&full, &m15()).await, snapshot(&incremental, &m15()).await);
    }

    #[tokio::test]
    async fn test_missing_daily_bar_leaves_atr_null() {
        let temp_dir = tempdir().unwrap();
        // D1 covers 2025-06-02..=2025-07-11; M15 runs into 2025-07-12
        let store = SqliteCandleStore::new(temp_dir.path().join("gap.db")).await.unwrap();
        store.create_candle_table(&daily().name()).await.unwrap();
        store.append_candles(&daily().name(), &daily_candles(0..40)).await.unwrap();
        store.create_candle_table(&m15().name()).await.unwrap();
        store
            .append_candles(&m15().name(), &m15_candles(96 * 39..96 * 41))
            .await
            .unwrap();
        let enricher = enricher_for(Arc::new(store), test_config(50_000));

        let (_, report) = enrich_symbol(&enricher).await;
        assert_eq!(report.status, TableStatus::Enriched);

        let rows = snapshot(&enricher, &m15()).await;
        let jul_12 = DAY0 + 40 * SECONDS_PER_DAY;
        for row in rows.iter().filter(|r| r.timestamp >= jul_12) {
            assert_eq!(row.metric("atr_20d"), None);
            assert_eq!(row.metric("move_1h_atr"), None);
            assert_eq!(row.metric("range_15m_atr"), None);
            assert!(row.metric("move_1h").is_some());
            assert!(row.metric("range_1d").is_some());
        }
        assert!(rows
            .iter()
            .filter(|r| r.timestamp < jul_12)
            .all(|r| r.metric("range_60m_atr").is_some()));
    }

    #[tokio::test]
    async fn test_late_daily_bar_fills_provisional_rows() {
        let temp_dir = tempdir().unwrap();
        let store = seeded(&temp_dir, "late.db", 3, 96 * 4).await;
        let enricher = enricher_for(store, test_config(50_000));

        enrich_symbol(&enricher).await;
        let day_3 = DAY0 + 3 * SECONDS_PER_DAY;
        let before = snapshot(&enricher, &m15()).await;
        assert!(before
            .iter()
            .filter(|r| r.timestamp >= day_3)
            .all(|r| r.metric("atr_20d").is_none()));

        enricher
            .store()
            .append_candles(&daily().name(), &daily_candles(3..4))
            .await
            .unwrap();
        let (d1, intraday) = enrich_symbol(&enricher).await;
        assert_eq!(d1.rows_written, 1);
        assert_eq!(intraday.status, TableStatus::Enriched);
        assert_eq!(intraday.rows_written, 96);

        let d1_atr = snapshot(&enricher, &daily()).await[3].metric("atr_20d");
        let after = snapshot(&enricher, &m15()).await;
        for row in after.iter().filter(|r| r.timestamp >= day_3) {
            assert_eq!(row.metric("atr_20d"), d1_atr);
            assert!(row.metric("range_1d_atr").is_some());
        }

        let (_, settled) = enrich_symbol(&enricher).await;
        assert_eq!(settled.status, TableStatus::UpToDate);
    }

    #[tokio::test]
    async fn test_no_daily_table_inherits_nothing() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteCandleStore::new(temp_dir.path().join("solo.db")).await.unwrap();
        store.create_candle_table(&m15().name()).await.unwrap();
        store.append_candles(&m15().name(), &m15_candles(0..200)).await.unwrap();
        let enricher = enricher_for(Arc::new(store), test_config(50_000));

        let report = enricher.enrich_table(&m15(), false, &ShutdownSignal::new()).await;
        assert_eq!(report.status, TableStatus::Enriched);
        assert!(snapshot(&enricher, &m15())
            .await
            .iter()
            .all(|r| r.metric("atr_20d").is_none() && r.metric("range_2h").is_some()));
    }

    #[tokio::test]
    async fn test_missing_ingestion_column_is_schema_failure() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteCandleStore::new(temp_dir.path().join("bad.db")).await.unwrap();
        store.create_candle_table("candles_GBPUSD_H1").await.unwrap();
        let enricher = enricher_for(Arc::new(store), test_config(50_000));

        let empty = TableId::new("GBPUSD", Timeframe::Hour1);
        let report = enricher.enrich_table(&empty, false, &ShutdownSignal::new()).await;
        assert_eq!(report.status, TableStatus::UpToDate);

        // dropped after discovery: no ingestion columns left
        let vanished = TableId::new("GBPUSD", Timeframe::Hour4);
        let report = enricher.enrich_table(&vanished, false, &ShutdownSignal::new()).await;
        assert_eq!(report.status, TableStatus::Failed);
        assert!(report.error.unwrap().contains("missing ingestion column"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_before_first_batch() {
        let temp_dir = tempdir().unwrap();
        let store = seeded(&temp_dir, "cancel.db", 10, 0).await;
        let enricher = enricher_for(store, test_config(50_000));

        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let report = enricher.enrich_table(&daily(), true, &shutdown).await;
        assert_eq!(report.status, TableStatus::Cancelled);
        assert_eq!(report.pending_from, Some(DAY0));
        assert_eq!(report.rows_written, 0);
    }

    /// Gateway that fails the first `failures` transactions with a storage
    /// error, and `bounds_failures` watermark lookups once `bounds_ok` calls
    /// have succeeded
    struct FlakyStore {
        inner: SqliteCandleStore,
        failures: AtomicU32,
        bounds_ok: AtomicU32,
        bounds_failures: AtomicU32,
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait::async_trait]
    impl StorageGateway for FlakyStore {
        type Tx = SqliteBatch;

        async fn list_tables(&self, prefix: &str) -> Result<Vec<String>, AppError> {
            self.inner.list_tables(prefix).await
        }

        async fn table_columns(&self, table: &str) -> Result<Vec<String>, AppError> {
            self.inner.table_columns(table).await
        }

        async fn add_column(&self, table: &str, column: &str, sql_type: &str) -> Result<(), AppError> {
            self.inner.add_column(table, column, sql_type).await
        }

        async fn read_range(
            &self,
            table: &str,
            from: i64,
            to: i64,
            derived: &[String],
        ) -> Result<Vec<Candle>, AppError> {
            self.inner.read_range(table, from, to, derived).await
        }

        async fn min_timestamp(&self, table: &str) -> Result<Option<i64>, AppError> {
            self.inner.min_timestamp(table).await
        }

        async fn max_enriched_timestamp(
            &self,
            table: &str,
            columns: &[String],
        ) -> Result<Option<i64>, AppError> {
            self.inner.max_enriched_timestamp(table, columns).await
        }

        async fn unenriched_bounds(
            &self,
            table: &str,
            columns: &[String],
        ) -> Result<Option<(i64, i64)>, AppError> {
            if !take_one(&self.bounds_ok) && take_one(&self.bounds_failures) {
                return Err(AppError::StorageIo("database is locked".to_string()));
            }
            self.inner.unenriched_bounds(table, columns).await
        }

        async fn nth_timestamp_after(
            &self,
            table: &str,
            after: Option<i64>,
            n: usize,
        ) -> Result<Option<i64>, AppError> {
            self.inner.nth_timestamp_after(table, after, n).await
        }

        async fn nth_timestamp_back(
            &self,
            table: &str,
            anchor: i64,
            n: usize,
        ) -> Result<Option<i64>, AppError> {
            self.inner.nth_timestamp_back(table, anchor, n).await
        }

        async fn null_timestamps(
            &self,
            table: &str,
            column: &str,
            from: i64,
            to: i64,
        ) -> Result<Vec<i64>, AppError> {
            self.inner.null_timestamps(table, column, from, to).await
        }

        async fn begin(&self) -> Result<SqliteBatch, AppError> {
            if take_one(&self.failures) {
                return Err(AppError::StorageIo("database is locked".to_string()));
            }
            self.inner.begin().await
        }
    }

    async fn flaky(dir: &TempDir, failures: u32) -> Arc<FlakyStore> {
        flaky_lookups(dir, failures, 0, 0).await
    }

    async fn flaky_lookups(
        dir: &TempDir,
        failures: u32,
        bounds_ok: u32,
        bounds_failures: u32,
    ) -> Arc<FlakyStore> {
        let inner = SqliteCandleStore::new(dir.path().join("flaky.db")).await.unwrap();
        inner.create_candle_table(&daily().name()).await.unwrap();
        inner.append_candles(&daily().name(), &daily_candles(0..10)).await.unwrap();
        Arc::new(FlakyStore {
            inner,
            failures: AtomicU32::new(failures),
            bounds_ok: AtomicU32::new(bounds_ok),
            bounds_failures: AtomicU32::new(bounds_failures),
        })
    }

    #[tokio::test]
    async fn test_transient_lookup_failure_between_batches_is_retried() {
        let temp_dir = tempdir().unwrap();
        // the lookup after the first commit fails once
        let enricher = enricher_for(flaky_lookups(&temp_dir, 0, 1, 1).await, test_config(4));

        let report = enricher.enrich_table(&daily(), true, &ShutdownSignal::new()).await;
        assert_eq!(report.status, TableStatus::Enriched);
        assert_eq!(report.rows_written, 10);
        assert_eq!(report.batches, 3);
        assert_eq!(report.watermark_after, Some(DAY0 + 9 * SECONDS_PER_DAY));
    }

    #[tokio::test]
    async fn test_failed_lookup_reports_committed_watermark() {
        let temp_dir = tempdir().unwrap();
        // every lookup after the first commit fails, past the retry budget
        let enricher = enricher_for(flaky_lookups(&temp_dir, 0, 1, 10).await, test_config(4));

        let report = enricher.enrich_table(&daily(), true, &ShutdownSignal::new()).await;
        assert_eq!(report.status, TableStatus::Failed);
        assert_eq!(report.rows_written, 4);
        assert_eq!(report.watermark_before, None);
        assert_eq!(report.watermark_after, Some(DAY0 + 3 * SECONDS_PER_DAY));
        assert_eq!(report.pending_from, Some(DAY0 + 4 * SECONDS_PER_DAY));
        assert!(report.error.unwrap().contains("database is locked"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let temp_dir = tempdir().unwrap();
        let enricher = enricher_for(flaky(&temp_dir, 2).await, test_config(50_000));

        let report = enricher.enrich_table(&daily(), true, &ShutdownSignal::new()).await;
        assert_eq!(report.status, TableStatus::Enriched);
        assert_eq!(report.rows_written, 10);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_table_failed() {
        let temp_dir = tempdir().unwrap();
        let enricher = enricher_for(flaky(&temp_dir, 10).await, test_config(4));

        let report = enricher.enrich_table(&daily(), true, &ShutdownSignal::new()).await;
        assert_eq!(report.status, TableStatus::Failed);
        assert_eq!(report.pending_from, Some(DAY0));
        assert_eq!(report.rows_written, 0);
        assert!(report.error.unwrap().contains("database is locked"));

        // nothing half-written: the watermark is untouched
        let columns = vec!["atr_20d".to_string(), "avg_volume_20d".to_string()];
        let watermark = enricher
            .store()
            .max_enriched_timestamp(&daily().name(), &columns)
            .await
            .unwrap();
        assert_eq!(watermark, None);
    }

    #[tokio::test]
    async fn test_inspect_reports_pending_without_writing() {
        let temp_dir = tempdir().unwrap();
        let store = seeded(&temp_dir, "inspect.db", 10, 0).await;
        let enricher = enricher_for(store, test_config(50_000));

        let before = enricher.inspect_table(&daily(), true).await.unwrap();
        assert_eq!(before.missing_columns.len(), 3);
        assert_eq!(before.watermark, None);
        let fresh = before.pending.unwrap();
        assert_eq!(fresh.last_enriched, None);
        assert_eq!(fresh.buffered_start, DAY0);
        assert_eq!(fresh.first_unenriched, Some(DAY0));
        assert_eq!(fresh.last_unenriched, Some(DAY0 + 9 * SECONDS_PER_DAY));
        assert_eq!(fresh.pending_end, DAY0 + 9 * SECONDS_PER_DAY);

        enricher.enrich_table(&daily(), true, &ShutdownSignal::new()).await;
        enricher
            .store()
            .append_candles(&daily().name(), &daily_candles(10..12))
            .await
            .unwrap();

        let after = enricher.inspect_table(&daily(), true).await.unwrap();
        assert!(after.missing_columns.is_empty());
        assert_eq!(after.watermark, Some(DAY0 + 9 * SECONDS_PER_DAY));
        let pending = after.pending.unwrap();
        assert_eq!(pending.first_unenriched, Some(DAY0 + 10 * SECONDS_PER_DAY));
        assert_eq!(pending.pending_end, DAY0 + 11 * SECONDS_PER_DAY);
    }
}
