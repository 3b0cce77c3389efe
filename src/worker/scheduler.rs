//! Run every selected table through the enricher on a bounded worker pool
//!
//! Each symbol's D1 table opens a gate when it finishes; the symbol's
//! intraday tables wait on that gate before taking a pool permit, so a small
//! pool can never fill up with units blocked on a D1 that has no permit.

use crate::constants::TABLE_PREFIX;
use crate::error::AppError;
use crate::models::{RunReport, TableId, TableReport, TableStatus, Timeframe};
use crate::services::{Enricher, StorageGateway};
use crate::worker::ShutdownSignal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of a symbol's D1 table as seen by its intraday tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Ready,
    Failed,
    Cancelled,
}

impl GateState {
    fn from_status(status: TableStatus) -> Self {
        match status {
            TableStatus::Enriched | TableStatus::UpToDate => GateState::Ready,
            TableStatus::Cancelled => GateState::Cancelled,
            TableStatus::Failed | TableStatus::Stalled | TableStatus::Skipped => GateState::Failed,
        }
    }
}

/// Per-symbol dependency gate
#[derive(Debug)]
pub struct SymbolGate {
    sender: watch::Sender<GateState>,
}

impl SymbolGate {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(GateState::Pending);
        Self { sender }
    }

    /// A gate that is already open
    pub fn ready() -> Self {
        let (sender, _) = watch::channel(GateState::Ready);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.sender.subscribe()
    }

    pub fn open(&self, state: GateState) {
        self.sender.send_replace(state);
    }
}

impl Default for SymbolGate {
    fn default() -> Self {
        Self::new()
    }
}

struct OpenOnDrop<'a> {
    gate: Option<&'a SymbolGate>,
    state: GateState,
}

impl Drop for OpenOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(gate) = self.gate {
            gate.open(self.state);
        }
    }
}

/// Block until the gate leaves `Pending`; a dropped sender counts as failed
pub async fn wait_for_gate(mut receiver: watch::Receiver<GateState>) -> GateState {
    match receiver.wait_for(|state| *state != GateState::Pending).await {
        Ok(state) => *state,
        Err(_) => GateState::Failed,
    }
}

/// Discover candle tables and enrich the selected ones
#[instrument(skip(enricher, shutdown))]
pub async fn run_enrichment<S>(
    enricher: Enricher<S>,
    shutdown: ShutdownSignal,
) -> Result<RunReport, AppError>
where
    S: StorageGateway + 'static,
{
    let started = Instant::now();
    let config = enricher.config().clone();

    let discovered = discover_tables(enricher.store().as_ref()).await?;
    let daily_symbols = symbols_with_daily(&discovered);

    let mut selected: Vec<TableId> = discovered
        .into_iter()
        .filter(|t| config.selects(t))
        .collect();
    // D1 first so their permits are requested before intraday units queue up
    selected.sort_by_key(|t| (!t.timeframe.is_daily(), t.symbol.clone(), t.timeframe));

    info!(
        tables = selected.len(),
        workers = config.workers,
        batch_size = config.batch_size,
        "Starting enrichment run"
    );

    // a D1 table outside the selection is not run, so its gate starts open
    let mut gates: HashMap<String, SymbolGate> = HashMap::new();
    for symbol in &daily_symbols {
        let runs_daily = selected
            .iter()
            .any(|t| t.timeframe.is_daily() && &t.symbol == symbol);
        let gate = if runs_daily {
            SymbolGate::new()
        } else {
            SymbolGate::ready()
        };
        gates.insert(symbol.clone(), gate);
    }
    let gates = Arc::new(gates);

    let semaphore = Arc::new(Semaphore::new(config.workers));
    let mut tasks: JoinSet<TableReport> = JoinSet::new();

    for table in selected.iter().cloned() {
        let enricher = enricher.clone();
        let semaphore = Arc::clone(&semaphore);
        let gates = Arc::clone(&gates);
        let shutdown = shutdown.clone();
        let has_daily = daily_symbols.contains(&table.symbol);

        tasks.spawn(async move {
            if !table.timeframe.is_daily() {
                if let Some(gate) = gates.get(&table.symbol) {
                    match wait_for_gate(gate.subscribe()).await {
                        GateState::Ready | GateState::Pending => {}
                        GateState::Failed => {
                            warn!(table = %table, "Skipping: daily table failed this run");
                            return TableReport::new(&table, TableStatus::Skipped)
                                .with_error("daily baseline table failed this run");
                        }
                        GateState::Cancelled => {
                            return TableReport::new(&table, TableStatus::Cancelled);
                        }
                    }
                }
            }

            // opens as failed unless the daily table reports otherwise, even on panic
            let mut gate_guard = OpenOnDrop {
                gate: table
                    .timeframe
                    .is_daily()
                    .then(|| gates.get(&table.symbol))
                    .flatten(),
                state: GateState::Failed,
            };

            let Ok(_permit) = semaphore.acquire_owned().await else {
                return TableReport::new(&table, TableStatus::Failed)
                    .with_error("worker pool closed");
            };

            debug!(table = %table, "Worker picked up table");
            let report = enricher.enrich_table(&table, has_daily, &shutdown).await;
            gate_guard.state = GateState::from_status(report.status);
            report
        });
    }

    let mut report = RunReport::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(table_report) => report.push(table_report),
            Err(e) => error!(error = %e, "Enrichment task panicked"),
        }
    }

    // a panicked task leaves no report of its own
    for table in &selected {
        if report.get(&table.name()).is_none() {
            report.push(
                TableReport::new(table, TableStatus::Failed).with_error("worker task panicked"),
            );
        }
    }

    report.finish(started.elapsed());
    info!(
        tables = report.total_processed(),
        enriched = report.count(TableStatus::Enriched),
        up_to_date = report.count(TableStatus::UpToDate),
        failed = report.count(TableStatus::Failed),
        skipped = report.count(TableStatus::Skipped),
        rows = report.rows_written(),
        elapsed_ms = report.elapsed_ms as u64,
        "Enrichment run finished"
    );

    Ok(report)
}

/// Candle tables in the database, parsed; foreign tables are ignored
pub async fn discover_tables<S: StorageGateway>(store: &S) -> Result<Vec<TableId>, AppError> {
    let names = store.list_tables(TABLE_PREFIX).await?;
    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        match TableId::parse(&name) {
            Some(table) => tables.push(table),
            None => debug!(table = %name, "Ignoring table outside the naming scheme"),
        }
    }
    Ok(tables)
}

/// Symbols that have a D1 table among `tables`
pub fn symbols_with_daily(tables: &[TableId]) -> BTreeSet<String> {
    tables
        .iter()
        .filter(|t| t.timeframe == Timeframe::Day1)
        .map(|t| t.symbol.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SECONDS_PER_DAY;
    use crate::models::{Candle, EnrichConfig};
    use crate::services::{SqliteCandleStore, TimeframeCatalog};
    use std::time::Duration;
    use tempfile::tempdir;

    fn candles(step: i64, count: i64) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let close = 1.2 + (i as f64 * 0.3).cos() * 0.01;
                Candle::new(i * step, close, close + 0.002, close - 0.002, close, 10.0)
            })
            .collect()
    }

    async fn enricher_with(
        store: SqliteCandleStore,
        configure: impl FnOnce(&mut EnrichConfig),
    ) -> Enricher<SqliteCandleStore> {
        let mut config = EnrichConfig {
            workers: 1,
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
            ..EnrichConfig::default()
        };
        configure(&mut config);
        let catalog = TimeframeCatalog::from_config(&config).unwrap();
        Enricher::new(Arc::new(store), Arc::new(catalog), Arc::new(config))
    }

    #[tokio::test]
    async fn test_gate_wait() {
        let gate = SymbolGate::new();
        let receiver = gate.subscribe();
        let waiter = tokio::spawn(wait_for_gate(receiver));
        gate.open(GateState::Failed);
        assert_eq!(waiter.await.unwrap(), GateState::Failed);

        assert_eq!(wait_for_gate(SymbolGate::ready().subscribe()).await, GateState::Ready);

        let dropped = SymbolGate::new();
        let receiver = dropped.subscribe();
        drop(dropped);
        assert_eq!(wait_for_gate(receiver).await, GateState::Failed);
    }

    #[tokio::test]
    async fn test_run_with_single_worker_completes() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteCandleStore::new(temp_dir.path().join("run.db")).await.unwrap();
        for (name, step, count) in [
            ("candles_EURUSD_D1", SECONDS_PER_DAY, 30),
            ("candles_EURUSD_M5", 300, 600),
            ("candles_EURUSD_H1", 3600, 200),
            ("candles_USDJPY_M15", 900, 100),
        ] {
            store.create_candle_table(name).await.unwrap();
            store.append_candles(name, &candles(step, count)).await.unwrap();
        }
        store.create_candle_table("candles_EURUSD_W1").await.unwrap();

        let enricher = enricher_with(store, |_| {}).await;
        let report = run_enrichment(enricher.clone(), ShutdownSignal::new())
            .await
            .unwrap();

        assert_eq!(report.total_processed(), 4);
        assert_eq!(report.count(TableStatus::Enriched), 4);
        assert_eq!(report.get("candles_EURUSD_M5").unwrap().rows_written, 600);
        assert!(!report.has_failures());

        let again = run_enrichment(enricher, ShutdownSignal::new()).await.unwrap();
        assert_eq!(again.count(TableStatus::UpToDate), 4);
    }

    #[tokio::test]
    async fn test_failed_daily_skips_intraday() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteCandleStore::new(temp_dir.path().join("skip.db")).await.unwrap();
        store.create_candle_table("candles_GBPUSD_M5").await.unwrap();
        store
            .append_candles("candles_GBPUSD_M5", &candles(300, 50))
            .await
            .unwrap();
        store.create_candle_table("candles_AUDUSD_M5").await.unwrap();
        store
            .append_candles("candles_AUDUSD_M5", &candles(300, 50))
            .await
            .unwrap();
        // a D1 table with no price columns fails schema checks
        sqlx::query("CREATE TABLE candles_GBPUSD_D1 (timestamp INTEGER PRIMARY KEY)")
            .execute(store.pool())
            .await
            .unwrap();

        let enricher = enricher_with(store, |c| c.workers = 2).await;
        let report = run_enrichment(enricher, ShutdownSignal::new()).await.unwrap();

        assert_eq!(report.get("candles_GBPUSD_D1").unwrap().status, TableStatus::Failed);
        assert_eq!(report.get("candles_GBPUSD_M5").unwrap().status, TableStatus::Skipped);
        // other symbols are unaffected
        assert_eq!(report.get("candles_AUDUSD_M5").unwrap().status, TableStatus::Enriched);
    }

    #[tokio::test]
    async fn test_symbol_and_timeframe_filters() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteCandleStore::new(temp_dir.path().join("filter.db")).await.unwrap();
        for name in ["candles_EURUSD_D1", "candles_EURUSD_M1", "candles_GBPUSD_D1"] {
            store.create_candle_table(name).await.unwrap();
            store.append_candles(name, &candles(60, 10)).await.unwrap();
        }

        let enricher = enricher_with(store, |c| {
            c.symbols = Some(vec!["EURUSD".to_string()]);
            c.timeframes = vec![Timeframe::Minute1];
        })
        .await;
        let report = run_enrichment(enricher, ShutdownSignal::new()).await.unwrap();

        assert_eq!(report.total_processed(), 1);
        assert_eq!(report.tables[0].table, "candles_EURUSD_M1");
        assert_eq!(report.tables[0].status, TableStatus::Enriched);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_cancels_everything() {
        let temp_dir = tempdir().unwrap();
        let store = SqliteCandleStore::new(temp_dir.path().join("stop.db")).await.unwrap();
        for name in ["candles_EURUSD_D1", "candles_EURUSD_H4"] {
            store.create_candle_table(name).await.unwrap();
            store.append_candles(name, &candles(14_400, 20)).await.unwrap();
        }

        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let enricher = enricher_with(store, |_| {}).await;
        let report = run_enrichment(enricher, shutdown).await.unwrap();

        assert_eq!(report.count(TableStatus::Cancelled), 2);
        assert_eq!(report.rows_written(), 0);
    }

    #[test]
    fn test_symbols_with_daily() {
        let tables = vec![
            TableId::new("EURUSD", Timeframe::Day1),
            TableId::new("EURUSD", Timeframe::Minute1),
            TableId::new("GBPUSD", Timeframe::Hour1),
        ];
        let symbols = symbols_with_daily(&tables);
        assert_eq!(symbols.into_iter().collect::<Vec<_>>(), vec!["EURUSD"]);
    }
}
