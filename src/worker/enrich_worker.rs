use crate::models::TableStatus;
use crate::services::{Enricher, StorageGateway};
use crate::worker::{run_enrichment, ShutdownSignal};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Enrich repeatedly, sleeping `interval` between runs, until shutdown
///
/// Returns the number of completed iterations.
#[instrument(skip(enricher, shutdown))]
pub async fn run<S>(enricher: Enricher<S>, interval: Duration, shutdown: ShutdownSignal) -> u64
where
    S: StorageGateway + 'static,
{
    info!(
        interval_secs = interval.as_secs(),
        "Starting enrichment worker"
    );

    let mut iteration_count = 0u64;

    loop {
        if shutdown.is_triggered() {
            break;
        }

        iteration_count += 1;
        let loop_start = std::time::Instant::now();
        info!(iteration = iteration_count, "Enrichment worker: Starting run");

        match run_enrichment(enricher.clone(), shutdown.clone()).await {
            Ok(report) => {
                let failed = report.count(TableStatus::Failed) + report.count(TableStatus::Stalled);
                if failed > 0 {
                    warn!(
                        iteration = iteration_count,
                        failed_tables = failed,
                        "Enrichment worker: Some tables failed, retrying next iteration"
                    );
                }
                info!(
                    iteration = iteration_count,
                    tables = report.total_processed(),
                    rows = report.rows_written(),
                    loop_duration_secs = loop_start.elapsed().as_secs_f64(),
                    next_run_secs = interval.as_secs(),
                    "Enrichment worker: Iteration completed"
                );
            }
            Err(e) => {
                // the database may be briefly unavailable; try again next tick
                error!(iteration = iteration_count, error = %e, "Enrichment worker: Run failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.wait() => {}
        }
    }

    info!(iterations = iteration_count, "Enrichment worker stopped");
    iteration_count
}
