pub mod enrich;
pub mod status;
pub mod watch;

use crate::error::AppError;
use crate::models::EnrichConfig;
use crate::services::{database_exists, Enricher, SqliteCandleStore, TimeframeCatalog};
use std::sync::Arc;

/// Validate horizons against every timeframe, open the database and wire
/// up an enricher
pub async fn build_enricher(config: EnrichConfig) -> Result<Enricher<SqliteCandleStore>, AppError> {
    let catalog = TimeframeCatalog::from_config(&config)?;

    if !database_exists(&config.database_path) {
        return Err(AppError::NotFound(format!(
            "database {:?} (set --db or OHLCV_DB_PATH)",
            config.database_path
        )));
    }

    let store = SqliteCandleStore::new(config.database_path.clone()).await?;
    Ok(Enricher::new(
        Arc::new(store),
        Arc::new(catalog),
        Arc::new(config),
    ))
}

/// Create the multi-threaded runtime commands run on
pub fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("❌ Failed to create async runtime: {}", e);
            std::process::exit(1);
        }
    }
}
