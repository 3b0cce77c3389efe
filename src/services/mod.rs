pub mod backoff;
pub mod baseline;
pub mod calendar;
pub mod catalog;
pub mod database;
pub mod enricher;
pub mod joiner;
pub mod storage;
pub mod watermark;
pub mod window_metrics;

pub use backoff::ExponentialBackoff;
pub use catalog::{bars_for, ColumnPlan, MetricPlan, TimeframeCatalog};
pub use database::{database_exists, SqliteCandleStore};
pub use enricher::{Enricher, TableInspection};
pub use storage::{StorageGateway, StorageTransaction};
pub use watermark::PendingRange;
