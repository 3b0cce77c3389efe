mod candle;
mod enrich_config;
mod horizon;
mod run_report;
mod table;
mod timeframe;
pub mod indicators;

pub use candle::{Candle, MetricFrame, RowUpdate};
pub use enrich_config::EnrichConfig;
pub use horizon::Horizon;
pub use run_report::{RunReport, TableReport, TableStatus};
pub use table::{is_identifier, TableId};
pub use timeframe::Timeframe;
