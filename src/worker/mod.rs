pub mod enrich_worker;
pub mod scheduler;
pub mod shutdown;

pub use enrich_worker::run as run_enrich_worker;
pub use scheduler::{discover_tables, run_enrichment, symbols_with_daily};
pub use shutdown::ShutdownSignal;
