use crate::models::EnrichConfig;
use crate::worker::{run_enrich_worker, ShutdownSignal};
use std::time::Duration;

pub fn run(config: EnrichConfig, interval_secs: u64) {
    println!(
        "👀 Watching {:?} every {}s (Ctrl-C to stop)\n",
        config.database_path, interval_secs
    );

    let runtime = super::runtime();
    let result = runtime.block_on(async {
        let enricher = super::build_enricher(config).await?;
        let shutdown = ShutdownSignal::new();
        shutdown.listen_for_ctrl_c();

        let iterations =
            run_enrich_worker(enricher.clone(), Duration::from_secs(interval_secs), shutdown).await;
        enricher.store().close().await;
        Ok::<u64, crate::error::AppError>(iterations)
    });

    match result {
        Ok(iterations) => println!("\n✅ Stopped after {} runs", iterations),
        Err(e) => {
            eprintln!("❌ Watch failed: {}", e);
            std::process::exit(1);
        }
    }
}
