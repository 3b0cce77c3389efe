use crate::models::{EnrichConfig, RunReport, TableStatus};
use crate::services::calendar::format_timestamp;
use crate::utils::format_number;
use crate::worker::{run_enrichment, ShutdownSignal};

pub fn run(config: EnrichConfig, json: bool) {
    if !json {
        println!("⚙️  Enriching candle tables in {:?}", config.database_path);
        println!(
            "   Workers: {}  Batch size: {}\n",
            config.workers,
            format_number(config.batch_size)
        );
    }

    let runtime = super::runtime();
    let result = runtime.block_on(async {
        let enricher = super::build_enricher(config).await?;
        let shutdown = ShutdownSignal::new();
        shutdown.listen_for_ctrl_c();
        let report = run_enrichment(enricher.clone(), shutdown).await;
        enricher.store().close().await;
        report
    });

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("❌ Enrichment failed: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("❌ Failed to serialize report: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        print_report(&report);
    }

    if report.has_failures() {
        std::process::exit(1);
    }
}

fn status_icon(status: TableStatus) -> &'static str {
    match status {
        TableStatus::Enriched => "✅",
        TableStatus::UpToDate => "✔️ ",
        TableStatus::Failed => "❌",
        TableStatus::Skipped => "⏭️ ",
        TableStatus::Cancelled => "⏹️ ",
        TableStatus::Stalled => "⚠️ ",
    }
}

fn format_watermark(watermark: Option<i64>) -> String {
    watermark.map_or_else(|| "-".to_string(), format_timestamp)
}

pub fn print_report(report: &RunReport) {
    if report.tables.is_empty() {
        println!("⚠️  No candle tables found.");
        return;
    }

    for table in &report.tables {
        println!(
            "{} {:<28} {:<11} {:>10} rows  {:>4} batches  watermark {} → {}",
            status_icon(table.status),
            table.table,
            table.status.as_str(),
            format_number(table.rows_written),
            table.batches,
            format_watermark(table.watermark_before),
            format_watermark(table.watermark_after),
        );
        if let Some(error) = &table.error {
            println!("   └─ {}", error);
        }
        if table.status != TableStatus::Skipped {
            if let Some(pending) = table.pending_from {
                println!("   └─ pending from {}", format_timestamp(pending));
            }
        }
    }

    println!("\n═══════════════════════════════════════════════════════════");
    println!(
        "📊 {} tables: {} enriched, {} up to date, {} failed, {} skipped, {} cancelled, {} stalled",
        report.total_processed(),
        report.count(TableStatus::Enriched),
        report.count(TableStatus::UpToDate),
        report.count(TableStatus::Failed),
        report.count(TableStatus::Skipped),
        report.count(TableStatus::Cancelled),
        report.count(TableStatus::Stalled),
    );
    println!(
        "📝 {} rows written in {:.2}s",
        format_number(report.rows_written()),
        report.elapsed_ms as f64 / 1000.0
    );
}
