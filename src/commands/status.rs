use crate::error::AppError;
use crate::models::EnrichConfig;
use crate::services::calendar::format_timestamp;
use crate::services::TableInspection;
use crate::worker::{discover_tables, symbols_with_daily};

pub fn run(config: EnrichConfig, json: bool) {
    let runtime = super::runtime();
    let result = runtime.block_on(inspect_all(config));

    let inspections = match result {
        Ok(inspections) => inspections,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&inspections) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("❌ Failed to serialize status: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    println!("📊 Enrichment Status\n");
    if inspections.is_empty() {
        println!("⚠️  No candle tables found.");
        return;
    }

    let mut pending_tables = 0;
    for inspection in &inspections {
        show_table(inspection);
        if inspection.pending.is_some() || !inspection.missing_columns.is_empty() {
            pending_tables += 1;
        }
    }

    println!("\n═══════════════════════════════════════════════════════════");
    println!(
        "💡 {} of {} tables have pending work. Run 'enrich' to process them.",
        pending_tables,
        inspections.len()
    );
}

async fn inspect_all(config: EnrichConfig) -> Result<Vec<TableInspection>, AppError> {
    let enricher = super::build_enricher(config).await?;
    let discovered = discover_tables(enricher.store().as_ref()).await?;
    let daily_symbols = symbols_with_daily(&discovered);

    let mut inspections = Vec::new();
    for table in discovered.iter().filter(|t| enricher.config().selects(t)) {
        let has_daily = daily_symbols.contains(&table.symbol);
        inspections.push(enricher.inspect_table(table, has_daily).await?);
    }

    enricher.store().close().await;
    Ok(inspections)
}

fn show_table(inspection: &TableInspection) {
    let watermark = inspection
        .watermark
        .map_or_else(|| "not enriched".to_string(), format_timestamp);

    if !inspection.missing_columns.is_empty() {
        println!(
            "🔸 {:<28} {} derived columns not created yet",
            inspection.table,
            inspection.missing_columns.len()
        );
        return;
    }

    match &inspection.pending {
        None => println!("🔹 {:<28} up to date   (watermark {})", inspection.table, watermark),
        Some(pending) => {
            println!("🔸 {:<28} pending      (watermark {})", inspection.table, watermark);
            if let Some(first) = pending.first_unenriched {
                println!(
                    "   Next batch: {} → {}",
                    format_timestamp(first),
                    format_timestamp(pending.pending_end)
                );
            }
            if !pending.provisional.is_empty() {
                println!(
                    "   {} rows waiting for a late daily baseline",
                    pending.provisional.len()
                );
            }
        }
    }
}
