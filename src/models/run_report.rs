use super::TableId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Final state of one table after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// At least one batch committed, nothing left pending
    Enriched,
    /// Nothing was pending
    UpToDate,
    /// Schema or storage error; `pending_from` marks where work stopped
    Failed,
    /// Not attempted (its D1 table failed this run)
    Skipped,
    /// Shutdown requested between batches
    Cancelled,
    /// A committed batch did not move the pending range
    Stalled,
}

impl TableStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, TableStatus::Failed | TableStatus::Stalled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Enriched => "enriched",
            TableStatus::UpToDate => "up-to-date",
            TableStatus::Failed => "failed",
            TableStatus::Skipped => "skipped",
            TableStatus::Cancelled => "cancelled",
            TableStatus::Stalled => "stalled",
        }
    }
}

/// Outcome of enriching a single table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub symbol: String,
    pub timeframe: String,
    pub status: TableStatus,
    pub rows_written: usize,
    pub batches: usize,
    /// Contiguous watermark when the table was first resolved
    pub watermark_before: Option<i64>,
    /// Contiguous watermark after the last committed batch
    pub watermark_after: Option<i64>,
    /// First timestamp still needing work when the table stopped early
    pub pending_from: Option<i64>,
    pub error: Option<String>,
}

impl TableReport {
    pub fn new(table: &TableId, status: TableStatus) -> Self {
        Self {
            table: table.name(),
            symbol: table.symbol.clone(),
            timeframe: table.timeframe.suffix().to_string(),
            status,
            rows_written: 0,
            batches: 0,
            watermark_before: None,
            watermark_after: None,
            pending_from: None,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Summary of a full run across every discovered table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub tables: Vec<TableReport>,
    pub elapsed_ms: u128,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, report: TableReport) {
        self.tables.push(report);
    }

    /// Sort by table name so output is stable regardless of worker timing
    pub fn finish(&mut self, elapsed: Duration) {
        self.tables.sort_by(|a, b| a.table.cmp(&b.table));
        self.elapsed_ms = elapsed.as_millis();
    }

    pub fn count(&self, status: TableStatus) -> usize {
        self.tables.iter().filter(|t| t.status == status).count()
    }

    pub fn rows_written(&self) -> usize {
        self.tables.iter().map(|t| t.rows_written).sum()
    }

    pub fn total_processed(&self) -> usize {
        self.tables.len()
    }

    /// True when any table failed or stalled
    pub fn has_failures(&self) -> bool {
        self.tables.iter().any(|t| t.status.is_failure())
    }

    pub fn get(&self, table: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == table)
    }
}
