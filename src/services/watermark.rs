//! Work out which rows of a table still need enrichment
//!
//! # Watermark
//! The watermark is the latest timestamp before the first row with a NULL in
//! any watermark column. It is never stored; it is re-derived from the table
//! contents on every call, so a crash between batches loses nothing.
//!
//! # Buffer
//! Rolling windows need history, so each batch loads rows before the first
//! row it writes. The buffer is a calendar span counted back from the
//! watermark (30 days on D1, `max(1 day, 100 bars)` intraday), widened to
//! at least the longest window in bars, so gaps such as weekends never leave a window short. Buffered
//! rows are recomputed in memory but never written back.
//!
//! # Provisional rows
//! Intraday rows enriched before their D1 bar existed carry a NULL
//! `atr_20d`. Those within the look-back window whose date now has an
//! enriched D1 baseline are folded into the next batch and rewritten.

use crate::constants::{
    ATR_COLUMN, DAILY_BUFFER_DAYS, INTRADAY_BUFFER_BARS, INTRADAY_MIN_BUFFER_MINUTES,
    SECONDS_PER_DAY,
};
use crate::error::AppError;
use crate::models::{TableId, Timeframe};
use crate::services::catalog::ColumnPlan;
use crate::services::joiner::BaselineIndex;
use crate::services::storage::StorageGateway;
use serde::Serialize;

/// Look-back buffer of a timeframe in seconds
pub fn buffer_seconds(timeframe: Timeframe) -> i64 {
    if timeframe.is_daily() {
        DAILY_BUFFER_DAYS * SECONDS_PER_DAY
    } else {
        let bars = INTRADAY_BUFFER_BARS * timeframe.minutes() as i64;
        bars.max(INTRADAY_MIN_BUFFER_MINUTES) * 60
    }
}

/// Resolver knobs taken from the run configuration
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub batch_size: usize,
    pub provisional_lookback_days: u32,
    /// Whether the symbol has a D1 table to inherit from
    pub has_daily: bool,
}

/// The next batch of work for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRange {
    /// Contiguous watermark; None when nothing is enriched yet
    pub last_enriched: Option<i64>,
    /// First row with a NULL watermark column
    pub first_unenriched: Option<i64>,
    /// Last row with a NULL watermark column
    pub last_unenriched: Option<i64>,
    /// First row loaded (start of the look-back buffer)
    pub buffered_start: i64,
    /// Last row written in this batch (after the batch cap)
    pub pending_end: i64,
    /// Rows at or before the watermark rewritten for a late baseline
    pub provisional: Vec<i64>,
}

impl PendingRange {
    /// True when the row at `timestamp` belongs to this batch's write set
    pub fn should_write(&self, timestamp: i64) -> bool {
        let after_watermark = self.last_enriched.map_or(true, |w| timestamp > w);
        let in_batch = self.first_unenriched.is_some() && timestamp <= self.pending_end;
        (after_watermark && in_batch) || self.provisional.binary_search(&timestamp).is_ok()
    }

    /// Earliest timestamp this batch writes
    pub fn pending_start(&self) -> Option<i64> {
        let first_provisional = self.provisional.first().copied();
        match (first_provisional, self.first_unenriched) {
            (Some(p), Some(u)) => Some(p.min(u)),
            (p, u) => p.or(u),
        }
    }

    /// Last row that must be loaded
    pub fn load_end(&self) -> i64 {
        let last_provisional = self.provisional.last().copied().unwrap_or(i64::MIN);
        self.pending_end.max(last_provisional)
    }
}

/// Resolve the next batch for `table`, or None when it is fully enriched
pub async fn resolve<S: StorageGateway>(
    store: &S,
    table: &TableId,
    plan: &ColumnPlan,
    options: &ResolveOptions,
) -> Result<Option<PendingRange>, AppError> {
    let name = table.name();
    let columns = plan.watermark_columns();

    let last_enriched = store.max_enriched_timestamp(&name, &columns).await?;
    let bounds = store.unenriched_bounds(&name, &columns).await?;

    let provisional = if table.timeframe.is_daily() || !options.has_daily {
        Vec::new()
    } else {
        provisional_rows(store, table, last_enriched, options).await?
    };

    if bounds.is_none() && provisional.is_empty() {
        return Ok(None);
    }

    let pending_end = match bounds {
        Some((_, last_unenriched)) => {
            let capped = store
                .nth_timestamp_after(&name, last_enriched, options.batch_size)
                .await?;
            capped.map_or(last_unenriched, |cap| cap.min(last_unenriched))
        }
        None => last_enriched.unwrap_or(i64::MIN),
    };

    let mut range = PendingRange {
        last_enriched,
        first_unenriched: bounds.map(|(first, _)| first),
        last_unenriched: bounds.map(|(_, last)| last),
        buffered_start: 0,
        pending_end,
        provisional,
    };

    let Some(anchor) = range.pending_start() else {
        return Ok(None);
    };
    let table_start = store.min_timestamp(&name).await?.unwrap_or(anchor);
    // time span counts back from the watermark; provisional rows can sit before it
    let time_anchor = last_enriched.map_or(anchor, |w| w.min(anchor));
    let by_time = time_anchor.saturating_sub(buffer_seconds(table.timeframe));
    let by_bars = store
        .nth_timestamp_back(&name, anchor, plan.lookback_bars())
        .await?
        .unwrap_or(anchor);
    range.buffered_start = by_time.min(by_bars).max(table_start);

    Ok(Some(range))
}

/// Pending range of a table whose derived columns do not exist yet, or None
/// when it holds no rows
pub async fn fresh_range<S: StorageGateway>(
    store: &S,
    table: &str,
    batch_size: usize,
) -> Result<Option<PendingRange>, AppError> {
    let Some(first) = store.min_timestamp(table).await? else {
        return Ok(None);
    };
    let last = store
        .nth_timestamp_back(table, i64::MAX, 0)
        .await?
        .unwrap_or(first);
    let pending_end = store
        .nth_timestamp_after(table, None, batch_size)
        .await?
        .map_or(last, |cap| cap.min(last));

    Ok(Some(PendingRange {
        last_enriched: None,
        first_unenriched: Some(first),
        last_unenriched: Some(last),
        buffered_start: first,
        pending_end,
        provisional: Vec::new(),
    }))
}

async fn provisional_rows<S: StorageGateway>(
    store: &S,
    table: &TableId,
    last_enriched: Option<i64>,
    options: &ResolveOptions,
) -> Result<Vec<i64>, AppError> {
    let Some(watermark) = last_enriched else {
        return Ok(Vec::new());
    };
    if options.provisional_lookback_days == 0 {
        return Ok(Vec::new());
    }

    let from = watermark.saturating_sub(options.provisional_lookback_days as i64 * SECONDS_PER_DAY);
    let candidates = store
        .null_timestamps(&table.name(), ATR_COLUMN, from, watermark)
        .await?;
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let index = BaselineIndex::load(store, &table.daily_sibling(), from, watermark).await?;
    Ok(candidates
        .into_iter()
        .filter(|ts| index.covers(*ts))
        .take(options.batch_size)
        .collect())
}
