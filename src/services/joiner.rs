//! Inherit the D1 baseline onto intraday rows by calendar date

use crate::constants::{ATR_COLUMN, AVG_VOLUME_COLUMN, BASELINE_COLUMNS, RVOL_COLUMN, SECONDS_PER_DAY};
use crate::error::AppError;
use crate::models::{Candle, TableId};
use crate::services::calendar::{calendar_date, day_start};
use crate::services::storage::StorageGateway;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Baseline values of one enriched D1 bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyBaseline {
    pub atr: f64,
    pub avg_volume: f64,
    pub rvol: Option<f64>,
}

/// Enriched D1 baselines keyed by calendar date
#[derive(Debug, Clone, Default)]
pub struct BaselineIndex {
    by_date: BTreeMap<NaiveDate, DailyBaseline>,
}

impl BaselineIndex {
    /// Load the baselines covering `[from, to]` from a symbol's D1 table
    ///
    /// Rows whose baseline has not been computed yet are left out, so their
    /// date joins to nothing. A D1 table without baseline columns yields an
    /// empty index.
    pub async fn load<S: StorageGateway>(
        store: &S,
        daily: &TableId,
        from: i64,
        to: i64,
    ) -> Result<Self, AppError> {
        let table = daily.name();
        let columns = store.table_columns(&table).await?;
        if !BASELINE_COLUMNS
            .iter()
            .all(|c| columns.iter().any(|existing| existing == c))
        {
            return Ok(Self::default());
        }

        let start = calendar_date(from).and_then(day_start).unwrap_or(from);
        let end = to.saturating_add(SECONDS_PER_DAY);
        let derived: Vec<String> = BASELINE_COLUMNS.iter().map(|c| c.to_string()).collect();
        let rows = store.read_range(&table, start, end, &derived).await?;

        Ok(Self::from_daily(&rows))
    }

    /// Build from D1 candles carrying the baseline columns
    pub fn from_daily(rows: &[Candle]) -> Self {
        let mut by_date = BTreeMap::new();
        for row in rows {
            let (Some(date), Some(atr), Some(avg_volume)) = (
                calendar_date(row.timestamp),
                row.metric(ATR_COLUMN),
                row.metric(AVG_VOLUME_COLUMN),
            ) else {
                continue;
            };
            by_date.insert(
                date,
                DailyBaseline {
                    atr,
                    avg_volume,
                    rvol: row.metric(RVOL_COLUMN),
                },
            );
        }
        Self { by_date }
    }

    pub fn get(&self, date: NaiveDate) -> Option<&DailyBaseline> {
        self.by_date.get(&date)
    }

    /// True when the D1 bar of the timestamp's date is enriched
    pub fn covers(&self, timestamp: i64) -> bool {
        calendar_date(timestamp).is_some_and(|date| self.by_date.contains_key(&date))
    }
}

/// Baseline columns aligned with an intraday slice
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InheritedBaseline {
    pub atr: Vec<Option<f64>>,
    pub avg_volume: Vec<Option<f64>>,
    pub rvol: Vec<Option<f64>>,
}

/// Left join: every intraday row gets the baseline of its calendar date, or
/// nulls when that date has no enriched D1 bar
pub fn join_baseline(candles: &[Candle], index: &BaselineIndex) -> InheritedBaseline {
    let mut inherited = InheritedBaseline {
        atr: Vec::with_capacity(candles.len()),
        avg_volume: Vec::with_capacity(candles.len()),
        rvol: Vec::with_capacity(candles.len()),
    };

    for candle in candles {
        let baseline = calendar_date(candle.timestamp).and_then(|date| index.get(date));
        inherited.atr.push(baseline.map(|b| b.atr));
        inherited.avg_volume.push(baseline.map(|b| b.avg_volume));
        inherited.rvol.push(baseline.and_then(|b| b.rvol));
    }

    inherited
}
