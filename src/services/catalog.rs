//! Which derived columns apply to which timeframe
//!
//! Built once at startup from the configured horizons and shared read-only
//! by every worker. D1 carries only the baseline; intraday timeframes carry
//! the inherited baseline plus momentum and range metrics for every horizon
//! that fits their bar size.

use crate::constants::{ATR_COLUMN, AVG_VOLUME_COLUMN, BASELINE_COLUMNS, BASELINE_PERIOD};
use crate::error::AppError;
use crate::models::{EnrichConfig, Horizon, Timeframe};
use std::collections::BTreeMap;

/// Number of bars spanned by a horizon at a timeframe
///
/// Fails unless the horizon is an exact positive multiple of the bar length.
pub fn bars_for(horizon_minutes: u32, timeframe: Timeframe) -> Result<usize, AppError> {
    let bar = timeframe.minutes();
    if horizon_minutes == 0 || horizon_minutes < bar || horizon_minutes % bar != 0 {
        return Err(AppError::InvalidHorizon(format!(
            "{} minutes is not a whole number of {} bars ({} minutes each)",
            horizon_minutes, timeframe, bar
        )));
    }
    Ok((horizon_minutes / bar) as usize)
}

/// One horizon resolved against a timeframe
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPlan {
    pub horizon: Horizon,
    /// Window length in bars
    pub bars: usize,
    /// Raw column, e.g. `move_1h`
    pub value_column: String,
    /// ATR-normalised column, e.g. `move_1h_atr`
    pub atr_column: String,
}

impl MetricPlan {
    fn new(prefix: &str, horizon: &Horizon, bars: usize) -> Self {
        let value_column = format!("{}_{}", prefix, horizon.label);
        Self {
            horizon: horizon.clone(),
            bars,
            atr_column: format!("{}_atr", value_column),
            value_column,
        }
    }
}

/// Derived columns of one timeframe
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    pub timeframe: Timeframe,
    pub movement: Vec<MetricPlan>,
    pub range: Vec<MetricPlan>,
}

impl ColumnPlan {
    fn daily() -> Self {
        Self {
            timeframe: Timeframe::Day1,
            movement: Vec::new(),
            range: Vec::new(),
        }
    }

    fn intraday(
        timeframe: Timeframe,
        movement: &[Horizon],
        range: &[Horizon],
    ) -> Result<Self, AppError> {
        let movement = resolve_horizons("move", movement, timeframe)?;
        let range = resolve_horizons("range", range, timeframe)?;

        if range.is_empty() {
            return Err(AppError::InvalidHorizon(format!(
                "no range horizon applies to {} (bars are {} minutes)",
                timeframe,
                timeframe.minutes()
            )));
        }

        Ok(Self {
            timeframe,
            movement,
            range,
        })
    }

    /// Every derived column in write order
    pub fn derived_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = BASELINE_COLUMNS.iter().map(|c| c.to_string()).collect();
        for plan in self.movement.iter().chain(self.range.iter()) {
            columns.push(plan.value_column.clone());
            columns.push(plan.atr_column.clone());
        }
        columns
    }

    /// Columns that are non-null on every processed row
    ///
    /// The watermark is the contiguous prefix where all of these are set.
    pub fn watermark_columns(&self) -> Vec<String> {
        if self.timeframe.is_daily() {
            vec![ATR_COLUMN.to_string(), AVG_VOLUME_COLUMN.to_string()]
        } else {
            self.range.iter().map(|p| p.value_column.clone()).collect()
        }
    }

    /// Bars of history a single row depends on, itself included
    pub fn lookback_bars(&self) -> usize {
        if self.timeframe.is_daily() {
            // true range reads the previous close
            return BASELINE_PERIOD + 1;
        }
        let longest = self
            .movement
            .iter()
            .chain(self.range.iter())
            .map(|p| p.bars)
            .max()
            .unwrap_or(0);
        longest + 1
    }
}

fn resolve_horizons(
    prefix: &str,
    horizons: &[Horizon],
    timeframe: Timeframe,
) -> Result<Vec<MetricPlan>, AppError> {
    let mut plans = Vec::new();
    for horizon in horizons {
        // shorter than one bar: not meaningful here, skip
        if horizon.minutes < timeframe.minutes() {
            continue;
        }
        let bars = bars_for(horizon.minutes, timeframe).map_err(|_| {
            AppError::InvalidHorizon(format!(
                "{}_{} on {}: {} minutes is not a multiple of {}",
                prefix,
                horizon.label,
                timeframe,
                horizon.minutes,
                timeframe.minutes()
            ))
        })?;
        plans.push(MetricPlan::new(prefix, horizon, bars));
    }
    Ok(plans)
}

/// Column plans for every selected timeframe
#[derive(Debug, Clone)]
pub struct TimeframeCatalog {
    plans: BTreeMap<Timeframe, ColumnPlan>,
}

impl TimeframeCatalog {
    pub fn new(
        timeframes: &[Timeframe],
        movement: &[Horizon],
        range: &[Horizon],
    ) -> Result<Self, AppError> {
        let mut plans = BTreeMap::new();
        for &timeframe in timeframes {
            let plan = if timeframe.is_daily() {
                ColumnPlan::daily()
            } else {
                ColumnPlan::intraday(timeframe, movement, range)?
            };
            plans.insert(timeframe, plan);
        }
        Ok(Self { plans })
    }

    pub fn from_config(config: &EnrichConfig) -> Result<Self, AppError> {
        Self::new(
            &config.timeframes,
            &config.movement_horizons,
            &config.range_horizons,
        )
    }

    pub fn plan(&self, timeframe: Timeframe) -> Option<&ColumnPlan> {
        self.plans.get(&timeframe)
    }

    pub fn timeframes(&self) -> impl Iterator<Item = Timeframe> + '_ {
        self.plans.keys().copied()
    }
}
