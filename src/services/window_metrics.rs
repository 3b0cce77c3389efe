use crate::constants::{ATR_COLUMN, AVG_VOLUME_COLUMN, RVOL_COLUMN};
use crate::models::indicators::{calculate_rolling_range, calculate_shift_diff, safe_ratio};
use crate::models::{Candle, MetricFrame};
use crate::services::catalog::ColumnPlan;
use crate::services::joiner::InheritedBaseline;

/// Compute every derived column of an intraday plan for a slice
///
/// Output columns follow `ColumnPlan::derived_columns`: the inherited
/// baseline first, then `move_h`/`move_h_atr` and `range_h`/`range_h_atr`
/// per horizon.
pub fn compute_window_metrics(
    candles: &[Candle],
    plan: &ColumnPlan,
    inherited: &InheritedBaseline,
) -> MetricFrame {
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let mut frame = MetricFrame::new(candles.len());
    frame.push(ATR_COLUMN, inherited.atr.clone());
    frame.push(AVG_VOLUME_COLUMN, inherited.avg_volume.clone());
    frame.push(RVOL_COLUMN, inherited.rvol.clone());

    for metric in &plan.movement {
        let moves = calculate_shift_diff(&closes, metric.bars);
        let normalised = normalise(&moves, &inherited.atr);
        frame.push(metric.value_column.clone(), moves);
        frame.push(metric.atr_column.clone(), normalised);
    }

    for metric in &plan.range {
        let ranges = calculate_rolling_range(&highs, &lows, metric.bars);
        let normalised = normalise(&ranges, &inherited.atr);
        frame.push(metric.value_column.clone(), ranges);
        frame.push(metric.atr_column.clone(), normalised);
    }

    frame
}

fn normalise(values: &[Option<f64>], atr: &[Option<f64>]) -> Vec<Option<f64>> {
    values
        .iter()
        .zip(atr.iter())
        .map(|(value, atr)| safe_ratio(*value, *atr))
        .collect()
}
