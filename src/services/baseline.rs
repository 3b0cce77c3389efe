use crate::constants::{ATR_COLUMN, AVG_VOLUME_COLUMN, BASELINE_PERIOD, RVOL_COLUMN};
use crate::models::indicators::{calculate_partial_sma, calculate_true_range, safe_ratio};
use crate::models::{Candle, MetricFrame};

/// Compute the D1 baseline (`atr_20d`, `avg_volume_20d`, `rvol`) for a slice
///
/// The slice must be chronological. Values are exact for any row preceded by
/// at least `BASELINE_PERIOD` bars in the slice, or by the start of the table.
pub fn compute_baseline(candles: &[Candle]) -> MetricFrame {
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let true_range = calculate_true_range(&highs, &lows, &closes);
    let atr = calculate_partial_sma(&true_range, BASELINE_PERIOD);
    let avg_volume = calculate_partial_sma(&volumes, BASELINE_PERIOD);
    let rvol = volumes
        .iter()
        .zip(avg_volume.iter())
        .map(|(volume, avg)| safe_ratio(Some(*volume), *avg))
        .collect();

    let mut frame = MetricFrame::new(candles.len());
    frame.push(ATR_COLUMN, atr);
    frame.push(AVG_VOLUME_COLUMN, avg_volume);
    frame.push(RVOL_COLUMN, rvol);
    frame
}
