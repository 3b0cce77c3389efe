//! Rolling-window calculations shared by the baseline and window metric calculators
//!
//! # Window Convention
//! Every window is strictly trailing and includes the current bar: the value
//! at index `i` only ever reads indices `<= i`. This is what makes a slice
//! loaded with enough look-back produce the same values as a full pass.
//!
//! # Determinism
//! Means are summed directly over each window rather than kept as a running
//! sum, so the result at index `i` does not depend on where the slice starts.

use std::collections::VecDeque;

/// Calculate true range per bar
///
/// `max(high, prev_close) - min(low, prev_close)`; the first bar has no prior
/// close and falls back to `high - low`.
///
/// # Arguments
/// * `highs`, `lows`, `closes` - Equal-length slices in chronological order
///
/// # Returns
/// * Vector of true range values, same length as the input
pub fn calculate_true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let len = highs.len().min(lows.len()).min(closes.len());
    let mut tr = Vec::with_capacity(len);

    for i in 0..len {
        if i == 0 {
            tr.push(highs[i] - lows[i]);
        } else {
            let prev_close = closes[i - 1];
            tr.push(highs[i].max(prev_close) - lows[i].min(prev_close));
        }
    }

    tr
}

/// Calculate a trailing simple moving average with a one-bar minimum
///
/// Early values use however many bars are available (partial window), so
/// the output is never None for a non-empty input. `period == 0` yields all
/// None.
///
/// # Arguments
/// * `values` - Slice in chronological order
/// * `period` - Window length in bars (e.g. 20)
///
/// # Returns
/// * Vector of averages, same length as the input
pub fn calculate_partial_sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(period);
            let window = &values[start..=i];
            let sum: f64 = window.iter().sum();
            Some(sum / window.len() as f64)
        })
        .collect()
}

/// Calculate `values[i] - values[i - periods]`
///
/// # Returns
/// * None for the first `periods` bars (no value that far back in the slice)
pub fn calculate_shift_diff(values: &[f64], periods: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if periods == 0 || i < periods {
                None
            } else {
                Some(values[i] - values[i - periods])
            }
        })
        .collect()
}

/// Calculate trailing `max(high) - min(low)` over `window` bars
///
/// Uses monotonic deques so the whole series is O(n) regardless of window
/// length. Early bars use a partial window (at least the current bar).
///
/// # Returns
/// * Vector of ranges, same length as the input; all None when `window == 0`
pub fn calculate_rolling_range(highs: &[f64], lows: &[f64], window: usize) -> Vec<Option<f64>> {
    let len = highs.len().min(lows.len());
    if window == 0 {
        return vec![None; len];
    }

    let mut max_idx: VecDeque<usize> = VecDeque::new();
    let mut min_idx: VecDeque<usize> = VecDeque::new();
    let mut ranges = Vec::with_capacity(len);

    for i in 0..len {
        while max_idx.back().is_some_and(|&j| highs[j] <= highs[i]) {
            max_idx.pop_back();
        }
        max_idx.push_back(i);

        while min_idx.back().is_some_and(|&j| lows[j] >= lows[i]) {
            min_idx.pop_back();
        }
        min_idx.push_back(i);

        let start = (i + 1).saturating_sub(window);
        while max_idx.front().is_some_and(|&j| j < start) {
            max_idx.pop_front();
        }
        while min_idx.front().is_some_and(|&j| j < start) {
            min_idx.pop_front();
        }

        match (max_idx.front(), min_idx.front()) {
            (Some(&hi), Some(&lo)) => ranges.push(Some(highs[hi] - lows[lo])),
            _ => ranges.push(None),
        }
    }

    ranges
}

/// Null-safe ratio: None when either side is missing, or the denominator is
/// zero or not finite
pub fn safe_ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 && d.is_finite() && n.is_finite() => Some(n / d),
        _ => None,
    }
}
