// =============================================================================
// Stochastic Oscillator (%K / %D)
// =============================================================================

use crate::indicators::ema::sma;

/// Latest `(%K, %D)` over a `k_period` window with a `d_period` SMA of %K.
/// A flat window (high == low) reads as the neutral 50/50.
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k_period: usize,
    d_period: usize,
) -> Option<(f64, f64)> {
    if k_period == 0
        || closes.len() < k_period
        || highs.len() < k_period
        || lows.len() < k_period
    {
        return None;
    }

    let k = percent_k(highs, lows, closes, closes.len(), k_period);

    // %D is the SMA of the last k_period %K values.
    let mut k_series = Vec::with_capacity(k_period);
    for end in (closes.len() - k_period + 1)..=closes.len() {
        k_series.push(percent_k(highs, lows, closes, end, k_period));
    }
    let d = sma(&k_series, d_period)?;

    Some((k, d))
}

fn percent_k(highs: &[f64], lows: &[f64], closes: &[f64], end: usize, period: usize) -> f64 {
    let start = end.saturating_sub(period);
    let high = highs[start..end].iter().cloned().fold(f64::MIN, f64::max);
    let low = lows[start..end].iter().cloned().fold(f64::MAX, f64::min);
    if high == low {
        return 50.0;
    }
    (closes[end - 1] - low) / (high - low) * 100.0
}
