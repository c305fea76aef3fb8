// =============================================================================
// Simple and Exponential Moving Averages
// =============================================================================
//
// The EMA is seeded with the SMA of the first `period` values, then smoothed
// with k = 2 / (period + 1). `ema_series` exposes the full smoothed series
// for indicators built on top of it (MACD).
// =============================================================================

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    Some(values[values.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Exponential moving average over the whole series.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Full EMA series: one value per input starting at index `period - 1`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut current = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(current);
    for &v in &values[period..] {
        current = v * k + current * (1.0 - k);
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_averages_last_window() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(sma(&values, 2), Some(3.5));
        assert_eq!(sma(&values, 4), Some(2.5));
    }

    #[test]
    fn sma_insufficient_data() {
        assert_eq!(sma(&[1.0], 2), None);
        assert_eq!(sma(&[1.0, 2.0], 0), None);
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let values = vec![5.0; 20];
        let result = ema(&values, 8).unwrap();
        assert!((result - 5.0).abs() < 1e-12);
    }

    #[test]
    fn ema_tracks_trend_direction() {
        let rising: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let fast = ema(&rising, 8).unwrap();
        let slow = ema(&rising, 21).unwrap();
        assert!(fast > slow, "fast EMA {fast} should lead slow EMA {slow} in an uptrend");
    }

    #[test]
    fn ema_series_length() {
        let values: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let series = ema_series(&values, 4);
        assert_eq!(series.len(), 7);
    }

    #[test]
    fn ema_series_empty_on_short_input() {
        assert!(ema_series(&[1.0, 2.0], 5).is_empty());
        assert!(ema_series(&[], 5).is_empty());
    }
}
