// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================

use crate::indicators::ema::ema_series;

/// Latest `(macd_line, signal_line, histogram)` for the standard 12/26/9
/// configuration (or any other).
pub fn macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<(f64, f64, f64)> {
    let series = macd_lines(closes, fast, slow, signal)?;
    let macd_line = *series.macd.last()?;
    let signal_line = *series.signal.last()?;
    Some((macd_line, signal_line, macd_line - signal_line))
}

/// Full MACD and signal series, for cross detection over the last two bars.
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
}

pub fn macd_lines(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdSeries> {
    if closes.len() < slow {
        return None;
    }
    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    if fast_series.is_empty() || slow_series.is_empty() {
        return None;
    }

    // Align the tails: the slow EMA starts later than the fast one.
    let offset = fast_series.len() - slow_series.len();
    let macd: Vec<f64> = fast_series[offset..]
        .iter()
        .zip(slow_series.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_series = ema_series(&macd, signal);
    if signal_series.is_empty() {
        return None;
    }
    Some(MacdSeries {
        macd,
        signal: signal_series,
    })
}

/// True when the MACD line crossed above the signal line on the last two bars.
pub fn bullish_cross(closes: &[f64], fast: usize, slow: usize, signal: usize) -> bool {
    let series = match macd_lines(closes, fast, slow, signal) {
        Some(s) => s,
        None => return false,
    };
    let n = series.macd.len();
    let m = series.signal.len();
    if n < 2 || m < 2 {
        return false;
    }
    // The signal series lags the MACD series; align the last two points.
    let macd_prev = series.macd[n - 2];
    let macd_now = series.macd[n - 1];
    let sig_prev = series.signal[m - 2];
    let sig_now = series.signal[m - 1];
    macd_prev <= sig_prev && macd_now > sig_now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(macd(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let closes: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let (line, _, _) = macd(&closes, 12, 26, 9).unwrap();
        assert!(line > 0.0, "MACD line {line} should be positive in an uptrend");
    }

    #[test]
    fn macd_flat_series_is_zero() {
        let closes = vec![100.0; 60];
        let (line, signal, hist) = macd(&closes, 12, 26, 9).unwrap();
        assert!(line.abs() < 1e-10);
        assert!(signal.abs() < 1e-10);
        assert!(hist.abs() < 1e-10);
    }

    #[test]
    fn bullish_cross_detected_on_reversal() {
        // Long decline followed by a sharp recovery forces the MACD line up
        // through its signal.
        let mut closes: Vec<f64> = (0..50).map(|x| 100.0 - x as f64 * 0.5).collect();
        closes.extend((0..12).map(|x| 75.0 + x as f64 * 2.0));
        let mut crossed = false;
        for end in 40..=closes.len() {
            if bullish_cross(&closes[..end], 12, 26, 9) {
                crossed = true;
                break;
            }
        }
        assert!(crossed, "expected a bullish cross during the recovery");
    }

    #[test]
    fn no_cross_in_steady_downtrend() {
        let closes: Vec<f64> = (0..60).map(|x| 100.0 - x as f64).collect();
        assert!(!bullish_cross(&closes, 12, 26, 9));
    }
}
