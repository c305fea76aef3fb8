// =============================================================================
// Relative Strength Index (RSI)
// =============================================================================
//
// Measures the speed and magnitude of recent price changes over the last
// `period` deltas:
//
//   RS  = avg_gain / avg_loss
//   RSI = 100 - 100 / (1 + RS)
//
// With no down moves in the window the RSI saturates at 100.
// Thresholds used by the strategy evaluator: RSI < 30 => oversold entry.
// =============================================================================

/// RSI of the most recent `period` price deltas.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let window = &closes[closes.len() - period - 1..];
    let mut sum_gain = 0.0;
    let mut sum_loss = 0.0;
    for pair in window.windows(2) {
        let diff = pair[1] - pair[0];
        if diff >= 0.0 {
            sum_gain += diff;
        } else {
            sum_loss += diff.abs();
        }
    }

    let avg_gain = sum_gain / period as f64;
    let avg_loss = sum_loss / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}
