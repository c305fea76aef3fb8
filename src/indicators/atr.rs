// =============================================================================
// Average True Range — mean true range over the last `period` bars
// =============================================================================

pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    if period == 0
        || closes.len() < period + 1
        || highs.len() < period + 1
        || lows.len() < period + 1
    {
        return None;
    }

    let n = closes.len();
    let mut sum = 0.0;
    for i in (n - period)..n {
        let prev_close = closes[i - 1];
        let tr = (highs[i] - lows[i])
            .max((highs[i] - prev_close).abs())
            .max((lows[i] - prev_close).abs());
        sum += tr;
    }
    Some(sum / period as f64)
}
