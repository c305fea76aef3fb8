// =============================================================================
// Average Directional Index (single-window DX approximation)
// =============================================================================
//
// Directional movement is summed over one `period` window and converted to
// a DX reading. Values above ~20 indicate a trending market.
// =============================================================================

pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let n = closes.len();
    let mut plus_dm = 0.0;
    let mut minus_dm = 0.0;
    let mut tr_sum = 0.0;

    for i in (n - period)..n {
        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];
        if up_move > down_move && up_move > 0.0 {
            plus_dm += up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm += down_move;
        }
        let tr = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
        tr_sum += tr;
    }

    if tr_sum == 0.0 {
        return Some(0.0);
    }
    let plus_di = 100.0 * plus_dm / tr_sum;
    let minus_di = 100.0 * minus_dm / tr_sum;
    let denom = plus_di + minus_di;
    if denom == 0.0 {
        return Some(0.0);
    }
    Some((plus_di - minus_di).abs() / denom * 100.0)
}
