// =============================================================================
// Ichimoku cloud levels from the most recent 9 / 26 / 52 bar windows
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IchimokuLevels {
    pub tenkan: f64,
    pub kijun: f64,
    pub senkou_a: f64,
    pub senkou_b: f64,
}

pub fn ichimoku(highs: &[f64], lows: &[f64]) -> Option<IchimokuLevels> {
    if highs.len() < 52 || lows.len() < 52 {
        return None;
    }
    let tenkan = midpoint(highs, lows, 9);
    let kijun = midpoint(highs, lows, 26);
    let senkou_b = midpoint(highs, lows, 52);
    Some(IchimokuLevels {
        tenkan,
        kijun,
        senkou_a: (tenkan + kijun) / 2.0,
        senkou_b,
    })
}

fn midpoint(highs: &[f64], lows: &[f64], period: usize) -> f64 {
    let high = highs[highs.len() - period..]
        .iter()
        .cloned()
        .fold(f64::MIN, f64::max);
    let low = lows[lows.len() - period..]
        .iter()
        .cloned()
        .fold(f64::MAX, f64::min);
    (high + low) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_market_collapses_to_price() {
        let highs = vec![100.0; 60];
        let lows = vec![100.0; 60];
        let levels = ichimoku(&highs, &lows).unwrap();
        assert_eq!(levels.tenkan, 100.0);
        assert_eq!(levels.kijun, 100.0);
        assert_eq!(levels.senkou_a, 100.0);
        assert_eq!(levels.senkou_b, 100.0);
    }

    #[test]
    fn uptrend_orders_lines() {
        let highs: Vec<f64> = (1..=60).map(|x| x as f64 + 1.0).collect();
        let lows: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let levels = ichimoku(&highs, &lows).unwrap();
        // Shorter windows track price more closely in a rising market.
        assert!(levels.tenkan > levels.kijun);
        assert!(levels.kijun > levels.senkou_b);
    }

    #[test]
    fn insufficient_data() {
        assert!(ichimoku(&[1.0; 51], &[1.0; 51]).is_none());
    }
}
