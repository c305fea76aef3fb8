// =============================================================================
// Momentum — close-to-close change over `period` bars
// =============================================================================

pub fn momentum(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }
    Some(closes[closes.len() - 1] - closes[closes.len() - 1 - period])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn momentum_positive_in_uptrend() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert_eq!(momentum(&closes, 10), Some(10.0));
    }

    #[test]
    fn momentum_negative_in_downtrend() {
        let closes: Vec<f64> = (1..=20).rev().map(|x| x as f64).collect();
        assert_eq!(momentum(&closes, 10), Some(-10.0));
    }

    #[test]
    fn momentum_insufficient_data() {
        assert_eq!(momentum(&[1.0, 2.0], 10), None);
    }
}
