// =============================================================================
// Bollinger Bands — SMA +/- std_mult standard deviations (population)
// =============================================================================

/// `(upper, middle, lower)` bands over the last `period` closes.
pub fn bollinger_bands(
    closes: &[f64],
    period: usize,
    std_mult: f64,
) -> Option<(f64, f64, f64)> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    Some((mean + std_mult * std, mean, mean - std_mult * std))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_collapse_on_flat_series() {
        let closes = vec![100.0; 25];
        let (upper, mid, lower) = bollinger_bands(&closes, 20, 2.0).unwrap();
        assert_eq!(upper, 100.0);
        assert_eq!(mid, 100.0);
        assert_eq!(lower, 100.0);
    }

    #[test]
    fn bands_are_symmetric_around_mean() {
        let closes: Vec<f64> = (1..=25).map(|x| x as f64).collect();
        let (upper, mid, lower) = bollinger_bands(&closes, 20, 2.0).unwrap();
        assert!((upper - mid - (mid - lower)).abs() < 1e-9);
        assert!(upper > mid && mid > lower);
    }

    #[test]
    fn bands_insufficient_data() {
        assert!(bollinger_bands(&[1.0, 2.0], 20, 2.0).is_none());
    }
}
