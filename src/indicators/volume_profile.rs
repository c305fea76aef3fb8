// =============================================================================
// Volume Profile — current volume relative to its SMA
// =============================================================================

/// Ratio of the latest volume to its `period`-bar average. Zero average
/// volume reads as 0.0 rather than dividing by zero.
pub fn volume_profile(volumes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || volumes.len() < period {
        return None;
    }
    let avg = volumes[volumes.len() - period..].iter().sum::<f64>() / period as f64;
    if avg == 0.0 {
        return Some(0.0);
    }
    Some(volumes[volumes.len() - 1] / avg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_above_one_on_volume_spike() {
        let mut volumes = vec![100.0; 20];
        volumes[19] = 300.0;
        let ratio = volume_profile(&volumes, 20).unwrap();
        assert!(ratio > 1.0);
    }

    #[test]
    fn flat_volume_reads_one() {
        let volumes = vec![100.0; 20];
        assert_eq!(volume_profile(&volumes, 20), Some(1.0));
    }

    #[test]
    fn zero_volume_reads_zero() {
        let volumes = vec![0.0; 20];
        assert_eq!(volume_profile(&volumes, 20), Some(0.0));
    }

    #[test]
    fn insufficient_data() {
        assert_eq!(volume_profile(&[1.0], 20), None);
    }
}
