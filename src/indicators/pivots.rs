// =============================================================================
// Classic pivot points from the most recent bar
// =============================================================================

/// Pivot, two resistances, two supports. Computed from the last bar only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotLevels {
    pub pivot: f64,
    pub r1: f64,
    pub s1: f64,
    pub r2: f64,
    pub s2: f64,
}

pub fn pivots(highs: &[f64], lows: &[f64], closes: &[f64]) -> Option<PivotLevels> {
    let (h, l, c) = (
        *highs.last()?,
        *lows.last()?,
        *closes.last()?,
    );
    let p = (h + l + c) / 3.0;
    Some(PivotLevels {
        pivot: p,
        r1: 2.0 * p - l,
        s1: 2.0 * p - h,
        r2: p + (h - l),
        s2: p - (h - l),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivot_is_bar_average() {
        let levels = pivots(&[110.0], &[90.0], &[100.0]).unwrap();
        assert_eq!(levels.pivot, 100.0);
        assert_eq!(levels.r1, 110.0);
        assert_eq!(levels.s1, 90.0);
        assert_eq!(levels.r2, 120.0);
        assert_eq!(levels.s2, 80.0);
    }

    #[test]
    fn empty_series_yields_none() {
        assert!(pivots(&[], &[], &[]).is_none());
    }
}
