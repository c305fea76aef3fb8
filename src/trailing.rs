// =============================================================================
// Trailing profit-margin exit — per-asset DISARMED -> ARMED -> sell
// =============================================================================
//
// The profit-margin start line sits 5% above cost basis for an un-averaged
// position and 2.5% once any DCA stage has fired. While DISARMED the line
// re-pins to the current base line each tick, so a DCA that lowers the cost
// basis lowers the line with it. Crossing the line arms the trail: the line
// then follows the peak bid at a 0.5% gap, never dropping below the base
// line and never moving down. The exit fires only on an above -> below
// cross of the bid against the line.
//
// Decisions use the bid throughout: that is the price a market sell gets.
// =============================================================================

use rust_decimal::Decimal;
use serde::Serialize;

/// Profit-margin start above cost basis with no DCA stages (percent).
pub fn pm_start_pct_no_dca() -> Decimal {
    Decimal::new(50, 1)
}

/// Profit-margin start above cost basis once any DCA stage fired (percent).
pub fn pm_start_pct_with_dca() -> Decimal {
    Decimal::new(25, 1)
}

/// Trail gap behind the peak (percent).
pub fn trailing_gap_pct() -> Decimal {
    Decimal::new(5, 1)
}

/// Start percent for a position given its DCA stage count.
pub fn pm_start_pct(dca_stages: u32) -> Decimal {
    if dca_stages == 0 {
        pm_start_pct_no_dca()
    } else {
        pm_start_pct_with_dca()
    }
}

/// The profit-margin line for a cost basis and stage count.
pub fn base_pm_line(avg_cost_basis: Decimal, dca_stages: u32) -> Decimal {
    avg_cost_basis * (Decimal::ONE + pm_start_pct(dca_stages) / Decimal::from(100))
}

/// Per-asset trailing state. Create on first evaluation, drop on any sell
/// or after a DCA fill (the basis, and with it the line, changed).
#[derive(Debug, Clone, Serialize)]
pub struct TrailingPm {
    /// False = DISARMED (line pinned to base), true = ARMED (line trails peak).
    pub active: bool,
    pub line: Decimal,
    pub peak: Decimal,
    pub was_above: bool,
}

impl TrailingPm {
    pub fn new(base_line: Decimal) -> Self {
        Self {
            active: false,
            line: base_line,
            peak: Decimal::ZERO,
            was_above: false,
        }
    }

    /// Advance the state machine one tick. Returns true when the exit fires
    /// (bid crossed the line from above).
    pub fn evaluate(&mut self, bid: Decimal, base_line: Decimal) -> bool {
        if !self.active {
            // DISARMED: just the PM line; it must track the current basis.
            self.line = base_line;
        } else if self.line < base_line {
            self.line = base_line;
        }

        let above = bid >= self.line;

        if !self.active && above {
            self.active = true;
            self.peak = bid;
        }

        let mut fire = false;
        if self.active {
            if bid > self.peak {
                self.peak = bid;
            }

            let gap = trailing_gap_pct() / Decimal::from(100);
            let mut new_line = self.peak * (Decimal::ONE - gap);
            if new_line < base_line {
                new_line = base_line;
            }
            if new_line > self.line {
                self.line = new_line;
            }

            if self.was_above && bid < self.line {
                fire = true;
            }
        }

        self.was_above = above;
        fire
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn d(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    #[test]
    fn start_pct_depends_on_dca_stages() {
        assert_eq!(pm_start_pct(0), d("5.0"));
        assert_eq!(pm_start_pct(1), d("2.5"));
        assert_eq!(pm_start_pct(6), d("2.5"));
    }

    #[test]
    fn base_line_from_basis() {
        assert_eq!(base_pm_line(d("50000"), 0), d("52500"));
        assert_eq!(base_pm_line(d("100"), 2), d("102.5"));
    }

    #[test]
    fn disarmed_line_follows_lowered_basis() {
        let mut pm = TrailingPm::new(d("52500"));
        assert!(!pm.evaluate(d("50000"), d("52500")));
        assert_eq!(pm.line, d("52500"));

        // DCA lowered the basis; the DISARMED line must drop with it.
        assert!(!pm.evaluate(d("50000"), d("51250")));
        assert_eq!(pm.line, d("51250"));
        assert!(!pm.active);
    }

    #[test]
    fn arms_when_bid_crosses_the_line() {
        let mut pm = TrailingPm::new(d("52500"));
        assert!(!pm.evaluate(d("52750"), d("52500")));
        assert!(pm.active);
        assert_eq!(pm.peak, d("52750"));
        assert!(pm.was_above);
        // Trail candidate 52750*0.995 = 52486.25 stays below the base line.
        assert_eq!(pm.line, d("52500"));
    }

    #[test]
    fn winner_exit_scenario() {
        // Entry basis 50000, no DCA: line 52500. Price rises to 53000, then
        // sags to 52700 — below the trailed line — and the exit fires.
        let base = d("52500");
        let mut pm = TrailingPm::new(base);

        assert!(!pm.evaluate(d("52750"), base));
        assert!(!pm.evaluate(d("53000"), base));
        assert_eq!(pm.peak, d("53000"));
        // 53000 * 0.995 = 52735
        assert_eq!(pm.line, d("52735.000"));

        assert!(pm.evaluate(d("52700"), base));
    }

    #[test]
    fn line_is_monotonic_while_armed() {
        let base = d("102.5");
        let mut pm = TrailingPm::new(base);
        let mut last_line = Decimal::ZERO;
        let bids = ["103", "104", "103.6", "105", "104.8", "106"];
        for bid in bids {
            pm.evaluate(d(bid), base);
            assert!(
                pm.line >= last_line,
                "line {} regressed below {}",
                pm.line,
                last_line
            );
            last_line = pm.line;
        }
    }

    #[test]
    fn no_exit_without_prior_above_tick() {
        // The bid arms the trail and drops below the line within the same
        // tick sequence; the cross only counts once was_above was recorded.
        let base = d("105");
        let mut pm = TrailingPm::new(base);
        assert!(!pm.evaluate(d("100"), base));
        assert!(!pm.was_above);
        // First tick above: arms, no exit.
        assert!(!pm.evaluate(d("106"), base));
        // Drop below on the next tick fires.
        assert!(pm.evaluate(d("104"), base));
    }

    #[test]
    fn armed_line_never_drops_below_base() {
        let base = d("102.5");
        let mut pm = TrailingPm::new(base);
        pm.evaluate(d("110"), base);
        assert!(pm.line >= base);
        // Even a collapse cannot pull the line under the base.
        pm.evaluate(d("90"), base);
        assert!(pm.line >= base);
    }
}
