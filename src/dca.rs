// =============================================================================
// DCA engine — hard percentage ladder, neural assist, rolling 24-h limit
// =============================================================================
//
// The hard ladder in buy-side PnL percent is
//   [-2.5, -5, -10, -20, -30, -40, -50]
// and the last level repeats indefinitely beyond stage 6. Neural assist
// applies only to stages 0..3: stage s fires when long_level >= s + 4 while
// the position is under water. A stage fires when either trigger hits.
//
// The rolling window allows at most 2 DCA buys per 24 hours within the
// current trade; the trade boundary is the most recent sell. The window is
// seeded from persisted trade history so the limit survives restarts.
// =============================================================================

use std::collections::HashMap;

use rust_decimal::Decimal;

/// Maximum DCA buys inside one rolling window per trade.
pub const MAX_DCA_BUYS_PER_WINDOW: usize = 2;
/// Rolling window length in seconds.
pub const DCA_WINDOW_SECS: i64 = 24 * 60 * 60;

fn ladder() -> [Decimal; 7] {
    [
        Decimal::new(-25, 1),
        Decimal::new(-50, 1),
        Decimal::new(-100, 1),
        Decimal::new(-200, 1),
        Decimal::new(-300, 1),
        Decimal::new(-400, 1),
        Decimal::new(-500, 1),
    ]
}

/// Hard loss threshold (percent) for a stage; the last level repeats.
pub fn hard_level(stage: usize) -> Decimal {
    let levels = ladder();
    levels[stage.min(levels.len() - 1)]
}

/// Neural level required to assist a stage; stages 4+ are hard-only.
pub fn neural_level_needed(stage: usize) -> Option<u8> {
    if stage < 4 {
        Some(stage as u8 + 4)
    } else {
        None
    }
}

/// What fired a DCA stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcaTrigger {
    Hard,
    Neural,
    Both,
}

impl std::fmt::Display for DcaTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hard => write!(f, "HARD"),
            Self::Neural => write!(f, "NEURAL"),
            Self::Both => write!(f, "NEURAL|HARD"),
        }
    }
}

/// Decide whether stage `stage` should fire given the buy-side PnL percent
/// and the current neural long level.
pub fn evaluate_stage(stage: usize, buy_pnl_pct: Decimal, long_level: u8) -> Option<DcaTrigger> {
    let hard_hit = buy_pnl_pct <= hard_level(stage);

    // Neural assist never fires while the position is at or above water.
    let neural_hit = neural_level_needed(stage)
        .map(|needed| buy_pnl_pct < Decimal::ZERO && long_level >= needed)
        .unwrap_or(false);

    match (hard_hit, neural_hit) {
        (true, true) => Some(DcaTrigger::Both),
        (true, false) => Some(DcaTrigger::Hard),
        (false, true) => Some(DcaTrigger::Neural),
        (false, false) => None,
    }
}

// =============================================================================
// Rolling window
// =============================================================================

/// Per-asset DCA buy timestamps and trade boundaries.
#[derive(Debug, Default)]
pub struct DcaWindow {
    buy_ts: HashMap<String, Vec<i64>>,
    last_sell_ts: HashMap<String, i64>,
}

impl DcaWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sell observed in history (keeps the newest per asset).
    pub fn seed_sell(&mut self, asset: &str, ts: i64) {
        let entry = self.last_sell_ts.entry(asset.to_uppercase()).or_insert(0);
        if ts > *entry {
            *entry = ts;
        }
    }

    /// Record a DCA buy observed in history.
    pub fn seed_dca_buy(&mut self, asset: &str, ts: i64) {
        self.buy_ts.entry(asset.to_uppercase()).or_default().push(ts);
    }

    /// DCA buys for this asset within the rolling window of the current
    /// trade. Prunes expired entries in place.
    pub fn count(&mut self, asset: &str, now: i64) -> usize {
        let asset = asset.to_uppercase();
        let cutoff = now - DCA_WINDOW_SECS;
        let last_sell = self.last_sell_ts.get(&asset).copied().unwrap_or(0);

        let list = self.buy_ts.entry(asset).or_default();
        list.retain(|ts| *ts > last_sell && *ts >= cutoff);
        list.sort_unstable();
        list.len()
    }

    /// True when another DCA buy is still allowed right now.
    pub fn allows(&mut self, asset: &str, now: i64) -> bool {
        self.count(asset, now) < MAX_DCA_BUYS_PER_WINDOW
    }

    /// Record a successful DCA buy.
    pub fn note_buy(&mut self, asset: &str, now: i64) {
        let asset = asset.to_uppercase();
        self.buy_ts.entry(asset.clone()).or_default().push(now);
        self.count(&asset, now);
    }

    /// Reset the window at a trade boundary. A sell also moves the boundary
    /// timestamp so older buys can never leak into the next trade.
    pub fn reset_for_trade(&mut self, asset: &str, sold: bool, now: i64) {
        let asset = asset.to_uppercase();
        if sold {
            self.last_sell_ts.insert(asset.clone(), now);
        }
        self.buy_ts.insert(asset, Vec::new());
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn pct(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    #[test]
    fn ladder_levels_and_repeat() {
        assert_eq!(hard_level(0), pct("-2.5"));
        assert_eq!(hard_level(1), pct("-5"));
        assert_eq!(hard_level(6), pct("-50"));
        assert_eq!(hard_level(7), pct("-50"));
        assert_eq!(hard_level(100), pct("-50"));
    }

    #[test]
    fn ladder_is_monotonically_deeper() {
        for stage in 0..6 {
            assert!(hard_level(stage) > hard_level(stage + 1));
        }
    }

    #[test]
    fn neural_mapping_covers_first_four_stages() {
        assert_eq!(neural_level_needed(0), Some(4));
        assert_eq!(neural_level_needed(3), Some(7));
        assert_eq!(neural_level_needed(4), None);
    }

    #[test]
    fn hard_trigger_fires_at_threshold() {
        assert_eq!(evaluate_stage(0, pct("-2.5"), 0), Some(DcaTrigger::Hard));
        assert_eq!(evaluate_stage(0, pct("-2.4"), 0), None);
        assert_eq!(evaluate_stage(2, pct("-10.1"), 0), Some(DcaTrigger::Hard));
    }

    #[test]
    fn neural_trigger_requires_losing_position() {
        assert_eq!(evaluate_stage(0, pct("-0.1"), 4), Some(DcaTrigger::Neural));
        // At or above water: no neural assist, no matter the level.
        assert_eq!(evaluate_stage(0, pct("0"), 7), None);
        assert_eq!(evaluate_stage(0, pct("1.0"), 7), None);
    }

    #[test]
    fn neural_trigger_respects_stage_mapping() {
        // Stage 1 needs level 5.
        assert_eq!(evaluate_stage(1, pct("-1"), 4), None);
        assert_eq!(evaluate_stage(1, pct("-1"), 5), Some(DcaTrigger::Neural));
        // Stages past 3 are hard-only.
        assert_eq!(evaluate_stage(4, pct("-1"), 7), None);
    }

    #[test]
    fn both_triggers_reported_together() {
        assert_eq!(evaluate_stage(0, pct("-3"), 4), Some(DcaTrigger::Both));
    }

    #[test]
    fn window_counts_only_current_trade() {
        let mut window = DcaWindow::new();
        let now = 1_700_000_000;
        window.seed_dca_buy("BTC", now - 100);
        window.seed_dca_buy("BTC", now - 200);
        assert_eq!(window.count("BTC", now), 2);

        // A sell after those buys starts a new trade.
        window.seed_sell("BTC", now - 50);
        assert_eq!(window.count("BTC", now), 0);
    }

    #[test]
    fn window_expires_old_buys() {
        let mut window = DcaWindow::new();
        let now = 1_700_000_000;
        window.seed_dca_buy("BTC", now - DCA_WINDOW_SECS - 1);
        window.seed_dca_buy("BTC", now - 100);
        assert_eq!(window.count("BTC", now), 1);
    }

    #[test]
    fn third_dca_within_window_is_blocked() {
        let mut window = DcaWindow::new();
        let now = 1_700_000_000;
        assert!(window.allows("BTC", now));
        window.note_buy("BTC", now - 300);
        assert!(window.allows("BTC", now));
        window.note_buy("BTC", now - 200);
        assert!(!window.allows("BTC", now));

        // Once 24 h have passed since the first buy, a slot frees up.
        let later = now + DCA_WINDOW_SECS - 100;
        assert!(window.allows("BTC", later));
    }

    #[test]
    fn reset_clears_buys_and_optionally_marks_sell() {
        let mut window = DcaWindow::new();
        let now = 1_700_000_000;
        window.note_buy("BTC", now - 10);
        window.reset_for_trade("BTC", false, now);
        assert_eq!(window.count("BTC", now), 0);

        window.note_buy("BTC", now + 5);
        window.reset_for_trade("BTC", true, now + 10);
        // Buys recorded before the sell boundary can never resurface.
        window.seed_dca_buy("BTC", now + 5);
        assert_eq!(window.count("BTC", now + 20), 0);
    }

    #[test]
    fn assets_are_case_insensitive() {
        let mut window = DcaWindow::new();
        let now = 1_700_000_000;
        window.note_buy("btc", now);
        assert_eq!(window.count("BTC", now), 1);
    }
}
