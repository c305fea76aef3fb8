// =============================================================================
// Strategy evaluator — neural gating combined with indicator conditions
// =============================================================================
//
// The neural baseline allows entry when long_level >= 3 and short_level == 0.
// User-selected indicators refine or replace that gate in two modes:
//
//   selector — every enabled condition must hold (AND). With replace_neural
//              the conjunction alone decides; otherwise it is ANDed with the
//              neural baseline.
//   super    — each condition contributes a score in [0, 1]; the neural
//              score joins the pool unless replace_neural. Entry is allowed
//              when the mean score reaches the threshold (0.6).
//
// Fewer than 30 closes falls back to the neural baseline, or refuses
// outright when the indicators were meant to replace it.
// =============================================================================

use tracing::debug;

use crate::indicators::{
    adx::adx,
    atr::atr,
    bollinger::bollinger_bands,
    ema::ema,
    ichimoku::ichimoku,
    macd::bullish_cross,
    momentum::momentum,
    obv::obv,
    pivots::pivots,
    rsi::rsi,
    stochastic::stochastic,
    volume_profile::volume_profile,
};
use crate::settings::{StrategyMode, StrategySettings};
use crate::types::Candle;

/// Mean-score threshold for super mode.
pub const SUPER_SCORE_THRESHOLD: f64 = 0.6;
/// Minimum closes required before indicator conditions are trusted.
pub const MIN_CANDLES: usize = 30;

/// Column-wise view of a candle series.
#[derive(Debug, Default)]
pub struct CandleSeries {
    pub closes: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub volumes: Vec<f64>,
}

impl CandleSeries {
    pub fn from_candles(candles: &[Candle]) -> Self {
        let mut series = Self::default();
        for c in candles {
            series.closes.push(c.close);
            series.highs.push(c.high);
            series.lows.push(c.low);
            series.volumes.push(c.volume);
        }
        series
    }
}

/// Outcome of an entry evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryDecision {
    pub allowed: bool,
    pub score: f64,
}

/// The neural-only gate and its score contribution.
pub fn neural_baseline(long_level: u8, short_level: u8) -> EntryDecision {
    let allowed = long_level >= 3 && short_level == 0;
    let score = if short_level == 0 {
        (long_level.min(7) as f64) / 7.0
    } else {
        0.0
    };
    EntryDecision { allowed, score }
}

/// Evaluate one indicator's enter-long condition. Returns the boolean
/// condition and its score contribution for super mode.
pub fn indicator_condition(name: &str, series: &CandleSeries) -> (bool, f64) {
    let closes = &series.closes;
    let highs = &series.highs;
    let lows = &series.lows;
    let volumes = &series.volumes;
    let price = closes.last().copied().unwrap_or(0.0);

    match name {
        "rsi" => {
            let ok = rsi(closes, 14).map(|v| v < 30.0).unwrap_or(false);
            (ok, if ok { 1.0 } else { 0.0 })
        }
        "macd" => {
            let ok = bullish_cross(closes, 12, 26, 9);
            (ok, if ok { 1.0 } else { 0.0 })
        }
        "stochastic" => {
            if closes.len() < 2 {
                return (false, 0.0);
            }
            let now = stochastic(highs, lows, closes, 14, 3);
            let prev = stochastic(
                &highs[..highs.len() - 1],
                &lows[..lows.len() - 1],
                &closes[..closes.len() - 1],
                14,
                3,
            );
            let ok = match (now, prev) {
                (Some((k, d)), Some((k_prev, d_prev))) => k < 20.0 && k_prev <= d_prev && k > d,
                _ => false,
            };
            (ok, if ok { 1.0 } else { 0.0 })
        }
        "momentum" => {
            let ok = momentum(closes, 10).map(|v| v > 0.0).unwrap_or(false);
            (ok, if ok { 1.0 } else { 0.0 })
        }
        "obv" => {
            if closes.len() < 2 || volumes.len() < 2 {
                return (false, 0.0);
            }
            let now = obv(closes, volumes);
            let prev = obv(&closes[..closes.len() - 1], &volumes[..volumes.len() - 1]);
            let ok = matches!((now, prev), (Some(n), Some(p)) if n > p);
            (ok, if ok { 1.0 } else { 0.0 })
        }
        "bollinger" => {
            let ok = bollinger_bands(closes, 20, 2.0)
                .map(|(_, _, lower)| price <= lower)
                .unwrap_or(false);
            (ok, if ok { 1.0 } else { 0.0 })
        }
        "ema" => {
            let fast = ema(closes, 8);
            let slow = ema(closes, 21);
            let ok = match slow {
                Some(slow) => fast.map(|f| f > slow).unwrap_or(false) || price > slow,
                None => false,
            };
            (ok, if ok { 1.0 } else { 0.0 })
        }
        // Presence-only condition: contributes a half score when computable.
        "atr" => {
            let present = atr(highs, lows, closes, 14).map(f64::is_finite).unwrap_or(false);
            (true, if present { 0.5 } else { 0.0 })
        }
        "volume_profile" => {
            let ok = volume_profile(volumes, 20).map(|r| r > 1.0).unwrap_or(false);
            (ok, if ok { 1.0 } else { 0.0 })
        }
        "adx" => {
            let ok = adx(highs, lows, closes, 14).map(|v| v > 20.0).unwrap_or(false);
            (ok, if ok { 1.0 } else { 0.0 })
        }
        "pivots" => {
            let ok = pivots(highs, lows, closes)
                .map(|p| p.s1 != 0.0 && price >= p.s1 * 0.99 && price <= p.s1 * 1.01)
                .unwrap_or(false);
            (ok, if ok { 1.0 } else { 0.0 })
        }
        "ichimoku" => {
            let ok = ichimoku(highs, lows)
                .map(|i| price > i.senkou_a.max(i.senkou_b) && i.tenkan > i.kijun)
                .unwrap_or(false);
            (ok, if ok { 1.0 } else { 0.0 })
        }
        _ => (false, 0.0),
    }
}

/// Combine the neural gate with the configured indicator conditions.
pub fn should_enter(
    settings: &StrategySettings,
    long_level: u8,
    short_level: u8,
    candles: &[Candle],
) -> EntryDecision {
    let selected = settings.enabled_indicators();
    let neural = neural_baseline(long_level, short_level);

    if selected.is_empty() {
        if settings.replace_neural {
            // Nothing left to decide with.
            return EntryDecision {
                allowed: false,
                score: 0.0,
            };
        }
        return neural;
    }

    let series = CandleSeries::from_candles(candles);
    if series.closes.len() < MIN_CANDLES {
        if settings.replace_neural {
            return EntryDecision {
                allowed: false,
                score: 0.0,
            };
        }
        return neural;
    }

    let mut conditions = Vec::with_capacity(selected.len());
    let mut scores = Vec::with_capacity(selected.len() + 1);
    for name in &selected {
        let (ok, score) = indicator_condition(name, &series);
        conditions.push(ok);
        scores.push(score);
    }

    debug!(
        long_level,
        short_level,
        mode = ?settings.mode,
        indicators = ?selected,
        ?conditions,
        "strategy conditions evaluated"
    );

    match settings.mode {
        StrategyMode::Selector => {
            let indicators_ok = conditions.iter().all(|c| *c);
            if settings.replace_neural {
                EntryDecision {
                    allowed: indicators_ok,
                    score: if indicators_ok { 1.0 } else { 0.0 },
                }
            } else {
                EntryDecision {
                    allowed: neural.allowed && indicators_ok,
                    score: neural.score,
                }
            }
        }
        StrategyMode::Super => {
            if !settings.replace_neural {
                scores.push(neural.score);
            }
            if scores.is_empty() {
                return neural;
            }
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            EntryDecision {
                allowed: mean >= SUPER_SCORE_THRESHOLD,
                score: mean,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::StrategySettings;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                ts: i as i64 * 60,
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 100.0,
            })
            .collect()
    }

    fn settings_with(indicators: &[&str], mode: StrategyMode, replace: bool) -> StrategySettings {
        let mut s = StrategySettings::default();
        s.mode = mode;
        s.replace_neural = replace;
        for name in indicators {
            s.indicators.insert((*name).to_string(), true);
        }
        s
    }

    #[test]
    fn neural_baseline_gate() {
        assert!(neural_baseline(3, 0).allowed);
        assert!(neural_baseline(7, 0).allowed);
        assert!(!neural_baseline(2, 0).allowed);
        // Short-signal veto: long strength is irrelevant.
        assert!(!neural_baseline(5, 2).allowed);
        assert_eq!(neural_baseline(5, 2).score, 0.0);
        assert!((neural_baseline(7, 0).score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_indicators_defaults_to_neural() {
        let s = StrategySettings::default();
        let decision = should_enter(&s, 4, 0, &[]);
        assert!(decision.allowed);
    }

    #[test]
    fn replace_without_indicators_refuses() {
        let s = settings_with(&[], StrategyMode::Selector, true);
        assert!(!should_enter(&s, 7, 0, &[]).allowed);
    }

    #[test]
    fn insufficient_candles_falls_back_to_neural() {
        let s = settings_with(&["rsi"], StrategyMode::Selector, false);
        let short_series = candles(&[100.0; 10]);
        assert!(should_enter(&s, 4, 0, &short_series).allowed);

        let s = settings_with(&["rsi"], StrategyMode::Selector, true);
        assert!(!should_enter(&s, 4, 0, &short_series).allowed);
    }

    #[test]
    fn selector_requires_every_condition() {
        // Rising closes: momentum passes, RSI (oversold) fails.
        let rising: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let series = candles(&rising);

        let s = settings_with(&["momentum"], StrategyMode::Selector, true);
        assert!(should_enter(&s, 0, 0, &series).allowed);

        let s = settings_with(&["momentum", "rsi"], StrategyMode::Selector, true);
        assert!(!should_enter(&s, 0, 0, &series).allowed);
    }

    #[test]
    fn selector_without_replace_keeps_neural_gate() {
        let rising: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let series = candles(&rising);
        let s = settings_with(&["momentum"], StrategyMode::Selector, false);
        // Indicator passes but the neural gate does not.
        assert!(!should_enter(&s, 2, 0, &series).allowed);
        assert!(should_enter(&s, 3, 0, &series).allowed);
    }

    #[test]
    fn super_mode_averages_scores() {
        let rising: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let series = candles(&rising);

        // momentum=1.0, ema=1.0, neural (7/7)=1.0 -> mean 1.0.
        let s = settings_with(&["momentum", "ema"], StrategyMode::Super, false);
        let decision = should_enter(&s, 7, 0, &series);
        assert!(decision.allowed);
        assert!((decision.score - 1.0).abs() < 1e-9);

        // momentum=1.0, rsi=0.0, neural 0 -> mean 1/3 < 0.6.
        let s = settings_with(&["momentum", "rsi"], StrategyMode::Super, false);
        let decision = should_enter(&s, 0, 0, &series);
        assert!(!decision.allowed);
    }

    #[test]
    fn super_mode_replace_excludes_neural_score() {
        let rising: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let series = candles(&rising);
        // momentum=1.0 and ema=1.0 alone -> mean 1.0 regardless of levels.
        let s = settings_with(&["momentum", "ema"], StrategyMode::Super, true);
        assert!(should_enter(&s, 0, 3, &series).allowed);
    }

    #[test]
    fn atr_condition_is_presence_only() {
        let rising: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let series = CandleSeries::from_candles(&candles(&rising));
        let (ok, score) = indicator_condition("atr", &series);
        assert!(ok);
        assert!((score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn unknown_indicator_is_false() {
        let series = CandleSeries::default();
        assert_eq!(indicator_condition("astrology", &series), (false, 0.0));
    }
}
