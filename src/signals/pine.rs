// =============================================================================
// Pine signal feed — tail-followed JSONL override file
// =============================================================================
//
// Each line is `{symbol, action, ts, strength?}` where action is one of
// buy / sell / hold / stop and ts may be epoch seconds or milliseconds.
// The file is read incrementally from the last byte offset, so external
// writers can keep appending while the trader runs. Stale signals beyond
// `max_age` are ignored at lookup time.
// =============================================================================

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PineAction {
    Buy,
    Sell,
    Hold,
    Stop,
}

impl PineAction {
    fn from_str(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            "hold" => Some(Self::Hold),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PineSignal {
    pub action: PineAction,
    pub ts: i64,
    pub strength: Option<f64>,
}

#[derive(Debug, Default)]
pub struct PineFeed {
    path: Option<PathBuf>,
    offset: u64,
    signals: HashMap<String, PineSignal>,
}

impl PineFeed {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            offset: 0,
            signals: HashMap::new(),
        }
    }

    /// Read any newly appended lines and fold them into the per-asset map.
    /// The latest line per asset wins.
    pub fn refresh(&mut self) {
        let Some(path) = &self.path else {
            return;
        };
        let Ok(mut file) = std::fs::File::open(path) else {
            return;
        };
        if file.seek(SeekFrom::Start(self.offset)).is_err() {
            return;
        }

        let mut buf = String::new();
        if file.read_to_string(&mut buf).is_err() {
            return;
        }
        self.offset += buf.len() as u64;

        for line in buf.lines() {
            let raw = line.trim();
            if raw.is_empty() {
                continue;
            }
            let Ok(payload) = serde_json::from_str::<Value>(raw) else {
                continue;
            };
            let symbol = payload
                .get("symbol")
                .or_else(|| payload.get("ticker"))
                .and_then(Value::as_str)
                .map(normalize_signal_symbol)
                .unwrap_or_default();
            if symbol.is_empty() {
                continue;
            }
            let Some(action) = payload
                .get("action")
                .or_else(|| payload.get("signal"))
                .and_then(Value::as_str)
                .and_then(PineAction::from_str)
            else {
                continue;
            };
            let ts = parse_signal_ts(
                payload
                    .get("ts")
                    .or_else(|| payload.get("time"))
                    .or_else(|| payload.get("timestamp")),
            )
            .unwrap_or_else(|| Utc::now().timestamp());
            let strength = payload.get("strength").and_then(Value::as_f64);

            debug!(symbol = %symbol, ?action, ts, "pine signal ingested");
            self.signals.insert(
                symbol,
                PineSignal {
                    action,
                    ts,
                    strength,
                },
            );
        }
    }

    /// Latest signal for an asset, or None when it is older than `max_age`
    /// seconds (0 disables the age check).
    pub fn get(&self, asset: &str, max_age: i64) -> Option<&PineSignal> {
        let signal = self.signals.get(&normalize_signal_symbol(asset))?;
        if max_age > 0 && signal.ts > 0 && Utc::now().timestamp() - signal.ts > max_age {
            return None;
        }
        Some(signal)
    }
}

/// Reduce any pair spelling to the base asset: "BTC-USD", "btc_usdt",
/// "BTC/EUR", and "BTCUSDT" all normalise to "BTC".
pub fn normalize_signal_symbol(raw: &str) -> String {
    let sym = raw.trim().to_uppercase();
    if sym.is_empty() {
        return String::new();
    }
    if let Some((base, _)) = sym.split_once(['-', '_', '/']) {
        return base.to_string();
    }
    for quote in ["USDT", "USDC", "BUSD", "USD", "BTC", "ETH", "BNB"] {
        if sym.ends_with(quote) && sym.len() > quote.len() {
            return sym[..sym.len() - quote.len()].to_string();
        }
    }
    sym
}

fn parse_signal_ts(value: Option<&Value>) -> Option<i64> {
    let raw = value?;
    let ts = if let Some(n) = raw.as_f64() {
        n
    } else {
        raw.as_str()?.trim().parse::<f64>().ok()?
    };
    // Millisecond timestamps are collapsed to seconds.
    let ts = if ts > 1e12 { ts / 1000.0 } else { ts };
    Some(ts as i64)
}
