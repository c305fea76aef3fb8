// =============================================================================
// Broker port — the uniform capability set every exchange driver satisfies
// =============================================================================
//
// Callers hold `Arc<dyn Broker>`; the three drivers (Ed25519 header signing,
// HMAC query signing, paper simulation) are interchangeable behind it.
//
// Contract (see each driver for specifics):
//   - Buys take a quote-currency amount; the asset quantity is derived from
//     the latest ask. Sells take an asset quantity directly.
//   - Drivers never propagate errors: unrecoverable failures degrade to
//     `None` or an empty collection and the control loop skips that tick.
//   - Price lookups fall back to the last observed bid/ask when the network
//     fails, provided both were positive, so valuations never dip spuriously.
// =============================================================================

pub mod binance;
pub mod paper;
pub mod robinhood;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::types::{
    Account, Candle, Holding, OrderRecord, OrderResponse, OrderType, TradingPair,
};

/// Best ask/bid per symbol plus the symbols that resolved a usable price
/// this tick (directly or from the last-good cache).
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    pub asks: HashMap<String, Decimal>,
    pub bids: HashMap<String, Decimal>,
    pub valid: Vec<String>,
}

impl PriceBook {
    pub fn insert(&mut self, symbol: &str, ask: Decimal, bid: Decimal) {
        self.asks.insert(symbol.to_string(), ask);
        self.bids.insert(symbol.to_string(), bid);
        self.valid.push(symbol.to_string());
    }

    pub fn ask(&self, symbol: &str) -> Option<Decimal> {
        self.asks.get(symbol).copied()
    }

    pub fn bid(&self, symbol: &str) -> Option<Decimal> {
        self.bids.get(symbol).copied()
    }

    pub fn is_valid(&self, symbol: &str) -> bool {
        self.valid.iter().any(|s| s == symbol)
    }
}

/// Per-driver cache of the last bid/ask that were both positive. A transient
/// price miss is served from here instead of zeroing out a held asset.
#[derive(Debug, Default)]
pub struct LastGoodPrices {
    inner: Mutex<HashMap<String, (Decimal, Decimal)>>,
}

impl LastGoodPrices {
    /// Record an observation. Non-positive prices are not cached.
    pub fn record(&self, symbol: &str, ask: Decimal, bid: Decimal) {
        if ask > Decimal::ZERO && bid > Decimal::ZERO {
            self.inner.lock().insert(symbol.to_string(), (ask, bid));
        }
    }

    /// Last known `(ask, bid)` for a symbol.
    pub fn get(&self, symbol: &str) -> Option<(Decimal, Decimal)> {
        self.inner.lock().get(symbol).copied()
    }
}

/// Capability interface over heterogeneous exchange REST APIs.
#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_account(&self) -> Option<Account>;

    async fn get_holdings(&self) -> Vec<Holding>;

    async fn get_trading_pairs(&self) -> Vec<TradingPair>;

    /// Order history for a symbol. Ordering is whatever the upstream API
    /// returns; callers sort by `created_at`.
    async fn get_orders(&self, symbol: &str) -> Vec<OrderRecord>;

    async fn get_price(&self, symbols: &[String]) -> PriceBook;

    /// OHLCV bars for the strategy evaluator. Drivers whose upstream exposes
    /// no kline endpoint return an empty series.
    async fn get_candles(&self, symbol: &str, interval: &str, limit: u32) -> Vec<Candle>;

    /// Market/limit buy spending `quote_amount` of the quote currency.
    async fn place_buy(
        &self,
        client_order_id: &str,
        order_type: OrderType,
        symbol: &str,
        quote_amount: Decimal,
    ) -> Option<OrderResponse>;

    /// Market/limit sell of `quantity` base units.
    async fn place_sell(
        &self,
        client_order_id: &str,
        order_type: OrderType,
        symbol: &str,
        quantity: Decimal,
    ) -> Option<OrderResponse>;
}

/// Parse a JSON field that may be either a string or a number into a Decimal.
/// Exchange payloads mix both spellings freely.
pub(crate) fn json_decimal(value: &serde_json::Value) -> Option<Decimal> {
    if let Some(s) = value.as_str() {
        s.trim().parse().ok()
    } else if let Some(n) = value.as_f64() {
        Decimal::from_f64_retain(n)
    } else {
        None
    }
}
