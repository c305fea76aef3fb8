// =============================================================================
// Shared types used across the PowerTrader engine
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Holdings at or below this quantity are treated as fully sold and removed.
pub fn dust_epsilon() -> Decimal {
    Decimal::new(1, 8)
}

/// Account snapshot produced by every broker driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub buying_power: Decimal,
    pub quote_currency: String,
}

/// A single asset position as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub asset: String,
    pub quantity: Decimal,
    pub available: Decimal,
}

/// A tradeable pair descriptor. The control loop only uses the symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: String,
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order lifecycle state. Only `Filled` orders contribute to cost basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Filled,
    Open,
    Canceled,
}

/// Market or limit. Limit orders carry GTC time-in-force on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    /// Upper-case wire form ("MARKET" / "LIMIT").
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
        }
    }
}

/// One fill of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub quantity: Decimal,
    pub effective_price: Decimal,
}

/// A historical order as returned by a driver. Timestamps are epoch seconds;
/// drivers convert from whatever their wire format uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub side: OrderSide,
    pub state: OrderState,
    pub created_at: i64,
    pub executions: Vec<Execution>,
}

/// Response to a freshly placed order. Drivers fill in what they know.
#[derive(Debug, Clone, Default)]
pub struct OrderResponse {
    pub order_id: Option<String>,
    pub executed_qty: Option<Decimal>,
    pub fill_price: Option<Decimal>,
}

/// A single OHLCV bar, most recent last in any series. Indicator math is
/// plain f64; candle values never feed money arithmetic directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ---------------------------------------------------------------------------
// Symbol helpers
// ---------------------------------------------------------------------------

/// Build the internal pair form used throughout the control loop ("BTC-USD").
/// Drivers translate this to their own wire symbols.
pub fn full_symbol(base: &str) -> String {
    format!("{}-USD", base.trim().to_uppercase())
}

/// Extract the base asset from an internal pair ("BTC-USD" -> "BTC").
pub fn base_asset(symbol: &str) -> String {
    symbol
        .split('-')
        .next()
        .unwrap_or(symbol)
        .trim()
        .to_uppercase()
}

// ---------------------------------------------------------------------------
// Price formatting
// ---------------------------------------------------------------------------

/// Format a price with magnitude-scaled decimals for console / status output.
///
/// Values >= 1.0 get two decimals; sub-unit values get enough decimals to
/// show meaningful digits, capped at 12. Trailing zeros are trimmed.
pub fn format_price(price: Decimal) -> String {
    let p = price.to_f64().unwrap_or(0.0);
    if p == 0.0 {
        return "0".to_string();
    }

    let ap = p.abs();
    let decimals = if ap >= 1.0 {
        2
    } else {
        let d = (-ap.log10().floor()) as i32 + 3;
        d.clamp(2, 12) as usize
    };

    let mut s = format!("{p:.decimals$}");
    if s.contains('.') {
        s = s.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    s
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_symbol_uppercases_and_appends_quote() {
        assert_eq!(full_symbol("btc"), "BTC-USD");
        assert_eq!(full_symbol(" eth "), "ETH-USD");
    }

    #[test]
    fn base_asset_strips_quote() {
        assert_eq!(base_asset("BTC-USD"), "BTC");
        assert_eq!(base_asset("doge"), "DOGE");
    }

    #[test]
    fn format_price_large_values_two_decimals() {
        assert_eq!(format_price(Decimal::new(5000012, 2)), "50000.12");
        assert_eq!(format_price(Decimal::new(150, 2)), "1.5");
    }

    #[test]
    fn format_price_small_values_scale_decimals() {
        assert_eq!(format_price(Decimal::new(5, 1)), "0.5");
        assert_eq!(format_price(Decimal::new(5, 3)), "0.005");
        assert_eq!(format_price(Decimal::ZERO), "0");
    }

    #[test]
    fn order_side_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&OrderSide::Buy).unwrap(), "\"buy\"");
        let side: OrderSide = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(side, OrderSide::Sell);
    }
}
