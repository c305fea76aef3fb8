// =============================================================================
// Robinhood crypto driver — Ed25519 header-signed requests
// =============================================================================
//
// Every request signs `api_key || timestamp || path || method || body` with an
// Ed25519 key whose 32-byte seed is base64-decoded from the secret file, and
// attaches x-api-key / x-signature (base64) / x-timestamp headers. The path
// component includes the query string.
//
// The buy path carries a precision-repair loop: when the server answers
// "...has too much precision; nearest <value>", the quantity is re-rounded to
// <value>'s decimal places and resubmitted, up to 5 attempts. A
// "must be greater than or equal to" rejection aborts immediately.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::broker::{json_decimal, Broker, LastGoodPrices, PriceBook};
use crate::types::{
    Account, Candle, Execution, Holding, OrderRecord, OrderResponse, OrderSide, OrderState,
    OrderType, TradingPair,
};

const BASE_URL: &str = "https://trading.robinhood.com";
/// Maximum precision-repair attempts on the buy path.
const MAX_BUY_ATTEMPTS: u32 = 5;
/// Initial quantity precision before the server tells us otherwise.
const DEFAULT_QTY_PRECISION: u32 = 8;

pub struct RobinhoodBroker {
    api_key: String,
    signing_key: SigningKey,
    base_url: String,
    http: reqwest::Client,
    last_good: LastGoodPrices,
}

impl RobinhoodBroker {
    /// Build a driver from the API key and the base64-encoded Ed25519 seed.
    pub fn new(api_key: impl Into<String>, base64_private_key: &str) -> anyhow::Result<Self> {
        let seed_bytes = BASE64
            .decode(base64_private_key.trim())
            .map_err(|e| anyhow::anyhow!("invalid base64 private key: {e}"))?;
        let seed: [u8; 32] = seed_bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Ed25519 seed must be exactly 32 bytes"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Ok(Self {
            api_key: api_key.into(),
            signing_key: SigningKey::from_bytes(&seed),
            base_url: BASE_URL.to_string(),
            http,
            last_good: LastGoodPrices::default(),
        })
    }

    // -------------------------------------------------------------------------
    // Signed requests
    // -------------------------------------------------------------------------

    /// Sign and send one request. Returns the parsed JSON body on success,
    /// the parsed error body on an HTTP error (so callers can inspect
    /// `errors[].detail`), or `None` on transport failure.
    async fn api_request(&self, method: &str, path: &str, body: Option<&Value>) -> Option<Value> {
        let timestamp = Utc::now().timestamp();
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();
        let message = format!("{}{}{}{}{}", self.api_key, timestamp, path, method, body_str);
        let signature = BASE64.encode(self.signing_key.sign(message.as_bytes()).to_bytes());

        let url = format!("{}{}", self.base_url, path);
        let mut req = match method {
            "POST" => self
                .http
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body_str),
            _ => self.http.get(&url),
        };
        req = req
            .header("x-api-key", &self.api_key)
            .header("x-signature", signature)
            .header("x-timestamp", timestamp.to_string());

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(method, path, error = %err, "request failed");
                return None;
            }
        };

        let status = resp.status();
        match resp.json::<Value>().await {
            Ok(value) => {
                if !status.is_success() {
                    debug!(method, path, status = status.as_u16(), "error body captured");
                }
                Some(value)
            }
            Err(err) => {
                warn!(method, path, status = status.as_u16(), error = %err, "unparseable response");
                None
            }
        }
    }
}

#[async_trait]
impl Broker for RobinhoodBroker {
    fn name(&self) -> &'static str {
        "robinhood"
    }

    async fn get_account(&self) -> Option<Account> {
        let resp = self
            .api_request("GET", "/api/v1/crypto/trading/accounts/", None)
            .await?;
        let buying_power = json_decimal(resp.get("buying_power")?)?;
        Some(Account {
            buying_power,
            quote_currency: resp
                .get("buying_power_currency")
                .and_then(Value::as_str)
                .unwrap_or("USD")
                .to_string(),
        })
    }

    async fn get_holdings(&self) -> Vec<Holding> {
        let resp = match self
            .api_request("GET", "/api/v1/crypto/trading/holdings/", None)
            .await
        {
            Some(resp) => resp,
            None => return Vec::new(),
        };

        let mut out = Vec::new();
        for entry in results(&resp) {
            let asset = match entry.get("asset_code").and_then(Value::as_str) {
                Some(a) => a.to_uppercase(),
                None => continue,
            };
            let quantity = entry
                .get("total_quantity")
                .and_then(json_decimal)
                .unwrap_or(Decimal::ZERO);
            if quantity <= Decimal::ZERO {
                continue;
            }
            let available = entry
                .get("quantity_available_for_trading")
                .and_then(json_decimal)
                .unwrap_or(quantity);
            out.push(Holding {
                asset,
                quantity,
                available,
            });
        }
        out
    }

    async fn get_trading_pairs(&self) -> Vec<TradingPair> {
        let resp = match self
            .api_request("GET", "/api/v1/crypto/trading/trading_pairs/", None)
            .await
        {
            Some(resp) => resp,
            None => return Vec::new(),
        };
        results(&resp)
            .iter()
            .filter_map(|entry| entry.get("symbol").and_then(Value::as_str))
            .map(|symbol| TradingPair {
                symbol: symbol.to_string(),
            })
            .collect()
    }

    async fn get_orders(&self, symbol: &str) -> Vec<OrderRecord> {
        let path = format!("/api/v1/crypto/trading/orders/?symbol={symbol}");
        let resp = match self.api_request("GET", &path, None).await {
            Some(resp) => resp,
            None => return Vec::new(),
        };

        results(&resp)
            .iter()
            .filter_map(parse_order_record)
            .collect()
    }

    async fn get_price(&self, symbols: &[String]) -> PriceBook {
        let mut book = PriceBook::default();

        for symbol in symbols {
            if symbol == "USDC-USD" {
                continue;
            }

            let path = format!("/api/v1/crypto/marketdata/best_bid_ask/?symbol={symbol}");
            let quote = self.api_request("GET", &path, None).await.and_then(|resp| {
                let entry = resp.get("results")?.as_array()?.first()?.clone();
                let ask = json_decimal(entry.get("ask_inclusive_of_buy_spread")?)?;
                let bid = json_decimal(entry.get("bid_inclusive_of_sell_spread")?)?;
                Some((ask, bid))
            });

            match quote {
                Some((ask, bid)) => {
                    book.insert(symbol, ask, bid);
                    self.last_good.record(symbol, ask, bid);
                }
                None => {
                    if let Some((ask, bid)) = self.last_good.get(symbol) {
                        debug!(symbol, "price miss — serving last-good bid/ask");
                        book.insert(symbol, ask, bid);
                    }
                }
            }
        }

        book
    }

    async fn get_candles(&self, _symbol: &str, _interval: &str, _limit: u32) -> Vec<Candle> {
        // The trading API exposes no kline endpoint.
        Vec::new()
    }

    async fn place_buy(
        &self,
        client_order_id: &str,
        order_type: OrderType,
        symbol: &str,
        quote_amount: Decimal,
    ) -> Option<OrderResponse> {
        let wanted = [symbol.to_string()];
        let book = self.get_price(&wanted).await;
        let ask = book.ask(symbol)?;
        if ask <= Decimal::ZERO {
            return None;
        }

        let mut quantity = quote_amount / ask;
        let mut precision = DEFAULT_QTY_PRECISION;

        for attempt in 1..=MAX_BUY_ATTEMPTS {
            let rounded = quantity.round_dp(precision);
            let body = json!({
                "client_order_id": client_order_id,
                "side": "buy",
                "type": order_type.as_wire().to_lowercase(),
                "symbol": symbol,
                "market_order_config": {
                    "asset_quantity": format!("{rounded:.8}")
                }
            });

            let resp = self
                .api_request("POST", "/api/v1/crypto/trading/orders/", Some(&body))
                .await;

            let Some(value) = resp else {
                continue;
            };

            let Some(errors) = value.get("errors").and_then(Value::as_array) else {
                debug!(symbol, attempt, qty = %rounded, "buy accepted");
                return Some(OrderResponse {
                    order_id: value.get("id").and_then(Value::as_str).map(String::from),
                    executed_qty: Some(rounded),
                    fill_price: Some(ask),
                });
            };

            let mut repaired = false;
            for err in errors {
                let detail = err.get("detail").and_then(Value::as_str).unwrap_or("");
                if detail.contains("has too much precision") {
                    if let Some(places) = precision_from_detail(detail) {
                        warn!(symbol, attempt, places, "repairing quantity precision");
                        precision = places;
                        quantity = quantity.round_dp(places);
                        repaired = true;
                        break;
                    }
                } else if detail.contains("must be greater than or equal to") {
                    warn!(symbol, detail, "order below minimum — aborting");
                    return None;
                }
            }

            if !repaired {
                let error_list = Value::Array(errors.clone());
                warn!(symbol, attempt, "buy rejected: {}", error_list);
            }
        }

        None
    }

    async fn place_sell(
        &self,
        client_order_id: &str,
        order_type: OrderType,
        symbol: &str,
        quantity: Decimal,
    ) -> Option<OrderResponse> {
        let body = json!({
            "client_order_id": client_order_id,
            "side": "sell",
            "type": order_type.as_wire().to_lowercase(),
            "symbol": symbol,
            "market_order_config": {
                "asset_quantity": format!("{quantity:.8}")
            }
        });

        let value = self
            .api_request("POST", "/api/v1/crypto/trading/orders/", Some(&body))
            .await?;
        if value.get("errors").is_some() {
            warn!(symbol, "sell rejected: {value}");
            return None;
        }

        Some(OrderResponse {
            order_id: value.get("id").and_then(Value::as_str).map(String::from),
            executed_qty: Some(quantity),
            fill_price: None,
        })
    }
}

impl std::fmt::Debug for RobinhoodBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobinhoodBroker")
            .field("api_key", &"<redacted>")
            .field("signing_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn results(resp: &Value) -> &[Value] {
    resp.get("results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn parse_order_record(entry: &Value) -> Option<OrderRecord> {
    let side = match entry.get("side").and_then(Value::as_str)? {
        "buy" => OrderSide::Buy,
        "sell" => OrderSide::Sell,
        _ => return None,
    };
    let state = match entry.get("state").and_then(Value::as_str).unwrap_or("") {
        "filled" => OrderState::Filled,
        "canceled" | "rejected" | "expired" => OrderState::Canceled,
        _ => OrderState::Open,
    };
    let created_at = entry
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(parse_rfc3339)
        .unwrap_or(0);

    let executions = entry
        .get("executions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .filter_map(|exec| {
            Some(Execution {
                quantity: json_decimal(exec.get("quantity")?)?,
                effective_price: json_decimal(exec.get("effective_price")?)?,
            })
        })
        .collect();

    Some(OrderRecord {
        id: entry
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        side,
        state,
        created_at,
        executions,
    })
}

fn parse_rfc3339(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp())
}

/// Extract the decimal-place count from a precision error detail, e.g.
/// "...has too much precision; nearest 0.000001 ..." -> 6.
fn precision_from_detail(detail: &str) -> Option<u32> {
    let nearest = detail.split("nearest ").nth(1)?.split_whitespace().next()?;
    match nearest.split_once('.') {
        Some((_, frac)) => Some(frac.trim_end_matches('0').len() as u32),
        None => Some(0),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_extraction_from_error_detail() {
        assert_eq!(
            precision_from_detail("quantity has too much precision; nearest 0.000001 allowed"),
            Some(6)
        );
        assert_eq!(
            precision_from_detail("has too much precision; nearest 0.01"),
            Some(2)
        );
        assert_eq!(precision_from_detail("nearest 1 allowed"), Some(0));
        assert_eq!(precision_from_detail("no hint here"), None);
    }

    #[test]
    fn precision_extraction_trims_trailing_zeros() {
        // "0.000100" means 4 significant decimal places.
        assert_eq!(
            precision_from_detail("has too much precision; nearest 0.000100 allowed"),
            Some(4)
        );
    }

    #[test]
    fn precision_repair_rounds_quantity() {
        let qty: Decimal = "0.00123456789".parse().unwrap();
        let repaired = qty.round_dp(6);
        assert_eq!(repaired, "0.001235".parse::<Decimal>().unwrap());
        // Truncation toward the allowed precision.
        let truncated: Decimal = "0.0012341".parse::<Decimal>().unwrap().round_dp(6);
        assert_eq!(truncated, "0.001234".parse::<Decimal>().unwrap());
    }

    #[test]
    fn rfc3339_timestamps_parse_to_epoch() {
        assert_eq!(parse_rfc3339("1970-01-01T00:00:00Z"), Some(0));
        assert_eq!(parse_rfc3339("2024-01-01T00:00:00+00:00"), Some(1704067200));
        assert_eq!(parse_rfc3339("not a date"), None);
    }

    #[test]
    fn order_record_parsing() {
        let entry = serde_json::json!({
            "id": "abc",
            "side": "buy",
            "state": "filled",
            "created_at": "2024-01-01T00:00:00Z",
            "executions": [
                {"quantity": "0.5", "effective_price": "100.0"}
            ]
        });
        let record = parse_order_record(&entry).unwrap();
        assert_eq!(record.side, OrderSide::Buy);
        assert_eq!(record.state, OrderState::Filled);
        assert_eq!(record.created_at, 1704067200);
        assert_eq!(record.executions.len(), 1);
        assert_eq!(
            record.executions[0].quantity,
            "0.5".parse::<Decimal>().unwrap()
        );
    }

    #[test]
    fn signing_is_deterministic() {
        let seed = [7u8; 32];
        let key = SigningKey::from_bytes(&seed);
        let message = b"key1700000000/api/v1/crypto/trading/orders/POST{}";
        let first = BASE64.encode(key.sign(message).to_bytes());
        let second = BASE64.encode(key.sign(message).to_bytes());
        assert_eq!(first, second);
    }
}
