// =============================================================================
// Binance REST API client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Signed requests
// carry X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift; a server-time offset is refreshed at most every 60 s
// and forcibly re-synced once per call on Binance codes -1021 / -1022.
//
// Retry ladder (at most 4 retries per request):
//   - transport errors and 5xx: exponential backoff with jitter
//   - HTTP 418/429: honour Retry-After, else backoff
//   - anything else 4xx: surfaced immediately as ExchangeError::Api
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::exchange::error::ExchangeError;
use crate::exchange::filters::{wire_decimal, SymbolFilters};
use crate::settings::env_flag;
use crate::types::{Candle, OrderType};

type HmacSha256 = Hmac<Sha256>;

/// recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;
/// Maximum retries per request on transient failures.
const MAX_RETRIES: u32 = 4;
/// Minimum interval between server-time syncs.
const TIME_SYNC_INTERVAL: Duration = Duration::from_secs(60);
/// Exchange-info filter cache TTL.
const EXCHANGE_INFO_TTL: Duration = Duration::from_secs(900);
/// Backoff parameters: min(CAP, BASE * 2^attempt) plus up to 10% jitter.
const BACKOFF_BASE_SECS: f64 = 0.5;
const BACKOFF_CAP_SECS: f64 = 10.0;

/// Free/locked balance for one asset.
#[derive(Debug, Clone, Default)]
pub struct Balance {
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

#[derive(Debug, Default)]
struct TimeSync {
    offset_ms: i64,
    last_sync: Option<Instant>,
}

/// Binance REST client. One instance is owned by the broker adapter; the
/// interior locks exist only because methods take `&self`, never for
/// cross-thread sharing.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    default_quote: String,
    public_only: bool,
    http: reqwest::Client,
    time_sync: Mutex<TimeSync>,
    filter_cache: Mutex<HashMap<String, (Instant, SymbolFilters)>>,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Build a client with credentials from `BINANCE_API_KEY` /
    /// `BINANCE_API_SECRET`. Fails when either is missing or a placeholder.
    pub fn from_env() -> Result<Self, ExchangeError> {
        let api_key = credential_from_env("BINANCE_API_KEY");
        let secret = credential_from_env("BINANCE_API_SECRET");
        if api_key.is_empty() || secret.is_empty() {
            return Err(ExchangeError::MissingCredentials);
        }
        Ok(Self::build(api_key, secret, false))
    }

    /// Build a public-only client (prices, klines, exchange info). Any signed
    /// call returns `ExchangeError::MissingCredentials`.
    pub fn public() -> Self {
        Self::build(String::new(), String::new(), true)
    }

    fn build(api_key: String, secret: String, public_only: bool) -> Self {
        let base_url = match std::env::var("BINANCE_API_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_string(),
            _ => {
                if env_flag("BINANCE_TESTNET", false) {
                    "https://testnet.binance.vision".to_string()
                } else {
                    "https://api.binance.com".to_string()
                }
            }
        };

        let default_quote = std::env::var("BINANCE_QUOTE_ASSET")
            .ok()
            .map(|q| q.trim().to_uppercase())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| "USDT".to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = %base_url, quote = %default_quote, public_only, "BinanceClient initialised");

        Self {
            api_key,
            secret,
            base_url,
            default_quote,
            public_only,
            http,
            time_sync: Mutex::new(TimeSync::default()),
            filter_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Quote asset used when a pair omits one ("BTC" -> "BTC<quote>").
    pub fn default_quote(&self) -> &str {
        &self.default_quote
    }

    // -------------------------------------------------------------------------
    // Symbol normalisation
    // -------------------------------------------------------------------------

    /// Collapse any accepted pair spelling to Binance wire form:
    /// "BTC" == "btc-usdt" == "BTC/USDT" -> "BTCUSDT" (default quote USDT).
    /// The GUI's "-USD" pairs map to the stablecoin quote.
    pub fn normalize_symbol(&self, symbol: &str) -> Result<String, ExchangeError> {
        let raw = symbol.trim().to_uppercase();
        if raw.is_empty() {
            return Err(ExchangeError::Malformed("empty symbol".into()));
        }

        let (mut base, mut quote) = if let Some((b, q)) = raw.split_once(['-', '_', '/']) {
            (b.to_string(), q.to_string())
        } else {
            let mut split = (raw.clone(), String::new());
            for q in [
                self.default_quote.as_str(),
                "USDT",
                "USDC",
                "BUSD",
                "BTC",
                "ETH",
                "BNB",
                "USD",
            ] {
                if raw.ends_with(q) && raw.len() > q.len() {
                    split = (raw[..raw.len() - q.len()].to_string(), q.to_string());
                    break;
                }
            }
            split
        };

        base = base.trim().to_string();
        quote = quote.trim().to_string();
        if base.is_empty() {
            return Err(ExchangeError::Malformed(format!(
                "invalid symbol format: {symbol}"
            )));
        }
        if quote.is_empty() {
            quote = self.default_quote.clone();
        }
        if quote == "USD" {
            quote = "USDT".to_string();
        }
        Ok(format!("{base}{quote}"))
    }

    // -------------------------------------------------------------------------
    // Signing
    // -------------------------------------------------------------------------

    /// HMAC-SHA256 hex signature of a canonical query string.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn local_now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as i64
    }

    /// Local clock adjusted by the cached server offset.
    fn timestamp_ms(&self) -> i64 {
        Self::local_now_ms() + self.time_sync.lock().offset_ms
    }

    // -------------------------------------------------------------------------
    // Server-time sync
    // -------------------------------------------------------------------------

    /// Refresh the server-time offset, at most once per 60 s unless forced.
    /// Performs its own plain GET so the retry ladder never recurses.
    async fn sync_time(&self, force: bool) -> Result<(), ExchangeError> {
        {
            let sync = self.time_sync.lock();
            if !force {
                if let Some(at) = sync.last_sync {
                    if at.elapsed() < TIME_SYNC_INTERVAL {
                        return Ok(());
                    }
                }
            }
        }

        let url = format!("{}/api/v3/time", self.base_url);
        let body: Value = self.http.get(&url).send().await?.json().await?;
        let server_time = body.get("serverTime").and_then(Value::as_i64).unwrap_or(0);
        if server_time > 0 {
            let mut sync = self.time_sync.lock();
            sync.offset_ms = server_time - Self::local_now_ms();
            sync.last_sync = Some(Instant::now());
            debug!(offset_ms = sync.offset_ms, "server time synced");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Request core
    // -------------------------------------------------------------------------

    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &BTreeMap<String, String>,
        signed: bool,
    ) -> Result<Value, ExchangeError> {
        if signed && self.public_only {
            return Err(ExchangeError::MissingCredentials);
        }

        let mut resynced = false;

        for attempt in 0..=MAX_RETRIES {
            if signed {
                self.sync_time(false).await?;
            }

            let mut req_params = params.clone();
            let mut query;
            if signed {
                req_params.insert("timestamp".into(), self.timestamp_ms().to_string());
                req_params.insert("recvWindow".into(), RECV_WINDOW.to_string());
                query = canonical_query(&req_params);
                let signature = self.sign(&query);
                query.push_str("&signature=");
                query.push_str(&signature);
            } else {
                query = canonical_query(&req_params);
            }

            let url = if query.is_empty() {
                format!("{}{}", self.base_url, path)
            } else {
                format!("{}{}?{}", self.base_url, path, query)
            };

            let mut req = self.http.request(method.clone(), &url);
            if signed {
                req = req.header("X-MBX-APIKEY", &self.api_key);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt < MAX_RETRIES {
                        debug!(path, attempt, error = %err, "transport error — backing off");
                        self.sleep_backoff(attempt).await;
                        continue;
                    }
                    warn!(path, error = %err, "request failed after retries");
                    return Err(err.into());
                }
            };

            let status = resp.status();

            if status.as_u16() == 418 || status.as_u16() == 429 {
                if attempt < MAX_RETRIES {
                    let retry_after = retry_after_secs(resp.headers());
                    warn!(path, status = status.as_u16(), ?retry_after, "rate limited");
                    match retry_after {
                        Some(secs) => tokio::time::sleep(Duration::from_secs_f64(secs)).await,
                        None => self.sleep_backoff(attempt).await,
                    }
                    continue;
                }
                return Err(ExchangeError::RateLimited {
                    status: status.as_u16(),
                    attempts: attempt + 1,
                });
            }

            if status.is_server_error() {
                if attempt < MAX_RETRIES {
                    debug!(path, status = status.as_u16(), attempt, "server error — backing off");
                    self.sleep_backoff(attempt).await;
                    continue;
                }
                let (code, msg) = parse_error_body(resp).await;
                return Err(ExchangeError::Api {
                    status: status.as_u16(),
                    code,
                    msg,
                });
            }

            if status.is_client_error() {
                let (code, msg) = parse_error_body(resp).await;
                if let Some(c) = code {
                    if c == -1021 || c == -1022 {
                        if !resynced {
                            self.sync_time(true).await?;
                            resynced = true;
                            debug!(path, code = c, "timestamp error — resynced server time");
                            continue;
                        }
                        warn!(path, code = c, msg = %msg, "timestamp error persists after resync");
                        return Err(ExchangeError::TimeSkew { code: c, msg });
                    }
                }
                warn!(path, status = status.as_u16(), code = ?code, msg = %msg, "API error");
                return Err(ExchangeError::Api {
                    status: status.as_u16(),
                    code,
                    msg,
                });
            }

            return resp
                .json()
                .await
                .map_err(|e| ExchangeError::Malformed(format!("{path}: {e}")));
        }

        Err(ExchangeError::Malformed(format!(
            "{path}: retries exhausted"
        )))
    }

    async fn sleep_backoff(&self, attempt: u32) {
        use rand::Rng;
        let base = base_backoff_secs(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..=base * 0.1);
        tokio::time::sleep(Duration::from_secs_f64(base + jitter)).await;
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/ticker/price — latest trade price for a symbol.
    pub async fn get_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let sym = self.normalize_symbol(symbol)?;
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), sym.clone());
        let data = self
            .request(Method::GET, "/api/v3/ticker/price", &params, false)
            .await?;
        data.get("price")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ExchangeError::Malformed(format!("no price for {sym}")))
    }

    /// GET /api/v3/klines — OHLCV bars, most recent last.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let sym = self.normalize_symbol(symbol)?;
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), sym);
        params.insert("interval".to_string(), interval.to_string());
        params.insert("limit".to_string(), limit.to_string());
        let data = self
            .request(Method::GET, "/api/v3/klines", &params, false)
            .await?;
        Ok(parse_candles(&data))
    }

    // -------------------------------------------------------------------------
    // Account / orders (signed)
    // -------------------------------------------------------------------------

    /// GET /api/v3/account — per-asset free/locked balances.
    pub async fn get_balances(&self) -> Result<BTreeMap<String, Balance>, ExchangeError> {
        let data = self
            .request(Method::GET, "/api/v3/account", &BTreeMap::new(), true)
            .await?;
        let mut out = BTreeMap::new();
        for bal in data
            .get("balances")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            let asset = bal
                .get("asset")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_uppercase();
            if asset.is_empty() {
                continue;
            }
            out.insert(
                asset,
                Balance {
                    free: decimal_str_field(bal, "free"),
                    locked: decimal_str_field(bal, "locked"),
                },
            );
        }
        Ok(out)
    }

    /// GET /api/v3/allOrders — order history for a symbol, oldest first.
    pub async fn get_order_history(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<Value>, ExchangeError> {
        let sym = self.normalize_symbol(symbol)?;
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), sym);
        params.insert("limit".to_string(), limit.to_string());
        let data = self
            .request(Method::GET, "/api/v3/allOrders", &params, true)
            .await?;
        Ok(data.as_array().cloned().unwrap_or_default())
    }

    /// Per-symbol filters from /api/v3/exchangeInfo, cached for 15 minutes.
    pub async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        let sym = self.normalize_symbol(symbol)?;

        if let Some((fetched_at, filters)) = self.filter_cache.lock().get(&sym) {
            if fetched_at.elapsed() < EXCHANGE_INFO_TTL {
                return Ok(filters.clone());
            }
        }

        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), sym.clone());
        let data = self
            .request(Method::GET, "/api/v3/exchangeInfo", &params, false)
            .await?;
        let entry = data
            .get("symbols")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .ok_or_else(|| ExchangeError::Malformed(format!("no exchangeInfo for {sym}")))?;

        let filters = SymbolFilters::from_exchange_info(entry);
        self.filter_cache
            .lock()
            .insert(sym, (Instant::now(), filters.clone()));
        Ok(filters)
    }

    /// POST /api/v3/order — submit an order after rounding quantity and price
    /// to the symbol's filters. LIMIT orders carry timeInForce=GTC.
    pub async fn create_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<Value, ExchangeError> {
        let sym = self.normalize_symbol(symbol)?;
        let filters = self.symbol_filters(&sym).await?;

        // The notional check on market orders needs a reference price.
        let ticker = if price.is_none() && filters.min_notional > Decimal::ZERO {
            Some(self.get_price(&sym).await?)
        } else {
            None
        };

        let rounded = filters.round_order(quantity, price, ticker)?;

        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), sym.clone());
        params.insert("side".to_string(), side.trim().to_uppercase());
        params.insert("type".to_string(), order_type.as_wire().to_string());
        params.insert("quantity".to_string(), wire_decimal(rounded.quantity));

        if order_type == OrderType::Limit {
            let px = rounded.price.ok_or_else(|| {
                ExchangeError::Malformed("LIMIT orders require a price".into())
            })?;
            params.insert("price".to_string(), wire_decimal(px));
            params.insert("timeInForce".to_string(), "GTC".to_string());
        }

        debug!(symbol = %sym, side, order_type = order_type.as_wire(), qty = %rounded.quantity, "placing order");
        self.request(Method::POST, "/api/v3/order", &params, true)
            .await
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("default_quote", &self.default_quote)
            .field("public_only", &self.public_only)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// URL-encode sorted `key=value` pairs. BTreeMap keeps them sorted, so
/// re-signing identical parameters always yields an identical signature.
fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Pure backoff schedule: min(10, 0.5 * 2^attempt) seconds (jitter added at
/// the sleep site).
fn base_backoff_secs(attempt: u32) -> f64 {
    (BACKOFF_BASE_SECS * 2f64.powi(attempt as i32)).min(BACKOFF_CAP_SECS)
}

fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<f64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

async fn parse_error_body(resp: reqwest::Response) -> (Option<i64>, String) {
    match resp.json::<Value>().await {
        Ok(body) => {
            let code = body.get("code").and_then(Value::as_i64);
            let msg = body
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("Binance API error")
                .to_string();
            (code, msg)
        }
        Err(_) => (None, "Binance API error".to_string()),
    }
}

/// Parse a klines array-of-arrays payload into candles. Malformed rows are
/// skipped.
fn parse_candles(data: &Value) -> Vec<Candle> {
    let rows = match data.as_array() {
        Some(rows) => rows,
        None => return Vec::new(),
    };

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let arr = match row.as_array() {
            Some(arr) if arr.len() >= 6 => arr,
            _ => continue,
        };
        let ts_ms = arr[0].as_i64().unwrap_or(0);
        if let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
            json_f64(&arr[1]),
            json_f64(&arr[2]),
            json_f64(&arr[3]),
            json_f64(&arr[4]),
            json_f64(&arr[5]),
        ) {
            candles.push(Candle {
                ts: ts_ms / 1000,
                open,
                high,
                low,
                close,
                volume,
            });
        }
    }
    candles
}

fn json_f64(val: &Value) -> Option<f64> {
    if let Some(s) = val.as_str() {
        s.parse().ok()
    } else {
        val.as_f64()
    }
}

fn decimal_str_field(value: &Value, key: &str) -> Decimal {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(Decimal::ZERO)
}

fn credential_from_env(name: &str) -> String {
    let raw = std::env::var(name).unwrap_or_default();
    let trimmed = raw.trim();
    match trimmed.to_lowercase().as_str() {
        "your_key_here" | "your_secret_here" | "changeme" => String::new(),
        _ => trimmed.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn public_client() -> BinanceClient {
        BinanceClient::build(String::new(), String::new(), true)
    }

    #[test]
    fn normalize_symbol_law() {
        let client = public_client();
        assert_eq!(client.normalize_symbol("BTC").unwrap(), "BTCUSDT");
        assert_eq!(client.normalize_symbol("btc-usdt").unwrap(), "BTCUSDT");
        assert_eq!(client.normalize_symbol("BTC-USD").unwrap(), "BTCUSDT");
        assert_eq!(client.normalize_symbol("eth/btc").unwrap(), "ETHBTC");
        assert_eq!(client.normalize_symbol("DOGE_USDC").unwrap(), "DOGEUSDC");
        assert_eq!(client.normalize_symbol("BNBUSDT").unwrap(), "BNBUSDT");
    }

    #[test]
    fn normalize_symbol_rejects_empty() {
        let client = public_client();
        assert!(client.normalize_symbol("").is_err());
        assert!(client.normalize_symbol("  ").is_err());
    }

    #[test]
    fn canonical_query_sorts_and_encodes() {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), "BTCUSDT".to_string());
        params.insert("side".to_string(), "BUY".to_string());
        params.insert("quantity".to_string(), "0.001".to_string());
        assert_eq!(
            canonical_query(&params),
            "quantity=0.001&side=BUY&symbol=BTCUSDT"
        );
    }

    #[test]
    fn signing_identical_input_yields_identical_signature() {
        let client = BinanceClient::build("key".into(), "secret".into(), false);
        let query = "recvWindow=5000&symbol=BTCUSDT&timestamp=1700000000000";
        let first = client.sign(query);
        let second = client.sign(query);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn backoff_is_bounded_and_monotonic() {
        assert!((base_backoff_secs(0) - 0.5).abs() < f64::EPSILON);
        assert!((base_backoff_secs(1) - 1.0).abs() < f64::EPSILON);
        assert!((base_backoff_secs(2) - 2.0).abs() < f64::EPSILON);
        assert!((base_backoff_secs(10) - 10.0).abs() < f64::EPSILON);
        for attempt in 0..9 {
            assert!(base_backoff_secs(attempt) <= base_backoff_secs(attempt + 1));
        }
    }

    #[test]
    fn parse_candles_skips_malformed_rows() {
        let data = json!([
            [1700000000000_i64, "1.0", "2.0", "0.5", "1.5", "100"],
            ["garbage"],
            [1700000060000_i64, "1.5", "2.5", "1.0", "2.0", "120"]
        ]);
        let candles = parse_candles(&data);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].ts, 1700000000);
        assert!((candles[0].close - 1.5).abs() < f64::EPSILON);
        assert!((candles[1].volume - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn balance_total_sums_free_and_locked() {
        let bal = Balance {
            free: Decimal::new(123, 1),
            locked: Decimal::new(7, 1),
        };
        assert_eq!(bal.total(), Decimal::from(13));
    }
}
