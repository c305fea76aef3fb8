// =============================================================================
// Binance broker adapter — maps the low-level HMAC client onto the port
// =============================================================================
//
// Translation rules:
//   - Internal "BTC-USD" pairs are normalised by the client ("BTCUSDT").
//   - Account buying power is the free balance of the default quote asset.
//   - allOrders rows become OrderRecords; FILLED / PARTIALLY_FILLED count as
//     filled, CANCELED / REJECTED / EXPIRED as canceled, the rest as open.
//   - The ticker endpoint gives one price; it serves as both ask and bid.
// =============================================================================

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::broker::{json_decimal, Broker, LastGoodPrices, PriceBook};
use crate::exchange::binance::BinanceClient;
use crate::types::{
    Account, Candle, Execution, Holding, OrderRecord, OrderResponse, OrderSide, OrderState,
    OrderType, TradingPair,
};

/// How much order history to pull when recomputing cost basis.
const ORDER_HISTORY_LIMIT: u32 = 1000;

pub struct BinanceBroker {
    client: BinanceClient,
    /// Coins configured at startup; used only for the pair listing.
    tracked_coins: Vec<String>,
    last_good: LastGoodPrices,
}

impl BinanceBroker {
    pub fn new(client: BinanceClient, tracked_coins: Vec<String>) -> Self {
        Self {
            client,
            tracked_coins,
            last_good: LastGoodPrices::default(),
        }
    }
}

#[async_trait]
impl Broker for BinanceBroker {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn get_account(&self) -> Option<Account> {
        let balances = match self.client.get_balances().await {
            Ok(balances) => balances,
            Err(err) => {
                warn!(error = %err, "account fetch failed");
                return None;
            }
        };
        let quote = self.client.default_quote().to_string();
        let buying_power = balances
            .get(&quote)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO);
        Some(Account {
            buying_power,
            quote_currency: quote,
        })
    }

    async fn get_holdings(&self) -> Vec<Holding> {
        let balances = match self.client.get_balances().await {
            Ok(balances) => balances,
            Err(err) => {
                warn!(error = %err, "holdings fetch failed");
                return Vec::new();
            }
        };
        let quote = self.client.default_quote();

        balances
            .into_iter()
            .filter(|(asset, bal)| asset != quote && bal.total() > Decimal::ZERO)
            .map(|(asset, bal)| Holding {
                asset,
                quantity: bal.total(),
                available: bal.free,
            })
            .collect()
    }

    async fn get_trading_pairs(&self) -> Vec<TradingPair> {
        self.tracked_coins
            .iter()
            .map(|coin| TradingPair {
                symbol: format!("{}-{}", coin.to_uppercase(), self.client.default_quote()),
            })
            .collect()
    }

    async fn get_orders(&self, symbol: &str) -> Vec<OrderRecord> {
        let rows = match self
            .client
            .get_order_history(symbol, ORDER_HISTORY_LIMIT)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warn!(symbol, error = %err, "order history fetch failed");
                return Vec::new();
            }
        };
        rows.iter().filter_map(parse_order_row).collect()
    }

    async fn get_price(&self, symbols: &[String]) -> PriceBook {
        let mut book = PriceBook::default();

        for symbol in symbols {
            if symbol == "USDC-USD" {
                continue;
            }
            match self.client.get_price(symbol).await {
                Ok(price) if price > Decimal::ZERO => {
                    book.insert(symbol, price, price);
                    self.last_good.record(symbol, price, price);
                }
                result => {
                    if let Err(err) = result {
                        debug!(symbol, error = %err, "price fetch failed");
                    }
                    if let Some((ask, bid)) = self.last_good.get(symbol) {
                        debug!(symbol, "price miss — serving last-good bid/ask");
                        book.insert(symbol, ask, bid);
                    }
                }
            }
        }

        book
    }

    async fn get_candles(&self, symbol: &str, interval: &str, limit: u32) -> Vec<Candle> {
        match self.client.get_klines(symbol, interval, limit).await {
            Ok(candles) => candles,
            Err(err) => {
                warn!(symbol, interval, error = %err, "klines fetch failed");
                Vec::new()
            }
        }
    }

    async fn place_buy(
        &self,
        _client_order_id: &str,
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

        let quantity = quote_amount / ask;
        match self
            .client
            .create_order(symbol, "BUY", order_type, quantity, None)
            .await
        {
            Ok(resp) => Some(order_response(&resp, quantity, ask)),
            Err(err) => {
                warn!(symbol, error = %err, "buy failed");
                None
            }
        }
    }

    async fn place_sell(
        &self,
        _client_order_id: &str,
        order_type: OrderType,
        symbol: &str,
        quantity: Decimal,
    ) -> Option<OrderResponse> {
        match self
            .client
            .create_order(symbol, "SELL", order_type, quantity, None)
            .await
        {
            Ok(resp) => Some(order_response(&resp, quantity, Decimal::ZERO)),
            Err(err) => {
                warn!(symbol, error = %err, "sell failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for BinanceBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceBroker")
            .field("client", &self.client)
            .field("tracked_coins", &self.tracked_coins)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Response mapping
// ---------------------------------------------------------------------------

/// Build an OrderResponse from an /api/v3/order acknowledgement. The
/// effective fill price prefers cummulativeQuoteQty / executedQty over the
/// submitted reference price.
fn order_response(resp: &Value, fallback_qty: Decimal, fallback_price: Decimal) -> OrderResponse {
    let executed_qty = resp
        .get("executedQty")
        .and_then(json_decimal)
        .filter(|q| *q > Decimal::ZERO);
    let quote_qty = resp
        .get("cummulativeQuoteQty")
        .and_then(json_decimal)
        .filter(|q| *q > Decimal::ZERO);

    let fill_price = match (executed_qty, quote_qty) {
        (Some(qty), Some(quote)) => Some(quote / qty),
        _ => resp
            .get("price")
            .and_then(json_decimal)
            .filter(|p| *p > Decimal::ZERO)
            .or((fallback_price > Decimal::ZERO).then_some(fallback_price)),
    };

    OrderResponse {
        order_id: resp
            .get("orderId")
            .map(|v| v.to_string().trim_matches('"').to_string())
            .or_else(|| {
                resp.get("clientOrderId")
                    .and_then(Value::as_str)
                    .map(String::from)
            }),
        executed_qty: executed_qty.or(Some(fallback_qty)),
        fill_price,
    }
}

fn parse_order_row(row: &Value) -> Option<OrderRecord> {
    let side = match row.get("side").and_then(Value::as_str)?.to_uppercase().as_str() {
        "BUY" => OrderSide::Buy,
        "SELL" => OrderSide::Sell,
        _ => return None,
    };
    let state = match row
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_uppercase()
        .as_str()
    {
        "FILLED" | "PARTIALLY_FILLED" => OrderState::Filled,
        "CANCELED" | "REJECTED" | "EXPIRED" => OrderState::Canceled,
        _ => OrderState::Open,
    };
    let created_at = row.get("time").and_then(Value::as_i64).unwrap_or(0) / 1000;

    let mut executions = Vec::new();
    if let (Some(qty), Some(quote)) = (
        row.get("executedQty").and_then(json_decimal),
        row.get("cummulativeQuoteQty").and_then(json_decimal),
    ) {
        if qty > Decimal::ZERO {
            executions.push(Execution {
                quantity: qty,
                effective_price: quote / qty,
            });
        }
    }

    Some(OrderRecord {
        id: row
            .get("orderId")
            .map(|v| v.to_string().trim_matches('"').to_string())
            .unwrap_or_default(),
        side,
        state,
        created_at,
        executions,
    })
}
