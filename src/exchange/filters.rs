// =============================================================================
// Exchange-info filters — lot / tick / notional order validation
// =============================================================================
//
// Binance publishes per-symbol trading constraints via /api/v3/exchangeInfo.
// `round_order` is a pure function of (quantity, price, filters): it floors
// the quantity to stepSize and the price to tickSize, then rejects anything
// under minQty, minPrice, or minNotional. The exchange never sees more
// precision than it configured.
// =============================================================================

use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

/// Validation failures. These surface immediately — no retry can fix them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("quantity {qty} below minQty {min_qty}")]
    BelowMinQty { qty: Decimal, min_qty: Decimal },

    #[error("price {price} below minPrice {min_price}")]
    BelowMinPrice { price: Decimal, min_price: Decimal },

    #[error("notional {notional} below minNotional {min_notional}")]
    BelowMinNotional {
        notional: Decimal,
        min_notional: Decimal,
    },
}

/// Per-symbol trading constraints. Zero means "not constrained".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolFilters {
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub tick_size: Decimal,
    pub min_price: Decimal,
    pub min_notional: Decimal,
}

/// A quantity/price pair adjusted to the symbol's filters.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundedOrder {
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

impl SymbolFilters {
    /// Parse the `filters` array of one exchangeInfo symbol entry.
    ///
    /// Unknown filter types are ignored; missing fields default to zero.
    pub fn from_exchange_info(symbol_entry: &Value) -> Self {
        let mut out = Self::default();

        let filters = match symbol_entry.get("filters").and_then(Value::as_array) {
            Some(arr) => arr,
            None => return out,
        };

        for f in filters {
            match f.get("filterType").and_then(Value::as_str) {
                Some("LOT_SIZE") => {
                    out.step_size = decimal_field(f, "stepSize");
                    out.min_qty = decimal_field(f, "minQty");
                }
                Some("PRICE_FILTER") => {
                    out.tick_size = decimal_field(f, "tickSize");
                    out.min_price = decimal_field(f, "minPrice");
                }
                Some("MIN_NOTIONAL") => {
                    out.min_notional = decimal_field(f, "minNotional");
                }
                // Newer exchangeInfo payloads use NOTIONAL instead.
                Some("NOTIONAL") => {
                    if out.min_notional.is_zero() {
                        out.min_notional = decimal_field(f, "minNotional");
                    }
                }
                _ => {}
            }
        }

        out
    }

    /// Adjust `(quantity, price)` to this symbol's constraints.
    ///
    /// `ticker_price` is the reference price for the notional check when the
    /// order itself carries no price (market orders).
    pub fn round_order(
        &self,
        quantity: Decimal,
        price: Option<Decimal>,
        ticker_price: Option<Decimal>,
    ) -> Result<RoundedOrder, FilterError> {
        let mut qty = quantity;
        let mut px = price;

        if self.step_size > Decimal::ZERO {
            qty = (qty / self.step_size).floor() * self.step_size;
        }
        if self.min_qty > Decimal::ZERO && qty < self.min_qty {
            return Err(FilterError::BelowMinQty {
                qty,
                min_qty: self.min_qty,
            });
        }

        if let Some(p) = px {
            if self.tick_size > Decimal::ZERO {
                let adjusted = (p / self.tick_size).floor() * self.tick_size;
                px = Some(adjusted);
                if self.min_price > Decimal::ZERO && adjusted < self.min_price {
                    return Err(FilterError::BelowMinPrice {
                        price: adjusted,
                        min_price: self.min_price,
                    });
                }
            }
        }

        if self.min_notional > Decimal::ZERO {
            if let Some(reference) = px.or(ticker_price) {
                let notional = qty * reference;
                if notional < self.min_notional {
                    return Err(FilterError::BelowMinNotional {
                        notional,
                        min_notional: self.min_notional,
                    });
                }
            }
        }

        Ok(RoundedOrder { quantity: qty, price: px })
    }
}

/// Serialise a decimal for the wire with trailing zeros trimmed
/// ("0.0012000" -> "0.0012", "50.0" -> "50").
pub fn wire_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

fn decimal_field(value: &Value, key: &str) -> Decimal {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(Decimal::ZERO)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters() -> SymbolFilters {
        SymbolFilters {
            step_size: Decimal::new(1, 4),     // 0.0001
            min_qty: Decimal::new(1, 4),       // 0.0001
            tick_size: Decimal::new(1, 1),     // 0.1
            min_price: Decimal::new(1, 1),     // 0.1
            min_notional: Decimal::from(10),   // 10
        }
    }

    #[test]
    fn rounds_qty_and_price_down_to_filters() {
        let f = filters();
        let out = f
            .round_order(
                "0.00123".parse().unwrap(),
                Some("12345.67".parse().unwrap()),
                None,
            )
            .unwrap();
        assert_eq!(out.quantity, "0.0012".parse::<Decimal>().unwrap());
        assert_eq!(out.price, Some("12345.6".parse().unwrap()));
    }

    #[test]
    fn notional_passes_after_rounding() {
        // 0.0012 * 12345.6 = 14.81... >= 10
        let f = filters();
        let out = f
            .round_order(
                "0.00123".parse().unwrap(),
                Some("12345.67".parse().unwrap()),
                None,
            )
            .unwrap();
        let notional = out.quantity * out.price.unwrap();
        assert!(notional >= f.min_notional);
    }

    #[test]
    fn rejects_below_min_qty() {
        let f = filters();
        let err = f
            .round_order("0.00005".parse().unwrap(), None, Some(Decimal::from(50000)))
            .unwrap_err();
        assert!(matches!(err, FilterError::BelowMinQty { .. }));
    }

    #[test]
    fn rejects_below_min_notional_using_ticker() {
        let f = filters();
        // Market order: 0.0002 * 100 = 0.02 notional.
        let err = f
            .round_order("0.0002".parse().unwrap(), None, Some(Decimal::from(100)))
            .unwrap_err();
        assert!(matches!(err, FilterError::BelowMinNotional { .. }));
    }

    #[test]
    fn qty_is_exact_multiple_of_step() {
        let f = filters();
        let out = f
            .round_order(
                "0.12345678".parse().unwrap(),
                None,
                Some(Decimal::from(50000)),
            )
            .unwrap();
        assert_eq!(out.quantity % f.step_size, Decimal::ZERO);
    }

    #[test]
    fn zero_filters_leave_order_untouched() {
        let f = SymbolFilters::default();
        let qty: Decimal = "0.00123456789".parse().unwrap();
        let out = f.round_order(qty, None, None).unwrap();
        assert_eq!(out.quantity, qty);
        assert_eq!(out.price, None);
    }

    #[test]
    fn parses_exchange_info_entry() {
        let entry = json!({
            "symbol": "BTCUSDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.1", "minPrice": "0.1"},
                {"filterType": "LOT_SIZE", "stepSize": "0.0001", "minQty": "0.0001"},
                {"filterType": "MIN_NOTIONAL", "minNotional": "10"}
            ]
        });
        let f = SymbolFilters::from_exchange_info(&entry);
        assert_eq!(f, filters());
    }

    #[test]
    fn missing_filters_default_to_zero() {
        let entry = json!({"symbol": "BTCUSDT"});
        let f = SymbolFilters::from_exchange_info(&entry);
        assert_eq!(f, SymbolFilters::default());
    }

    #[test]
    fn wire_decimal_trims_trailing_zeros() {
        assert_eq!(wire_decimal("0.0012000".parse().unwrap()), "0.0012");
        assert_eq!(wire_decimal("50.0".parse().unwrap()), "50");
        assert_eq!(wire_decimal("0.5".parse().unwrap()), "0.5");
    }
}
