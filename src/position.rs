// =============================================================================
// Position tracker — cost basis and DCA-stage recovery from order history
// =============================================================================
//
// Both functions are pure over (current quantity, order history) so a restart
// reconstructs exactly the same position state the process died with.
//
// Cost basis back-fills from the most recent filled buys: executions are
// consumed newest to oldest until the accumulated quantity covers the current
// holding, which naturally stops at the current trade's boundary when earlier
// lots were already sold.
//
// The DCA stage counter is the number of filled buys in the current trade
// (strictly after the most recent sell) minus one — the first buy is the
// entry, not a DCA.
// =============================================================================

use rust_decimal::Decimal;

use crate::types::{OrderRecord, OrderSide, OrderState};

/// Quantity-weighted average fill price of the currently held lot.
///
/// Returns zero when nothing is held. If the history covers less quantity
/// than is currently held, the average is taken over what was found.
pub fn average_cost_basis(current_qty: Decimal, orders: &[OrderRecord]) -> Decimal {
    if current_qty <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let mut buys: Vec<&OrderRecord> = orders
        .iter()
        .filter(|o| o.side == OrderSide::Buy && o.state == OrderState::Filled)
        .collect();
    buys.sort_by_key(|o| std::cmp::Reverse(o.created_at));

    let mut remaining = current_qty;
    let mut total_cost = Decimal::ZERO;

    'outer: for order in buys {
        for exec in &order.executions {
            if remaining <= Decimal::ZERO {
                break 'outer;
            }
            let take = exec.quantity.min(remaining);
            total_cost += take * exec.effective_price;
            remaining -= take;
        }
    }

    total_cost / current_qty
}

/// DCA stages already consumed in the current trade, recovered from history.
pub fn dca_stages_triggered(orders: &[OrderRecord]) -> u32 {
    let mut filled: Vec<&OrderRecord> = orders
        .iter()
        .filter(|o| o.state == OrderState::Filled)
        .collect();
    filled.sort_by_key(|o| o.created_at);

    let last_sell = filled
        .iter()
        .rev()
        .find(|o| o.side == OrderSide::Sell)
        .map(|o| o.created_at);

    let trade_buys: Vec<&&OrderRecord> = filled
        .iter()
        .filter(|o| o.side == OrderSide::Buy)
        .filter(|o| match last_sell {
            Some(ts) => o.created_at > ts,
            None => true,
        })
        .collect();

    let Some(first_buy) = trade_buys.first() else {
        return 0;
    };
    trade_buys
        .iter()
        .filter(|o| o.created_at > first_buy.created_at)
        .count() as u32
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Execution;

    fn order(side: OrderSide, state: OrderState, ts: i64, fills: &[(&str, &str)]) -> OrderRecord {
        OrderRecord {
            id: format!("o{ts}"),
            side,
            state,
            created_at: ts,
            executions: fills
                .iter()
                .map(|(qty, price)| Execution {
                    quantity: qty.parse().unwrap(),
                    effective_price: price.parse().unwrap(),
                })
                .collect(),
        }
    }

    #[test]
    fn single_buy_sets_basis_to_fill_price() {
        let orders = vec![order(
            OrderSide::Buy,
            OrderState::Filled,
            100,
            &[("1", "50000")],
        )];
        assert_eq!(
            average_cost_basis(Decimal::ONE, &orders),
            Decimal::from(50000)
        );
    }

    #[test]
    fn back_fill_weights_recent_buys() {
        // Held 3 units: 1 @ 100 (old), 2 @ 130 (recent).
        let orders = vec![
            order(OrderSide::Buy, OrderState::Filled, 100, &[("1", "100")]),
            order(OrderSide::Buy, OrderState::Filled, 200, &[("2", "130")]),
        ];
        // (2*130 + 1*100) / 3 = 120
        assert_eq!(
            average_cost_basis(Decimal::from(3), &orders),
            Decimal::from(120)
        );
    }

    #[test]
    fn back_fill_stops_at_current_holding() {
        // Only 1 unit held; the most recent buy alone covers it, so the
        // older, cheaper lot is excluded.
        let orders = vec![
            order(OrderSide::Buy, OrderState::Filled, 100, &[("5", "10")]),
            order(OrderSide::Buy, OrderState::Filled, 200, &[("1", "200")]),
        ];
        assert_eq!(
            average_cost_basis(Decimal::ONE, &orders),
            Decimal::from(200)
        );
    }

    #[test]
    fn partial_lot_consumption() {
        // Held 1.5 units against a recent 1 @ 200 and older 2 @ 100.
        let orders = vec![
            order(OrderSide::Buy, OrderState::Filled, 100, &[("2", "100")]),
            order(OrderSide::Buy, OrderState::Filled, 200, &[("1", "200")]),
        ];
        // (1*200 + 0.5*100) / 1.5 = 166.66...
        let basis = average_cost_basis("1.5".parse().unwrap(), &orders);
        let expected = Decimal::from(250) / "1.5".parse::<Decimal>().unwrap();
        assert_eq!(basis, expected);
    }

    #[test]
    fn unfilled_and_sell_orders_are_ignored() {
        let orders = vec![
            order(OrderSide::Buy, OrderState::Open, 100, &[("1", "1")]),
            order(OrderSide::Buy, OrderState::Canceled, 150, &[("1", "1")]),
            order(OrderSide::Sell, OrderState::Filled, 200, &[("1", "999")]),
            order(OrderSide::Buy, OrderState::Filled, 300, &[("1", "50")]),
        ];
        assert_eq!(average_cost_basis(Decimal::ONE, &orders), Decimal::from(50));
    }

    #[test]
    fn zero_quantity_has_zero_basis() {
        let orders = vec![order(
            OrderSide::Buy,
            OrderState::Filled,
            100,
            &[("1", "50000")],
        )];
        assert_eq!(average_cost_basis(Decimal::ZERO, &orders), Decimal::ZERO);
    }

    #[test]
    fn recomputation_is_deterministic() {
        let orders = vec![
            order(OrderSide::Buy, OrderState::Filled, 100, &[("2", "100")]),
            order(OrderSide::Buy, OrderState::Filled, 200, &[("1", "200")]),
            order(OrderSide::Sell, OrderState::Filled, 250, &[("1", "210")]),
            order(OrderSide::Buy, OrderState::Filled, 300, &[("1", "150")]),
        ];
        let qty = "1.5".parse().unwrap();
        assert_eq!(
            average_cost_basis(qty, &orders),
            average_cost_basis(qty, &orders)
        );
    }

    #[test]
    fn stages_count_buys_after_entry() {
        // Entry + two DCAs, no sells.
        let orders = vec![
            order(OrderSide::Buy, OrderState::Filled, 100, &[("1", "100")]),
            order(OrderSide::Buy, OrderState::Filled, 200, &[("2", "95")]),
            order(OrderSide::Buy, OrderState::Filled, 300, &[("4", "90")]),
        ];
        assert_eq!(dca_stages_triggered(&orders), 2);
    }

    #[test]
    fn stages_reset_at_most_recent_sell() {
        let orders = vec![
            order(OrderSide::Buy, OrderState::Filled, 100, &[("1", "100")]),
            order(OrderSide::Buy, OrderState::Filled, 200, &[("2", "95")]),
            order(OrderSide::Sell, OrderState::Filled, 300, &[("3", "105")]),
            order(OrderSide::Buy, OrderState::Filled, 400, &[("1", "100")]),
            order(OrderSide::Buy, OrderState::Filled, 500, &[("2", "97")]),
        ];
        // Current trade: entry at 400 plus one DCA at 500.
        assert_eq!(dca_stages_triggered(&orders), 1);
    }

    #[test]
    fn no_buys_after_sell_means_zero_stages() {
        let orders = vec![
            order(OrderSide::Buy, OrderState::Filled, 100, &[("1", "100")]),
            order(OrderSide::Sell, OrderState::Filled, 200, &[("1", "110")]),
        ];
        assert_eq!(dca_stages_triggered(&orders), 0);
    }

    #[test]
    fn empty_history_means_zero_stages() {
        assert_eq!(dca_stages_triggered(&[]), 0);
    }
}
