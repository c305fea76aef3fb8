// =============================================================================
// Control loop — the per-tick trading orchestrator
// =============================================================================
//
// One tick (roughly every 500 ms):
//   1. Hot-reload GUI settings; rebuild the tick-local config.
//   2. Fetch account, holdings, trading pairs, and prices (held + tracked).
//   3. Guard the account snapshot: any held asset without a usable bid/ask
//      marks the tick incomplete and the last complete snapshot is reused,
//      so a transient API miss never writes a bogus valuation dip.
//   4. Per held asset, in order: Pine exit override, trailing profit-margin
//      exit, DCA ladder.
//   5. Per tracked-but-unheld asset: neural gate (optionally combined with
//      or replaced by indicator strategy), then a new entry buy.
//   6. After any trade: refetch holdings and recompute cost basis and DCA
//      stage counters from filled order history.
//   7. Write the hub files.
//
// Everything here is sequential; the only suspension points are broker I/O
// and the explicit post-trade sleeps.
// =============================================================================

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, PriceBook};
use crate::dca::{self, DcaWindow};
use crate::hub::{AccountStatus, Hub, PositionStatus, TraderStatus};
use crate::position;
use crate::settings::{
    kline_interval, GuiSettings, PineMode, SettingsWatcher, StrategyMode, TraderConfig,
};
use crate::signals::neural::SignalSource;
use crate::signals::pine::{PineAction, PineFeed};
use crate::strategy;
use crate::trailing::{
    base_pm_line, pm_start_pct, pm_start_pct_no_dca, pm_start_pct_with_dca, trailing_gap_pct,
    TrailingPm,
};
use crate::types::{base_asset, format_price, full_symbol, Holding, OrderType};

/// Tick cadence.
const TICK_INTERVAL: Duration = Duration::from_millis(500);
/// Settle time before refetching holdings after a trade.
const POST_TRADE_SETTLE: Duration = Duration::from_secs(5);
/// Settle time after a Pine-driven exit.
const PINE_EXIT_SETTLE: Duration = Duration::from_secs(2);
/// New-entry allocation fraction of account value (spread over all coins).
fn allocation_fraction() -> Decimal {
    Decimal::new(5, 5)
}
/// Floor for a new-entry allocation in quote currency.
fn allocation_floor() -> Decimal {
    Decimal::new(5, 1)
}

/// Last complete account valuation, reused when a tick is incomplete.
#[derive(Debug, Clone)]
struct AccountSnapshot {
    total_account_value: Decimal,
    buying_power: Decimal,
    holdings_sell_value: Decimal,
    holdings_buy_value: Decimal,
    percent_in_trade: Decimal,
}

#[derive(Debug, Default)]
struct PaperTestState {
    holding_since: Option<i64>,
    dca_done: bool,
}

pub struct Trader {
    broker: Arc<dyn Broker>,
    config: TraderConfig,
    settings: SettingsWatcher,
    hub: Hub,
    cost_basis: HashMap<String, Decimal>,
    dca_stages: HashMap<String, u32>,
    trailing: HashMap<String, TrailingPm>,
    dca_window: DcaWindow,
    pine: PineFeed,
    last_good_snapshot: Option<AccountSnapshot>,
    paper_test: HashMap<String, PaperTestState>,
}

impl Trader {
    /// Build the trader and recover position state: cost basis and DCA
    /// stages from order history, the DCA rate-limit window from the
    /// persisted trade ledger.
    pub async fn new(broker: Arc<dyn Broker>, config: TraderConfig) -> anyhow::Result<Self> {
        let hub = Hub::new(&config.hub_dir)?;
        let settings = SettingsWatcher::new(&config.gui_settings_path);
        let pine = PineFeed::new(config.pine.file.clone());

        let mut trader = Self {
            broker,
            config,
            settings,
            hub,
            cost_basis: HashMap::new(),
            dca_stages: HashMap::new(),
            trailing: HashMap::new(),
            dca_window: DcaWindow::new(),
            pine,
            last_good_snapshot: None,
            paper_test: HashMap::new(),
        };

        trader.seed_dca_window();
        let holdings = trader.broker.get_holdings().await;
        trader.recompute_positions(&holdings).await;

        info!(
            broker = trader.broker.name(),
            positions = trader.cost_basis.len(),
            "trader initialised"
        );
        Ok(trader)
    }

    /// Run ticks forever. Errors are logged and the loop keeps going.
    pub async fn run(&mut self) {
        loop {
            if let Err(err) = self.tick().await {
                error!(error = %err, "tick failed");
            }
            tokio::time::sleep(TICK_INTERVAL).await;
        }
    }

    // =========================================================================
    // The tick
    // =========================================================================

    pub async fn tick(&mut self) -> anyhow::Result<()> {
        let gui = self.settings.current();
        let neural_dir = gui
            .main_neural_dir
            .clone()
            .filter(|dir| dir.is_dir())
            .unwrap_or(std::env::current_dir()?);
        let signals = SignalSource::new(&neural_dir);
        self.pine.refresh();

        let account = self.broker.get_account().await;
        let mut holdings = self.broker.get_holdings().await;
        let trading_pairs = self.broker.get_trading_pairs().await;

        let mut snapshot_ok = account.is_some();
        let mut buying_power = account
            .as_ref()
            .map(|a| a.buying_power)
            .unwrap_or(Decimal::ZERO);

        // Prices for held plus tracked assets, so the GUI always sees lines.
        let mut symbols: Vec<String> = holdings
            .iter()
            .filter(|h| h.asset != "USDC")
            .map(|h| full_symbol(&h.asset))
            .collect();
        for coin in &gui.coins {
            let sym = full_symbol(coin);
            if !symbols.contains(&sym) {
                symbols.push(sym);
            }
        }
        let book = self.broker.get_price(&symbols).await;

        let mut trades_made = false;

        // Forced entry/DCA/exit cycle for exercising the paper pipeline.
        if self.paper_test_tick(&gui, &holdings, buying_power, &book).await {
            trades_made = true;
            if let Some(acct) = self.broker.get_account().await {
                buying_power = acct.buying_power;
            }
            holdings = self.broker.get_holdings().await;
        }

        // ── Account valuation with the last-good guard ───────────────────
        let mut holdings_buy_value = Decimal::ZERO;
        let mut holdings_sell_value = Decimal::ZERO;
        for h in &holdings {
            if h.asset == "USDC" || h.quantity <= Decimal::ZERO {
                continue;
            }
            let sym = full_symbol(&h.asset);
            match (book.ask(&sym), book.bid(&sym)) {
                (Some(ask), Some(bid)) if ask > Decimal::ZERO && bid > Decimal::ZERO => {
                    holdings_buy_value += h.quantity * ask;
                    holdings_sell_value += h.quantity * bid;
                }
                _ => {
                    snapshot_ok = false;
                }
            }
        }

        let mut total_account_value = buying_power + holdings_sell_value;
        let mut percent_in_trade = if total_account_value > Decimal::ZERO {
            holdings_sell_value / total_account_value * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        if !snapshot_ok || total_account_value <= Decimal::ZERO {
            if let Some(last) = &self.last_good_snapshot {
                total_account_value = last.total_account_value;
                buying_power = last.buying_power;
                holdings_sell_value = last.holdings_sell_value;
                holdings_buy_value = last.holdings_buy_value;
                percent_in_trade = last.percent_in_trade;
                warn!("incomplete tick — reusing last complete account snapshot");
            }
        } else {
            self.last_good_snapshot = Some(AccountSnapshot {
                total_account_value,
                buying_power,
                holdings_sell_value,
                holdings_buy_value,
                percent_in_trade,
            });
        }

        info!(
            total_account_value = %format_price(total_account_value),
            holdings_value = %format_price(holdings_sell_value),
            percent_in_trade = %format!("{percent_in_trade:.2}"),
            "account summary"
        );

        // ── Per-held-asset evaluation ────────────────────────────────────
        let mut positions: BTreeMap<String, PositionStatus> = BTreeMap::new();
        let held_list = holdings.clone();
        for holding in &held_list {
            let asset = holding.asset.clone();
            if asset == "USDC" {
                continue;
            }
            let sym = full_symbol(&asset);
            if !book.is_valid(&sym) {
                continue;
            }
            let (Some(ask), Some(bid)) = (book.ask(&sym), book.bid(&sym)) else {
                continue;
            };

            let quantity = holding.quantity;
            let basis = self.cost_basis.get(&asset).copied().unwrap_or(Decimal::ZERO);
            let (pnl_buy, pnl_sell) = if basis > Decimal::ZERO {
                (
                    (ask - basis) / basis * Decimal::from(100),
                    (bid - basis) / basis * Decimal::from(100),
                )
            } else {
                warn!(asset = %asset, "cost basis is 0 — gain/loss calculation skipped");
                (Decimal::ZERO, Decimal::ZERO)
            };
            let value = quantity * bid;
            let stages = self.dca_stages.get(&asset).copied().unwrap_or(0);

            self.hub
                .write_current_price(&asset, ask.to_f64().unwrap_or(0.0));

            positions.insert(
                asset.clone(),
                self.position_status(
                    &signals, &asset, quantity, basis, ask, bid, pnl_buy, pnl_sell, value, stages,
                ),
            );

            info!(
                asset = %asset,
                buy_pnl = %format!("{pnl_buy:.2}%"),
                sell_pnl = %format!("{pnl_sell:.2}%"),
                ask = %format_price(ask),
                bid = %format_price(bid),
                dca_stages = stages,
                value = %format_price(value),
                "position"
            );

            // ── a. Pine exit override ────────────────────────────────────
            if self.config.pine.use_exit {
                let signal = self
                    .pine
                    .get(&asset, self.config.pine.max_age_seconds)
                    .map(|sig| (sig.action, sig.strength));
                if let Some((action @ (PineAction::Sell | PineAction::Stop), strength)) = signal {
                    if quantity > Decimal::ZERO {
                        let tag = if action == PineAction::Stop {
                            "PINE_STOP"
                        } else {
                            "PINE_SELL"
                        };
                        info!(asset = %asset, ?action, ?strength, "pine exit signal — selling");
                        self.sell_full(&sym, quantity, bid, basis, pnl_sell, tag).await;
                        trades_made = true;
                        self.trailing.remove(&asset);
                        self.dca_window.reset_for_trade(&asset, true, now_ts());
                        tokio::time::sleep(PINE_EXIT_SETTLE).await;
                        continue;
                    }
                }
            }

            // ── b. Trailing profit-margin exit ───────────────────────────
            if basis > Decimal::ZERO {
                let base_line = base_pm_line(basis, stages);
                let pm = self
                    .trailing
                    .entry(asset.clone())
                    .or_insert_with(|| TrailingPm::new(base_line));
                let fire = pm.evaluate(bid, base_line);
                info!(
                    asset = %asset,
                    line = %format_price(pm.line),
                    above = pm.was_above,
                    "trailing profit margin"
                );
                if fire {
                    info!(
                        asset = %asset,
                        bid = %format_price(bid),
                        line = %format_price(self.trailing[&asset].line),
                        "trailing PM hit — selling full position"
                    );
                    self.sell_full(&sym, quantity, bid, basis, pnl_sell, "TRAIL_SELL")
                        .await;
                    trades_made = true;
                    self.trailing.remove(&asset);
                    self.dca_window.reset_for_trade(&asset, true, now_ts());
                    tokio::time::sleep(POST_TRADE_SETTLE).await;
                    continue;
                }
            }

            // ── c. DCA ladder ────────────────────────────────────────────
            let stage = stages as usize;
            let long_level = signals.long_level(&asset);
            if let Some(trigger) = dca::evaluate_stage(stage, pnl_buy, long_level) {
                let dca_amount = value * Decimal::from(2);
                info!(
                    asset = %asset,
                    stage = stage + 1,
                    %trigger,
                    dca_amount = %format_price(dca_amount),
                    buying_power = %format_price(buying_power),
                    "DCA trigger"
                );

                if !self.dca_window.allows(&asset, now_ts()) {
                    info!(
                        asset = %asset,
                        max = dca::MAX_DCA_BUYS_PER_WINDOW,
                        "skipping DCA — rolling 24h limit reached"
                    );
                } else if dca_amount <= buying_power {
                    let bought = self
                        .buy(&sym, dca_amount, Some(basis), Some(pnl_buy), Some("DCA"))
                        .await;
                    if bought {
                        *self.dca_stages.entry(asset.clone()).or_insert(0) += 1;
                        self.dca_window.note_buy(&asset, now_ts());
                        // The basis moves, so the PM line must rebuild.
                        self.trailing.remove(&asset);
                        trades_made = true;
                        info!(asset = %asset, "DCA buy placed");
                    } else {
                        warn!(asset = %asset, "DCA buy failed");
                    }
                } else {
                    info!(asset = %asset, "skipping DCA — not enough funds");
                }
            }
        }

        // ── Price lines for tracked-but-unheld coins ─────────────────────
        for coin in &gui.coins {
            if positions.contains_key(coin) || coin == "USDC" {
                continue;
            }
            let sym = full_symbol(coin);
            if !book.is_valid(&sym) {
                continue;
            }
            let ask = book.ask(&sym).unwrap_or(Decimal::ZERO);
            let bid = book.bid(&sym).unwrap_or(Decimal::ZERO);
            self.hub
                .write_current_price(coin, ask.to_f64().unwrap_or(0.0));
            positions.insert(
                coin.clone(),
                PositionStatus {
                    current_buy_price: ask.to_f64().unwrap_or(0.0),
                    current_sell_price: bid.to_f64().unwrap_or(0.0),
                    dca_triggered_stages: self.dca_stages.get(coin).copied().unwrap_or(0),
                    dca_line_source: "N/A".to_string(),
                    ..PositionStatus::default()
                },
            );
        }

        // ── New entries ──────────────────────────────────────────────────
        if !trading_pairs.is_empty() {
            trades_made |= self
                .entry_pass(&gui, &signals, &holdings, total_account_value)
                .await;
        }

        // ── Post-trade recompute ─────────────────────────────────────────
        if trades_made {
            tokio::time::sleep(POST_TRADE_SETTLE).await;
            info!("trades made this tick — recomputing cost basis");
            let refreshed = self.broker.get_holdings().await;
            self.recompute_positions(&refreshed).await;
        }

        // ── Hub writes ───────────────────────────────────────────────────
        let ts = now_ts();
        let status = TraderStatus {
            timestamp: ts,
            account: AccountStatus {
                total_account_value: total_account_value.to_f64().unwrap_or(0.0),
                buying_power: buying_power.to_f64().unwrap_or(0.0),
                holdings_sell_value: holdings_sell_value.to_f64().unwrap_or(0.0),
                holdings_buy_value: holdings_buy_value.to_f64().unwrap_or(0.0),
                percent_in_trade: percent_in_trade.to_f64().unwrap_or(0.0),
                pm_start_pct_no_dca: pm_start_pct_no_dca().to_f64().unwrap_or(0.0),
                pm_start_pct_with_dca: pm_start_pct_with_dca().to_f64().unwrap_or(0.0),
                trailing_gap_pct: trailing_gap_pct().to_f64().unwrap_or(0.0),
            },
            positions,
        };
        self.hub
            .append_account_value(ts, status.account.total_account_value);
        self.hub.write_status(&status);

        Ok(())
    }

    // =========================================================================
    // New-entry pass
    // =========================================================================

    async fn entry_pass(
        &mut self,
        gui: &GuiSettings,
        signals: &SignalSource,
        holdings: &[Holding],
        total_account_value: Decimal,
    ) -> bool {
        let mut trades_made = false;

        let n_coins = gui.coins.len().max(1);
        let mut allocation =
            total_account_value * allocation_fraction() / Decimal::from(n_coins as u64);
        if allocation < allocation_floor() {
            allocation = allocation_floor();
        }

        let mut held: HashSet<String> = holdings.iter().map(|h| h.asset.clone()).collect();

        for coin in &gui.coins {
            let coin = coin.to_uppercase();
            if held.contains(&coin) {
                continue;
            }
            let sym = full_symbol(&coin);

            let long_level = signals.long_level(&coin);
            let short_level = signals.short_level(&coin);

            // Pine gating on entries.
            if self.config.pine.enabled && self.config.pine.mode != PineMode::Off {
                let action = self
                    .pine
                    .get(&coin, self.config.pine.max_age_seconds)
                    .map(|sig| sig.action);
                match self.config.pine.mode {
                    PineMode::Replace => {
                        if action != Some(PineAction::Buy) {
                            continue;
                        }
                    }
                    PineMode::Filter => {
                        if matches!(action, Some(a) if a != PineAction::Buy) {
                            continue;
                        }
                    }
                    PineMode::Off => {}
                }
            }

            let strat = &gui.strategy;
            let use_strategy = !strat.enabled_indicators().is_empty()
                || strat.replace_neural
                || strat.mode == StrategyMode::Super;

            let allowed = if use_strategy {
                let candles = self
                    .broker
                    .get_candles(
                        &sym,
                        kline_interval(&gui.default_timeframe),
                        gui.candles_limit,
                    )
                    .await;
                strategy::should_enter(strat, long_level, short_level, &candles).allowed
            } else {
                long_level >= 3 && short_level == 0
            };
            if !allowed {
                continue;
            }

            info!(
                coin = %coin,
                long_level,
                short_level,
                allocation = %format_price(allocation),
                "starting new trade"
            );
            if self.buy(&sym, allocation, None, None, None).await {
                trades_made = true;
                self.dca_stages.insert(coin.clone(), 0);
                self.dca_window.reset_for_trade(&coin, false, now_ts());
                self.trailing.remove(&coin);

                tokio::time::sleep(POST_TRADE_SETTLE).await;
                let refreshed = self.broker.get_holdings().await;
                held = refreshed.iter().map(|h| h.asset.clone()).collect();
            }
        }

        trades_made
    }

    // =========================================================================
    // Paper-test harness
    // =========================================================================

    /// Forced open -> half-size DCA -> full exit cycle against the paper
    /// driver, used to exercise the whole trade lifecycle without waiting
    /// for real signals.
    async fn paper_test_tick(
        &mut self,
        gui: &GuiSettings,
        holdings: &[Holding],
        buying_power: Decimal,
        book: &PriceBook,
    ) -> bool {
        let cfg = self.config.paper_test.clone();
        if !cfg.enabled || self.broker.name() != "paper" {
            return false;
        }

        let target = if cfg.coin.is_empty() {
            match gui.coins.first() {
                Some(coin) => coin.clone(),
                None => return false,
            }
        } else {
            cfg.coin.clone()
        };
        let sym = full_symbol(&target);
        let Some(ask) = book.ask(&sym).filter(|p| *p > Decimal::ZERO) else {
            return false;
        };

        let holding = holdings
            .iter()
            .find(|h| h.asset == target && h.quantity > Decimal::ZERO);
        let now = now_ts();
        let mut traded = false;

        let Some(holding) = holding else {
            // Flat: open the test position.
            let alloc = cfg.alloc_usd.min(buying_power);
            if alloc <= Decimal::ZERO {
                return false;
            }
            if self
                .buy(&sym, alloc, None, None, Some("PAPER_TEST_ENTRY"))
                .await
            {
                let state = self.paper_test.entry(target).or_default();
                state.holding_since = Some(now);
                state.dca_done = false;
                traded = true;
            }
            return traded;
        };

        let (held_since, dca_done) = {
            let state = self.paper_test.entry(target.clone()).or_default();
            (*state.holding_since.get_or_insert(now), state.dca_done)
        };
        let held_for = now - held_since;

        if !dca_done && held_for >= cfg.dca_seconds {
            let alloc = (cfg.alloc_usd / Decimal::from(2)).min(buying_power);
            if alloc > Decimal::ZERO
                && self
                    .buy(&sym, alloc, None, None, Some("PAPER_TEST_DCA"))
                    .await
            {
                if let Some(state) = self.paper_test.get_mut(&target) {
                    state.dca_done = true;
                }
                traded = true;
            }
        }

        if held_for >= cfg.hold_seconds {
            let bid = book.bid(&sym).unwrap_or(ask);
            let basis = self
                .cost_basis
                .get(&target)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let pnl = if basis > Decimal::ZERO {
                (bid - basis) / basis * Decimal::from(100)
            } else {
                Decimal::ZERO
            };
            if self
                .sell_full(&sym, holding.quantity, bid, basis, pnl, "PAPER_TEST_EXIT")
                .await
            {
                if let Some(state) = self.paper_test.get_mut(&target) {
                    state.holding_since = None;
                    state.dca_done = false;
                }
                traded = true;
            }
        }

        traded
    }

    // =========================================================================
    // Orders and bookkeeping
    // =========================================================================

    async fn buy(
        &mut self,
        symbol: &str,
        quote_amount: Decimal,
        avg_cost_basis: Option<Decimal>,
        pnl_pct: Option<Decimal>,
        tag: Option<&str>,
    ) -> bool {
        let client_order_id = Uuid::new_v4().to_string();
        let resp = self
            .broker
            .place_buy(&client_order_id, OrderType::Market, symbol, quote_amount)
            .await;

        match resp {
            Some(resp) => {
                info!(
                    symbol,
                    order_id = ?resp.order_id,
                    qty = ?resp.executed_qty.map(|q| q.to_string()),
                    "Buy Response: filled"
                );
                self.hub.record_trade(
                    "buy",
                    symbol,
                    resp.executed_qty.and_then(|q| q.to_f64()).unwrap_or(0.0),
                    resp.fill_price.and_then(|p| p.to_f64()),
                    avg_cost_basis.and_then(|b| b.to_f64()),
                    pnl_pct.and_then(|p| p.to_f64()),
                    tag,
                    resp.order_id.as_deref(),
                );
                true
            }
            None => {
                warn!(symbol, "Buy Response: failed");
                false
            }
        }
    }

    async fn sell_full(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        expected_price: Decimal,
        avg_cost_basis: Decimal,
        pnl_pct: Decimal,
        tag: &str,
    ) -> bool {
        let client_order_id = Uuid::new_v4().to_string();
        let resp = self
            .broker
            .place_sell(&client_order_id, OrderType::Market, symbol, quantity)
            .await;

        match resp {
            Some(resp) => {
                let price = resp.fill_price.unwrap_or(expected_price);
                let qty = resp.executed_qty.unwrap_or(quantity);
                info!(
                    symbol,
                    order_id = ?resp.order_id,
                    qty = %qty,
                    price = %format_price(price),
                    "Sell Response: filled"
                );
                self.hub.record_trade(
                    "sell",
                    symbol,
                    qty.to_f64().unwrap_or(0.0),
                    price.to_f64(),
                    (avg_cost_basis > Decimal::ZERO)
                        .then(|| avg_cost_basis.to_f64())
                        .flatten(),
                    pnl_pct.to_f64(),
                    Some(tag),
                    resp.order_id.as_deref(),
                );
                true
            }
            None => {
                warn!(symbol, "Sell Response: failed");
                false
            }
        }
    }

    /// Recompute per-asset cost basis and DCA stage counters from filled
    /// order history.
    async fn recompute_positions(&mut self, holdings: &[Holding]) {
        let mut basis = HashMap::new();
        let mut stages = HashMap::new();

        for holding in holdings {
            if holding.asset == "USDC" || holding.quantity <= Decimal::ZERO {
                continue;
            }
            let sym = full_symbol(&holding.asset);
            let orders = self.broker.get_orders(&sym).await;
            if orders.is_empty() {
                info!(asset = %holding.asset, "no order history — skipping position recovery");
                continue;
            }
            basis.insert(
                holding.asset.clone(),
                position::average_cost_basis(holding.quantity, &orders),
            );
            let recovered = position::dca_stages_triggered(&orders);
            stages.insert(holding.asset.clone(), recovered);
            info!(asset = %holding.asset, stages = recovered, "position state recovered");
        }

        self.cost_basis = basis;
        self.dca_stages = stages;
    }

    /// Seed the rolling DCA window from the persisted trade ledger so the
    /// 24-hour limit survives restarts.
    fn seed_dca_window(&mut self) {
        let history = self.hub.load_trade_history();
        for entry in &history {
            let base = base_asset(&entry.symbol);
            if base.is_empty() {
                continue;
            }
            if entry.side == "sell" {
                self.dca_window.seed_sell(&base, entry.ts);
            } else if entry.side == "buy" && entry.tag.as_deref() == Some("DCA") {
                self.dca_window.seed_dca_buy(&base, entry.ts);
            }
        }
        info!(entries = history.len(), "DCA window seeded from trade history");
    }

    // =========================================================================
    // Status assembly
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    fn position_status(
        &self,
        signals: &SignalSource,
        asset: &str,
        quantity: Decimal,
        basis: Decimal,
        ask: Decimal,
        bid: Decimal,
        pnl_buy: Decimal,
        pnl_sell: Decimal,
        value: Decimal,
        stages: u32,
    ) -> PositionStatus {
        let next_stage = stages as usize;
        let hard_next = dca::hard_level(next_stage);
        let next_dca_display = match dca::neural_level_needed(next_stage) {
            Some(level) => format!("{hard_next:.2}% / N{level}"),
            None => format!("{hard_next:.2}%"),
        };

        // The displayed DCA line is whichever trigger price is hit first as
        // price drops: the hard line, or a higher neural line.
        let mut dca_line_source = "HARD".to_string();
        let mut dca_line_price = Decimal::ZERO;
        let mut dca_line_pct = Decimal::ZERO;
        if basis > Decimal::ZERO {
            dca_line_price = basis * (Decimal::ONE + hard_next / Decimal::from(100));
            if let Some(needed) = dca::neural_level_needed(next_stage) {
                let levels = signals.long_price_levels(asset);
                if levels.len() >= needed as usize {
                    let neural_line = levels[needed as usize - 1];
                    if neural_line > dca_line_price {
                        dca_line_price = neural_line;
                        dca_line_source = format!("NEURAL N{needed}");
                    }
                }
            }
            dca_line_pct = pnl_buy;
        }

        let mut trail_active = false;
        let mut trail_line = Decimal::ZERO;
        let mut trail_peak = Decimal::ZERO;
        let mut dist_to_trail_pct = Decimal::ZERO;
        if basis > Decimal::ZERO {
            let base_line = basis * (Decimal::ONE + pm_start_pct(stages) / Decimal::from(100));
            let (line, peak, active) = match self.trailing.get(asset) {
                Some(pm) => (pm.line, pm.peak, pm.active),
                None => (base_line, Decimal::ZERO, false),
            };
            trail_line = line;
            trail_peak = peak;
            // Already above the line counts as armed for display purposes.
            trail_active = active || bid >= line;
            if line > Decimal::ZERO {
                dist_to_trail_pct = (bid - line) / line * Decimal::from(100);
            }
        }

        PositionStatus {
            quantity: quantity.to_f64().unwrap_or(0.0),
            avg_cost_basis: basis.to_f64().unwrap_or(0.0),
            current_buy_price: ask.to_f64().unwrap_or(0.0),
            current_sell_price: bid.to_f64().unwrap_or(0.0),
            gain_loss_pct_buy: pnl_buy.to_f64().unwrap_or(0.0),
            gain_loss_pct_sell: pnl_sell.to_f64().unwrap_or(0.0),
            value_usd: value.to_f64().unwrap_or(0.0),
            dca_triggered_stages: stages,
            next_dca_display,
            dca_line_price: dca_line_price.to_f64().unwrap_or(0.0),
            dca_line_source,
            dca_line_pct: dca_line_pct.to_f64().unwrap_or(0.0),
            trail_active,
            trail_line: trail_line.to_f64().unwrap_or(0.0),
            trail_peak: trail_peak.to_f64().unwrap_or(0.0),
            dist_to_trail_pct: dist_to_trail_pct.to_f64().unwrap_or(0.0),
        }
    }
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

impl std::fmt::Debug for Trader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trader")
            .field("broker", &self.broker.name())
            .field("positions", &self.cost_basis.len())
            .field("dca_stages", &self.dca_stages)
            .finish()
    }
}
