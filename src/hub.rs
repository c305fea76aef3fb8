// =============================================================================
// GUI hub — status snapshot, trade ledger, and P&L persistence
// =============================================================================
//
// Everything the GUI reads lives under the hub directory:
//   trader_status.json         — full per-tick snapshot (atomic tmp + rename)
//   trade_history.jsonl        — append-only trade ledger, one JSON per line
//   pnl_ledger.json            — running realized profit (atomic tmp + rename)
//   account_value_history.jsonl— {ts, total_account_value} per tick
//   <SYMBOL>_current_price.txt — latest ask per tracked asset
//
// Writes are best-effort: a failed write is logged and the next tick lays
// down a fresh snapshot. JSON documents are written to a sibling tmp file
// and renamed so a crash can never leave a partial document behind.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One line of trade_history.jsonl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLedgerEntry {
    pub ts: i64,
    pub side: String,
    #[serde(default)]
    pub tag: Option<String>,
    pub symbol: String,
    pub qty: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub avg_cost_basis: Option<f64>,
    #[serde(default)]
    pub pnl_pct: Option<f64>,
    #[serde(default)]
    pub realized_profit_usd: Option<f64>,
    #[serde(default)]
    pub order_id: Option<String>,
}

/// pnl_ledger.json document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlLedger {
    #[serde(default)]
    pub total_realized_profit_usd: f64,
    #[serde(default)]
    pub last_updated_ts: i64,
}

impl Default for PnlLedger {
    fn default() -> Self {
        Self {
            total_realized_profit_usd: 0.0,
            last_updated_ts: Utc::now().timestamp(),
        }
    }
}

// ---------------------------------------------------------------------------
// Status snapshot shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountStatus {
    pub total_account_value: f64,
    pub buying_power: f64,
    pub holdings_sell_value: f64,
    pub holdings_buy_value: f64,
    pub percent_in_trade: f64,
    pub pm_start_pct_no_dca: f64,
    pub pm_start_pct_with_dca: f64,
    pub trailing_gap_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PositionStatus {
    pub quantity: f64,
    pub avg_cost_basis: f64,
    pub current_buy_price: f64,
    pub current_sell_price: f64,
    pub gain_loss_pct_buy: f64,
    pub gain_loss_pct_sell: f64,
    pub value_usd: f64,
    pub dca_triggered_stages: u32,
    pub next_dca_display: String,
    pub dca_line_price: f64,
    pub dca_line_source: String,
    pub dca_line_pct: f64,
    pub trail_active: bool,
    pub trail_line: f64,
    pub trail_peak: f64,
    pub dist_to_trail_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraderStatus {
    pub timestamp: i64,
    pub account: AccountStatus,
    pub positions: BTreeMap<String, PositionStatus>,
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

pub struct Hub {
    dir: PathBuf,
    pnl: PnlLedger,
}

impl Hub {
    /// Open (or create) the hub directory and load the P&L ledger.
    pub fn new(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let pnl_path = dir.join("pnl_ledger.json");
        let pnl = match std::fs::read_to_string(&pnl_path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                warn!(error = %err, "corrupt pnl ledger — starting fresh");
                PnlLedger::default()
            }),
            Err(_) => PnlLedger::default(),
        };

        let hub = Self { dir, pnl };
        if !pnl_path.is_file() {
            hub.save_pnl();
        }
        Ok(hub)
    }

    pub fn total_realized_profit(&self) -> f64 {
        self.pnl.total_realized_profit_usd
    }

    // -------------------------------------------------------------------------
    // Trade ledger
    // -------------------------------------------------------------------------

    /// Append one trade to the ledger. Sells with both a price and a cost
    /// basis also realise P&L into the ledger document.
    #[allow(clippy::too_many_arguments)]
    pub fn record_trade(
        &mut self,
        side: &str,
        symbol: &str,
        qty: f64,
        price: Option<f64>,
        avg_cost_basis: Option<f64>,
        pnl_pct: Option<f64>,
        tag: Option<&str>,
        order_id: Option<&str>,
    ) {
        let ts = Utc::now().timestamp();
        let realized = if side.eq_ignore_ascii_case("sell") {
            match (price, avg_cost_basis) {
                (Some(price), Some(basis)) => Some((price - basis) * qty),
                _ => None,
            }
        } else {
            None
        };

        let entry = TradeLedgerEntry {
            ts,
            side: side.to_lowercase(),
            tag: tag.map(String::from),
            symbol: symbol.to_string(),
            qty,
            price,
            avg_cost_basis,
            pnl_pct,
            realized_profit_usd: realized,
            order_id: order_id.map(String::from),
        };
        self.append_jsonl("trade_history.jsonl", &entry);

        if let Some(realized) = realized {
            self.pnl.total_realized_profit_usd += realized;
            self.save_pnl();
            debug!(symbol, realized, total = self.pnl.total_realized_profit_usd, "realized P&L updated");
        }
    }

    /// Full ledger history, oldest first. Unparseable lines are skipped.
    pub fn load_trade_history(&self) -> Vec<TradeLedgerEntry> {
        let path = self.dir.join("trade_history.jsonl");
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn write_status(&self, status: &TraderStatus) {
        self.atomic_write_json("trader_status.json", status);
    }

    pub fn append_account_value(&self, ts: i64, total_account_value: f64) {
        self.append_jsonl(
            "account_value_history.jsonl",
            &serde_json::json!({"ts": ts, "total_account_value": total_account_value}),
        );
    }

    /// Latest ask for one asset, read opportunistically by the GUI chart.
    pub fn write_current_price(&self, asset: &str, ask: f64) {
        let path = self.dir.join(format!("{}_current_price.txt", asset.to_uppercase()));
        if let Err(err) = std::fs::write(&path, ask.to_string()) {
            warn!(asset, error = %err, "failed to write current price file");
        }
    }

    // -------------------------------------------------------------------------
    // Write primitives
    // -------------------------------------------------------------------------

    fn save_pnl(&self) {
        let mut pnl = self.pnl.clone();
        pnl.last_updated_ts = Utc::now().timestamp();
        self.atomic_write_json("pnl_ledger.json", &pnl);
    }

    fn atomic_write_json(&self, file: &str, value: &impl Serialize) {
        let path = self.dir.join(file);
        let content = match serde_json::to_string_pretty(value) {
            Ok(content) => content,
            Err(err) => {
                warn!(file, error = %err, "failed to serialise hub document");
                return;
            }
        };
        let tmp = path.with_extension("json.tmp");
        if let Err(err) =
            std::fs::write(&tmp, &content).and_then(|_| std::fs::rename(&tmp, &path))
        {
            warn!(file, error = %err, "failed to write hub document");
        }
    }

    fn append_jsonl(&self, file: &str, value: &impl Serialize) {
        use std::io::Write as _;

        let path = self.dir.join(file);
        let line = match serde_json::to_string(value) {
            Ok(line) => line,
            Err(err) => {
                warn!(file, error = %err, "failed to serialise ledger line");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| {
                writeln!(f, "{line}")?;
                f.flush()
            });
        if let Err(err) = result {
            warn!(file, error = %err, "failed to append ledger line");
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("dir", &self.dir)
            .field("total_realized_profit_usd", &self.pnl.total_realized_profit_usd)
            .finish()
    }
}
