// =============================================================================
// PowerTrader — Main Entry Point
// =============================================================================
//
// Selects the exchange driver from the environment, recovers persisted
// position state, and runs the control loop until Ctrl+C. Missing
// credentials for a real driver are a fatal configuration error with a
// remediation message; everything else degrades per tick.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod broker;
mod dca;
mod exchange;
mod hub;
mod indicators;
mod position;
mod settings;
mod signals;
mod strategy;
mod trader;
mod trailing;
mod types;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::broker::binance::BinanceBroker;
use crate::broker::paper::PaperBroker;
use crate::broker::robinhood::RobinhoodBroker;
use crate::broker::Broker;
use crate::exchange::binance::BinanceClient;
use crate::settings::{env_flag, ExchangeProvider, SettingsWatcher, TraderConfig};
use crate::trader::Trader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    match std::env::var("POWERTRADER_ENV") {
        Ok(path) if !path.trim().is_empty() => {
            let _ = dotenv::from_path(path.trim());
        }
        _ => {
            let _ = dotenv::dotenv();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("PowerTrader starting up");

    let config = TraderConfig::from_env();
    info!(
        provider = %config.provider,
        hub_dir = %config.hub_dir.display(),
        "configuration loaded"
    );

    // Coins known at startup feed the pair listing of the HMAC driver.
    let initial_coins = SettingsWatcher::new(&config.gui_settings_path).current().coins;

    // ── 2. Build the exchange driver ─────────────────────────────────────
    let (broker, paper): (Arc<dyn Broker>, Option<Arc<PaperBroker>>) = match config.provider {
        ExchangeProvider::Binance => build_binance_broker(initial_coins)?,
        ExchangeProvider::Robinhood => (build_robinhood_broker()?, None),
    };
    info!(broker = broker.name(), "exchange driver ready");

    // ── 3. Run the control loop until Ctrl+C ─────────────────────────────
    let mut trader = Trader::new(broker, config).await?;

    tokio::select! {
        _ = trader.run() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received — stopping");
        }
    }

    if let Some(paper) = paper {
        let perf = paper.get_performance().await;
        info!(
            total_value = %perf.total_value,
            profit_loss = %perf.profit_loss,
            profit_pct = perf.profit_pct,
            trades = perf.total_trades,
            "paper trading performance"
        );
    }

    info!("PowerTrader shut down complete");
    Ok(())
}

/// Binance route: live HMAC driver, or the paper driver wrapping a
/// public-only client when `BINANCE_PAPER` is set (or keys are absent on
/// the testnet).
fn build_binance_broker(
    coins: Vec<String>,
) -> anyhow::Result<(Arc<dyn Broker>, Option<Arc<PaperBroker>>)> {
    let mut use_paper = env_flag("BINANCE_PAPER", false);

    let live_client = BinanceClient::from_env();
    if live_client.is_err() && env_flag("BINANCE_TESTNET", false) {
        use_paper = true;
    }

    if use_paper {
        let source = BinanceBroker::new(BinanceClient::public(), coins);
        let paper = Arc::new(PaperBroker::from_env(
            Box::new(source),
            "paper_trading_state.json",
        ));
        return Ok((paper.clone(), Some(paper)));
    }

    match live_client {
        Ok(client) => Ok((Arc::new(BinanceBroker::new(client, coins)), None)),
        Err(_) => {
            eprintln!(
                "\n[PowerTrader] Binance API credentials not found.\n\
                 Set BINANCE_API_KEY and BINANCE_API_SECRET in the environment or .env file.\n\
                 For a dry run without keys, set BINANCE_PAPER=1 to trade against the paper driver.\n"
            );
            anyhow::bail!("missing Binance credentials")
        }
    }
}

/// Robinhood route: Ed25519 driver with credentials from r_key.txt /
/// r_secret.txt.
fn build_robinhood_broker() -> anyhow::Result<Arc<dyn Broker>> {
    let api_key = std::fs::read_to_string("r_key.txt")
        .unwrap_or_default()
        .trim()
        .to_string();
    let secret = std::fs::read_to_string("r_secret.txt")
        .unwrap_or_default()
        .trim()
        .to_string();

    if api_key.is_empty() || secret.is_empty() {
        eprintln!(
            "\n[PowerTrader] Robinhood API credentials not found.\n\
             Open the GUI and go to Settings -> Robinhood API -> Setup / Update.\n\
             That wizard will generate your keypair, tell you where to paste the public key\n\
             on Robinhood, and will save r_key.txt + r_secret.txt so this trader can authenticate.\n"
        );
        anyhow::bail!("missing Robinhood credentials")
    }

    Ok(Arc::new(RobinhoodBroker::new(api_key, &secret)?))
}
