// =============================================================================
// Settings — GUI-driven hot-reloadable config plus environment wiring
// =============================================================================
//
// `gui_settings.json` is polled by mtime: the file is re-read only when its
// modification time changes and the parsed value is swapped in whole, never
// partially. Missing or malformed files leave the previous (or default)
// settings in place.
//
// Everything environment-driven (provider selection, pine override feed,
// paper-test harness, hub directory) is captured once at startup into
// `TraderConfig` — no module-level mutable state.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;
use tracing::{info, warn};

/// The fixed indicator roster the GUI can toggle.
pub const INDICATOR_NAMES: [&str; 12] = [
    "macd",
    "stochastic",
    "momentum",
    "obv",
    "rsi",
    "bollinger",
    "ema",
    "atr",
    "volume_profile",
    "adx",
    "pivots",
    "ichimoku",
];

fn default_coins() -> Vec<String> {
    ["BTC", "ETH", "XRP", "BNB", "DOGE"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Truthy environment flag: 1 / true / yes / y / on.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

// =============================================================================
// Strategy settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyMode {
    #[default]
    Selector,
    Super,
}

#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub mode: StrategyMode,
    /// Indicator name -> enabled. Always carries the full roster.
    pub indicators: BTreeMap<String, bool>,
    pub check_all: bool,
    pub replace_neural: bool,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            mode: StrategyMode::Selector,
            indicators: INDICATOR_NAMES
                .iter()
                .map(|name| (name.to_string(), false))
                .collect(),
            check_all: false,
            replace_neural: false,
        }
    }
}

impl StrategySettings {
    pub fn enabled_indicators(&self) -> Vec<String> {
        self.indicators
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

// =============================================================================
// GUI settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct GuiSettings {
    pub coins: Vec<String>,
    pub main_neural_dir: Option<PathBuf>,
    pub default_timeframe: String,
    pub candles_limit: u32,
    pub strategy: StrategySettings,
}

impl Default for GuiSettings {
    fn default() -> Self {
        Self {
            coins: default_coins(),
            main_neural_dir: None,
            default_timeframe: "1hour".to_string(),
            candles_limit: 120,
            strategy: StrategySettings::default(),
        }
    }
}

/// Map the GUI timeframe spelling to a kline interval.
pub fn kline_interval(timeframe: &str) -> &'static str {
    match timeframe.trim().to_lowercase().as_str() {
        "1min" => "1m",
        "5min" => "5m",
        "15min" => "15m",
        "30min" => "30m",
        "2hour" => "2h",
        "4hour" => "4h",
        "8hour" => "8h",
        "12hour" => "12h",
        "1day" => "1d",
        "1week" => "1w",
        _ => "1h",
    }
}

// Raw wire shapes; everything is optional so older files keep loading.

#[derive(Debug, Deserialize)]
struct RawStrategy {
    mode: Option<String>,
    indicators: Option<BTreeMap<String, bool>>,
    check_all: Option<bool>,
    replace_neural: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawGuiSettings {
    coins: Option<Vec<String>>,
    main_neural_dir: Option<String>,
    default_timeframe: Option<String>,
    candles_limit: Option<u32>,
    strategy: Option<RawStrategy>,
}

fn normalize_strategy(raw: Option<RawStrategy>) -> StrategySettings {
    let mut out = StrategySettings::default();
    let Some(raw) = raw else {
        return out;
    };

    if let Some(mode) = raw.mode {
        match mode.trim().to_lowercase().as_str() {
            "super" => out.mode = StrategyMode::Super,
            "selector" => out.mode = StrategyMode::Selector,
            _ => {}
        }
    }
    out.check_all = raw.check_all.unwrap_or(false);
    out.replace_neural = raw.replace_neural.unwrap_or(false);

    if let Some(flags) = raw.indicators {
        // Only roster names are honoured; stray keys are dropped.
        for (name, enabled) in flags {
            if let Some(slot) = out.indicators.get_mut(&name) {
                *slot = enabled;
            }
        }
    }

    // check_all overrides the selection and forces weighted scoring.
    if out.check_all {
        for enabled in out.indicators.values_mut() {
            *enabled = true;
        }
        out.mode = StrategyMode::Super;
    }

    out
}

fn normalize_gui_settings(raw: RawGuiSettings, fallback: &GuiSettings) -> GuiSettings {
    let coins: Vec<String> = raw
        .coins
        .unwrap_or_default()
        .iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect();

    GuiSettings {
        coins: if coins.is_empty() {
            fallback.coins.clone()
        } else {
            coins
        },
        main_neural_dir: raw
            .main_neural_dir
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .map(PathBuf::from),
        default_timeframe: raw
            .default_timeframe
            .unwrap_or_else(|| fallback.default_timeframe.clone()),
        candles_limit: raw.candles_limit.unwrap_or(fallback.candles_limit),
        strategy: normalize_strategy(raw.strategy),
    }
}

/// Polls `gui_settings.json` by mtime and caches the parsed value.
#[derive(Debug)]
pub struct SettingsWatcher {
    path: PathBuf,
    mtime: Option<SystemTime>,
    current: GuiSettings,
}

impl SettingsWatcher {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mtime: None,
            current: GuiSettings::default(),
        }
    }

    /// Current settings, re-reading the file only when its mtime moved.
    pub fn current(&mut self) -> GuiSettings {
        let mtime = std::fs::metadata(&self.path).and_then(|m| m.modified()).ok();

        if let Some(mtime) = mtime {
            if self.mtime != Some(mtime) {
                match std::fs::read_to_string(&self.path)
                    .map_err(anyhow::Error::from)
                    .and_then(|content| {
                        serde_json::from_str::<RawGuiSettings>(&content).map_err(Into::into)
                    }) {
                    Ok(raw) => {
                        self.current = normalize_gui_settings(raw, &self.current);
                        self.mtime = Some(mtime);
                        info!(
                            path = %self.path.display(),
                            coins = ?self.current.coins,
                            "GUI settings reloaded"
                        );
                    }
                    Err(err) => {
                        warn!(path = %self.path.display(), error = %err, "GUI settings unreadable — keeping previous");
                        self.mtime = Some(mtime);
                    }
                }
            }
        }

        self.current.clone()
    }
}

// =============================================================================
// Environment-driven trader configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeProvider {
    Robinhood,
    Binance,
}

impl std::fmt::Display for ExchangeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Robinhood => write!(f, "robinhood"),
            Self::Binance => write!(f, "binance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PineMode {
    Filter,
    Replace,
    Off,
}

#[derive(Debug, Clone)]
pub struct PineConfig {
    pub enabled: bool,
    pub mode: PineMode,
    pub use_exit: bool,
    pub max_age_seconds: i64,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PaperTestConfig {
    pub enabled: bool,
    pub hold_seconds: i64,
    pub dca_seconds: i64,
    pub alloc_usd: rust_decimal::Decimal,
    pub coin: String,
}

#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub provider: ExchangeProvider,
    pub hub_dir: PathBuf,
    pub gui_settings_path: PathBuf,
    pub pine: PineConfig,
    pub paper_test: PaperTestConfig,
}

impl TraderConfig {
    /// Capture the full environment-driven configuration.
    pub fn from_env() -> Self {
        let provider = match std::env::var("EXCHANGE_PROVIDER")
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str()
        {
            "binance" => ExchangeProvider::Binance,
            _ => ExchangeProvider::Robinhood,
        };

        let hub_dir = std::env::var("POWERTRADER_HUB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("hub_data"));

        let gui_settings_path = std::env::var("POWERTRADER_GUI_SETTINGS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("gui_settings.json"));

        let pine_enabled = env_flag("PINE_SIGNAL_ENABLED", false);
        let pine_mode = match std::env::var("PINE_SIGNAL_MODE")
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str()
        {
            "replace" => PineMode::Replace,
            "off" => PineMode::Off,
            _ => PineMode::Filter,
        };
        let pine_file = std::env::var("PINE_SIGNAL_FILE")
            .ok()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .map(PathBuf::from)
            .or_else(|| pine_enabled.then(|| hub_dir.join("pine_signals.jsonl")));

        let pine = PineConfig {
            enabled: pine_enabled,
            mode: pine_mode,
            use_exit: env_flag("PINE_SIGNAL_USE_EXIT", false),
            max_age_seconds: env_i64("PINE_SIGNAL_MAX_AGE_SECONDS", 300),
            file: pine_file,
        };

        let paper_test = PaperTestConfig {
            enabled: env_flag("BINANCE_PAPER_TEST", false),
            hold_seconds: env_i64("BINANCE_PAPER_TEST_HOLD_SECONDS", 120),
            dca_seconds: env_i64("BINANCE_PAPER_TEST_DCA_SECONDS", 60),
            alloc_usd: std::env::var("BINANCE_PAPER_TEST_ALLOC_USD")
                .ok()
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or_else(|| rust_decimal::Decimal::from(50)),
            coin: std::env::var("BINANCE_PAPER_TEST_COIN")
                .unwrap_or_default()
                .trim()
                .to_uppercase(),
        };

        Self {
            provider,
            hub_dir,
            gui_settings_path,
            pine,
            paper_test,
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
