// =============================================================================
// Startup Configuration
// =============================================================================
//
// Every tunable lives here, grouped by subsystem. Values are read once from
// the environment at startup (a `.env` file is honoured via dotenv) and the
// resulting `Config` is immutable for the life of the process.
//
// Unset variables fall back to defaults; a variable that is set but does not
// parse is a fatal startup error.
// =============================================================================

use anyhow::{Context, Result};

use crate::types::Mode;

/// Per-mode scorer thresholds (spread/wick/momentum/volume gates + cooldown).
#[derive(Debug, Clone)]
pub struct ModeThresholds {
    /// Minimum close-to-close gap, as a fraction.
    pub ema_gap: f64,
    /// Minimum last-volume / SMA(volume) ratio. Mandatory check.
    pub vol_ratio: f64,
    /// Maximum wick ratio.
    pub wick_max: f64,
    /// Minimum candle body momentum.
    pub mom_min: f64,
    /// Maximum top-of-book spread.
    pub spread_max: f64,
    /// Minimum seconds between emitted signals for this mode.
    pub cooldown_sec: f64,
}

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub early: ModeThresholds,
    pub main: ModeThresholds,
    /// The 5m early pipeline is optional; disabling it changes nothing else.
    pub enable_early: bool,
    pub volume_sma_len: usize,
    pub enable_wick_filter: bool,
    pub enable_momentum: bool,
    pub enable_atr_compression: bool,
    pub atr_short: usize,
    pub atr_long: usize,
    pub atr_compression_ratio: f64,
    pub score_min_early: u32,
    pub score_min_main: u32,
    /// Minimum score for main signals while the market is in PANIC.
    pub score_min_panic: u32,
    pub high_conf_score: u32,
}

impl SignalConfig {
    pub fn thresholds(&self, mode: Mode) -> &ModeThresholds {
        match mode {
            Mode::Early => &self.early,
            Mode::Main => &self.main,
        }
    }

    pub fn score_min(&self, mode: Mode) -> u32 {
        match mode {
            Mode::Early => self.score_min_early,
            Mode::Main => self.score_min_main,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegimeConfig {
    /// 1h ATR5/ATR20 ratio at or above which the market is panicking.
    pub panic_atr_ratio: f64,
    /// 1h bar drop (close vs open) at or beyond which a proxy is dumping.
    pub panic_drop_pct: f64,
    /// ATR ratio at or below which PANIC may hand over to RECOVERY.
    pub recovery_atr_ratio: f64,
    pub trend_ema_fast: usize,
    pub trend_ema_slow: usize,
    /// Minimum average 4h EMA gap for TREND.
    pub trend_gap_min: f64,
    /// Maximum mean 4h ATR% for RANGE.
    pub range_atr_max: f64,
    /// Maximum mean 4h EMA gap for RANGE.
    pub range_gap_max: f64,
    /// Minimum seconds a non-PANIC regime label is held before changing.
    pub min_hold_sec: f64,
    /// Minimum seconds between outbound regime-change notifications.
    pub alert_cooldown_sec: f64,
}

/// Which entry-offset mechanism the risk planner applies. The two never stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOffsetMode {
    /// Breakout offset in TREND, pullback offset in NORMAL/RANGE.
    Adaptive,
    /// ATR-proportional confirmation band in the signal direction.
    Confirm,
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Base risk per trade, percent of NAV, by mode.
    pub base_risk_pct_early: f64,
    pub base_risk_pct_main: f64,
    /// Hard cap on risk percent after all multipliers.
    pub risk_max_pct: f64,
    pub sl_atr_mult: f64,
    pub base_rr: f64,
    /// Target per-trade volatility; unset disables the adjustment.
    pub target_vol_pct: Option<f64>,
    pub entry_offset_mode: EntryOffsetMode,
    pub breakout_offset_pct: f64,
    pub confirm_min_pct: f64,
    pub confirm_max_pct: f64,
    /// Entry slippage floor as a fraction of price.
    pub slippage_pct: f64,
}

#[derive(Debug, Clone)]
pub struct PortfolioConfig {
    pub max_positions: usize,
    /// Aggregate risk cap as percent of NAV. Preferred over the USD cap.
    pub max_total_risk_pct: Option<f64>,
    /// Absolute aggregate risk cap in USD, used when the pct cap is unset.
    pub max_total_risk_usd: Option<f64>,
    /// Pairwise return-correlation limit; unset disables the filter.
    pub max_correlation: Option<f64>,
    /// Minimum average traded USD volume; 0 disables the gate.
    pub min_liquidity_usd: f64,
}

#[derive(Debug, Clone)]
pub struct DrawdownConfig {
    pub soft_pct: f64,
    pub hard_pct: f64,
    pub kill_pct: f64,
    pub hard_cooldown_sec: f64,
    pub min_risk_mult: f64,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub enabled: bool,
    pub start_nav_usd: f64,
    pub report_interval_sec: u64,
    /// Exit slippage as a fraction of price; 0 disables it.
    pub exit_slippage_pct: f64,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub queue_capacity: usize,
    pub min_interval_ms: u64,
}

/// Top-level immutable configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub symbols: Vec<String>,
    /// The two fixed symbols whose 1h/4h candles drive the regime engine.
    pub proxy_symbols: [String; 2],
    pub tf_early_sec: i64,
    pub tf_main_sec: i64,
    pub ws_base_url: String,
    pub signal: SignalConfig,
    pub regime: RegimeConfig,
    pub risk: RiskConfig,
    pub portfolio: PortfolioConfig,
    pub drawdown: DrawdownConfig,
    pub sim: SimConfig,
    pub notify: NotifyConfig,
}

const FALLBACK_SYMBOLS: &[&str] = &[
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "APTUSDT", "SUIUSDT",
    "SEIUSDT", "TIAUSDT", "INJUSDT", "OPUSDT", "ARBUSDT", "GMXUSDT", "DYDXUSDT",
    "PENDLEUSDT", "JUPUSDT", "PYTHUSDT", "TAOUSDT", "ARKMUSDT", "WLDUSDT",
    "ORDIUSDT", "WIFUSDT", "BONKUSDT", "ENAUSDT",
];

impl Config {
    /// Build the configuration from the environment. Fatal on any variable
    /// that is set but does not parse, and on inconsistent threshold ladders.
    pub fn from_env() -> Result<Self> {
        let mut symbols: Vec<String> = match std::env::var("POLARIS_SYMBOLS") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => FALLBACK_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        };

        let proxy_symbols = ["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        // The regime proxies must be part of the subscribed universe.
        for p in &proxy_symbols {
            if !symbols.contains(p) {
                symbols.push(p.clone());
            }
        }

        let cfg = Self {
            symbols,
            proxy_symbols,
            tf_early_sec: env_i64("TF_EARLY_SEC", 300)?,
            tf_main_sec: env_i64("TF_MAIN_SEC", 900)?,
            ws_base_url: env_str("WS_BASE_URL", "wss://fstream.binance.com"),
            signal: SignalConfig {
                early: ModeThresholds {
                    ema_gap: env_f64("EMA_GAP_EARLY", 0.003)?,
                    vol_ratio: env_f64("VOLUME_RATIO_EARLY", 2.5)?,
                    wick_max: env_f64("WICK_MAX_RATIO_EARLY", 0.45)?,
                    mom_min: env_f64("MOMENTUM_MIN_EARLY", 0.003)?,
                    spread_max: env_f64("SPREAD_MAX_EARLY", 0.0008)?,
                    cooldown_sec: env_f64("COOLDOWN_SEC_EARLY", 600.0)?,
                },
                main: ModeThresholds {
                    ema_gap: env_f64("EMA_GAP_MAIN", 0.005)?,
                    vol_ratio: env_f64("VOLUME_RATIO_MAIN", 3.0)?,
                    wick_max: env_f64("WICK_MAX_RATIO_MAIN", 0.35)?,
                    mom_min: env_f64("MOMENTUM_MIN_MAIN", 0.004)?,
                    spread_max: env_f64("SPREAD_MAX_MAIN", 0.0006)?,
                    cooldown_sec: env_f64("COOLDOWN_SEC_MAIN", 1800.0)?,
                },
                enable_early: env_bool("ENABLE_EARLY", true)?,
                volume_sma_len: env_usize("VOLUME_SMA_LEN", 20)?,
                enable_wick_filter: env_bool("ENABLE_WICK_FILTER", true)?,
                enable_momentum: env_bool("ENABLE_MOMENTUM", true)?,
                enable_atr_compression: env_bool("ENABLE_ATR_COMPRESSION", true)?,
                atr_short: env_usize("ATR_SHORT", 5)?,
                atr_long: env_usize("ATR_LONG", 20)?,
                atr_compression_ratio: env_f64("ATR_COMPRESSION_RATIO", 0.8)?,
                score_min_early: env_u32("SCORE_MIN_EARLY", 7)?,
                score_min_main: env_u32("SCORE_MIN_MAIN", 10)?,
                score_min_panic: env_u32("SCORE_MIN_PANIC", 12)?,
                high_conf_score: env_u32("HIGH_CONF_SCORE", 12)?,
            },
            regime: RegimeConfig {
                panic_atr_ratio: env_f64("PANIC_ATR_RATIO", 1.6)?,
                panic_drop_pct: env_f64("PANIC_DROP_PCT", 0.03)?,
                recovery_atr_ratio: env_f64("RECOVERY_ATR_RATIO", 1.15)?,
                trend_ema_fast: env_usize("TREND_EMA_FAST", 20)?,
                trend_ema_slow: env_usize("TREND_EMA_SLOW", 50)?,
                trend_gap_min: env_f64("TREND_GAP_MIN", 0.0015)?,
                range_atr_max: env_f64("RANGE_ATR_MAX", 0.006)?,
                range_gap_max: env_f64("RANGE_GAP_MAX", 0.0010)?,
                min_hold_sec: env_f64("REGIME_MIN_HOLD_SEC", 1800.0)?,
                alert_cooldown_sec: env_f64("REGIME_ALERT_COOLDOWN_SEC", 900.0)?,
            },
            risk: RiskConfig {
                base_risk_pct_early: env_f64("BASE_RISK_PCT_EARLY", 0.25)?,
                base_risk_pct_main: env_f64("BASE_RISK_PCT_MAIN", 0.50)?,
                risk_max_pct: env_f64("RISK_MAX_PCT", 1.0)?,
                sl_atr_mult: env_f64("SL_ATR_MULT", 1.2)?,
                base_rr: env_f64("BASE_RR", 2.0)?,
                target_vol_pct: env_opt_f64("TARGET_VOL_PCT")?,
                entry_offset_mode: match env_str("ENTRY_OFFSET_MODE", "adaptive").as_str() {
                    "adaptive" => EntryOffsetMode::Adaptive,
                    "confirm" => EntryOffsetMode::Confirm,
                    other => anyhow::bail!(
                        "ENTRY_OFFSET_MODE must be 'adaptive' or 'confirm', got '{other}'"
                    ),
                },
                breakout_offset_pct: env_f64("BREAKOUT_OFFSET_PCT", 0.0008)?,
                confirm_min_pct: env_f64("ENTRY_CONFIRM_MIN_PCT", 0.0005)?,
                confirm_max_pct: env_f64("ENTRY_CONFIRM_MAX_PCT", 0.0030)?,
                slippage_pct: env_f64("SLIPPAGE_BPS", 2.0)? / 10_000.0,
            },
            portfolio: PortfolioConfig {
                max_positions: env_usize("MAX_POSITIONS", 10)?,
                max_total_risk_pct: env_opt_f64("MAX_TOTAL_RISK_PCT")?.or(Some(3.0)),
                max_total_risk_usd: env_opt_f64("MAX_TOTAL_RISK_USD")?,
                max_correlation: env_opt_f64("MAX_CORRELATION")?.or(Some(0.85)),
                min_liquidity_usd: env_f64("MIN_LIQUIDITY_USD", 250_000.0)?,
            },
            drawdown: DrawdownConfig {
                soft_pct: env_f64("DD_SOFT_PCT", 0.06)?,
                hard_pct: env_f64("DD_HARD_PCT", 0.10)?,
                kill_pct: env_f64("DD_KILL_PCT", 0.18)?,
                hard_cooldown_sec: env_f64("DD_HARD_COOLDOWN_SEC", 21_600.0)?,
                min_risk_mult: env_f64("DD_MIN_RISK_MULT", 0.35)?,
            },
            sim: SimConfig {
                enabled: env_bool("SIM_ENABLED", true)?,
                start_nav_usd: env_f64("SIM_START_NAV_USD", 10_000.0)?,
                report_interval_sec: env_u64("REPORT_INTERVAL_SEC", 3_600)?,
                exit_slippage_pct: env_f64("EXIT_SLIPPAGE_BPS", 0.0)? / 10_000.0,
            },
            notify: NotifyConfig {
                telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
                telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
                queue_capacity: env_usize("NOTIFY_QUEUE_CAPACITY", 500)?,
                min_interval_ms: env_u64("NOTIFY_MIN_INTERVAL_MS", 200)?,
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.tf_early_sec > 0 && self.tf_main_sec > 0, "timeframes must be positive");
        anyhow::ensure!(
            self.tf_early_sec < self.tf_main_sec,
            "TF_EARLY_SEC must be shorter than TF_MAIN_SEC"
        );
        let dd = &self.drawdown;
        anyhow::ensure!(
            dd.soft_pct < dd.hard_pct && dd.hard_pct < dd.kill_pct,
            "drawdown thresholds must satisfy soft < hard < kill"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&dd.min_risk_mult),
            "DD_MIN_RISK_MULT must be in [0, 1]"
        );
        let r = &self.risk;
        anyhow::ensure!(
            r.confirm_min_pct <= r.confirm_max_pct,
            "entry confirmation band is inverted"
        );
        anyhow::ensure!(self.signal.volume_sma_len >= 2, "VOLUME_SMA_LEN too small");
        anyhow::ensure!(
            self.signal.atr_short < self.signal.atr_long,
            "ATR_SHORT must be below ATR_LONG"
        );
        Ok(())
    }

    pub fn base_risk_pct(&self, mode: Mode) -> f64 {
        match mode {
            Mode::Early => self.risk.base_risk_pct_early,
            Mode::Main => self.risk.base_risk_pct_main,
        }
    }
}

// -----------------------------------------------------------------------------
// Env parse helpers. Unset -> default; set-but-invalid -> fatal.
// -----------------------------------------------------------------------------

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .with_context(|| format!("env var {key} is not a valid number: '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn env_opt_f64(key: &str) -> Result<Option<f64>> {
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .with_context(|| format!("env var {key} is not a valid number: '{raw}'")),
        Err(_) => Ok(None),
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .with_context(|| format!("env var {key} is not a valid integer: '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("env var {key} is not a valid integer: '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    Ok(env_u64(key, default as u64)? as u32)
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    Ok(env_u64(key, default as u64)? as usize)
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("env var {key} is not a valid bool: '{other}'"),
        },
        Err(_) => Ok(default),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_consistent_config() {
        // Relies on the test environment not defining POLARIS_* overrides.
        let cfg = Config::from_env().expect("default config must build");
        assert!(cfg.symbols.contains(&"BTCUSDT".to_string()));
        assert!(cfg.symbols.contains(&"ETHUSDT".to_string()));
        assert_eq!(cfg.tf_early_sec, 300);
        assert_eq!(cfg.tf_main_sec, 900);
        assert_eq!(cfg.signal.score_min_main, 10);
        assert_eq!(cfg.portfolio.max_total_risk_pct, Some(3.0));
        assert!(cfg.drawdown.soft_pct < cfg.drawdown.hard_pct);
        assert!((cfg.risk.slippage_pct - 0.0002).abs() < 1e-12);
    }

    #[test]
    fn thresholds_select_by_mode() {
        let cfg = Config::from_env().unwrap();
        assert!(cfg.signal.thresholds(Mode::Early).vol_ratio < cfg.signal.thresholds(Mode::Main).vol_ratio);
        assert_eq!(cfg.signal.score_min(Mode::Early), cfg.signal.score_min_early);
        assert!(cfg.base_risk_pct(Mode::Early) < cfg.base_risk_pct(Mode::Main));
    }

    #[test]
    fn bool_parse_accepts_common_spellings() {
        std::env::set_var("POLARIS_TEST_BOOL", "off");
        assert_eq!(env_bool("POLARIS_TEST_BOOL", true).unwrap(), false);
        std::env::set_var("POLARIS_TEST_BOOL", "TRUE");
        assert_eq!(env_bool("POLARIS_TEST_BOOL", false).unwrap(), true);
        std::env::set_var("POLARIS_TEST_BOOL", "maybe");
        assert!(env_bool("POLARIS_TEST_BOOL", true).is_err());
        std::env::remove_var("POLARIS_TEST_BOOL");
    }

    #[test]
    fn invalid_number_is_fatal() {
        std::env::set_var("POLARIS_TEST_NUM", "not-a-number");
        assert!(env_f64("POLARIS_TEST_NUM", 1.0).is_err());
        std::env::remove_var("POLARIS_TEST_NUM");
    }
}
