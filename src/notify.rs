// =============================================================================
// Notification Channel — bounded queue + Telegram worker + formatters
// =============================================================================
//
// The pipeline enqueues plain-text lines through a non-blocking handle; a
// dedicated worker drains the queue to the Telegram sendMessage endpoint with
// a minimum inter-message delay. A full queue drops the message and counts
// it; delivery failures are logged and swallowed. Notifications never fail
// the trading pipeline.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::NotifyConfig;
use crate::drawdown::DrawdownState;
use crate::regime::Regime;
use crate::risk::RiskPlan;
use crate::scoring::SignalScore;
use crate::sim::{ClosedTrade, SimStats};
use crate::types::Mode;

/// Non-blocking sender handle shared with the pipeline.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl Notifier {
    /// Build the handle and its receiving end for the worker.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Enqueue a message without blocking. Drops (and counts) when full.
    pub fn send(&self, text: impl Into<String>) {
        let text = text.into();
        if self.tx.try_send(text).is_err() {
            let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped_total = n, "notification queue full, message dropped");
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drain the queue to Telegram. Without credentials every message is logged
/// locally instead. Runs until the sending side is dropped.
pub async fn run_notify_worker(mut rx: mpsc::Receiver<String>, cfg: NotifyConfig) {
    let client = reqwest::Client::new();
    let min_delay = std::time::Duration::from_millis(cfg.min_interval_ms);

    let creds = match (&cfg.telegram_bot_token, &cfg.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Some((token.clone(), chat_id.clone())),
        _ => {
            warn!("telegram credentials missing, notifications will only be logged");
            None
        }
    };

    while let Some(text) = rx.recv().await {
        match &creds {
            Some((token, chat_id)) => {
                let url = format!("https://api.telegram.org/bot{token}/sendMessage");
                let payload = serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "disable_web_page_preview": true,
                });
                match client.post(&url).json(&payload).send().await {
                    Ok(resp) if !resp.status().is_success() => {
                        warn!(status = %resp.status(), "telegram rejected notification");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "failed to deliver notification");
                    }
                }
            }
            None => info!(message = %text, "notification"),
        }

        tokio::time::sleep(min_delay).await;
    }
}

// -----------------------------------------------------------------------------
// Message formatters
// -----------------------------------------------------------------------------

pub fn fmt_startup(symbol_count: usize, nav: f64, early_enabled: bool) -> String {
    format!(
        "🚀 Polaris engine online\nSymbols: {symbol_count}\nNAV: {nav:.2} USDT\nEarly pipeline: {}",
        if early_enabled { "on" } else { "off" }
    )
}

/// Position-open alert: the executable plan plus the WHY behind it.
pub fn fmt_signal_open(
    plan: &RiskPlan,
    score: &SignalScore,
    mode: Mode,
    high_conf: bool,
    regime: Regime,
    risk_mult: f64,
) -> String {
    let tag = if high_conf {
        "🔥 HIGH CONF"
    } else if mode == Mode::Main {
        "🚨 MAIN"
    } else {
        "🔔 EARLY"
    };

    let mut lines = vec![
        format!(
            "{tag} {} {} @ {:.4}  (score {})",
            plan.direction, plan.symbol, plan.entry, score.score
        ),
        format!("REGIME: {regime} | gate={risk_mult:.2}x"),
        String::new(),
        format!(
            "PLAN: SL {:.4} | TP {:.4} | qty {:.4}\nRisk: {:.2} USDT ({:.2}%) | RR {:.2}",
            plan.sl, plan.tp, plan.qty, plan.risk_usd, plan.risk_pct, plan.rr
        ),
        String::new(),
        "WHY:".to_string(),
        format!("• gap={:.2}%", score.ema_gap * 100.0),
        format!("• vol={:.2}x", score.volume_ratio),
        format!(
            "• spread={:.4} {}",
            score.spread,
            if score.spread_ok { "✅" } else { "❌" }
        ),
        format!(
            "• wick {} | momentum {}",
            if score.wick_ok { "✅" } else { "❌" },
            if score.momentum_ok { "✅" } else { "❌" }
        ),
    ];

    if mode == Mode::Main {
        lines.push(format!(
            "• squeeze {} | break20 {}",
            match score.atr_squeeze {
                Some(true) => "✅",
                Some(false) => "❌",
                None => "–",
            },
            if score.breakout_highlow { "✅" } else { "❌" }
        ));
        if let (Some(s), Some(l), Some(r)) =
            (score.atr_short_pct, score.atr_long_pct, score.squeeze_ratio)
        {
            lines.push(format!(
                "  ATRshort={:.2}% | ATRlong={:.2}% | ratio={:.2}",
                s * 100.0,
                l * 100.0,
                r
            ));
        }
    }

    lines.join("\n")
}

/// Position-close alert with the running scoreboard.
pub fn fmt_close(trade: &ClosedTrade, stats: &SimStats) -> String {
    format!(
        "🔴 CLOSE {} {}\nExit: {:.4}\nResult: {} (RR {:.2})\nPnL: {:+.2} USDT\nNAV: {:.2} USDT\n\n📊 Stats:\nTrades: {} | Wins: {} | Loss: {}\nWinrate: {:.2}% | Total PnL: {:+.2} USDT",
        trade.direction,
        trade.symbol,
        trade.exit_price,
        trade.result,
        trade.rr,
        trade.pnl,
        trade.nav,
        stats.total_trades,
        stats.wins,
        stats.losses,
        stats.winrate_pct(),
        stats.total_pnl,
    )
}

pub fn fmt_regime_change(regime: Regime, reason: &str) -> String {
    match regime {
        Regime::Panic => {
            format!("⛔ PANIC MODE ON\nreason: {reason}\nAction: BLOCK ALL new signals")
        }
        Regime::Recovery => format!(
            "⚠️ RECOVERY MODE\nreason: {reason}\nAction: block EARLY, MAIN selective (high_conf)"
        ),
        Regime::Range => {
            format!("🟨 RANGE MODE\nreason: {reason}\nAction: block EARLY, MAIN selective")
        }
        Regime::Trend => format!("🟩 TREND MODE\nreason: {reason}\nAction: MAIN prioritized"),
        Regime::Normal => format!("📌 REGIME → NORMAL\nreason: {reason}"),
    }
}

/// Periodic status line for the reporter task.
pub fn fmt_status(
    dd: &DrawdownState,
    stats: &SimStats,
    regime: Regime,
    panic: bool,
    open_positions: usize,
    uptime_secs: u64,
    dropped_notifications: u64,
) -> String {
    let regime_line = if panic {
        format!("{regime} ⚠️")
    } else {
        regime.to_string()
    };
    format!(
        "📊 STATUS\nNAV: {:.2} USDT (peak {:.2}, dd {:.2}%)\nRegime: {regime_line}\nOpen: {open_positions}\nTrades: {} | Winrate: {:.2}% | PnL: {:+.2}\nUptime: {}h{}m | Dropped msgs: {dropped_notifications}",
        dd.nav,
        dd.peak_nav,
        dd.dd_pct * 100.0,
        stats.total_trades,
        stats.winrate_pct(),
        stats.total_pnl,
        uptime_secs / 3600,
        (uptime_secs % 3600) / 60,
    )
}
