// =============================================================================
// Polaris Perp Engine — Main Entry Point
// =============================================================================
//
// Real-time market-signal and paper-trading engine for perpetual-futures
// symbols. No real orders are ever placed: fills are simulated against closed
// candles and tracked through a single NAV.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod config;
mod decision;
mod drawdown;
mod engine;
mod feed;
mod indicators;
mod notify;
mod portfolio;
mod regime;
mod resample;
mod risk;
mod scoring;
mod sim;
mod types;
mod util;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::engine::{Engine, EngineStatus, StatusCell};
use crate::feed::BookMap;
use crate::notify::Notifier;
use crate::util::backoff_secs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║          Polaris Perp Engine — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // Configuration errors are fatal: better to die loudly at startup than
    // trade with half-parsed thresholds.
    let cfg = Arc::new(Config::from_env()?);

    info!(
        symbols = cfg.symbols.len(),
        proxies = ?cfg.proxy_symbols,
        tf_early = cfg.tf_early_sec,
        tf_main = cfg.tf_main_sec,
        early_enabled = cfg.signal.enable_early,
        nav = cfg.sim.start_nav_usd,
        "configuration loaded"
    );

    // ── 2. Shared state ──────────────────────────────────────────────────
    let books: BookMap = Arc::new(RwLock::new(HashMap::new()));
    let status: StatusCell = Arc::new(RwLock::new(EngineStatus::initial(cfg.sim.start_nav_usd)));

    // ── 3. Notification worker ───────────────────────────────────────────
    let (notifier, notify_rx) = Notifier::new(cfg.notify.queue_capacity);
    tokio::spawn(notify::run_notify_worker(notify_rx, cfg.notify.clone()));

    notifier.send(notify::fmt_startup(
        cfg.symbols.len(),
        cfg.sim.start_nav_usd,
        cfg.signal.enable_early,
    ));

    // ── 4. Book-ticker reader ────────────────────────────────────────────
    {
        let cfg = cfg.clone();
        let books = books.clone();
        tokio::spawn(async move {
            let mut attempts: u32 = 0;
            loop {
                match feed::run_book_stream(&cfg.ws_base_url, &cfg.symbols, &books).await {
                    Ok(()) => attempts = 0,
                    Err(e) => {
                        attempts += 1;
                        error!(error = %e, attempts, "bookTicker stream failed");
                    }
                }
                let delay = backoff_secs(attempts);
                warn!(delay_secs = delay, "reconnecting bookTicker stream");
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
            }
        });
    }

    // ── 5. Trade reader: the single writer for all decision state ────────
    {
        let cfg = cfg.clone();
        let books = books.clone();
        let notifier = notifier.clone();
        let status = status.clone();
        tokio::spawn(async move {
            let mut engine = Engine::new(cfg.clone(), books, notifier, status);
            let mut attempts: u32 = 0;
            loop {
                let result = feed::run_trade_stream(&cfg.ws_base_url, &cfg.symbols, |ev| {
                    engine.on_trade(ev)
                })
                .await;

                match result {
                    Ok(()) => attempts = 0,
                    Err(e) => {
                        attempts += 1;
                        error!(error = %e, attempts, "aggTrade stream failed");
                    }
                }
                // Per-symbol state survives the reconnect; lost in-flight
                // events are not recovered.
                let delay = backoff_secs(attempts);
                warn!(delay_secs = delay, "reconnecting aggTrade stream");
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
            }
        });
    }

    // ── 6. Periodic reporter ─────────────────────────────────────────────
    {
        let cfg = cfg.clone();
        let notifier = notifier.clone();
        let status = status.clone();
        let started = std::time::Instant::now();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                cfg.sim.report_interval_sec.max(1),
            ));
            interval.tick().await; // skip the immediate first tick
            loop {
                interval.tick().await;
                let snapshot = *status.read();
                notifier.send(notify::fmt_status(
                    &snapshot.dd,
                    &snapshot.stats,
                    snapshot.regime,
                    snapshot.panic,
                    snapshot.open_positions,
                    started.elapsed().as_secs(),
                    notifier.dropped(),
                ));
            }
        });
    }

    info!("all tasks running, press Ctrl+C to stop");

    // ── 7. Shutdown ──────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping");

    // Give the notification worker a bounded moment to drain.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    info!("Polaris Perp Engine shut down complete");
    Ok(())
}
