// =============================================================================
// Market Regime Engine — proxy-driven global market state
// =============================================================================
//
// Classifies the whole market from the 1h and 4h candles of two fixed proxy
// symbols (BTC + ETH perp). The label gates every per-symbol decision:
//
//   PANIC     1h ATR5/ATR20 blow-out or a dump bar on either proxy
//   RECOVERY  volatility cooled off after PANIC and both proxies printed green
//   RANGE     low 4h ATR% and compressed 4h EMA gap
//   TREND     wide 4h EMA gap with both proxies agreeing on direction
//   NORMAL    everything else (and the fallback when proxy data is missing)
//
// Non-PANIC label changes respect a minimum hold window; PANIC preempts
// immediately.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RegimeConfig;
use crate::indicators::{atr_pct, ema_last};
use crate::resample::Candle;

/// Global market regime label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Normal,
    Trend,
    Range,
    Panic,
    Recovery,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Trend => write!(f, "TREND"),
            Self::Range => write!(f, "RANGE"),
            Self::Panic => write!(f, "PANIC"),
            Self::Recovery => write!(f, "RECOVERY"),
        }
    }
}

impl Regime {
    /// Baseline risk gate carried by each regime label.
    pub fn risk_mult(self) -> f64 {
        match self {
            Self::Panic => 0.0,
            Self::Recovery => 0.5,
            Self::Range => 0.7,
            Self::Trend | Self::Normal => 1.0,
        }
    }
}

/// Output of one regime evaluation.
#[derive(Debug, Clone)]
pub struct RegimeResult {
    pub regime: Regime,
    pub panic: bool,
    pub risk_mult: f64,
    pub reason: String,
}

/// One proxy's candle views for an evaluation tick.
#[derive(Debug, Clone, Copy)]
pub struct ProxyCandles<'a> {
    pub symbol: &'a str,
    pub h1: &'a [Candle],
    pub h4: &'a [Candle],
}

/// Stateful regime classifier. Owned by the trade-reader task; updated on
/// each proxy 1h candle close.
pub struct RegimeEngine {
    cfg: RegimeConfig,
    regime: Regime,
    panic: bool,
    last_reason: String,
    /// Epoch seconds of the last accepted label change.
    last_change_ts: f64,
}

/// 1h candles needed before the panic checks are meaningful (ATR20 + seed).
const MIN_H1_CANDLES: usize = 22;

impl RegimeEngine {
    pub fn new(cfg: RegimeConfig) -> Self {
        Self {
            cfg,
            regime: Regime::Normal,
            panic: false,
            last_reason: "init".to_string(),
            last_change_ts: 0.0,
        }
    }

    pub fn current(&self) -> (Regime, bool) {
        (self.regime, self.panic)
    }

    pub fn last_reason(&self) -> &str {
        &self.last_reason
    }

    /// Re-evaluate the regime. `now` is epoch seconds; `proxies` must carry
    /// both proxy symbols' candle views.
    pub fn update(&mut self, now: f64, proxies: &[ProxyCandles<'_>]) -> RegimeResult {
        // Without warm proxies there is nothing to classify; stay NORMAL so
        // symbols are not blocked on missing reference data.
        if proxies.len() < 2 || proxies.iter().any(|p| p.h1.len() < MIN_H1_CANDLES) {
            self.regime = Regime::Normal;
            self.panic = false;
            self.last_reason = "missing proxies data".to_string();
            return self.result();
        }

        // --- Panic inputs (1h): ATR blow-out ratio + dump bars ---------------
        let mut atr_ratio = 0.0_f64;
        let mut dump = false;
        for p in proxies {
            if let (Some(a5), Some(a20)) = (atr_pct(p.h1, 5), atr_pct(p.h1, 20)) {
                if a20 > 0.0 {
                    debug!(proxy = p.symbol, ratio = a5 / a20, "1h ATR ratio");
                    atr_ratio = atr_ratio.max(a5 / a20);
                }
            }
            if let Some(last) = p.h1.last() {
                if last.open != 0.0
                    && (last.close - last.open) / last.open <= -self.cfg.panic_drop_pct
                {
                    dump = true;
                }
            }
        }

        let panic_now = atr_ratio >= self.cfg.panic_atr_ratio || dump;

        // --- PANIC -> RECOVERY hand-over -------------------------------------
        if self.regime == Regime::Panic {
            let green_ok = proxies
                .iter()
                .all(|p| p.h1.last().map(Candle::is_green).unwrap_or(false));
            if atr_ratio > 0.0 && atr_ratio <= self.cfg.recovery_atr_ratio && green_ok {
                let reason = format!("recovery: atr_ratio={atr_ratio:.2}, green_ok=true");
                return self.transition(now, Regime::Recovery, false, reason);
            }
        }

        if panic_now {
            let reason = format!("panic: atr_ratio={atr_ratio:.2}, dump={dump}");
            return self.transition(now, Regime::Panic, true, reason);
        }

        // --- TREND / RANGE inputs (4h) ---------------------------------------
        let fast = self.cfg.trend_ema_fast;
        let slow = self.cfg.trend_ema_slow;
        let mut gaps = Vec::new();
        let mut dirs = Vec::new();
        let mut atr4s = Vec::new();
        for p in proxies {
            if let Some((gap, up)) = ema_gap_and_dir(p.h4, fast, slow) {
                gaps.push(gap);
                dirs.push(up);
            }
            if let Some(a4) = atr_pct(p.h4, 14) {
                atr4s.push(a4);
            }
        }

        let gap_avg = mean(&gaps);
        let atr4_avg = mean(&atr4s);
        let same_dir = !dirs.is_empty() && dirs.iter().all(|&d| d == dirs[0]);

        if atr4_avg > 0.0 && atr4_avg <= self.cfg.range_atr_max && gap_avg <= self.cfg.range_gap_max
        {
            let reason = format!("range: atr4%={atr4_avg:.4}, gap={gap_avg:.4}");
            return self.transition(now, Regime::Range, false, reason);
        }

        if gap_avg >= self.cfg.trend_gap_min && same_dir {
            let dir = if dirs[0] { "UP" } else { "DOWN" };
            let reason = format!("trend: dir={dir}, gap={gap_avg:.4}");
            return self.transition(now, Regime::Trend, false, reason);
        }

        let reason = format!("normal: atr_ratio={atr_ratio:.2}, gap={gap_avg:.4}");
        self.transition(now, Regime::Normal, false, reason)
    }

    /// Apply a candidate label. Non-PANIC changes are held back until the
    /// minimum hold window since the previous change has elapsed.
    fn transition(
        &mut self,
        now: f64,
        candidate: Regime,
        panic: bool,
        reason: String,
    ) -> RegimeResult {
        if candidate == self.regime {
            self.panic = panic;
            self.last_reason = reason;
            return self.result();
        }

        let held = candidate != Regime::Panic
            && now - self.last_change_ts < self.cfg.min_hold_sec;
        if held {
            debug!(
                current = %self.regime,
                candidate = %candidate,
                "regime change suppressed by min-hold window"
            );
            return self.result();
        }

        self.regime = candidate;
        self.panic = panic;
        self.last_reason = reason;
        self.last_change_ts = now;
        self.result()
    }

    fn result(&self) -> RegimeResult {
        RegimeResult {
            regime: self.regime,
            panic: self.panic,
            risk_mult: self.regime.risk_mult(),
            reason: self.last_reason.clone(),
        }
    }
}

/// EMA gap and direction over the trailing `slow` closes of a 4h series.
/// Returns `(gap, up)` or `None` when the series is too short.
fn ema_gap_and_dir(candles: &[Candle], fast: usize, slow: usize) -> Option<(f64, bool)> {
    if candles.len() < slow {
        return None;
    }
    let closes: Vec<f64> = candles[candles.len() - slow..].iter().map(|c| c.close).collect();
    let ef = ema_last(&closes, fast)?;
    let es = ema_last(&closes, slow)?;
    if es == 0.0 {
        return None;
    }
    Some(((ef - es).abs() / es, ef > es))
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}
