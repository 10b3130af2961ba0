// =============================================================================
// Signal Scorer — multi-factor candle filter
// =============================================================================
//
// Evaluates a closed candle against its history and produces a point score
// plus a named map of sub-checks. The scorer does not accept or reject by
// itself; the decision engine applies regime-aware thresholds on top.
//
// Check stack (points):
//   close gap        2
//   volume spike     3   (mandatory: failure short-circuits to score 0)
//   wick             2
//   momentum         2
//   ATR squeeze      2   (main mode only, when compression is enabled)
//   breakout-20      3
//   spread           1
// =============================================================================

use crate::config::SignalConfig;
use crate::indicators::{atr_compression, momentum, wick_ratio};
use crate::resample::Candle;
use crate::types::{Direction, Mode};

/// Minimum candle history before the scorer produces anything.
pub const MIN_CANDLES: usize = 30;
/// Breakout lookback: prior candles compared against the latest close.
const BREAKOUT_LOOKBACK: usize = 20;

/// Score plus the named sub-checks that produced it.
#[derive(Debug, Clone)]
pub struct SignalScore {
    pub direction: Direction,
    pub score: u32,
    pub ema_gap: f64,
    pub ema_gap_ok: bool,
    pub volume_ratio: f64,
    pub volume_ok: bool,
    pub wick_ok: bool,
    pub momentum_ok: bool,
    /// Present only when the compression check ran (main mode, enabled, data).
    pub atr_squeeze: Option<bool>,
    pub atr_short_pct: Option<f64>,
    pub atr_long_pct: Option<f64>,
    pub squeeze_ratio: Option<f64>,
    pub breakout_highlow: bool,
    pub spread: f64,
    pub spread_ok: bool,
}

impl SignalScore {
    fn rejected(direction: Direction, ema_gap: f64, volume_ratio: f64, spread: f64) -> Self {
        Self {
            direction,
            score: 0,
            ema_gap,
            ema_gap_ok: false,
            volume_ratio,
            volume_ok: false,
            wick_ok: false,
            momentum_ok: false,
            atr_squeeze: None,
            atr_short_pct: None,
            atr_long_pct: None,
            squeeze_ratio: None,
            breakout_highlow: false,
            spread,
            spread_ok: false,
        }
    }
}

/// Score the latest closed candle. `candles` and `volumes` are oldest-first;
/// the last entries belong to the candle being scored. Returns `None` when
/// the history is too short to evaluate.
pub fn evaluate(
    candles: &[Candle],
    volumes: &[f64],
    spread: f64,
    mode: Mode,
    cfg: &SignalConfig,
) -> Option<SignalScore> {
    if candles.len() < MIN_CANDLES || volumes.len() < cfg.volume_sma_len {
        return None;
    }

    let th = cfg.thresholds(mode);
    let last = &candles[candles.len() - 1];
    let prev = &candles[candles.len() - 2];

    let direction = if last.is_green() {
        Direction::Long
    } else {
        Direction::Short
    };

    // Close-to-close gap.
    let ema_gap = if prev.close != 0.0 {
        (last.close - prev.close).abs() / prev.close
    } else {
        0.0
    };
    let ema_gap_ok = ema_gap >= th.ema_gap;

    // Volume spike is mandatory: without participation nothing else counts.
    let sma_window = &volumes[volumes.len() - cfg.volume_sma_len..];
    let vol_sma = sma_window.iter().sum::<f64>() / cfg.volume_sma_len as f64;
    let volume_ratio = if vol_sma > 0.0 {
        volumes[volumes.len() - 1] / vol_sma
    } else {
        0.0
    };
    if volume_ratio < th.vol_ratio {
        return Some(SignalScore::rejected(direction, ema_gap, volume_ratio, spread));
    }

    let mut score = 3u32; // volume spike
    if ema_gap_ok {
        score += 2;
    }

    let wick_ok = !cfg.enable_wick_filter || wick_ratio(last) <= th.wick_max;
    if wick_ok {
        score += 2;
    }

    let momentum_ok = !cfg.enable_momentum || momentum(last) >= th.mom_min;
    if momentum_ok {
        score += 2;
    }

    // ATR compression only contributes on the main timeframe.
    let mut atr_squeeze = None;
    let mut atr_short_pct = None;
    let mut atr_long_pct = None;
    let mut squeeze_ratio = None;
    if mode == Mode::Main && cfg.enable_atr_compression {
        if let Some(comp) =
            atr_compression(candles, cfg.atr_short, cfg.atr_long, cfg.atr_compression_ratio)
        {
            atr_squeeze = Some(comp.squeeze_ok);
            atr_short_pct = Some(comp.atr_short_pct);
            atr_long_pct = Some(comp.atr_long_pct);
            squeeze_ratio = Some(comp.ratio);
            if comp.squeeze_ok {
                score += 2;
            }
        }
    }

    // Breakout over the prior 20 candles, strict inequalities.
    let window = &candles[candles.len() - 1 - BREAKOUT_LOOKBACK..candles.len() - 1];
    let prior_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let prior_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let breakout_highlow = last.close > prior_high || last.close < prior_low;
    if breakout_highlow {
        score += 3;
    }

    let spread_ok = spread <= th.spread_max;
    if spread_ok {
        score += 1;
    }

    Some(SignalScore {
        direction,
        score,
        ema_gap,
        ema_gap_ok,
        volume_ratio,
        volume_ok: true,
        wick_ok,
        momentum_ok,
        atr_squeeze,
        atr_short_pct,
        atr_long_pct,
        squeeze_ratio,
        breakout_highlow,
        spread,
        spread_ok,
    })
}

/// Liquidity gate: average traded USD volume must clear the floor.
/// A zero floor disables the gate.
pub fn liquidity_ok(avg_volume_usd: f64, min_required_usd: f64) -> bool {
    if min_required_usd <= 0.0 {
        return true;
    }
    avg_volume_usd >= min_required_usd
}
