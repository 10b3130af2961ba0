// =============================================================================
// Indicators Module
// =============================================================================
//
// Streaming accumulators (EMA, Wilder ATR) plus stateless candle functions
// used by the signal scorer and the regime engine. Streaming indicators return
// `Option<f64>` until they have seen enough data; callers must handle the
// warmup phase explicitly.

pub mod atr;
pub mod ema;

pub use atr::{atr_last, atr_pct, WilderAtr};
pub use ema::{ema_last, Ema};

use crate::resample::Candle;

/// Total wick length relative to the candle range.
///
/// `((H - max(O,C)) + (min(O,C) - L)) / max(H - L, eps)`, each wick clamped
/// at zero. Result is in `[0, 1]` for any candle with `H > L`.
pub fn wick_ratio(c: &Candle) -> f64 {
    let range = (c.high - c.low).max(1e-12);
    let body_top = c.open.max(c.close);
    let body_bot = c.open.min(c.close);

    let upper = (c.high - body_top).max(0.0);
    let lower = (body_bot - c.low).max(0.0);
    (upper + lower) / range
}

/// Absolute body size relative to the open: `|C - O| / O` (0 when `O == 0`).
pub fn momentum(c: &Candle) -> f64 {
    if c.open == 0.0 {
        return 0.0;
    }
    (c.close - c.open).abs() / c.open
}

/// Result of the short-vs-long ATR compression check.
#[derive(Debug, Clone, Copy)]
pub struct AtrCompression {
    /// True when short ATR sits below `ratio_max * long ATR`.
    pub squeeze_ok: bool,
    /// Short ATR as a fraction of the latest close.
    pub atr_short_pct: f64,
    /// Long ATR as a fraction of the latest close.
    pub atr_long_pct: f64,
    /// `atr_short / atr_long`.
    pub ratio: f64,
}

/// Compare a short-period ATR against a long-period ATR over the trailing
/// `long + 2` candles. Returns `None` when there is not enough history or a
/// denominator is degenerate.
pub fn atr_compression(
    candles: &[Candle],
    short: usize,
    long: usize,
    ratio_max: f64,
) -> Option<AtrCompression> {
    if candles.len() < long + 2 {
        return None;
    }

    let window = &candles[candles.len() - (long + 2)..];
    let last_close = window.last()?.close;

    let mut atr_s = WilderAtr::new(short);
    let mut atr_l = WilderAtr::new(long);
    let mut a_s = None;
    let mut a_l = None;
    for c in window {
        a_s = atr_s.update(c.high, c.low, c.close);
        a_l = atr_l.update(c.high, c.low, c.close);
    }

    let (a_s, a_l) = (a_s?, a_l?);
    if a_l == 0.0 || last_close == 0.0 {
        return None;
    }

    Some(AtrCompression {
        squeeze_ok: a_s < ratio_max * a_l,
        atr_short_pct: a_s / last_close,
        atr_long_pct: a_l / last_close,
        ratio: a_s / a_l,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open,
            high,
            low,
            close,
            volume: 1.0,
            start_ts: 0,
            end_ts: 60,
        }
    }

    #[test]
    fn wick_ratio_full_body_is_zero() {
        // Marubozu: open at low, close at high.
        let c = candle(10.0, 12.0, 10.0, 12.0);
        assert_eq!(wick_ratio(&c), 0.0);
    }

    #[test]
    fn wick_ratio_doji_approaches_one() {
        // Open == close at mid-range: the whole range is wick.
        let c = candle(11.0, 12.0, 10.0, 11.0);
        assert!((wick_ratio(&c) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn wick_ratio_bounded_for_random_candles() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            let a = rng.gen_range(1.0..100.0);
            let b = rng.gen_range(1.0..100.0);
            let (body_bot, body_top) = if a < b { (a, b) } else { (b, a) };
            let high = body_top + rng.gen_range(0.0..10.0);
            let low = body_bot - rng.gen_range(0.0..10.0);
            if high <= low {
                continue;
            }
            let c = candle(a, high, low, b);
            let w = wick_ratio(&c);
            assert!((0.0..=1.0).contains(&w), "wick {w} for {c:?}");
        }
    }

    #[test]
    fn momentum_basic() {
        assert!((momentum(&candle(100.0, 103.0, 99.0, 102.0)) - 0.02).abs() < 1e-12);
        assert!((momentum(&candle(100.0, 101.0, 97.0, 98.0)) - 0.02).abs() < 1e-12);
        assert_eq!(momentum(&candle(0.0, 1.0, 0.0, 1.0)), 0.0);
    }

    #[test]
    fn compression_requires_long_plus_two_candles() {
        let candles: Vec<Candle> = (0..21).map(|_| candle(100.0, 101.0, 99.0, 100.0)).collect();
        assert!(atr_compression(&candles, 5, 20, 0.8).is_none());

        let candles: Vec<Candle> = (0..22).map(|_| candle(100.0, 101.0, 99.0, 100.0)).collect();
        assert!(atr_compression(&candles, 5, 20, 0.8).is_some());
    }

    #[test]
    fn compression_detects_shrinking_ranges() {
        // Ranges decay: recent volatility well below the long average.
        let mut candles = Vec::new();
        for i in 0..30 {
            let spread = (4.0 - i as f64 * 0.12).max(0.3);
            candles.push(candle(100.0, 100.0 + spread, 100.0 - spread, 100.0));
        }
        let comp = atr_compression(&candles, 5, 20, 0.8).unwrap();
        assert!(comp.squeeze_ok, "ratio {}", comp.ratio);
        assert!(comp.ratio < 0.8);
        assert!(comp.atr_short_pct < comp.atr_long_pct);
    }

    #[test]
    fn compression_flat_when_ranges_expand() {
        let mut candles = Vec::new();
        for i in 0..30 {
            let spread = 0.3 + i as f64 * 0.2;
            candles.push(candle(100.0, 100.0 + spread, 100.0 - spread, 100.0));
        }
        let comp = atr_compression(&candles, 5, 20, 0.8).unwrap();
        assert!(!comp.squeeze_ok);
        assert!(comp.ratio > 1.0);
    }
}
