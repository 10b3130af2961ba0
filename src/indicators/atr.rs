// =============================================================================
// Average True Range — Wilder smoothing, streaming form
// =============================================================================
//
// True Range per bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)   (H - L on the first bar)
//
// During warmup the TR values are summed; at the `period`-th bar the ATR is
// seeded with their mean, after which
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period

use crate::resample::Candle;

/// Streaming Wilder ATR accumulator.
#[derive(Debug, Clone)]
pub struct WilderAtr {
    period: usize,
    value: Option<f64>,
    prev_close: Option<f64>,
    warm: usize,
    sum_tr: f64,
}

impl WilderAtr {
    pub fn new(period: usize) -> Self {
        debug_assert!(period > 0);
        Self {
            period,
            value: None,
            prev_close: None,
            warm: 0,
            sum_tr: 0.0,
        }
    }

    /// Feed one bar. Returns `None` until `period` bars have been seen.
    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = match self.prev_close {
            None => high - low,
            Some(pc) => (high - low).max((high - pc).abs()).max((low - pc).abs()),
        };

        // prev_close advances every call, warmup included.
        self.prev_close = Some(close);

        if self.warm < self.period {
            self.sum_tr += tr;
            self.warm += 1;
            if self.warm == self.period {
                self.value = Some(self.sum_tr / self.period as f64);
            }
            return self.value;
        }

        if let Some(prev) = self.value {
            let v = (prev * (self.period as f64 - 1.0) + tr) / self.period as f64;
            self.value = Some(v);
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// ATR over a candle slice. Returns `None` with fewer than `period` candles.
pub fn atr_last(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let mut atr = WilderAtr::new(period);
    let mut v = None;
    for c in candles {
        v = atr.update(c.high, c.low, c.close);
    }
    v
}

/// ATR as a fraction of the latest close. Requires `period + 2` candles so
/// the smoothing has moved past its seed, mirroring the regime engine's use.
pub fn atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period + 2 {
        return None;
    }
    let atr = atr_last(candles, period)?;
    let last_close = candles.last()?.close;
    if last_close == 0.0 {
        return None;
    }
    Some(atr / last_close)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

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
    fn seed_and_wilder_step() {
        // Bars engineered so TR = [2, 3, 4, 5] with period 3:
        // seed after bar 3 = (2+3+4)/3 = 3.0, then (3*2 + 5)/3 = 11/3.
        let mut atr = WilderAtr::new(3);
        assert_eq!(atr.update(102.0, 100.0, 101.0), None); // TR = 2 (first bar H-L)
        assert_eq!(atr.update(103.0, 100.0, 101.0), None); // TR = 3
        let seeded = atr.update(104.0, 100.0, 101.0).unwrap(); // TR = 4
        assert!((seeded - 3.0).abs() < 1e-12);
        let next = atr.update(105.0, 100.0, 101.0).unwrap(); // TR = 5
        assert!((next - 11.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn gap_bars_use_prev_close() {
        let mut atr = WilderAtr::new(2);
        atr.update(105.0, 95.0, 95.0); // TR = 10, close at low
        // Gap up: |115 - 95| = 20 dominates the 7-point bar range.
        let v = atr.update(115.0, 108.0, 112.0).unwrap();
        assert!((v - 15.0).abs() < 1e-12); // (10 + 20) / 2
    }

    #[test]
    fn prev_close_advances_during_warmup() {
        // Second bar's TR must consider prev_close = 100, not just the range.
        let mut atr = WilderAtr::new(3);
        atr.update(101.0, 99.0, 100.0); // TR = 2
        atr.update(110.5, 110.0, 110.2); // TR = |110.5 - 100| = 10.5
        atr.update(110.4, 110.0, 110.1); // TR = 0.4
        let seeded = atr.value().unwrap();
        assert!((seeded - (2.0 + 10.5 + 0.4) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn deterministic_across_instances() {
        let candles: Vec<Candle> = (0..80)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.3).sin() * 8.0;
                candle(base, base + 2.0, base - 2.0, base + 0.5)
            })
            .collect();
        let mut a = WilderAtr::new(14);
        let mut b = WilderAtr::new(14);
        for c in &candles {
            assert_eq!(
                a.update(c.high, c.low, c.close),
                b.update(c.high, c.low, c.close)
            );
        }
    }

    #[test]
    fn atr_last_insufficient_data() {
        let candles = vec![candle(100.0, 101.0, 99.0, 100.0); 5];
        assert!(atr_last(&candles, 14).is_none());
        assert!(atr_last(&candles, 0).is_none());
    }

    #[test]
    fn atr_pct_relative_to_close() {
        let candles: Vec<Candle> = (0..30)
            .map(|_| candle(100.0, 101.0, 99.0, 100.0))
            .collect();
        let pct = atr_pct(&candles, 14).unwrap();
        assert!((pct - 0.02).abs() < 1e-9, "got {pct}");
        // Short slice obeys the period + 2 floor.
        assert!(atr_pct(&candles[..15], 14).is_none());
    }
}
