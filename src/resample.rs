// =============================================================================
// Timeframe Resampler — per-second price/volume points into fixed candles
// =============================================================================
//
// The engine feeds one (second, mid_price, bucket_volume) point per wall-clock
// second into a resampler per active timeframe. Buckets are aligned to
// absolute multiples of the timeframe; when the bucket advances, the previous
// candle is finalised and emitted. Empty buckets (stream gaps) are skipped,
// never back-filled.
// =============================================================================

use serde::{Deserialize, Serialize};

/// A closed OHLCV candle over one timeframe bucket.
///
/// Invariants: `low <= min(open, close)`, `max(open, close) <= high`,
/// `end_ts - start_ts == tf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Bucket start, epoch seconds, aligned to the timeframe.
    pub start_ts: i64,
    /// Bucket end, exclusive: `start_ts + tf`.
    pub end_ts: i64,
}

impl Candle {
    /// Body direction: true when the candle closed above its open.
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }
}

/// Aggregates a stream of per-second points into candles of width `tf` seconds.
#[derive(Debug)]
pub struct TimeframeResampler {
    tf: i64,
    cur_start: Option<i64>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl TimeframeResampler {
    pub fn new(tf_sec: i64) -> Self {
        debug_assert!(tf_sec > 0);
        Self {
            tf: tf_sec,
            cur_start: None,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0.0,
        }
    }

    pub fn timeframe(&self) -> i64 {
        self.tf
    }

    /// Feed one point. Returns `(closed_candle, closed_flag)`; the candle is
    /// present exactly when the bucket advanced past the previous one.
    pub fn update(&mut self, sec: i64, price: f64, vol: f64) -> (Option<Candle>, bool) {
        let bucket_start = (sec / self.tf) * self.tf;

        let cur_start = match self.cur_start {
            None => {
                self.cur_start = Some(bucket_start);
                self.open = price;
                self.high = price;
                self.low = price;
                self.close = price;
                self.volume = vol;
                return (None, false);
            }
            Some(s) => s,
        };

        // Still inside the current bucket.
        if bucket_start == cur_start {
            self.close = price;
            self.high = self.high.max(price);
            self.low = self.low.min(price);
            self.volume += vol;
            return (None, false);
        }

        // Bucket advanced: finalise the previous candle, start the new one.
        let closed = Candle {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            start_ts: cur_start,
            end_ts: cur_start + self.tf,
        };

        self.cur_start = Some(bucket_start);
        self.open = price;
        self.high = price;
        self.low = price;
        self.close = price;
        self.volume = vol;

        (Some(closed), true)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn first_point_opens_bucket_without_emitting() {
        let mut rs = TimeframeResampler::new(60);
        let (c, closed) = rs.update(100, 10.0, 1.0);
        assert!(c.is_none());
        assert!(!closed);
    }

    #[test]
    fn bucket_advance_emits_previous_candle() {
        let mut rs = TimeframeResampler::new(60);
        rs.update(100, 10.0, 1.0);

        let (c, closed) = rs.update(130, 11.0, 2.0);
        assert!(closed);
        let c = c.unwrap();
        assert_eq!(c.open, 10.0);
        assert_eq!(c.high, 10.0);
        assert_eq!(c.low, 10.0);
        assert_eq!(c.close, 10.0);
        assert_eq!(c.volume, 1.0);
        assert_eq!(c.start_ts, 60);
        assert_eq!(c.end_ts, 120);

        let (c, closed) = rs.update(190, 12.0, 3.0);
        assert!(closed);
        let c = c.unwrap();
        assert_eq!(c.open, 11.0);
        assert_eq!(c.volume, 2.0);
        assert_eq!(c.start_ts, 120);
        assert_eq!(c.end_ts, 180);
    }

    #[test]
    fn same_bucket_updates_extend_high_low_and_volume() {
        let mut rs = TimeframeResampler::new(60);
        rs.update(60, 10.0, 1.0);
        rs.update(61, 12.0, 1.0);
        rs.update(62, 9.0, 1.0);
        rs.update(63, 11.0, 1.0);

        let (c, _) = rs.update(120, 11.5, 0.0);
        let c = c.unwrap();
        assert_eq!(c.open, 10.0);
        assert_eq!(c.high, 12.0);
        assert_eq!(c.low, 9.0);
        assert_eq!(c.close, 11.0);
        assert_eq!(c.volume, 4.0);
    }

    #[test]
    fn gap_over_empty_buckets_is_skipped() {
        let mut rs = TimeframeResampler::new(60);
        rs.update(0, 10.0, 1.0);
        // Jump three buckets ahead: only the bucket at 0 is emitted.
        let (c, closed) = rs.update(200, 20.0, 1.0);
        assert!(closed);
        let c = c.unwrap();
        assert_eq!(c.start_ts, 0);
        assert_eq!(c.end_ts, 60);

        // The next emission starts from the bucket containing sec 200.
        let (c, _) = rs.update(260, 21.0, 1.0);
        assert_eq!(c.unwrap().start_ts, 180);
    }

    #[test]
    fn emitted_candles_satisfy_invariants_for_random_streams() {
        let mut rng = StdRng::seed_from_u64(7);
        let tf = 60;
        let mut rs = TimeframeResampler::new(tf);
        let mut sec: i64 = 1_000;

        for _ in 0..5_000 {
            sec += rng.gen_range(0..90);
            let price = rng.gen_range(50.0..150.0);
            let vol = rng.gen_range(0.0..10.0);

            let (c, closed) = rs.update(sec, price, vol);
            assert_eq!(c.is_some(), closed);
            if let Some(c) = c {
                assert!(c.low <= c.open.min(c.close), "{c:?}");
                assert!(c.open.max(c.close) <= c.high, "{c:?}");
                assert_eq!(c.end_ts - c.start_ts, tf, "{c:?}");
                assert_eq!(c.start_ts % tf, 0, "{c:?}");
                assert!(c.volume >= 0.0);
            }
        }
    }

    #[test]
    fn emission_order_is_monotone() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut rs = TimeframeResampler::new(300);
        let mut sec: i64 = 0;
        let mut last_start = i64::MIN;

        for _ in 0..2_000 {
            sec += rng.gen_range(1..400);
            let (c, _) = rs.update(sec, 100.0 + rng.gen_range(-5.0..5.0), 1.0);
            if let Some(c) = c {
                assert!(c.start_ts > last_start);
                last_start = c.start_ts;
            }
        }
    }
}
