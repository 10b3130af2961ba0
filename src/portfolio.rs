// =============================================================================
// Portfolio Gatekeeper — position registry with risk and correlation limits
// =============================================================================
//
// Owns the live position records and answers `can_open` against three caps:
//   - one position per symbol, `max_positions` overall
//   - aggregate risk_usd below a percent-of-NAV (or absolute USD) limit
//   - pairwise return correlation against every held position
//
// Correlation follows a don't-know-don't-block policy: unset limit, short
// histories or degenerate series never reject a candidate.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PortfolioConfig;
use crate::types::Direction;
use crate::util::now_ts;

/// Minimum price points before the correlation filter engages.
const MIN_CORR_POINTS: usize = 20;
/// Bound on each position's rolling price history.
const PRICE_HISTORY_CAP: usize = 120;

/// A live position as tracked by the gatekeeper.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub qty: f64,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub risk_usd: f64,
    pub rr: f64,
    /// Epoch seconds.
    pub opened_at: f64,
    /// Rolling closes for the correlation filter, oldest first.
    pub price_history: VecDeque<f64>,
}

/// Thread-unsafe by design: owned and mutated only by the trade-reader task.
pub struct PositionManager {
    nav_usd: f64,
    max_positions: usize,
    max_total_risk_pct: Option<f64>,
    max_total_risk_usd: Option<f64>,
    max_correlation: Option<f64>,
    positions: HashMap<String, Position>,
}

impl PositionManager {
    pub fn new(cfg: &PortfolioConfig, nav_usd: f64) -> Self {
        Self {
            nav_usd,
            max_positions: cfg.max_positions,
            max_total_risk_pct: cfg.max_total_risk_pct,
            max_total_risk_usd: cfg.max_total_risk_usd,
            max_correlation: cfg.max_correlation,
            positions: HashMap::new(),
        }
    }

    // ── NAV / limits ─────────────────────────────────────────────────────

    pub fn update_nav(&mut self, nav_usd: f64) {
        self.nav_usd = nav_usd;
    }

    pub fn total_risk_usd(&self) -> f64 {
        self.positions.values().map(|p| p.risk_usd).sum()
    }

    /// The active aggregate-risk limit, if any. The percent-of-NAV cap wins
    /// over the absolute cap when both are configured.
    pub fn risk_limit_usd(&self) -> Option<f64> {
        if let Some(pct) = self.max_total_risk_pct {
            if self.nav_usd > 0.0 {
                return Some(self.nav_usd * pct / 100.0);
            }
        }
        self.max_total_risk_usd
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    // ── Gatekeeping ──────────────────────────────────────────────────────

    /// Check whether a new position may be opened. Returns `(allowed,
    /// reason)`; the reason is `"ok"` on success.
    pub fn can_open(
        &self,
        symbol: &str,
        risk_usd: f64,
        recent_prices: &[f64],
    ) -> (bool, String) {
        if self.has_position(symbol) {
            return (false, "position_exists".to_string());
        }

        if self.positions.len() >= self.max_positions {
            return (false, "max_positions_reached".to_string());
        }

        if let Some(limit) = self.risk_limit_usd() {
            if self.total_risk_usd() + risk_usd > limit {
                return (false, "max_total_risk_reached".to_string());
            }
        }

        if let Some(max_corr) = self.max_correlation {
            if recent_prices.len() >= MIN_CORR_POINTS {
                for p in self.positions.values() {
                    if p.price_history.len() < MIN_CORR_POINTS {
                        continue;
                    }
                    let held: Vec<f64> = p.price_history.iter().copied().collect();
                    let c = correlation(recent_prices, &held);
                    if c >= max_corr {
                        return (false, format!("correlation_block({},{c:.2})", p.symbol));
                    }
                }
            }
        }

        (true, "ok".to_string())
    }

    // ── Open / close ─────────────────────────────────────────────────────

    /// Register a new position and return its id. Callers must have passed
    /// `can_open` first; an existing entry for the symbol is replaced.
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &mut self,
        symbol: &str,
        direction: Direction,
        qty: f64,
        entry: f64,
        sl: f64,
        tp: f64,
        risk_usd: f64,
        rr: f64,
        price_history: &[f64],
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let mut history: VecDeque<f64> = price_history.iter().copied().collect();
        while history.len() > PRICE_HISTORY_CAP {
            history.pop_front();
        }

        info!(
            id = %id,
            symbol,
            direction = %direction,
            qty,
            entry,
            sl,
            tp,
            risk_usd,
            rr,
            total_risk_usd = self.total_risk_usd() + risk_usd,
            "position registered"
        );

        self.positions.insert(
            symbol.to_string(),
            Position {
                id: id.clone(),
                symbol: symbol.to_string(),
                direction,
                qty,
                entry,
                sl,
                tp,
                risk_usd,
                rr,
                opened_at: now_ts(),
                price_history: history,
            },
        );
        id
    }

    pub fn close_position(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    /// Append a price point to a held position's rolling history.
    pub fn record_price(&mut self, symbol: &str, price: f64) {
        if let Some(p) = self.positions.get_mut(symbol) {
            p.price_history.push_back(price);
            while p.price_history.len() > PRICE_HISTORY_CAP {
                p.price_history.pop_front();
            }
        } else {
            debug!(symbol, "price recorded for unknown position");
        }
    }
}

// -----------------------------------------------------------------------------
// Correlation of simple returns
// -----------------------------------------------------------------------------

/// Per-step simple returns of a price series.
fn returns_from_prices(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Pearson correlation between the return series of two price histories,
/// aligned on their common suffix. Returns 0.0 when either side is too short
/// or has zero variance, so callers never block on unknowns.
pub fn correlation(prices_a: &[f64], prices_b: &[f64]) -> f64 {
    let ra = returns_from_prices(prices_a);
    let rb = returns_from_prices(prices_b);
    if ra.len() < 5 || rb.len() < 5 {
        return 0.0;
    }

    let n = ra.len().min(rb.len());
    let ra = &ra[ra.len() - n..];
    let rb = &rb[rb.len() - n..];

    let mean_a = ra.iter().sum::<f64>() / n as f64;
    let mean_b = rb.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = ra[i] - mean_a;
        let db = rb[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn manager(nav: f64) -> PositionManager {
        let cfg = Config::from_env().unwrap().portfolio;
        PositionManager::new(&cfg, nav)
    }

    fn open(pm: &mut PositionManager, symbol: &str, risk_usd: f64, history: &[f64]) {
        pm.open_position(
            symbol,
            Direction::Long,
            1.0,
            100.0,
            98.0,
            104.0,
            risk_usd,
            2.0,
            history,
        );
    }

    #[test]
    fn aggregate_risk_cap_on_nav() {
        // NAV 10k, cap 3% => 300 USD total risk.
        let mut pm = manager(10_000.0);
        open(&mut pm, "AAAUSDT", 100.0, &[]);
        open(&mut pm, "BBBUSDT", 100.0, &[]);

        let (ok, reason) = pm.can_open("CCCUSDT", 120.0, &[]);
        assert!(!ok);
        assert_eq!(reason, "max_total_risk_reached");

        let (ok, reason) = pm.can_open("CCCUSDT", 80.0, &[]);
        assert!(ok, "{reason}");
        open(&mut pm, "CCCUSDT", 80.0, &[]);
        assert!(pm.total_risk_usd() <= pm.risk_limit_usd().unwrap());
    }

    #[test]
    fn duplicate_symbol_rejected() {
        let mut pm = manager(10_000.0);
        open(&mut pm, "AAAUSDT", 10.0, &[]);
        let (ok, reason) = pm.can_open("AAAUSDT", 10.0, &[]);
        assert!(!ok);
        assert_eq!(reason, "position_exists");
    }

    #[test]
    fn position_count_cap() {
        let cfg = {
            let mut c = Config::from_env().unwrap().portfolio;
            c.max_positions = 2;
            c
        };
        let mut pm = PositionManager::new(&cfg, 1_000_000.0);
        open(&mut pm, "AAAUSDT", 1.0, &[]);
        open(&mut pm, "BBBUSDT", 1.0, &[]);
        let (ok, reason) = pm.can_open("CCCUSDT", 1.0, &[]);
        assert!(!ok);
        assert_eq!(reason, "max_positions_reached");
    }

    #[test]
    fn close_frees_risk_budget() {
        let mut pm = manager(10_000.0);
        open(&mut pm, "AAAUSDT", 300.0, &[]);
        assert!(!pm.can_open("BBBUSDT", 10.0, &[]).0);

        let closed = pm.close_position("AAAUSDT").unwrap();
        assert_eq!(closed.symbol, "AAAUSDT");
        assert_eq!(pm.total_risk_usd(), 0.0);
        assert!(pm.can_open("BBBUSDT", 10.0, &[]).0);
    }

    #[test]
    fn correlated_candidate_is_blocked() {
        let mut pm = manager(1_000_000.0);
        // A noisy but shared walk: candidate is a scaled copy of the held
        // series, so return correlation is exactly 1.
        let held: Vec<f64> = (0..40)
            .map(|i| 100.0 + (i as f64 * 0.9).sin() * 3.0 + i as f64 * 0.1)
            .collect();
        let candidate: Vec<f64> = held.iter().map(|p| p * 2.0).collect();
        open(&mut pm, "AAAUSDT", 10.0, &held);

        let (ok, reason) = pm.can_open("BBBUSDT", 10.0, &candidate);
        assert!(!ok);
        assert!(reason.starts_with("correlation_block(AAAUSDT"), "{reason}");
    }

    #[test]
    fn uncorrelated_candidate_passes() {
        let mut pm = manager(1_000_000.0);
        let held: Vec<f64> = (0..40)
            .map(|i| 100.0 + (i as f64 * 0.9).sin() * 3.0)
            .collect();
        // Out-of-phase oscillation: strongly negative correlation.
        let candidate: Vec<f64> = (0..40)
            .map(|i| 100.0 - (i as f64 * 0.9).sin() * 3.0)
            .collect();
        open(&mut pm, "AAAUSDT", 10.0, &held);
        let (ok, reason) = pm.can_open("BBBUSDT", 10.0, &candidate);
        assert!(ok, "{reason}");
    }

    #[test]
    fn short_history_never_blocks() {
        let mut pm = manager(1_000_000.0);
        let held: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        open(&mut pm, "AAAUSDT", 10.0, &held);

        // Candidate below 20 points: filter disengaged.
        let candidate: Vec<f64> = held[..10].to_vec();
        let (ok, _) = pm.can_open("BBBUSDT", 10.0, &candidate);
        assert!(ok);
    }

    #[test]
    fn correlation_math() {
        let a: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let b: Vec<f64> = (1..=30).map(|i| i as f64 * 3.0).collect();
        // Identical return series.
        assert!((correlation(&a, &b) - 1.0).abs() < 1e-9);
        // Too short.
        assert_eq!(correlation(&a[..3], &b), 0.0);
        // Constant series has zero variance.
        let flat = vec![5.0; 30];
        assert_eq!(correlation(&a, &flat), 0.0);
    }

    #[test]
    fn price_history_is_bounded() {
        let mut pm = manager(10_000.0);
        open(&mut pm, "AAAUSDT", 10.0, &[]);
        for i in 0..500 {
            pm.record_price("AAAUSDT", 100.0 + i as f64);
        }
        let p = pm.positions().next().unwrap();
        assert_eq!(p.price_history.len(), PRICE_HISTORY_CAP);
        assert_eq!(*p.price_history.back().unwrap(), 599.0);
    }
}
