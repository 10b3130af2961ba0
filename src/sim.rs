// =============================================================================
// Execution Simulator — paper fills resolved against closed candles
// =============================================================================
//
// Holds at most one simulated position per symbol and is the single authority
// on NAV. On every closed candle the stop and target are checked against the
// candle's low/high; when both would trigger inside the same candle the stop
// wins (worst-case assumption, there is no intra-candle path information).
//
// PnL is risk-denominated: a stop costs exactly `risk_usd`, a target pays
// `risk_usd * rr`.
// =============================================================================

use tracing::info;

use crate::resample::Candle;
use crate::types::Direction;

/// A simulated open position.
#[derive(Debug, Clone)]
pub struct SimPosition {
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
}

/// How a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseResult {
    Sl,
    Tp,
}

impl std::fmt::Display for CloseResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sl => write!(f, "SL"),
            Self::Tp => write!(f, "TP"),
        }
    }
}

/// Close descriptor returned when a candle resolves a position.
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub symbol: String,
    pub direction: Direction,
    pub result: CloseResult,
    pub exit_price: f64,
    pub pnl: f64,
    pub rr: f64,
    /// NAV after the close.
    pub nav: f64,
}

/// Running trade statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimStats {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_pnl: f64,
}

impl SimStats {
    pub fn winrate_pct(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.total_trades as f64 * 100.0
    }
}

pub struct ExecutionSimulator {
    nav: f64,
    /// Exit slippage as a fraction of price; shifts fills adversely.
    exit_slippage_pct: f64,
    positions: std::collections::HashMap<String, SimPosition>,
    stats: SimStats,
}

impl ExecutionSimulator {
    pub fn new(start_nav_usd: f64, exit_slippage_pct: f64) -> Self {
        Self {
            nav: start_nav_usd,
            exit_slippage_pct,
            positions: std::collections::HashMap::new(),
            stats: SimStats::default(),
        }
    }

    pub fn nav(&self) -> f64 {
        self.nav
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    /// Insert a position. Double-opening a held symbol is a caller error
    /// guarded upstream by the gatekeeper; the old record would be replaced.
    pub fn open(&mut self, pos: SimPosition) {
        info!(
            id = %pos.id,
            symbol = %pos.symbol,
            direction = %pos.direction,
            entry = pos.entry,
            sl = pos.sl,
            tp = pos.tp,
            qty = pos.qty,
            risk_usd = pos.risk_usd,
            opened_at = pos.opened_at,
            "sim position opened"
        );
        self.positions.insert(pos.symbol.clone(), pos);
    }

    /// Check a closed candle against the symbol's position, realising SL or
    /// TP when touched. SL takes precedence inside a single candle.
    pub fn update_by_candle(&mut self, symbol: &str, candle: &Candle) -> Option<ClosedTrade> {
        let pos = self.positions.get(symbol)?;

        let touched = match pos.direction {
            Direction::Long => {
                if candle.low <= pos.sl {
                    Some((CloseResult::Sl, pos.sl))
                } else if candle.high >= pos.tp {
                    Some((CloseResult::Tp, pos.tp))
                } else {
                    None
                }
            }
            Direction::Short => {
                if candle.high >= pos.sl {
                    Some((CloseResult::Sl, pos.sl))
                } else if candle.low <= pos.tp {
                    Some((CloseResult::Tp, pos.tp))
                } else {
                    None
                }
            }
        };
        let (result, raw_exit) = touched?;

        let pos = self.positions.remove(symbol)?;

        let pnl = match result {
            CloseResult::Sl => -pos.risk_usd,
            CloseResult::Tp => pos.risk_usd * pos.rr,
        };

        // Exit slips against the position's direction.
        let exit_price = raw_exit * (1.0 - pos.direction.sign() * self.exit_slippage_pct);

        self.nav += pnl;
        self.stats.total_trades += 1;
        self.stats.total_pnl += pnl;
        if pnl > 0.0 {
            self.stats.wins += 1;
        } else {
            self.stats.losses += 1;
        }

        info!(
            symbol = %pos.symbol,
            result = %result,
            exit = exit_price,
            pnl,
            nav = self.nav,
            "sim position closed"
        );

        Some(ClosedTrade {
            symbol: pos.symbol,
            direction: pos.direction,
            result,
            exit_price,
            pnl,
            rr: pos.rr,
            nav: self.nav,
        })
    }
}
