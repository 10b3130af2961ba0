// =============================================================================
// Drawdown Manager — NAV-driven risk throttle and trading halt
// =============================================================================
//
// Tracks NAV against its running peak and classifies the drawdown:
//
//   soft  reduce risk (linear multiplier toward the floor)
//   hard  halt trading for a cooldown window
//   kill  halt trading permanently until a manual peak reset
//
// The hard cooldown only ever extends; the kill switch pins `halted_until`
// at infinity.
// =============================================================================

use crate::config::DrawdownConfig;
use crate::util::now_ts;

/// Snapshot of the drawdown state after an update.
#[derive(Debug, Clone, Copy)]
pub struct DrawdownState {
    pub peak_nav: f64,
    pub nav: f64,
    /// Relative decline from peak, in `[0, 1]`.
    pub dd_pct: f64,
    pub soft: bool,
    pub hard: bool,
    pub kill: bool,
    /// Epoch seconds until which trading is halted (infinity when killed).
    pub halted_until: f64,
}

pub struct DrawdownManager {
    cfg: DrawdownConfig,
    peak_nav: f64,
    nav: f64,
    halted_until: f64,
    killed: bool,
}

impl DrawdownManager {
    pub fn new(cfg: &DrawdownConfig, start_nav: f64) -> Self {
        Self {
            cfg: cfg.clone(),
            peak_nav: start_nav,
            nav: start_nav,
            halted_until: 0.0,
            killed: false,
        }
    }

    /// Observe a NAV value and recompute the drawdown state.
    pub fn update(&mut self, nav: f64) -> DrawdownState {
        self.update_at(nav, now_ts())
    }

    pub(crate) fn update_at(&mut self, nav: f64, now: f64) -> DrawdownState {
        self.nav = nav;
        if nav > self.peak_nav {
            self.peak_nav = nav;
        }

        let dd_pct = if self.peak_nav > 0.0 {
            ((self.peak_nav - nav) / self.peak_nav).max(0.0)
        } else {
            0.0
        };

        if dd_pct >= self.cfg.kill_pct {
            self.killed = true;
            self.halted_until = f64::INFINITY;
        } else if dd_pct >= self.cfg.hard_pct && !self.killed {
            // Cooldowns extend, never shrink.
            self.halted_until = self.halted_until.max(now + self.cfg.hard_cooldown_sec);
        }

        DrawdownState {
            peak_nav: self.peak_nav,
            nav: self.nav,
            dd_pct,
            soft: dd_pct >= self.cfg.soft_pct,
            hard: dd_pct >= self.cfg.hard_pct,
            kill: self.killed,
            halted_until: self.halted_until,
        }
    }

    /// May a new trade be opened right now?
    pub fn can_trade(&mut self) -> (bool, &'static str) {
        self.can_trade_at(now_ts())
    }

    pub(crate) fn can_trade_at(&mut self, now: f64) -> (bool, &'static str) {
        let st = self.update_at(self.nav, now);
        if st.kill {
            return (false, "dd_kill");
        }
        if now < st.halted_until {
            return (false, "dd_hard_cooldown");
        }
        (true, "ok")
    }

    /// Risk multiplier: 1.0 below soft, then linear down to the floor at hard.
    pub fn risk_multiplier(&self) -> f64 {
        let dd = if self.peak_nav > 0.0 {
            ((self.peak_nav - self.nav) / self.peak_nav).max(0.0)
        } else {
            0.0
        };

        if dd < self.cfg.soft_pct {
            return 1.0;
        }

        let soft = self.cfg.soft_pct;
        let hard = self.cfg.hard_pct.max(soft + 1e-9);
        let x = ((dd - soft) / (hard - soft)).clamp(0.0, 1.0);
        let mult = 1.0 - x * (1.0 - self.cfg.min_risk_mult);
        mult.clamp(self.cfg.min_risk_mult, 1.0)
    }

    pub fn state(&mut self) -> DrawdownState {
        let nav = self.nav;
        self.update(nav)
    }

    /// Manual reset: restart drawdown evaluation from the current NAV and
    /// clear any halt, including the kill switch.
    pub fn reset_peak(&mut self) {
        self.peak_nav = self.nav;
        self.halted_until = 0.0;
        self.killed = false;
    }
}
