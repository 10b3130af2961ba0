// =============================================================================
// Decision Engine — centralized allow/deny + risk shaping policy
// =============================================================================
//
// Takes a scored signal plus the global regime and decides whether a trade may
// be planned at all, and with which risk multiplier, reward:risk target and
// stop-loss ATR multiplier. Hard gates reject outright; soft gates raise the
// minimum score. All outputs are clamped at the end:
//
//   rr          in [1.2, 3.0]
//   sl_atr_mult in [0.6, 2.8]
//   risk_mult   in [0.4, 1.6]   (allowed decisions only)
// =============================================================================

use crate::config::Config;
use crate::regime::Regime;
use crate::types::{Direction, Mode};

/// Outcome of the decision policy for one signal.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allow: bool,
    pub high_conf: bool,
    pub risk_mult: f64,
    pub rr: f64,
    pub sl_atr_mult: f64,
    pub reason: String,
}

impl Decision {
    fn reject(high_conf: bool, rr: f64, slm: f64, reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            high_conf,
            risk_mult: 0.0,
            rr,
            sl_atr_mult: slm,
            reason: reason.into(),
        }
    }
}

/// Apply the decision policy to a scored signal.
///
/// `breakout` and `atr_squeeze` come from the scorer's named checks; they are
/// only consulted for main-mode signals while the market is in PANIC.
pub fn decide(
    regime: Regime,
    panic: bool,
    mode: Mode,
    direction: Direction,
    score: u32,
    breakout: bool,
    atr_squeeze: Option<bool>,
    cfg: &Config,
) -> Decision {
    let high_conf = score >= cfg.signal.high_conf_score;
    let base_rr = cfg.risk.base_rr;
    let base_slm = cfg.risk.sl_atr_mult;

    let in_panic = panic || regime == Regime::Panic;

    // ── Hard gates ───────────────────────────────────────────────────────
    if in_panic {
        if direction == Direction::Long {
            return Decision::reject(high_conf, base_rr, base_slm, "PANIC: block LONG");
        }
        if mode == Mode::Early {
            return Decision::reject(high_conf, base_rr, base_slm, "PANIC: block EARLY");
        }
    }
    if regime == Regime::Recovery && mode == Mode::Early {
        return Decision::reject(high_conf, base_rr, base_slm, "RECOVERY: block EARLY");
    }
    if regime == Regime::Range && mode == Mode::Early {
        return Decision::reject(high_conf, base_rr, base_slm, "RANGE: block EARLY");
    }

    // ── Soft score gates ─────────────────────────────────────────────────
    let mut min_score = cfg.signal.score_min(mode);
    if mode == Mode::Main {
        match regime {
            Regime::Range => min_score += 1,
            Regime::Recovery => {
                min_score += 1;
                if direction == Direction::Short {
                    min_score += 2;
                }
                if !high_conf {
                    return Decision::reject(
                        high_conf,
                        base_rr,
                        base_slm,
                        "RECOVERY: require high_conf",
                    );
                }
            }
            _ => {}
        }
        if in_panic {
            min_score = min_score.max(cfg.signal.score_min_panic);
            if !breakout {
                return Decision::reject(high_conf, base_rr, base_slm, "PANIC: require breakout");
            }
            if cfg.signal.enable_atr_compression && atr_squeeze != Some(true) {
                return Decision::reject(
                    high_conf,
                    base_rr,
                    base_slm,
                    "PANIC: require ATR squeeze",
                );
            }
        }
    }

    // Early signals may ride through on high confidence alone.
    let score_ok = score >= min_score || (mode == Mode::Early && high_conf);
    if !score_ok {
        return Decision::reject(
            high_conf,
            base_rr,
            base_slm,
            format!("{regime}: score {score} below min {min_score}"),
        );
    }

    // ── Risk policy ──────────────────────────────────────────────────────
    if mode == Mode::Early {
        // Early entries run at reduced size regardless of regime.
        let rr = base_rr.max(1.6).clamp(1.2, 3.0);
        return Decision {
            allow: true,
            high_conf,
            risk_mult: 0.75,
            rr,
            sl_atr_mult: base_slm.clamp(0.6, 2.8),
            reason: "EARLY: allow (reduced risk)".to_string(),
        };
    }

    let mut risk_mult: f64 = 1.0;
    let mut rr = base_rr;
    let mut slm = base_slm;

    if high_conf {
        rr = rr.max(2.5);
        risk_mult *= 1.20;
        slm *= 1.05;
    }

    let reason;
    if in_panic {
        rr = rr.min(1.7);
        risk_mult *= 0.60;
        slm *= 1.05;
        reason = "PANIC: allow SHORT (reduced risk)".to_string();
    } else {
        match regime {
            Regime::Trend => {
                rr = rr.max(2.2);
                risk_mult *= 1.10;
                slm *= 1.10;
                reason = "TREND: allow".to_string();
            }
            Regime::Range => {
                rr = rr.min(1.6);
                risk_mult *= 0.75;
                slm *= 0.90;
                reason = "RANGE: allow".to_string();
            }
            Regime::Recovery => {
                rr = rr.min(1.7);
                risk_mult *= 0.55;
                slm *= 0.95;
                reason = "RECOVERY: allow (high_conf)".to_string();
            }
            _ => {
                // NORMAL default.
                rr = rr.max(1.8);
                if !high_conf {
                    risk_mult *= 0.90;
                }
                reason = "NORMAL: allow".to_string();
            }
        }
    }

    Decision {
        allow: true,
        high_conf,
        risk_mult: risk_mult.clamp(0.4, 1.6),
        rr: rr.clamp(1.2, 3.0),
        sl_atr_mult: slm.clamp(0.6, 2.8),
        reason,
    }
}
