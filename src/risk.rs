// =============================================================================
// Risk Planner — entry / stop / target / size for an approved signal
// =============================================================================
//
// Pipeline, in order:
//   1. base risk% by mode, scaled by the decision's risk multiplier
//   2. optional volatility adjustment toward a target ATR%
//   3. stop distance from ATR with a hard price floor
//   4. entry offset (one mechanism: adaptive regime offset OR confirm band)
//   5. entry slippage, adverse direction, SL/TP distances preserved
//   6. risk USD, quantity, take-profit from reward:risk
//
// Degenerate inputs (non-positive entry, ATR or NAV) are caller errors and
// abort the current event.
// =============================================================================

use anyhow::{ensure, Result};

use crate::config::{Config, EntryOffsetMode};
use crate::regime::Regime;
use crate::types::{Direction, Mode};

/// Minimum stop distance as a fraction of the entry price.
const MIN_SL_DIST_PCT: f64 = 0.0002;
/// Risk percent floor after all multipliers.
const MIN_RISK_PCT: f64 = 0.05;

/// A fully sized trade plan.
#[derive(Debug, Clone)]
pub struct RiskPlan {
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub qty: f64,
    pub risk_usd: f64,
    pub risk_pct: f64,
    pub rr: f64,
    pub sl_atr_mult: f64,
    pub atr_value: f64,
    pub atr_pct: f64,
    pub notes: String,
}

/// Everything the planner needs for one signal.
#[derive(Debug, Clone)]
pub struct PlanInputs<'a> {
    pub symbol: &'a str,
    pub direction: Direction,
    pub mode: Mode,
    pub regime: Regime,
    pub entry_price: f64,
    pub atr_value: f64,
    pub nav_usd: f64,
    /// Reward:risk chosen by the decision engine.
    pub rr: f64,
    /// Combined decision x drawdown risk multiplier.
    pub risk_mult: f64,
    pub sl_atr_mult: f64,
    /// Top-of-book spread, for the slippage estimate.
    pub spread: f64,
    /// Average traded USD volume, for the market-impact term. 0 disables it.
    pub avg_volume_usd: f64,
}

/// Estimate entry slippage as a fraction of price: spread cost, volatility
/// impact and size-vs-liquidity impact, floored at the raw spread.
pub fn estimate_slippage_pct(
    spread_pct: f64,
    atr_pct: f64,
    position_notional_usd: f64,
    avg_volume_usd: f64,
) -> f64 {
    if avg_volume_usd <= 0.0 {
        return spread_pct;
    }

    const K_ATR: f64 = 0.4;
    const K_IMPACT: f64 = 0.3;

    let impact_ratio = position_notional_usd / avg_volume_usd;
    let slippage = spread_pct + K_ATR * atr_pct + K_IMPACT * impact_ratio;
    slippage.max(spread_pct)
}

/// Build a risk plan for an approved signal.
pub fn plan(inputs: &PlanInputs<'_>, cfg: &Config) -> Result<RiskPlan> {
    ensure!(inputs.entry_price > 0.0, "entry price must be positive");
    ensure!(inputs.atr_value > 0.0, "ATR must be positive");
    ensure!(inputs.nav_usd > 0.0, "NAV must be positive");

    let sign = inputs.direction.sign();
    let atr_pct = inputs.atr_value / inputs.entry_price;
    let mut notes = Vec::new();

    // ── 1-2. Risk percent ────────────────────────────────────────────────
    let mut risk_pct = cfg.base_risk_pct(inputs.mode) * inputs.risk_mult;
    if let Some(target_vol) = cfg.risk.target_vol_pct {
        if atr_pct > 0.0 {
            let factor = (target_vol / atr_pct).clamp(0.5, 1.5);
            risk_pct *= factor;
            notes.push(format!("vol_adj={factor:.2}"));
        }
    }
    let risk_pct = risk_pct.clamp(MIN_RISK_PCT, cfg.risk.risk_max_pct);

    // ── 3. Stop distance ─────────────────────────────────────────────────
    let sl_dist = (inputs.atr_value * inputs.sl_atr_mult)
        .max(inputs.entry_price * MIN_SL_DIST_PCT);

    // ── 4. Entry offset (one mechanism, never both) ──────────────────────
    let mut entry = inputs.entry_price;
    match cfg.risk.entry_offset_mode {
        EntryOffsetMode::Adaptive => match inputs.regime {
            Regime::Trend => {
                // Chase the breakout in the signal direction.
                entry *= 1.0 + sign * cfg.risk.breakout_offset_pct;
                notes.push("offset=breakout".to_string());
            }
            Regime::Normal | Regime::Range => {
                // Wait for a pullback against the signal direction.
                entry *= 1.0 - sign * cfg.risk.breakout_offset_pct;
                notes.push("offset=pullback".to_string());
            }
            _ => {}
        },
        EntryOffsetMode::Confirm => {
            let confirm_pct =
                (0.10 * atr_pct).clamp(cfg.risk.confirm_min_pct, cfg.risk.confirm_max_pct);
            entry *= 1.0 + sign * confirm_pct;
            notes.push(format!("offset=confirm({confirm_pct:.4})"));
        }
    }

    // ── 5-6. Slippage + sizing ───────────────────────────────────────────
    let risk_usd = inputs.nav_usd * risk_pct / 100.0;
    let est_notional = risk_usd / sl_dist * entry;
    let slippage_pct = estimate_slippage_pct(
        inputs.spread,
        atr_pct,
        est_notional,
        inputs.avg_volume_usd,
    )
    .max(cfg.risk.slippage_pct);
    // Fill moves against us; SL and TP shift with the entry so the planned
    // distances survive the slip.
    entry *= 1.0 + sign * slippage_pct;
    notes.push(format!("slip={:.2}bps", slippage_pct * 10_000.0));

    let qty = if sl_dist > 0.0 { risk_usd / sl_dist } else { 0.0 };
    let sl = entry - sign * sl_dist;
    let tp = entry + sign * inputs.rr * sl_dist;

    Ok(RiskPlan {
        symbol: inputs.symbol.to_string(),
        direction: inputs.direction,
        entry,
        sl,
        tp,
        qty,
        risk_usd,
        risk_pct,
        rr: inputs.rr,
        sl_atr_mult: inputs.sl_atr_mult,
        atr_value: inputs.atr_value,
        atr_pct,
        notes: notes.join(" "),
    })
}
