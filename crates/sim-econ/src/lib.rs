#![deny(warnings)]

//! Economic models for the market simulation.
//!
//! This crate provides the pure numeric rules of a cycle:
//! - Macro draws (economic growth, innovation walk, volatility) and demand drift
//! - Per-company revenue, cost, hiring and health
//! - Two-phase market-share redistribution
//!
//! Everything here is side-effect free apart from the RNG handed in, so the
//! runtime can evaluate companies in any order or in parallel.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sim_core::{CapitalIntensity, Focus, MarketConditions, SimConfig, StrategyDecision};
use thiserror::Error;
use tracing::trace;

/// Growth parameters are annual; a cycle is one month.
pub const MONTHS_PER_YEAR: f64 = 12.0;
/// Bound on `economic_growth` in either direction.
pub const ECONOMIC_GROWTH_BOUND: f64 = 0.5;
/// Largest headcount change per cycle.
pub const MAX_TALENT_DELTA: i32 = 3;
/// Upper bound on the fraction of revenue spent on strategy.
pub const MAX_SPEND_RATIO: f64 = 0.5;
/// Bound on a per-company demand shock.
pub const SHOCK_LIMIT: f64 = 0.3;

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// A computed or supplied value was NaN or infinite.
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    /// Parallel slices passed to redistribution differ in length.
    #[error("length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

fn finite(v: f64, what: &'static str) -> Result<f64, EconError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(EconError::NonFinite(what))
    }
}

/// Convert a computed amount to money rounded to cents.
pub fn to_money(v: f64) -> Result<Decimal, EconError> {
    finite(v, "money")?;
    Decimal::from_f64(v)
        .map(|d| d.round_dp(2))
        .ok_or(EconError::NonFinite("money"))
}

/// Convert money back to a float for formulas.
pub fn from_money(d: Decimal) -> Result<f64, EconError> {
    d.to_f64().ok_or(EconError::NonFinite("money"))
}

// ---------------------------------------------------------------------------
// Macro conditions
// ---------------------------------------------------------------------------

/// Draw macro growth around `mean` with standard deviation `spread`.
pub fn draw_economic_growth<R: Rng + ?Sized>(rng: &mut R, mean: f64, spread: f64) -> f64 {
    let g = if spread > 0.0 {
        match Normal::new(mean, spread) {
            Ok(dist) => dist.sample(rng),
            Err(_) => mean,
        }
    } else {
        mean
    };
    g.clamp(-ECONOMIC_GROWTH_BOUND, ECONOMIC_GROWTH_BOUND)
}

/// One bounded random-walk step of tech innovation, kept in [0, 1].
pub fn step_tech_innovation<R: Rng + ?Sized>(rng: &mut R, previous: f64, step: f64) -> f64 {
    let step = step.abs();
    let delta = if step > 0.0 {
        rng.gen_range(-step..=step)
    } else {
        0.0
    };
    (previous + delta).clamp(0.0, 1.0)
}

/// Draw market volatility between the calmest and the most volatile industry.
pub fn draw_market_volatility<R: Rng + ?Sized>(rng: &mut R, lowest: f64, highest: f64) -> f64 {
    let v = if highest > lowest {
        rng.gen_range(lowest..=highest)
    } else {
        lowest
    };
    v.clamp(0.0, 1.0)
}

/// Next-month demand of an industry, floored at zero.
pub fn next_demand(demand: f64, growth_rate: f64, economic_growth: f64) -> f64 {
    let monthly = (growth_rate + economic_growth) / 2.0 / MONTHS_PER_YEAR;
    (demand * (1.0 + monthly)).max(0.0)
}

/// Per-company demand shock; zero when the market is calm.
pub fn draw_shock<R: Rng + ?Sized>(rng: &mut R, market_volatility: f64, scale: f64) -> f64 {
    let sd = market_volatility * scale;
    if !(sd > 0.0 && sd.is_finite()) {
        return 0.0;
    }
    match Normal::new(0.0, sd) {
        Ok(dist) => dist.sample(rng).clamp(-SHOCK_LIMIT, SHOCK_LIMIT),
        Err(_) => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Per-company resolution
// ---------------------------------------------------------------------------

/// Diminishing returns on workforce size. Strictly increasing.
pub fn talent_efficiency(talent: u32) -> f64 {
    1.0 + 0.1 * (1.0 + talent as f64).ln()
}

/// Revenue effect of the chosen focus.
pub fn focus_factor(focus: Focus, conditions: &MarketConditions) -> f64 {
    match focus {
        Focus::Growth => 1.08,
        Focus::Efficiency => 0.97,
        Focus::Retention => 1.03,
        Focus::Innovation => 1.0 + 0.15 * conditions.tech_innovation,
    }
}

/// Revenue effect of the macro environment. Positive for bounded inputs.
pub fn macro_factor(conditions: &MarketConditions) -> f64 {
    (1.0 + conditions.economic_growth) * (1.0 + 0.25 * conditions.tech_innovation)
}

/// Combined revenue multiplier of talent, strategy and macro conditions.
pub fn revenue_multiplier(focus: Focus, talent: u32, conditions: &MarketConditions) -> f64 {
    talent_efficiency(talent) * focus_factor(focus, conditions) * macro_factor(conditions)
}

/// Monthly fixed cost by capital intensity.
pub fn fixed_cost(intensity: CapitalIntensity) -> f64 {
    match intensity {
        CapitalIntensity::Low => 20.0,
        CapitalIntensity::Medium => 40.0,
        CapitalIntensity::High => 70.0,
        CapitalIntensity::VeryHigh => 100.0,
    }
}

/// Running cost before strategic spend; efficiency focus trims 10%.
pub fn base_operating_cost(
    intensity: CapitalIntensity,
    talent: u32,
    cost_per_talent: f64,
    focus: Focus,
) -> f64 {
    let base = fixed_cost(intensity) + cost_per_talent * talent as f64;
    if focus == Focus::Efficiency {
        base * 0.9
    } else {
        base
    }
}

/// Fraction of revenue spent on strategy, in [0, MAX_SPEND_RATIO].
pub fn spend_ratio(decision: &StrategyDecision) -> f64 {
    let default = match decision.focus {
        Focus::Growth => 0.15,
        Focus::Innovation => 0.10,
        Focus::Retention => 0.05,
        Focus::Efficiency => 0.0,
    };
    decision
        .weight(StrategyDecision::SPEND_RATIO)
        .unwrap_or(default)
        .clamp(0.0, MAX_SPEND_RATIO)
}

/// Headcount change for the cycle, in [-MAX_TALENT_DELTA, MAX_TALENT_DELTA].
pub fn talent_delta(decision: &StrategyDecision) -> i32 {
    let delta = match decision.weight(StrategyDecision::HIRING) {
        Some(h) => (h.clamp(-1.0, 1.0) * MAX_TALENT_DELTA as f64).round() as i32,
        None => match decision.focus {
            Focus::Growth => 2,
            Focus::Innovation => 1,
            Focus::Retention => 0,
            Focus::Efficiency => -1,
        },
    };
    delta.clamp(-MAX_TALENT_DELTA, MAX_TALENT_DELTA)
}

/// Apply a headcount change without going below zero.
pub fn apply_talent_delta(talent: u32, delta: i32) -> u32 {
    if delta >= 0 {
        talent.saturating_add(delta as u32)
    } else {
        talent.saturating_sub(delta.unsigned_abs())
    }
}

/// Profit signal in [-1, 1] relative to the size of the business.
pub fn health_signal(profit: f64, revenue: f64, cost: f64) -> f64 {
    let scale = revenue.max(cost).max(1.0);
    (3.0 * profit / scale).tanh()
}

/// Exponential moving average of health toward the profit signal.
///
/// Breakeven or better pulls health toward 1; heavy losses pull it below 0,
/// so the clamp reaches 0 in finitely many cycles.
pub fn next_health(health: f64, signal: f64, alpha: f64) -> f64 {
    let target = (1.0 + 2.0 * signal).clamp(-1.0, 1.0);
    ((1.0 - alpha) * health + alpha * target).clamp(0.0, 1.0)
}

/// What one company brings into the compute phase of a cycle.
#[derive(Clone, Debug)]
pub struct FirmInputs<'a> {
    pub demand: f64,
    pub market_share: f64,
    pub talent: u32,
    pub health: f64,
    pub capital_intensity: CapitalIntensity,
    pub conditions: MarketConditions,
    pub decision: &'a StrategyDecision,
    pub shock: f64,
}

/// Result of the compute phase for one company.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Financials {
    pub revenue: f64,
    pub cost: f64,
    pub profit: f64,
    pub talent: u32,
    pub health: f64,
}

/// Resolve revenue, cost, profit, hiring and health for one company.
pub fn resolve_financials(inp: &FirmInputs<'_>, cfg: &SimConfig) -> Result<Financials, EconError> {
    let focus = inp.decision.focus;
    let multiplier = revenue_multiplier(focus, inp.talent, &inp.conditions);
    let revenue = finite(
        (inp.demand.max(0.0)
            * (inp.market_share / 100.0)
            * cfg.revenue_scale
            * multiplier
            * (1.0 + inp.shock))
            .max(0.0),
        "revenue",
    )?;
    let spend = spend_ratio(inp.decision) * revenue;
    let cost = finite(
        base_operating_cost(inp.capital_intensity, inp.talent, cfg.cost_per_talent, focus) + spend,
        "cost",
    )?;
    let profit = revenue - cost;
    let talent = apply_talent_delta(inp.talent, talent_delta(inp.decision));
    let health = finite(
        next_health(
            inp.health,
            health_signal(profit, revenue, cost),
            cfg.health_smoothing,
        ),
        "health",
    )?;
    Ok(Financials {
        revenue,
        cost,
        profit,
        talent,
        health,
    })
}

// ---------------------------------------------------------------------------
// Market-share redistribution
// ---------------------------------------------------------------------------

/// Phase A: share-change proposals from profit relative to the average.
///
/// Outperformers get positive proposals, underperformers negative ones, each
/// bounded by `ceiling`. Equal profits propose no change.
pub fn propose_share_deltas(
    profits: &[f64],
    sensitivity: f64,
    ceiling: f64,
) -> Result<Vec<f64>, EconError> {
    if profits.is_empty() {
        return Ok(Vec::new());
    }
    for p in profits {
        finite(*p, "profit")?;
    }
    let n = profits.len() as f64;
    let avg = profits.iter().sum::<f64>() / n;
    let scale = (profits.iter().map(|p| p.abs()).sum::<f64>() / n).max(1.0);
    Ok(profits
        .iter()
        .map(|p| (sensitivity * (p - avg) / scale).clamp(-ceiling, ceiling))
        .collect())
}

/// Split a vacated-share pool across survivors proportionally to their share.
pub fn allocate_pool(shares: &[f64], pool: f64) -> Vec<f64> {
    if shares.is_empty() || pool <= 0.0 {
        return vec![0.0; shares.len()];
    }
    let total: f64 = shares.iter().sum();
    if total > 0.0 {
        shares.iter().map(|s| pool * s / total).collect()
    } else {
        vec![pool / shares.len() as f64; shares.len()]
    }
}

/// Phase B: apply deltas and pool allocations at once, then renormalize the
/// result to sum to exactly 100.
pub fn apply_share_changes(
    shares: &[f64],
    deltas: &[f64],
    pool: &[f64],
) -> Result<Vec<f64>, EconError> {
    if deltas.len() != shares.len() {
        return Err(EconError::LengthMismatch {
            expected: shares.len(),
            got: deltas.len(),
        });
    }
    if pool.len() != shares.len() {
        return Err(EconError::LengthMismatch {
            expected: shares.len(),
            got: pool.len(),
        });
    }
    if shares.is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<f64> = shares
        .iter()
        .zip(deltas)
        .zip(pool)
        .map(|((s, d), b)| (s + d + b).max(0.0))
        .collect();
    let total: f64 = raw.iter().sum();
    finite(total, "share")?;
    if total <= 0.0 {
        return Ok(vec![100.0 / shares.len() as f64; shares.len()]);
    }
    Ok(raw.iter().map(|s| s / total * 100.0).collect())
}

/// Full redistribution for one industry's survivors.
///
/// `shares[i]` and `profits[i]` belong to the same surviving company;
/// `vacated` is the share held by companies that died this cycle.
pub fn redistribute_shares(
    shares: &[f64],
    profits: &[f64],
    vacated: f64,
    cfg: &SimConfig,
) -> Result<Vec<f64>, EconError> {
    if profits.len() != shares.len() {
        return Err(EconError::LengthMismatch {
            expected: shares.len(),
            got: profits.len(),
        });
    }
    let deltas = propose_share_deltas(profits, cfg.share_sensitivity, cfg.max_share_delta)?;
    let pool = allocate_pool(shares, finite(vacated, "vacated share")?);
    trace!(companies = shares.len(), vacated, "redistributing shares");
    apply_share_changes(shares, &deltas, &pool)
}
