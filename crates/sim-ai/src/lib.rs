#![deny(warnings)]

//! Strategy providers: what a company decides to focus on each cycle.
//!
//! The engine only depends on [`StrategyProvider`]. Whatever a provider
//! returns goes through [`resolve_decision`], which substitutes the default
//! decision for missing or malformed answers so a bad provider can never fail
//! a cycle.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sim_core::{Company, Focus, MarketConditions, StrategyDecision};
use thiserror::Error;
use tracing::warn;

/// Errors a provider may report instead of a decision.
#[derive(Debug, Error, PartialEq)]
pub enum StrategyError {
    #[error("unknown focus: {0}")]
    UnknownFocus(String),
    #[error("malformed decision: {0}")]
    Malformed(String),
    #[error("provider failed: {0}")]
    Provider(String),
}

impl From<sim_core::UnknownFocus> for StrategyError {
    fn from(e: sim_core::UnknownFocus) -> Self {
        StrategyError::UnknownFocus(e.0)
    }
}

/// Source of per-cycle decisions.
///
/// `Ok(None)` means "no opinion" and is treated like an empty response.
pub trait StrategyProvider {
    fn name(&self) -> &str;

    fn decide(
        &mut self,
        company: &Company,
        market: &MarketConditions,
    ) -> Result<Option<StrategyDecision>, StrategyError>;

    /// Called once before the first decision of every cycle.
    fn begin_cycle(&mut self, _cycle: u32) -> Result<(), StrategyError> {
        Ok(())
    }
}

impl<P: StrategyProvider + ?Sized> StrategyProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn decide(
        &mut self,
        company: &Company,
        market: &MarketConditions,
    ) -> Result<Option<StrategyDecision>, StrategyError> {
        (**self).decide(company, market)
    }

    fn begin_cycle(&mut self, cycle: u32) -> Result<(), StrategyError> {
        (**self).begin_cycle(cycle)
    }
}

/// Drop weights that are not finite numbers.
pub fn sanitize(mut decision: StrategyDecision) -> StrategyDecision {
    decision.weights.retain(|_, v| v.is_finite());
    decision
}

/// Ask the provider and always come back with a usable decision.
pub fn resolve_decision<P: StrategyProvider + ?Sized>(
    provider: &mut P,
    company: &Company,
    market: &MarketConditions,
) -> StrategyDecision {
    match provider.decide(company, market) {
        Ok(Some(decision)) => sanitize(decision),
        Ok(None) => {
            warn!(provider = provider.name(), company = %company.id, "empty decision, using default");
            StrategyDecision::default()
        }
        Err(e) => {
            warn!(provider = provider.name(), company = %company.id, error = %e, "bad decision, using default");
            StrategyDecision::default()
        }
    }
}

/// Utility score: higher is better. Share and margin are fractions.
pub fn utility(market_share: f64, margin: f64) -> f64 {
    (market_share * 0.7) + (margin * 0.3)
}

/// Always answers with the same focus.
#[derive(Clone, Debug)]
pub struct FixedStrategy {
    pub focus: Focus,
}

impl FixedStrategy {
    pub fn new(focus: Focus) -> Self {
        Self { focus }
    }
}

impl StrategyProvider for FixedStrategy {
    fn name(&self) -> &str {
        "fixed"
    }

    fn decide(
        &mut self,
        _company: &Company,
        _market: &MarketConditions,
    ) -> Result<Option<StrategyDecision>, StrategyError> {
        Ok(Some(StrategyDecision::new(self.focus)))
    }
}

/// Deterministic rules over the company's own numbers and the macro climate.
#[derive(Clone, Debug)]
pub struct RuleBasedStrategy {
    /// Below this health the company retrenches.
    pub distress_health: f64,
    /// Innovation pressure above which the company invests in product.
    pub innovation_threshold: f64,
    /// Macro growth above which healthy companies expand.
    pub growth_threshold: f64,
}

impl Default for RuleBasedStrategy {
    fn default() -> Self {
        Self {
            distress_health: 0.4,
            innovation_threshold: 0.65,
            growth_threshold: 0.05,
        }
    }
}

impl StrategyProvider for RuleBasedStrategy {
    fn name(&self) -> &str {
        "rule-based"
    }

    fn decide(
        &mut self,
        company: &Company,
        market: &MarketConditions,
    ) -> Result<Option<StrategyDecision>, StrategyError> {
        let revenue = sim_econ::from_money(company.last_revenue)
            .map_err(|e| StrategyError::Provider(e.to_string()))?;
        let profit = sim_econ::from_money(company.last_profit)
            .map_err(|e| StrategyError::Provider(e.to_string()))?;
        let margin = if revenue > 0.0 { profit / revenue } else { 0.0 };
        let losing = company.age_months > 0 && profit < 0.0;

        let focus = if company.health < self.distress_health || losing {
            Focus::Efficiency
        } else if market.tech_innovation > self.innovation_threshold {
            Focus::Innovation
        } else if market.economic_growth > self.growth_threshold && company.health > 0.7 {
            Focus::Growth
        } else {
            Focus::Retention
        };
        let confidence = utility(company.market_share / 100.0, margin).clamp(-1.0, 1.0);
        Ok(Some(
            StrategyDecision::new(focus).with_weight("confidence", confidence),
        ))
    }
}

/// Default focus weights, in [`Focus::ALL`] order.
pub const DEFAULT_FOCUS_WEIGHTS: [f64; 4] = [0.35, 0.25, 0.2, 0.2];

/// Seeded weighted draw over focuses with a random spend level.
#[derive(Clone, Debug)]
pub struct RandomStrategy {
    rng: ChaCha8Rng,
    weights: [f64; 4],
}

impl RandomStrategy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            weights: DEFAULT_FOCUS_WEIGHTS,
        }
    }

    /// Custom focus weights in [`Focus::ALL`] order; must be non-negative
    /// with a positive sum.
    pub fn with_weights(seed: u64, weights: [f64; 4]) -> Result<Self, StrategyError> {
        let valid = weights.iter().all(|w| w.is_finite() && *w >= 0.0);
        if !valid || weights.iter().sum::<f64>() <= 0.0 {
            return Err(StrategyError::Malformed(format!(
                "invalid focus weights {weights:?}"
            )));
        }
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            weights,
        })
    }
}

impl StrategyProvider for RandomStrategy {
    fn name(&self) -> &str {
        "random"
    }

    fn decide(
        &mut self,
        _company: &Company,
        _market: &MarketConditions,
    ) -> Result<Option<StrategyDecision>, StrategyError> {
        let choices: Vec<(Focus, f64)> = Focus::ALL.into_iter().zip(self.weights).collect();
        let focus = choices
            .choose_weighted(&mut self.rng, |c| c.1)
            .map_err(|e| StrategyError::Malformed(e.to_string()))?
            .0;
        let spend = self.rng.gen_range(0.0..=0.3);
        Ok(Some(
            StrategyDecision::new(focus).with_weight(StrategyDecision::SPEND_RATIO, spend),
        ))
    }
}
