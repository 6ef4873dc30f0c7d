//! The market world: industries, companies and the run-wide macro snapshot.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sim_core::generate::generate_world;
use sim_core::{validate_population, Company, Industry, MarketConditions, SimConfig, ValidationError};
use sim_econ::{draw_economic_growth, draw_market_volatility, next_demand, step_tech_innovation};
use thiserror::Error;
use tracing::debug;

/// RNG stream used for world generation.
pub(crate) const GENERATION_STREAM: u64 = 0;
/// RNG stream used for macro draws.
pub(crate) const MARKET_STREAM: u64 = 1;
/// RNG stream used by the engine for per-company shocks.
pub(crate) const ENGINE_STREAM: u64 = 2;

pub(crate) fn seeded_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

#[derive(Debug, Error, PartialEq)]
pub enum WorldError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Macro conditions cannot be derived from an empty world.
    #[error("world has no industries")]
    NoIndustries,
    #[error("non-finite {0} after market update")]
    NonFinite(&'static str),
}

/// Owns every industry and company of a run plus the macro snapshot.
///
/// Only [`MarketWorld::update_market_conditions`] writes demand and market
/// conditions; company fields are written by the engine.
#[derive(Clone, Debug)]
pub struct MarketWorld {
    industries: Vec<Industry>,
    companies: Vec<Company>,
    market_conditions: MarketConditions,
    innovation_step: f64,
    rng: ChaCha8Rng,
}

impl MarketWorld {
    /// Build a world from generator output; the population is validated.
    pub fn new(
        industries: Vec<Industry>,
        companies: Vec<Company>,
        cfg: &SimConfig,
    ) -> Result<Self, WorldError> {
        validate_population(&industries, &companies)?;
        let market_conditions = initial_conditions(&industries);
        Ok(Self {
            industries,
            companies,
            market_conditions,
            innovation_step: cfg.innovation_step,
            rng: seeded_rng(cfg.rng_seed, MARKET_STREAM),
        })
    }

    /// Generate a fresh world from configuration.
    pub fn generate(cfg: &SimConfig) -> Result<Self, WorldError> {
        let mut rng = seeded_rng(cfg.rng_seed, GENERATION_STREAM);
        let (industries, companies) = generate_world(cfg, &mut rng);
        Self::new(industries, companies, cfg)
    }

    pub fn industries(&self) -> &[Industry] {
        &self.industries
    }

    pub fn industry(&self, name: &str) -> Option<&Industry> {
        self.industries.iter().find(|i| i.name == name)
    }

    /// All companies including tombstones, in insertion order.
    pub fn companies(&self) -> &[Company] {
        &self.companies
    }

    pub(crate) fn companies_mut(&mut self) -> &mut [Company] {
        &mut self.companies
    }

    pub fn market_conditions(&self) -> &MarketConditions {
        &self.market_conditions
    }

    /// Companies still in business, in insertion order.
    pub fn get_all_alive_companies(&self) -> Vec<&Company> {
        self.companies.iter().filter(|c| c.alive).collect()
    }

    /// Case-insensitive lookup by company name among alive companies.
    pub fn find_company(&self, name: &str) -> Option<&Company> {
        self.companies
            .iter()
            .find(|c| c.alive && c.name.eq_ignore_ascii_case(name))
    }

    /// Sum of market shares of the industry's alive companies.
    pub fn share_sum(&self, industry: &str) -> f64 {
        self.companies
            .iter()
            .filter(|c| c.alive && c.industry == industry)
            .map(|c| c.market_share)
            .sum()
    }

    /// Advance macro conditions and industry demand by one month.
    ///
    /// New values are computed on a copy of the RNG and committed together, so
    /// an error leaves the world exactly as it was. Calling this twice in one
    /// cycle advances the market twice.
    pub fn update_market_conditions(&mut self) -> Result<(), WorldError> {
        if self.industries.is_empty() {
            return Err(WorldError::NoIndustries);
        }
        let n = self.industries.len() as f64;
        let mean_growth = self.industries.iter().map(|i| i.growth_rate).sum::<f64>() / n;
        let mean_vol = self.industries.iter().map(|i| i.volatility).sum::<f64>() / n;
        let (lowest, highest) = self
            .industries
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), i| {
                (lo.min(i.volatility), hi.max(i.volatility))
            });

        let mut rng = self.rng.clone();
        let next = MarketConditions {
            economic_growth: draw_economic_growth(&mut rng, mean_growth, mean_vol),
            tech_innovation: step_tech_innovation(
                &mut rng,
                self.market_conditions.tech_innovation,
                self.innovation_step,
            ),
            market_volatility: draw_market_volatility(&mut rng, lowest, highest),
        };
        if !(next.economic_growth.is_finite()
            && next.tech_innovation.is_finite()
            && next.market_volatility.is_finite())
        {
            return Err(WorldError::NonFinite("market conditions"));
        }
        let demands: Vec<f64> = self
            .industries
            .iter()
            .map(|i| next_demand(i.demand, i.growth_rate, next.economic_growth))
            .collect();
        if demands.iter().any(|d| !d.is_finite()) {
            return Err(WorldError::NonFinite("demand"));
        }

        for (industry, demand) in self.industries.iter_mut().zip(demands) {
            industry.demand = demand;
        }
        self.market_conditions = next;
        self.rng = rng;
        debug!(
            economic_growth = next.economic_growth,
            tech_innovation = next.tech_innovation,
            market_volatility = next.market_volatility,
            "market conditions updated"
        );
        Ok(())
    }
}

fn initial_conditions(industries: &[Industry]) -> MarketConditions {
    if industries.is_empty() {
        return MarketConditions::default();
    }
    let n = industries.len() as f64;
    MarketConditions {
        economic_growth: (industries.iter().map(|i| i.growth_rate).sum::<f64>() / n)
            .clamp(-sim_econ::ECONOMIC_GROWTH_BOUND, sim_econ::ECONOMIC_GROWTH_BOUND),
        tech_innovation: 0.5,
        market_volatility: (industries.iter().map(|i| i.volatility).sum::<f64>() / n)
            .clamp(0.0, 1.0),
    }
}
