//! Procedural generation of the initial industries and companies.
//!
//! Generators are stateless factories: all randomness comes from the RNG the
//! caller passes in, so a seeded RNG reproduces the same world.

use crate::{CapitalIntensity, Company, CompanyId, Industry, SimConfig, INITIAL_DEMAND};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::debug;

struct IndustryTemplate {
    name: &'static str,
    description: &'static str,
    growth_rate_mean: f64,
    volatility: f64,
    capital_intensity: CapitalIntensity,
    barriers: &'static str,
    customer_type: &'static str,
}

const TEMPLATES: [IndustryTemplate; 4] = [
    IndustryTemplate {
        name: "SaaS Productivity",
        description: "Cloud-based tools for teams (CRM, project mgmt, collab)",
        growth_rate_mean: 0.18,
        volatility: 0.09,
        capital_intensity: CapitalIntensity::Low,
        barriers: "medium",
        customer_type: "B2B",
    },
    IndustryTemplate {
        name: "Electric Vehicles",
        description: "Manufacturing & charging infrastructure for EVs",
        growth_rate_mean: 0.12,
        volatility: 0.15,
        capital_intensity: CapitalIntensity::VeryHigh,
        barriers: "high",
        customer_type: "B2C + B2G",
    },
    IndustryTemplate {
        name: "Fintech Payments",
        description: "Digital wallets, cross-border payments, neobanks",
        growth_rate_mean: 0.15,
        volatility: 0.11,
        capital_intensity: CapitalIntensity::Medium,
        barriers: "regulatory + trust",
        customer_type: "B2C + B2B",
    },
    IndustryTemplate {
        name: "HealthTech Telemedicine",
        description: "Remote care, AI diagnostics, wearables integration",
        growth_rate_mean: 0.14,
        volatility: 0.08,
        capital_intensity: CapitalIntensity::Medium,
        barriers: "regulatory + data privacy",
        customer_type: "B2C + B2B",
    },
];

const NAME_PREFIXES: [&str; 10] = [
    "Neo", "Quantum", "Apex", "Vortex", "Nexus", "Pulse", "Strato", "Helix", "Nova", "Zenith",
];
const NAME_SUFFIXES: [&str; 10] = [
    "Labs", "Tech", "AI", "Solutions", "Systems", "Ventures", "Dynamics", "Forge", "Core", "Edge",
];

/// Number of distinct industry templates available.
pub fn template_count() -> usize {
    TEMPLATES.len()
}

/// Pick up to `n` distinct industries and realize their growth rate.
pub fn generate_industries<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<Industry> {
    let mut picked: Vec<&IndustryTemplate> = TEMPLATES.iter().collect();
    picked.shuffle(rng);
    picked.truncate(n.min(TEMPLATES.len()));
    picked
        .into_iter()
        .map(|t| {
            let growth_rate = match Normal::new(t.growth_rate_mean, t.volatility) {
                Ok(dist) => dist.sample(rng),
                Err(_) => t.growth_rate_mean,
            };
            Industry {
                name: t.name.to_string(),
                description: t.description.to_string(),
                growth_rate_mean: t.growth_rate_mean,
                volatility: t.volatility,
                growth_rate,
                capital_intensity: t.capital_intensity,
                barriers: t.barriers.to_string(),
                customer_type: t.customer_type.to_string(),
                demand: INITIAL_DEMAND,
            }
        })
        .collect()
}

/// Startup-style name ending with the last word of the industry name.
pub fn company_name<R: Rng + ?Sized>(industry_name: &str, rng: &mut R) -> String {
    let prefix = NAME_PREFIXES.choose(rng).copied().unwrap_or("Neo");
    let suffix = NAME_SUFFIXES.choose(rng).copied().unwrap_or("Labs");
    let tail = industry_name.split_whitespace().last().unwrap_or(industry_name);
    format!("{prefix}{suffix} {tail}")
}

/// Create `n` fresh companies for one industry with shares summing to 100.
///
/// `taken` holds ids already handed out in this run; new ids are added to it.
pub fn generate_companies<R: Rng + ?Sized>(
    industry: &Industry,
    n: usize,
    cfg: &SimConfig,
    taken: &mut BTreeSet<CompanyId>,
    rng: &mut R,
) -> Vec<Company> {
    let mut companies = Vec::with_capacity(n);
    for _ in 0..n {
        let id = loop {
            let candidate = CompanyId(format!("{:08x}", rng.gen::<u32>()));
            if taken.insert(candidate.clone()) {
                break candidate;
            }
        };
        let capital = if cfg.initial_capital_max > cfg.initial_capital_min {
            rng.gen_range(cfg.initial_capital_min..cfg.initial_capital_max)
        } else {
            cfg.initial_capital_min
        };
        let jitter: i64 = rng.gen_range(-3..=5);
        let talent = (i64::from(cfg.initial_talent) + jitter).max(0) as u32;
        let share = rng.gen_range(5.0..35.0) / n as f64;
        companies.push(Company::new(
            id,
            company_name(&industry.name, rng),
            industry.name.clone(),
            Decimal::from_f64(capital)
                .map(|c| c.round_dp(2))
                .unwrap_or(Decimal::ZERO),
            talent,
            share,
        ));
    }

    let total: f64 = companies.iter().map(|c| c.market_share).sum();
    if total > 0.0 {
        for c in &mut companies {
            c.market_share = c.market_share / total * 100.0;
        }
    }
    debug!(industry = %industry.name, count = companies.len(), "generated companies");
    companies
}

/// Generate a complete initial population from configuration.
pub fn generate_world<R: Rng + ?Sized>(cfg: &SimConfig, rng: &mut R) -> (Vec<Industry>, Vec<Company>) {
    let industries = generate_industries(cfg.num_industries, rng);
    let mut taken = BTreeSet::new();
    let mut companies = Vec::with_capacity(industries.len() * cfg.companies_per_industry);
    for industry in &industries {
        companies.extend(generate_companies(
            industry,
            cfg.companies_per_industry,
            cfg,
            &mut taken,
            rng,
        ));
    }
    (industries, companies)
}
