//! Cycle driver: strategy resolution, financials, bankruptcy and share
//! redistribution over a [`MarketWorld`].

use std::collections::{BTreeMap, HashMap};

use chrono::{Months, NaiveDate};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_ai::{resolve_decision, StrategyProvider};
use sim_core::{
    validate_config, CompanySummary, CycleSnapshot, HistoryRow, Industry, SimConfig,
    StrategyDecision, ValidationError,
};
use sim_econ::{
    draw_shock, redistribute_shares, resolve_financials, to_money, EconError, Financials,
    FirmInputs,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::history::History;
use crate::world::{seeded_rng, MarketWorld, WorldError, ENGINE_STREAM};

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("company {company}: {source}")]
    Company { company: String, source: EconError },
    #[error("industry {industry}: {source}")]
    Industry { industry: String, source: EconError },
    #[error("company {company} belongs to unknown industry {industry}")]
    UnknownIndustry { company: String, industry: String },
}

/// Progress of a run as shown to operators.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimStatus {
    pub current_cycle: u32,
    pub total_cycles: u32,
    /// Percent of planned cycles completed.
    pub progress: f64,
}

struct Plan {
    idx: usize,
    decision: StrategyDecision,
    shock: f64,
}

struct Outcome {
    financials: Financials,
    capital: Decimal,
    profit: Decimal,
    revenue: Decimal,
}

/// Drives a world forward one monthly cycle at a time.
pub struct Engine<P: StrategyProvider> {
    cfg: SimConfig,
    provider: P,
    rng: ChaCha8Rng,
    current_cycle: u32,
    total_cycles: u32,
    history: History,
}

impl<P: StrategyProvider> Engine<P> {
    pub fn new(provider: P, cfg: SimConfig) -> Result<Self, EngineError> {
        validate_config(&cfg)?;
        Ok(Self {
            rng: seeded_rng(cfg.rng_seed, ENGINE_STREAM),
            total_cycles: cfg.num_cycles,
            cfg,
            provider,
            current_cycle: 0,
            history: History::default(),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn current_cycle(&self) -> u32 {
        self.current_cycle
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn into_history(self) -> History {
        self.history
    }

    pub fn status(&self) -> SimStatus {
        let progress = if self.total_cycles > 0 {
            f64::from(self.current_cycle) / f64::from(self.total_cycles) * 100.0
        } else {
            0.0
        };
        SimStatus {
            current_cycle: self.current_cycle,
            total_cycles: self.total_cycles,
            progress,
        }
    }

    /// Calendar date reached after `cycle` months.
    pub fn date_of(&self, cycle: u32) -> NaiveDate {
        self.cfg
            .start_date
            .checked_add_months(Months::new(cycle))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Run `num_cycles` cycles and return the last snapshot.
    pub fn run(
        &mut self,
        world: &mut MarketWorld,
        num_cycles: u32,
    ) -> Result<Option<CycleSnapshot>, EngineError> {
        let mut last = None;
        self.run_with(world, num_cycles, |snap| last = Some(snap.clone()))?;
        Ok(last)
    }

    /// Run `num_cycles` cycles, handing every snapshot to `on_cycle`.
    pub fn run_with<F>(
        &mut self,
        world: &mut MarketWorld,
        num_cycles: u32,
        mut on_cycle: F,
    ) -> Result<(), EngineError>
    where
        F: FnMut(&CycleSnapshot),
    {
        self.total_cycles = self
            .total_cycles
            .max(self.current_cycle.saturating_add(num_cycles));
        info!(
            cycles = num_cycles,
            provider = self.provider.name(),
            "starting simulation"
        );
        for _ in 0..num_cycles {
            let snap = self.step(world)?;
            on_cycle(&snap);
        }
        info!(cycle = self.current_cycle, "simulation finished");
        Ok(())
    }

    /// Run one cycle. On error the world is restored to its state before the
    /// call and the cycle counter does not move.
    pub fn step(&mut self, world: &mut MarketWorld) -> Result<CycleSnapshot, EngineError> {
        let checkpoint = world.clone();
        let rng_checkpoint = self.rng.clone();
        match self.advance(world) {
            Ok(snap) => Ok(snap),
            Err(e) => {
                error!(cycle = self.current_cycle + 1, error = %e, "cycle failed, world restored");
                *world = checkpoint;
                self.rng = rng_checkpoint;
                Err(e)
            }
        }
    }

    fn advance(&mut self, world: &mut MarketWorld) -> Result<CycleSnapshot, EngineError> {
        let cycle = self.current_cycle + 1;
        debug!(cycle, "cycle start");
        world.update_market_conditions()?;
        let market = *world.market_conditions();
        if let Err(e) = self.provider.begin_cycle(cycle) {
            warn!(cycle, provider = self.provider.name(), error = %e, "provider refresh failed");
        }

        // Providers and the shock RNG are stateful, so decisions are taken
        // one company at a time in insertion order.
        let mut plans = Vec::new();
        for (idx, company) in world.companies().iter().enumerate() {
            if !company.alive {
                continue;
            }
            let decision = resolve_decision(&mut self.provider, company, &market);
            let shock = draw_shock(&mut self.rng, market.market_volatility, self.cfg.shock_scale);
            plans.push(Plan {
                idx,
                decision,
                shock,
            });
        }

        let outcomes = {
            let companies = world.companies();
            let industries: HashMap<&str, &Industry> = world
                .industries()
                .iter()
                .map(|i| (i.name.as_str(), i))
                .collect();
            let cfg = &self.cfg;
            let compute = |plan: &Plan| -> Result<Outcome, EngineError> {
                let company = &companies[plan.idx];
                let industry = industries.get(company.industry.as_str()).ok_or_else(|| {
                    EngineError::UnknownIndustry {
                        company: company.name.clone(),
                        industry: company.industry.clone(),
                    }
                })?;
                let wrap = |source: EconError| EngineError::Company {
                    company: company.name.clone(),
                    source,
                };
                let financials = resolve_financials(
                    &FirmInputs {
                        demand: industry.demand,
                        market_share: company.market_share,
                        talent: company.talent,
                        health: company.health,
                        capital_intensity: industry.capital_intensity,
                        conditions: market,
                        decision: &plan.decision,
                        shock: plan.shock,
                    },
                    cfg,
                )
                .map_err(wrap)?;
                let profit = to_money(financials.profit).map_err(wrap)?;
                let revenue = to_money(financials.revenue).map_err(wrap)?;
                let capital = company
                    .capital
                    .checked_add(profit)
                    .ok_or_else(|| wrap(EconError::NonFinite("capital")))?;
                Ok(Outcome {
                    financials,
                    capital,
                    profit,
                    revenue,
                })
            };
            if cfg.force_sequential {
                plans.iter().map(&compute).collect::<Result<Vec<_>, _>>()?
            } else {
                plans.par_iter().map(&compute).collect::<Result<Vec<_>, _>>()?
            }
        };

        let mut profits = vec![0.0; world.companies().len()];
        {
            let companies = world.companies_mut();
            for (plan, out) in plans.into_iter().zip(outcomes) {
                let c = &mut companies[plan.idx];
                c.capital = out.capital;
                c.talent = out.financials.talent;
                c.health = out.financials.health;
                c.last_profit = out.profit;
                c.last_revenue = out.revenue;
                c.strategy = Some(plan.decision);
                c.age_months += 1;
                profits[plan.idx] = out.financials.profit;
            }
        }

        let mut vacated: BTreeMap<String, f64> = BTreeMap::new();
        let mut bankruptcies = Vec::new();
        for c in world.companies_mut().iter_mut().filter(|c| c.alive) {
            if c.capital <= Decimal::ZERO || c.health <= 0.0 {
                c.alive = false;
                *vacated.entry(c.industry.clone()).or_insert(0.0) += c.market_share;
                info!(
                    cycle,
                    company = %c.name,
                    industry = %c.industry,
                    capital = %c.capital,
                    health = c.health,
                    "company went bankrupt"
                );
                bankruptcies.push(c.name.clone());
            }
        }

        let names: Vec<String> = world.industries().iter().map(|i| i.name.clone()).collect();
        for name in names {
            let members: Vec<usize> = world
                .companies()
                .iter()
                .enumerate()
                .filter(|(_, c)| c.alive && c.industry == name)
                .map(|(i, _)| i)
                .collect();
            let pool = vacated.get(&name).copied().unwrap_or(0.0);
            if members.is_empty() {
                debug!(industry = %name, vacated = pool, "no survivors, skipping redistribution");
                continue;
            }
            let shares: Vec<f64> = members
                .iter()
                .map(|&i| world.companies()[i].market_share)
                .collect();
            let member_profits: Vec<f64> = members.iter().map(|&i| profits[i]).collect();
            let next = redistribute_shares(&shares, &member_profits, pool, &self.cfg).map_err(
                |source| EngineError::Industry {
                    industry: name.clone(),
                    source,
                },
            )?;
            let companies = world.companies_mut();
            for (&i, share) in members.iter().zip(next) {
                companies[i].market_share = share;
            }
        }

        let alive = world.get_all_alive_companies();
        self.history.append(alive.iter().map(|c| HistoryRow {
            cycle,
            company_id: c.id.clone(),
            company: c.name.clone(),
            industry: c.industry.clone(),
            capital: c.capital,
            market_share: c.market_share,
        }));
        let mut companies: Vec<CompanySummary> = alive.iter().map(|c| c.summary()).collect();
        companies.sort_by(|a, b| b.capital.cmp(&a.capital));

        self.current_cycle = cycle;
        self.total_cycles = self.total_cycles.max(cycle);
        info!(
            cycle,
            alive = companies.len(),
            bankrupt = bankruptcies.len(),
            "cycle complete"
        );
        Ok(CycleSnapshot {
            cycle,
            total_cycles: self.total_cycles,
            date: self.date_of(cycle),
            companies,
            market,
            bankruptcies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_ai::FixedStrategy;
    use sim_core::Focus;

    #[test]
    fn invalid_config_rejected() {
        let cfg = SimConfig {
            health_smoothing: 0.0,
            ..SimConfig::default()
        };
        assert!(matches!(
            Engine::new(FixedStrategy::new(Focus::Growth), cfg),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn status_and_dates() {
        let cfg = SimConfig::default();
        let mut world = MarketWorld::generate(&cfg).unwrap();
        let mut engine = Engine::new(FixedStrategy::new(Focus::Retention), cfg).unwrap();
        assert_eq!(engine.status().progress, 0.0);
        let snap = engine.run(&mut world, 3).unwrap().unwrap();
        assert_eq!(snap.cycle, 3);
        assert_eq!(snap.date, NaiveDate::from_ymd_opt(2025, 4, 1).unwrap());
        let status = engine.status();
        assert_eq!(status.current_cycle, 3);
        assert_eq!(status.total_cycles, 12);
        assert!((status.progress - 25.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_sorted_by_capital() {
        let cfg = SimConfig::default();
        let mut world = MarketWorld::generate(&cfg).unwrap();
        let mut engine = Engine::new(FixedStrategy::new(Focus::Growth), cfg).unwrap();
        let snap = engine.step(&mut world).unwrap();
        assert!(snap
            .companies
            .windows(2)
            .all(|w| w[0].capital >= w[1].capital));
        assert!(world
            .get_all_alive_companies()
            .iter()
            .all(|c| c.age_months == 1 && c.strategy.is_some()));
    }

    #[test]
    fn empty_world_fails_cycle() {
        let cfg = SimConfig::default();
        let mut world = MarketWorld::new(vec![], vec![], &cfg).unwrap();
        let mut engine = Engine::new(FixedStrategy::new(Focus::Growth), cfg).unwrap();
        assert_eq!(
            engine.step(&mut world).unwrap_err(),
            EngineError::World(WorldError::NoIndustries)
        );
        assert_eq!(engine.current_cycle(), 0);
    }
}
