#![deny(warnings)]

//! Simulation runtime: the market world and the monthly cycle engine.
//!
//! A run owns one [`MarketWorld`] and drives it with an [`Engine`]. Each cycle
//! advances macro conditions, asks the strategy provider for a decision per
//! company, resolves financials (in parallel unless configured otherwise),
//! retires bankrupt companies and redistributes market share.

mod engine;
mod history;
mod world;

pub use engine::{Engine, EngineError, SimStatus};
pub use history::{History, HistoryColumns};
pub use world::{MarketWorld, WorldError};

use sim_ai::StrategyProvider;
use sim_core::{CycleSnapshot, SimConfig};

/// Generate a world from `cfg` and run it for `cfg.num_cycles` cycles.
pub fn run_generated<P: StrategyProvider>(
    provider: P,
    cfg: SimConfig,
) -> Result<(MarketWorld, Option<CycleSnapshot>, History), EngineError> {
    let mut world = MarketWorld::generate(&cfg)?;
    let cycles = cfg.num_cycles;
    let mut engine = Engine::new(provider, cfg)?;
    let last = engine.run(&mut world, cycles)?;
    Ok((world, last, engine.into_history()))
}
