use proptest::prelude::*;
use rust_decimal::Decimal;
use sim_ai::{FixedStrategy, RandomStrategy, RuleBasedStrategy, StrategyError, StrategyProvider};
use sim_core::{
    CapitalIntensity, Company, CompanyId, Focus, Industry, MarketConditions, SimConfig,
    StrategyDecision,
};
use sim_runtime::{Engine, EngineError, MarketWorld};

fn industry(name: &str, growth: f64, volatility: f64) -> Industry {
    Industry {
        name: name.into(),
        description: String::new(),
        growth_rate_mean: growth,
        volatility,
        growth_rate: growth,
        capital_intensity: CapitalIntensity::Medium,
        barriers: "medium".into(),
        customer_type: "B2B".into(),
        demand: 100.0,
    }
}

fn company(id: &str, industry: &str, capital: Decimal, talent: u32, share: f64) -> Company {
    Company::new(CompanyId(id.into()), id, industry, capital, talent, share)
}

fn assert_shares_sum(world: &MarketWorld) {
    for i in world.industries() {
        let alive = world
            .companies()
            .iter()
            .filter(|c| c.alive && c.industry == i.name)
            .count();
        if alive > 0 {
            let sum = world.share_sum(&i.name);
            assert!((sum - 100.0).abs() < 1e-6, "{} shares sum to {sum}", i.name);
        }
    }
}

#[test]
fn equal_companies_keep_equal_shares() {
    let cfg = SimConfig::default();
    let mut world = MarketWorld::new(
        vec![industry("Seg", 0.1, 0.0)],
        vec![
            company("A", "Seg", Decimal::new(500, 0), 10, 33.33),
            company("B", "Seg", Decimal::new(500, 0), 10, 33.33),
            company("C", "Seg", Decimal::new(500, 0), 10, 33.33),
        ],
        &cfg,
    )
    .unwrap();
    let mut engine = Engine::new(FixedStrategy::new(Focus::Retention), cfg).unwrap();
    for _ in 0..5 {
        let snap = engine.step(&mut world).unwrap();
        assert_eq!(snap.companies.len(), 3);
        assert!(snap.bankruptcies.is_empty());
        for c in world.companies() {
            assert!((c.market_share - 100.0 / 3.0).abs() < 1e-9);
            assert_eq!(c.capital, world.companies()[0].capital);
        }
    }
}

#[test]
fn insolvent_company_dies_and_survivor_takes_pool() {
    let cfg = SimConfig::default();
    let mut world = MarketWorld::new(
        vec![industry("Seg", 0.1, 0.0)],
        vec![
            company("A", "Seg", Decimal::ONE, 10, 1.0),
            company("B", "Seg", Decimal::new(1000, 0), 10, 99.0),
        ],
        &cfg,
    )
    .unwrap();
    let mut engine = Engine::new(FixedStrategy::new(Focus::Retention), cfg).unwrap();
    let snap = engine.step(&mut world).unwrap();

    assert_eq!(snap.bankruptcies, vec!["A".to_string()]);
    let a = &world.companies()[0];
    let b = &world.companies()[1];
    assert!(!a.alive);
    assert!(a.last_profit < Decimal::ZERO);
    assert!(a.capital <= Decimal::ZERO);
    assert!(b.alive);
    assert!((b.market_share - 100.0).abs() < 1e-9);
    assert_eq!(snap.companies.len(), 1);
    assert_eq!(snap.companies[0].name, "B");

    let frozen = a.clone();
    engine.run(&mut world, 3).unwrap();
    let a = &world.companies()[0];
    assert!(!a.alive);
    assert_eq!(a.capital, frozen.capital);
    assert_eq!(a.market_share, frozen.market_share);
    assert_eq!(a.age_months, frozen.age_months);
    assert_eq!(engine.history().company("A").count(), 0);
}

#[test]
fn history_counts_alive_companies_per_cycle() {
    let cfg = SimConfig::default();
    let mut world = MarketWorld::generate(&cfg).unwrap();
    let mut engine = Engine::new(RuleBasedStrategy::default(), cfg).unwrap();
    let mut alive_per_cycle = Vec::new();
    engine
        .run_with(&mut world, 12, |snap| alive_per_cycle.push(snap.companies.len()))
        .unwrap();

    assert_eq!(alive_per_cycle.len(), 12);
    assert_eq!(engine.history().len(), alive_per_cycle.iter().sum::<usize>());
    for (i, n) in alive_per_cycle.iter().enumerate() {
        assert_eq!(engine.history().cycle(i as u32 + 1).count(), *n);
    }
    assert_eq!(engine.status().current_cycle, 12);
    assert!((engine.status().progress - 100.0).abs() < 1e-9);
}

#[test]
fn generated_run_completes() {
    let cfg = SimConfig {
        num_cycles: 6,
        ..SimConfig::default()
    };
    let (world, last, history) =
        sim_runtime::run_generated(FixedStrategy::new(Focus::Growth), cfg).unwrap();
    let last = last.unwrap();
    assert_eq!(last.cycle, 6);
    assert_eq!(last.companies.len(), world.get_all_alive_companies().len());
    assert_eq!(history.cycle(6).count(), last.companies.len());
    assert_shares_sum(&world);
}

#[test]
fn same_seed_same_history() {
    let run = |force_sequential: bool| {
        let cfg = SimConfig {
            rng_seed: 7,
            force_sequential,
            ..SimConfig::default()
        };
        let mut world = MarketWorld::generate(&cfg).unwrap();
        let mut engine = Engine::new(RandomStrategy::new(7), cfg).unwrap();
        engine.run(&mut world, 24).unwrap();
        engine.into_history()
    };
    let parallel = run(false);
    let again = run(false);
    let sequential = run(true);
    assert_eq!(parallel.rows(), again.rows());
    assert_eq!(parallel.rows(), sequential.rows());
}

#[test]
fn failed_cycle_restores_world() {
    let cfg = SimConfig::default();
    let mut seg = industry("Seg", 0.1, 0.0);
    seg.demand = 1e308;
    let mut world = MarketWorld::new(
        vec![seg],
        vec![company("A", "Seg", Decimal::new(100, 0), 10, 100.0)],
        &cfg,
    )
    .unwrap();
    let before: MarketConditions = *world.market_conditions();
    let mut engine = Engine::new(FixedStrategy::new(Focus::Growth), cfg).unwrap();

    let err = engine.step(&mut world).unwrap_err();
    assert!(matches!(err, EngineError::Company { .. }));
    assert_eq!(world.industries()[0].demand, 1e308);
    assert_eq!(*world.market_conditions(), before);
    assert_eq!(world.companies()[0].age_months, 0);
    assert!(world.companies()[0].strategy.is_none());
    assert_eq!(engine.current_cycle(), 0);
    assert!(engine.history().is_empty());
}

#[test]
fn failing_provider_falls_back_to_default() {
    struct Flaky(u32);
    impl StrategyProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn decide(
            &mut self,
            _: &Company,
            _: &MarketConditions,
        ) -> Result<Option<StrategyDecision>, StrategyError> {
            self.0 += 1;
            match self.0 % 3 {
                0 => Err(StrategyError::Provider("timeout".into())),
                1 => Ok(None),
                _ => Ok(Some(StrategyDecision::new(Focus::Efficiency))),
            }
        }
    }

    let cfg = SimConfig::default();
    let mut world = MarketWorld::generate(&cfg).unwrap();
    let provider: Box<dyn StrategyProvider> = Box::new(Flaky(0));
    let mut engine = Engine::new(provider, cfg).unwrap();
    engine.step(&mut world).unwrap();
    let focuses: Vec<Focus> = world
        .companies()
        .iter()
        .filter_map(|c| c.strategy.as_ref().map(|s| s.focus))
        .collect();
    assert_eq!(focuses.len(), world.companies().len());
    assert!(focuses.contains(&Focus::Growth));
    assert!(focuses.contains(&Focus::Efficiency));
}

#[test]
fn snapshot_serializes() {
    let cfg = SimConfig::default();
    let mut world = MarketWorld::generate(&cfg).unwrap();
    let mut engine = Engine::new(RuleBasedStrategy::default(), cfg).unwrap();
    let snap = engine.step(&mut world).unwrap();
    let json = serde_json::to_value(&snap).unwrap();
    assert_eq!(json["cycle"], 1);
    assert_eq!(json["date"], "2025-02-01");
    assert!(json["companies"].as_array().is_some());
    let status = serde_json::to_value(engine.status()).unwrap();
    assert_eq!(status["current_cycle"], 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn invariants_hold_over_long_runs(seed in any::<u64>()) {
        let cfg = SimConfig { rng_seed: seed, ..SimConfig::default() };
        let mut world = MarketWorld::generate(&cfg).unwrap();
        let mut engine = Engine::new(RandomStrategy::new(seed), cfg).unwrap();
        let mut dead: Vec<Company> = Vec::new();
        for _ in 0..36 {
            engine.step(&mut world).unwrap();
            assert_shares_sum(&world);
            for c in world.companies() {
                prop_assert!((0.0..=1.0).contains(&c.health));
                prop_assert!((0.0..=100.0).contains(&c.market_share));
            }
            for d in &dead {
                let now = world.companies().iter().find(|c| c.id == d.id).unwrap();
                prop_assert!(!now.alive);
                prop_assert_eq!(now.capital, d.capital);
                prop_assert_eq!(now.market_share, d.market_share);
                prop_assert_eq!(now.talent, d.talent);
            }
            dead = world.companies().iter().filter(|c| !c.alive).cloned().collect();
        }
    }
}
