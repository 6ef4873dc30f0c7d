use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use sim_ai::{resolve_decision, RandomStrategy, RuleBasedStrategy};
use sim_core::{Company, CompanyId, MarketConditions};

fn build_companies(n: usize) -> Vec<Company> {
    (0..n)
        .map(|i| {
            let mut c = Company::new(
                CompanyId(format!("{i:08x}")),
                format!("C{i}"),
                "Seg",
                Decimal::new(250, 0),
                10 + (i % 7) as u32,
                100.0 / n as f64,
            );
            c.age_months = (i % 12) as u32;
            c.last_revenue = Decimal::new(200 + i as i64, 0);
            c.last_profit = Decimal::new(i as i64 % 40 - 20, 0);
            c
        })
        .collect()
}

fn bench_decisions(c: &mut Criterion) {
    let companies = build_companies(1_000);
    let market = MarketConditions {
        economic_growth: 0.12,
        tech_innovation: 0.55,
        market_volatility: 0.1,
    };
    let mut rules = RuleBasedStrategy::default();
    c.bench_function("rule-based 1000 decisions", |b| {
        b.iter(|| {
            for co in &companies {
                black_box(resolve_decision(&mut rules, co, &market));
            }
        })
    });
    let mut random = RandomStrategy::new(42);
    c.bench_function("random 1000 decisions", |b| {
        b.iter(|| {
            for co in &companies {
                black_box(resolve_decision(&mut random, co, &market));
            }
        })
    });
}

criterion_group!(benches, bench_decisions);
criterion_main!(benches);
