#![deny(warnings)]

//! Core domain models and invariants for the market simulation.
//!
//! This crate defines serializable types shared by every other crate
//! (industries, companies, strategy decisions, snapshots and history rows)
//! together with validation helpers that guard the invariants a run starts
//! from.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod generate;

/// Tolerance accepted on the per-industry share sum of generated input.
pub const SHARE_SUM_TOLERANCE: f64 = 0.05;

/// Normalized market size every industry starts from.
pub const INITIAL_DEMAND: f64 = 100.0;

/// Opaque, immutable company identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How much fixed capital an industry needs to operate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapitalIntensity {
    Low,
    Medium,
    High,
    VeryHigh,
}

/// A market segment with fixed economic parameters and an evolving demand.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Industry {
    /// Unique industry name, e.g. "Fintech Payments".
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Mean annual growth the industry was generated around.
    pub growth_rate_mean: f64,
    /// Spread of the growth draw (>= 0).
    pub volatility: f64,
    /// Realized growth rate for this run, fixed at generation.
    pub growth_rate: f64,
    /// Fixed-cost profile of companies in this industry.
    pub capital_intensity: CapitalIntensity,
    /// Entry barriers, free-form.
    pub barriers: String,
    /// Customer type, free-form (e.g. "B2B").
    pub customer_type: String,
    /// Normalized market size (>= 0); only the world update mutates it.
    pub demand: f64,
}

/// Run-wide macro conditions, recomputed once per cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketConditions {
    /// Macro growth in [-0.5, 0.5].
    pub economic_growth: f64,
    /// Innovation pressure in [0, 1].
    pub tech_innovation: f64,
    /// Market turbulence in [0, 1].
    pub market_volatility: f64,
}

/// Strategic focus a company pursues for one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Focus {
    /// Spend and hire to grow revenue.
    #[default]
    Growth,
    /// Cut costs and headcount.
    Efficiency,
    /// Keep customers with moderate spend.
    Retention,
    /// Invest in product, benefits from tech innovation.
    Innovation,
}

impl Focus {
    pub const ALL: [Focus; 4] = [
        Focus::Growth,
        Focus::Efficiency,
        Focus::Retention,
        Focus::Innovation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Focus::Growth => "growth",
            Focus::Efficiency => "efficiency",
            Focus::Retention => "retention",
            Focus::Innovation => "innovation",
        }
    }
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized focus label.
#[derive(Debug, Error, PartialEq)]
#[error("unknown strategy focus: {0}")]
pub struct UnknownFocus(pub String);

impl FromStr for Focus {
    type Err = UnknownFocus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "growth" => Ok(Focus::Growth),
            "efficiency" => Ok(Focus::Efficiency),
            "retention" => Ok(Focus::Retention),
            "innovation" => Ok(Focus::Innovation),
            _ => Err(UnknownFocus(s.to_string())),
        }
    }
}

/// A per-cycle strategic directive.
///
/// Only `focus` is required. `weights` is an open map of provider-specific
/// numbers; the engine reads a few well-known keys and passes the rest
/// through to snapshots untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub focus: Focus,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

impl StrategyDecision {
    /// Weight key overriding the fraction of revenue spent on strategy.
    pub const SPEND_RATIO: &'static str = "spend_ratio";
    /// Weight key overriding the hiring direction, in [-1, 1].
    pub const HIRING: &'static str = "hiring";

    pub fn new(focus: Focus) -> Self {
        Self {
            focus,
            weights: BTreeMap::new(),
        }
    }

    pub fn with_weight(mut self, key: impl Into<String>, value: f64) -> Self {
        self.weights.insert(key.into(), value);
        self
    }

    /// Returns a finite weight by name.
    pub fn weight(&self, key: &str) -> Option<f64> {
        self.weights.get(key).copied().filter(|v| v.is_finite())
    }
}

/// One competing firm.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    /// Name of the owning industry.
    pub industry: String,
    /// Cash position; may dip below zero right before the bankruptcy check.
    pub capital: Decimal,
    /// Workforce size proxy.
    pub talent: u32,
    /// Percent of the industry's demand captured, in [0, 100].
    pub market_share: f64,
    /// Smoothed viability in [0, 1]; 0 means dead.
    pub health: f64,
    /// Last resolved decision, absent before the first cycle.
    pub strategy: Option<StrategyDecision>,
    pub last_profit: Decimal,
    pub last_revenue: Decimal,
    pub age_months: u32,
    /// `false` is terminal.
    pub alive: bool,
}

impl Company {
    /// Creates a fresh company as generators hand it to the engine.
    pub fn new(
        id: CompanyId,
        name: impl Into<String>,
        industry: impl Into<String>,
        capital: Decimal,
        talent: u32,
        market_share: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            industry: industry.into(),
            capital,
            talent,
            market_share,
            health: 1.0,
            strategy: None,
            last_profit: Decimal::ZERO,
            last_revenue: Decimal::ZERO,
            age_months: 0,
            alive: true,
        }
    }

    /// Summary row for presentation; a missing strategy reads as the default.
    pub fn summary(&self) -> CompanySummary {
        CompanySummary {
            id: self.id.clone(),
            name: self.name.clone(),
            industry: self.industry.clone(),
            capital: self.capital,
            market_share: self.market_share,
            health: self.health,
            talent: self.talent,
            last_profit: self.last_profit,
            last_revenue: self.last_revenue,
            strategy: self.strategy.clone().unwrap_or_default(),
        }
    }
}

/// Simulation configuration parameters.
///
/// Every field has a default so partial YAML/JSON files are accepted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for deterministic RNG.
    pub rng_seed: u64,
    /// Planned number of monthly cycles.
    pub num_cycles: u32,
    /// Calendar date of cycle 0.
    pub start_date: NaiveDate,
    pub num_industries: usize,
    pub companies_per_industry: usize,
    pub initial_capital_min: f64,
    pub initial_capital_max: f64,
    /// Baseline workforce of a generated company.
    pub initial_talent: u32,
    /// Money earned per unit of captured demand.
    pub revenue_scale: f64,
    /// Monthly cost of one unit of talent.
    pub cost_per_talent: f64,
    /// Smoothing factor of the health average, in (0, 1].
    pub health_smoothing: f64,
    /// Share points moved per unit of relative profit performance.
    pub share_sensitivity: f64,
    /// Ceiling on a single company's share change per cycle.
    pub max_share_delta: f64,
    /// Maximum random-walk step of tech innovation per cycle.
    pub innovation_step: f64,
    /// Scale of per-company demand shocks relative to market volatility.
    pub shock_scale: f64,
    /// Resolve companies on the calling thread only.
    pub force_sequential: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rng_seed: 42,
            num_cycles: 12,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or(NaiveDate::MIN),
            num_industries: 3,
            companies_per_industry: 5,
            initial_capital_min: 100.0,
            initial_capital_max: 500.0,
            initial_talent: 10,
            revenue_scale: 10.0,
            cost_per_talent: 8.0,
            health_smoothing: 0.3,
            share_sensitivity: 2.0,
            max_share_delta: 3.0,
            innovation_step: 0.05,
            shock_scale: 0.1,
            force_sequential: false,
        }
    }
}

/// One history ledger entry: a company's position at the end of a cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub cycle: u32,
    pub company_id: CompanyId,
    pub company: String,
    pub industry: String,
    pub capital: Decimal,
    pub market_share: f64,
}

/// Company view exposed to presentation after each cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompanySummary {
    pub id: CompanyId,
    pub name: String,
    pub industry: String,
    pub capital: Decimal,
    pub market_share: f64,
    pub health: f64,
    pub talent: u32,
    pub last_profit: Decimal,
    pub last_revenue: Decimal,
    pub strategy: StrategyDecision,
}

/// Everything a consumer may read after a completed cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub cycle: u32,
    pub total_cycles: u32,
    pub date: NaiveDate,
    /// Alive companies, richest first.
    pub companies: Vec<CompanySummary>,
    pub market: MarketConditions,
    /// Names of companies that went bankrupt during this cycle.
    pub bankruptcies: Vec<String>,
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Numeric field must be finite.
    #[error("non-finite numeric value in {0}")]
    NonFinite(String),
    /// Names must not be blank.
    #[error("empty name")]
    EmptyName,
    #[error("duplicate industry: {0}")]
    DuplicateIndustry(String),
    #[error("duplicate company id: {0}")]
    DuplicateCompany(String),
    #[error("industry {0} has negative demand or volatility")]
    NegativeIndustryParam(String),
    #[error("company {0} references unknown industry {1}")]
    UnknownIndustry(String, String),
    #[error("company {0} has market share outside [0,100]")]
    InvalidShare(String),
    /// Generated companies must be alive, healthy, unaged and undecided.
    #[error("company {0} is not in its initial state")]
    NotFresh(String),
    #[error("market shares of {industry} sum to {sum}, expected 100")]
    ShareSum { industry: String, sum: f64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Validate a single industry.
pub fn validate_industry(i: &Industry) -> Result<(), ValidationError> {
    if i.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let finite = [i.growth_rate_mean, i.volatility, i.growth_rate, i.demand]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return Err(ValidationError::NonFinite(i.name.clone()));
    }
    if i.demand < 0.0 || i.volatility < 0.0 {
        return Err(ValidationError::NegativeIndustryParam(i.name.clone()));
    }
    Ok(())
}

/// Validate a company as handed over by a generator.
pub fn validate_company(c: &Company) -> Result<(), ValidationError> {
    if c.name.trim().is_empty() || c.id.0.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if !c.market_share.is_finite() || !c.health.is_finite() {
        return Err(ValidationError::NonFinite(c.id.0.clone()));
    }
    if !(0.0..=100.0).contains(&c.market_share) {
        return Err(ValidationError::InvalidShare(c.id.0.clone()));
    }
    if !c.alive || c.health != 1.0 || c.age_months != 0 || c.strategy.is_some() {
        return Err(ValidationError::NotFresh(c.id.0.clone()));
    }
    Ok(())
}

/// Validate the initial population, including cross-references and the
/// per-industry share sum.
pub fn validate_population(
    industries: &[Industry],
    companies: &[Company],
) -> Result<(), ValidationError> {
    let mut names: BTreeSet<&str> = BTreeSet::new();
    for i in industries {
        validate_industry(i)?;
        if !names.insert(i.name.as_str()) {
            return Err(ValidationError::DuplicateIndustry(i.name.clone()));
        }
    }

    let mut ids: BTreeSet<&CompanyId> = BTreeSet::new();
    let mut sums: BTreeMap<&str, f64> = BTreeMap::new();
    for c in companies {
        validate_company(c)?;
        if !ids.insert(&c.id) {
            return Err(ValidationError::DuplicateCompany(c.id.0.clone()));
        }
        if !names.contains(c.industry.as_str()) {
            return Err(ValidationError::UnknownIndustry(
                c.id.0.clone(),
                c.industry.clone(),
            ));
        }
        *sums.entry(c.industry.as_str()).or_insert(0.0) += c.market_share;
    }
    for (industry, sum) in sums {
        if (sum - 100.0).abs() > SHARE_SUM_TOLERANCE {
            return Err(ValidationError::ShareSum {
                industry: industry.to_string(),
                sum,
            });
        }
    }
    Ok(())
}

/// Validate configuration ranges.
pub fn validate_config(cfg: &SimConfig) -> Result<(), ValidationError> {
    let finite = [
        cfg.initial_capital_min,
        cfg.initial_capital_max,
        cfg.revenue_scale,
        cfg.cost_per_talent,
        cfg.health_smoothing,
        cfg.share_sensitivity,
        cfg.max_share_delta,
        cfg.innovation_step,
        cfg.shock_scale,
    ]
    .iter()
    .all(|v| v.is_finite());
    if !finite {
        return Err(ValidationError::NonFinite("config".to_string()));
    }
    if cfg.initial_capital_min <= 0.0 || cfg.initial_capital_min > cfg.initial_capital_max {
        return Err(ValidationError::InvalidConfig("initial capital range"));
    }
    if cfg.health_smoothing <= 0.0 || cfg.health_smoothing > 1.0 {
        return Err(ValidationError::InvalidConfig("health_smoothing must be in (0,1]"));
    }
    if cfg.revenue_scale < 0.0 || cfg.cost_per_talent < 0.0 {
        return Err(ValidationError::InvalidConfig("negative economic scale"));
    }
    if cfg.max_share_delta < 0.0 || cfg.share_sensitivity < 0.0 {
        return Err(ValidationError::InvalidConfig("negative share parameter"));
    }
    if cfg.innovation_step < 0.0 || cfg.shock_scale < 0.0 {
        return Err(ValidationError::InvalidConfig("negative noise parameter"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn industry(name: &str) -> Industry {
        Industry {
            name: name.to_string(),
            description: "test".to_string(),
            growth_rate_mean: 0.1,
            volatility: 0.05,
            growth_rate: 0.1,
            capital_intensity: CapitalIntensity::Medium,
            barriers: "low".to_string(),
            customer_type: "B2B".to_string(),
            demand: INITIAL_DEMAND,
        }
    }

    fn company(id: &str, industry: &str, share: f64) -> Company {
        Company::new(
            CompanyId(id.to_string()),
            format!("Co {id}"),
            industry,
            Decimal::new(100, 0),
            10,
            share,
        )
    }

    #[test]
    fn fresh_company_defaults() {
        let c = company("a", "Seg", 100.0);
        assert!(c.alive);
        assert_eq!(c.health, 1.0);
        assert_eq!(c.age_months, 0);
        assert!(c.strategy.is_none());
        assert_eq!(c.last_profit, Decimal::ZERO);
        assert_eq!(c.summary().strategy.focus, Focus::Growth);
    }

    #[test]
    fn focus_parses_case_insensitively() {
        assert_eq!("Growth".parse::<Focus>().unwrap(), Focus::Growth);
        assert_eq!(" EFFICIENCY ".parse::<Focus>().unwrap(), Focus::Efficiency);
        assert!("hype".parse::<Focus>().is_err());
        for f in Focus::ALL {
            assert_eq!(f.as_str().parse::<Focus>().unwrap(), f);
        }
    }

    #[test]
    fn decision_ignores_non_finite_weights() {
        let d = StrategyDecision::new(Focus::Retention)
            .with_weight("spend_ratio", 0.2)
            .with_weight("hiring", f64::NAN);
        assert_eq!(d.weight(StrategyDecision::SPEND_RATIO), Some(0.2));
        assert_eq!(d.weight(StrategyDecision::HIRING), None);
    }

    #[test]
    fn decision_without_weights_deserializes() {
        let d: StrategyDecision = serde_json::from_str(r#"{"focus":"innovation"}"#).unwrap();
        assert_eq!(d.focus, Focus::Innovation);
        assert!(d.weights.is_empty());
    }

    #[test]
    fn population_accepts_valid_input() {
        let inds = vec![industry("A"), industry("B")];
        let cos = vec![
            company("1", "A", 60.0),
            company("2", "A", 40.0),
            company("3", "B", 100.0),
        ];
        validate_population(&inds, &cos).unwrap();
    }

    #[test]
    fn population_rejects_bad_input() {
        let inds = vec![industry("A")];
        let dup = vec![company("1", "A", 50.0), company("1", "A", 50.0)];
        assert_eq!(
            validate_population(&inds, &dup),
            Err(ValidationError::DuplicateCompany("1".to_string()))
        );
        let orphan = vec![company("1", "Z", 100.0)];
        assert!(matches!(
            validate_population(&inds, &orphan),
            Err(ValidationError::UnknownIndustry(_, _))
        ));
        let short = vec![company("1", "A", 50.0), company("2", "A", 30.0)];
        assert!(matches!(
            validate_population(&inds, &short),
            Err(ValidationError::ShareSum { .. })
        ));
        let mut dead = company("1", "A", 100.0);
        dead.alive = false;
        assert_eq!(
            validate_population(&inds, &[dead]),
            Err(ValidationError::NotFresh("1".to_string()))
        );
        assert_eq!(
            validate_population(&[industry("A"), industry("A")], &[]),
            Err(ValidationError::DuplicateIndustry("A".to_string()))
        );
    }

    #[test]
    fn config_fills_defaults() {
        let cfg: SimConfig = serde_json::from_str(r#"{"rng_seed": 7, "num_cycles": 24}"#).unwrap();
        assert_eq!(cfg.rng_seed, 7);
        assert_eq!(cfg.num_cycles, 24);
        assert_eq!(cfg.companies_per_industry, 5);
        validate_config(&cfg).unwrap();
    }

    #[test]
    fn config_rejects_bad_ranges() {
        let cfg = SimConfig {
            health_smoothing: 0.0,
            ..SimConfig::default()
        };
        assert!(validate_config(&cfg).is_err());
        let cfg = SimConfig {
            initial_capital_min: 600.0,
            ..SimConfig::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn snapshot_roundtrip() {
        let snap = CycleSnapshot {
            cycle: 3,
            total_cycles: 12,
            date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            companies: vec![company("1", "A", 100.0).summary()],
            market: MarketConditions {
                economic_growth: 0.1,
                tech_innovation: 0.5,
                market_volatility: 0.08,
            },
            bankruptcies: vec!["Gone Inc".to_string()],
        };
        let s = serde_json::to_string_pretty(&snap).unwrap();
        let back: CycleSnapshot = serde_json::from_str(&s).unwrap();
        assert_eq!(back.cycle, 3);
        assert_eq!(back.date, snap.date);
        assert_eq!(back.companies.len(), 1);
        assert_eq!(back.companies[0].capital, Decimal::new(100, 0));
        assert_eq!(back.bankruptcies, snap.bankruptcies);
    }

    proptest! {
        #[test]
        fn share_outside_range_rejected(share in 100.001f64..1_000.0) {
            let c = company("x", "A", share);
            prop_assert_eq!(validate_company(&c), Err(ValidationError::InvalidShare("x".to_string())));
        }

        #[test]
        fn negative_demand_rejected(demand in -1_000.0f64..-0.001) {
            let mut i = industry("A");
            i.demand = demand;
            prop_assert!(validate_industry(&i).is_err());
        }
    }
}
