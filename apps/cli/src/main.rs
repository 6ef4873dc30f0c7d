#![deny(warnings)]

//! Headless CLI: generate a market, run it month by month and report.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use sim_ai::{FixedStrategy, RandomStrategy, RuleBasedStrategy, StrategyProvider};
use sim_core::{CycleSnapshot, Focus, SimConfig};
use sim_runtime::{Engine, MarketWorld};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: market-sim [--cycles N] [--industries N] [--companies N] [--seed N]
                  [--config FILE.yaml] [--strategy rule|random|fixed:<focus>|script:<dir>|pack:<id>]
                  [--packs DIR] [--sequential] [--db URL] [--json FILE] [--quiet]";

const DEFAULT_PACKS: &str = "assets/strategies";

#[derive(Debug, Default, PartialEq)]
struct Args {
    cycles: Option<u32>,
    industries: Option<usize>,
    companies: Option<usize>,
    seed: Option<u64>,
    config: Option<PathBuf>,
    strategy: Option<String>,
    packs: Option<PathBuf>,
    sequential: bool,
    db: Option<String>,
    json: Option<PathBuf>,
    quiet: bool,
    help: bool,
    version: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    fn value<T: std::str::FromStr>(flag: &str, v: Option<String>) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        let v = v.ok_or_else(|| anyhow!("{flag} needs a value"))?;
        v.parse::<T>()
            .map_err(|e| anyhow!("invalid value {v:?} for {flag}: {e}"))
    }

    let mut out = Args::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--cycles" => out.cycles = Some(value(&arg, it.next())?),
            "--industries" => out.industries = Some(value(&arg, it.next())?),
            "--companies" => out.companies = Some(value(&arg, it.next())?),
            "--seed" => out.seed = Some(value(&arg, it.next())?),
            "--config" => out.config = Some(value(&arg, it.next())?),
            "--strategy" => out.strategy = Some(value(&arg, it.next())?),
            "--packs" => out.packs = Some(value(&arg, it.next())?),
            "--db" => out.db = Some(value(&arg, it.next())?),
            "--json" => out.json = Some(value(&arg, it.next())?),
            "--sequential" => out.sequential = true,
            "--quiet" => out.quiet = true,
            "-h" | "--help" => out.help = true,
            "-V" | "--version" => out.version = true,
            other => bail!("unknown argument {other}\n{USAGE}"),
        }
    }
    Ok(out)
}

fn load_config(args: &Args) -> Result<SimConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str::<SimConfig>(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    if let Some(n) = args.cycles {
        cfg.num_cycles = n;
    }
    if let Some(n) = args.industries {
        cfg.num_industries = n;
    }
    if let Some(n) = args.companies {
        cfg.companies_per_industry = n;
    }
    if let Some(seed) = args.seed {
        cfg.rng_seed = seed;
    }
    if args.sequential {
        cfg.force_sequential = true;
    }
    Ok(cfg)
}

fn build_provider(kind: &str, seed: u64, packs: &Path) -> Result<Box<dyn StrategyProvider>> {
    let provider: Box<dyn StrategyProvider> = match kind.split_once(':') {
        None if kind == "rule" => Box::new(RuleBasedStrategy::default()),
        None if kind == "random" => Box::new(RandomStrategy::new(seed)),
        Some(("fixed", focus)) => Box::new(FixedStrategy::new(focus.parse::<Focus>()?)),
        Some(("script", dir)) => Box::new(modkit::ScriptedStrategy::open(dir)?),
        Some(("pack", id)) => {
            let all = modkit::load_all(packs)?;
            let pack = all
                .iter()
                .find(|p| p.meta.id == id)
                .ok_or_else(|| anyhow!("no strategy pack {id} under {}", packs.display()))?;
            Box::new(modkit::ScriptedStrategy::from_pack(pack)?)
        }
        _ => bail!("unknown strategy {kind:?}\n{USAGE}"),
    };
    Ok(provider)
}

fn print_cycle(snap: &CycleSnapshot) {
    println!(
        "[{:>3}/{}] {} | alive {:>3} | growth {:+.3} | innovation {:.3} | volatility {:.3}",
        snap.cycle,
        snap.total_cycles,
        snap.date,
        snap.companies.len(),
        snap.market.economic_growth,
        snap.market.tech_innovation,
        snap.market.market_volatility
    );
    for name in &snap.bankruptcies {
        println!("          bankrupt: {name}");
    }
}

fn print_final(world: &MarketWorld) {
    println!();
    println!(
        "{:<32} {:<26} {:>12} {:>7} {:>6} {:>6} {:<10}",
        "company", "industry", "capital", "share", "health", "talent", "focus"
    );
    let mut alive = world.get_all_alive_companies();
    alive.sort_by(|a, b| b.capital.cmp(&a.capital));
    for c in alive {
        let focus = c.strategy.as_ref().map(|s| s.focus).unwrap_or_default();
        println!(
            "{:<32} {:<26} {:>12} {:>6.2}% {:>6.2} {:>6} {:<10}",
            c.name,
            c.industry,
            c.capital.to_string(),
            c.market_share,
            c.health,
            c.talent,
            focus.as_str()
        );
    }
    let dead = world.companies().iter().filter(|c| !c.alive).count();
    let m = world.market_conditions();
    println!();
    println!(
        "market | growth {:+.3} | innovation {:.3} | volatility {:.3} | bankrupt {}",
        m.economic_growth, m.tech_innovation, m.market_volatility, dead
    );
    for i in world.industries() {
        println!(
            "  {:<26} demand {:>9.2} | growth rate {:+.3} | shares {:.2}",
            i.name,
            i.demand,
            i.growth_rate,
            world.share_sum(&i.name)
        );
    }
}

fn export_json<P: StrategyProvider>(
    path: &Path,
    world: &MarketWorld,
    engine: &Engine<P>,
) -> Result<()> {
    let companies: Vec<_> = world
        .get_all_alive_companies()
        .into_iter()
        .map(|c| c.summary())
        .collect();
    let status = engine.status();
    let doc = json!({
        "companies": companies,
        "market_data": {
            "conditions": world.market_conditions(),
            "industries": world.industries(),
        },
        "history": engine.history().columns(),
        "current_cycle": status.current_cycle,
        "total_cycles": status.total_cycles,
    });
    std::fs::write(path, serde_json::to_string_pretty(&doc)?)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "results exported");
    Ok(())
}

fn persist<P: StrategyProvider>(
    url: &str,
    cfg: &SimConfig,
    engine: &Engine<P>,
    last: Option<&CycleSnapshot>,
) -> Result<i64> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let pool = persistence::init_db(url).await?;
        let label = format!("{} seed {}", engine.provider().name(), cfg.rng_seed);
        let run = persistence::create_run(
            &pool,
            &label,
            cfg.rng_seed,
            engine.status().total_cycles,
            cfg.start_date,
        )
        .await?;
        persistence::append_history(&pool, run, engine.history().rows()).await?;
        if let Some(snap) = last {
            persistence::save_snapshot(&pool, run, snap).await?;
        }
        pool.close().await;
        Ok::<_, anyhow::Error>(run)
    })
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }
    if args.version {
        println!(
            "market-sim {} ({} {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }

    let cfg = load_config(&args)?;
    let packs = args.packs.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_PACKS));
    let provider = build_provider(
        args.strategy.as_deref().unwrap_or("rule"),
        cfg.rng_seed,
        &packs,
    )?;
    info!(seed = cfg.rng_seed, cycles = cfg.num_cycles, provider = provider.name(), "starting CLI");

    let mut world = MarketWorld::generate(&cfg)?;
    let cycles = cfg.num_cycles;
    let mut engine = Engine::new(provider, cfg.clone())?;
    let mut last = None;
    engine.run_with(&mut world, cycles, |snap| {
        if !args.quiet {
            print_cycle(snap);
        }
        last = Some(snap.clone());
    })?;

    print_final(&world);

    if let Some(path) = &args.json {
        export_json(path, &world, &engine)?;
    }
    if let Some(url) = &args.db {
        let run = persist(url, &cfg, &engine, last.as_ref())?;
        println!("saved run {run} to {url}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Result<Args> {
        parse_args(v.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_flags() {
        let a = args(&["--cycles", "24", "--seed", "9", "--strategy", "fixed:growth", "--sequential"])
            .unwrap();
        assert_eq!(a.cycles, Some(24));
        assert_eq!(a.seed, Some(9));
        assert_eq!(a.strategy.as_deref(), Some("fixed:growth"));
        assert!(a.sequential);
        assert!(args(&["--cycles"]).is_err());
        assert!(args(&["--cycles", "-1"]).is_err());
        assert!(args(&["--bogus"]).is_err());
    }

    #[test]
    fn flags_override_config() {
        let a = args(&["--cycles", "6", "--industries", "2", "--companies", "4"]).unwrap();
        let cfg = load_config(&a).unwrap();
        assert_eq!(cfg.num_cycles, 6);
        assert_eq!(cfg.num_industries, 2);
        assert_eq!(cfg.companies_per_industry, 4);
        assert_eq!(cfg.rng_seed, SimConfig::default().rng_seed);
    }

    #[test]
    fn yaml_config_fills_defaults() {
        let cfg: SimConfig = serde_yaml::from_str("rng_seed: 5\nnum_cycles: 3\n").unwrap();
        assert_eq!(cfg.rng_seed, 5);
        assert_eq!(cfg.num_cycles, 3);
        assert_eq!(cfg.companies_per_industry, SimConfig::default().companies_per_industry);
    }

    #[test]
    fn provider_kinds() {
        let packs = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets/strategies");
        assert_eq!(build_provider("rule", 1, &packs).unwrap().name(), "rule-based");
        assert_eq!(build_provider("random", 1, &packs).unwrap().name(), "random");
        assert_eq!(build_provider("fixed:retention", 1, &packs).unwrap().name(), "fixed");
        assert_eq!(build_provider("pack:momentum", 1, &packs).unwrap().name(), "momentum");
        assert!(build_provider("fixed:hype", 1, &packs).is_err());
        assert!(build_provider("pack:missing", 1, &packs).is_err());
        assert!(build_provider("oracle", 1, &packs).is_err());
    }
}
