#![deny(warnings)]

//! Rhai strategy packs: scripted decision makers loaded from disk.
//!
//! A pack is a directory holding `metadata.yaml` and `script.rhai`. The script
//! defines `fn decide(company, market)` and returns a map such as
//! `#{ focus: "growth", spend_ratio: 0.2 }`.

use rhai::{Dynamic, Engine, Map, Scope, AST};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use sim_ai::{StrategyError, StrategyProvider};
use sim_core::{Company, Focus, MarketConditions, StrategyDecision};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Metadata schema version understood by this engine.
pub const ENGINE_SCHEMA_VERSION: u32 = 1;
/// Operation budget of a single `decide` call.
pub const DEFAULT_MAX_OPERATIONS: u64 = 50_000;

const ENTRY_POINT: &str = "decide";

/// Metadata for a strategy pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackMeta {
    pub id: String,
    pub name: String,
    pub version: String,
    pub engine_schema_version: u32,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Error)]
pub enum ModError {
    #[error("invalid metadata: {0}")]
    InvalidMeta(String),
    #[error("pack {id} targets schema {found}, engine supports {expected}")]
    SchemaMismatch { id: String, found: u32, expected: u32 },
    #[error("script does not define fn decide(company, market)")]
    MissingEntryPoint,
    #[error("io error: {0}")]
    Io(String),
    #[error("rhai error: {0}")]
    Rhai(String),
}

impl From<std::io::Error> for ModError {
    fn from(e: std::io::Error) -> Self {
        ModError::Io(e.to_string())
    }
}

impl From<Box<rhai::EvalAltResult>> for ModError {
    fn from(e: Box<rhai::EvalAltResult>) -> Self {
        ModError::Rhai(e.to_string())
    }
}

impl From<rhai::ParseError> for ModError {
    fn from(e: rhai::ParseError) -> Self {
        ModError::Rhai(e.to_string())
    }
}

/// A pack found on disk.
#[derive(Debug, Clone)]
pub struct StrategyPack {
    pub meta: PackMeta,
    pub dir: PathBuf,
    pub script_path: PathBuf,
}

/// Read one pack directory.
pub fn load_pack<P: AsRef<Path>>(dir: P) -> Result<StrategyPack, ModError> {
    let dir = dir.as_ref().to_path_buf();
    let meta_text = fs::read_to_string(dir.join("metadata.yaml"))?;
    let meta: PackMeta =
        serde_yaml::from_str(&meta_text).map_err(|e| ModError::InvalidMeta(e.to_string()))?;
    if meta.id.trim().is_empty() {
        return Err(ModError::InvalidMeta("empty id".into()));
    }
    if meta.engine_schema_version != ENGINE_SCHEMA_VERSION {
        return Err(ModError::SchemaMismatch {
            id: meta.id,
            found: meta.engine_schema_version,
            expected: ENGINE_SCHEMA_VERSION,
        });
    }
    let script_path = dir.join("script.rhai");
    if !script_path.is_file() {
        return Err(ModError::Io(format!("missing {}", script_path.display())));
    }
    Ok(StrategyPack {
        meta,
        dir,
        script_path,
    })
}

/// Load every pack under `root`, sorted by id. Directories without both pack
/// files are skipped.
pub fn load_all<P: AsRef<Path>>(root: P) -> Result<Vec<StrategyPack>, ModError> {
    let mut packs = Vec::new();
    for ent in fs::read_dir(root.as_ref())? {
        let ent = ent?;
        if !ent.file_type()?.is_dir() {
            continue;
        }
        let dir = ent.path();
        if !dir.join("metadata.yaml").exists() || !dir.join("script.rhai").exists() {
            continue;
        }
        packs.push(load_pack(&dir)?);
    }
    packs.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
    info!(count = packs.len(), root = %root.as_ref().display(), "loaded strategy packs");
    Ok(packs)
}

/// Returns a Rhai engine with the operation budget applied.
pub fn new_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(DEFAULT_MAX_OPERATIONS);
    engine.set_max_call_levels(32);
    engine
}

fn compile(engine: &Engine, script: &str) -> Result<AST, ModError> {
    let ast = engine.compile(script)?;
    let has_entry = ast
        .iter_functions()
        .any(|f| f.name == ENTRY_POINT && f.params.len() == 2);
    if !has_entry {
        return Err(ModError::MissingEntryPoint);
    }
    Ok(ast)
}

struct ScriptFile {
    path: PathBuf,
    mtime: SystemTime,
}

fn modified(path: &Path) -> Result<SystemTime, ModError> {
    Ok(fs::metadata(path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH))
}

/// Strategy provider backed by a compiled Rhai script.
pub struct ScriptedStrategy {
    name: String,
    engine: Engine,
    ast: AST,
    file: Option<ScriptFile>,
}

impl ScriptedStrategy {
    pub fn from_source(name: impl Into<String>, script: &str) -> Result<Self, ModError> {
        let engine = new_engine();
        let ast = compile(&engine, script)?;
        Ok(Self {
            name: name.into(),
            engine,
            ast,
            file: None,
        })
    }

    pub fn from_pack(pack: &StrategyPack) -> Result<Self, ModError> {
        let script = fs::read_to_string(&pack.script_path)?;
        let mut strategy = Self::from_source(pack.meta.id.clone(), &script)?;
        strategy.file = Some(ScriptFile {
            path: pack.script_path.clone(),
            mtime: modified(&pack.script_path)?,
        });
        Ok(strategy)
    }

    /// Load the pack in `dir` and compile its script.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ModError> {
        Self::from_pack(&load_pack(dir)?)
    }

    /// Recompile the script if its file changed on disk. A script that no
    /// longer compiles leaves the previous version in place.
    pub fn reload_if_changed(&mut self) -> Result<bool, ModError> {
        let Some(file) = &self.file else {
            return Ok(false);
        };
        let mtime = modified(&file.path)?;
        if mtime == file.mtime {
            return Ok(false);
        }
        let script = fs::read_to_string(&file.path)?;
        let ast = compile(&self.engine, &script)?;
        info!(strategy = %self.name, "reloaded strategy script");
        self.ast = ast;
        if let Some(file) = &mut self.file {
            file.mtime = mtime;
        }
        Ok(true)
    }
}

fn money(d: rust_decimal::Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn company_map(c: &Company) -> Map {
    let mut m = Map::new();
    m.insert("id".into(), c.id.0.clone().into());
    m.insert("name".into(), c.name.clone().into());
    m.insert("industry".into(), c.industry.clone().into());
    m.insert("capital".into(), Dynamic::from_float(money(c.capital)));
    m.insert("talent".into(), Dynamic::from_int(i64::from(c.talent)));
    m.insert("market_share".into(), Dynamic::from_float(c.market_share));
    m.insert("health".into(), Dynamic::from_float(c.health));
    m.insert("last_profit".into(), Dynamic::from_float(money(c.last_profit)));
    m.insert("last_revenue".into(), Dynamic::from_float(money(c.last_revenue)));
    m.insert("age_months".into(), Dynamic::from_int(i64::from(c.age_months)));
    let focus = match &c.strategy {
        Some(s) => s.focus.as_str().into(),
        None => Dynamic::UNIT,
    };
    m.insert("focus".into(), focus);
    m
}

fn market_map(market: &MarketConditions) -> Map {
    let mut m = Map::new();
    m.insert("economic_growth".into(), Dynamic::from_float(market.economic_growth));
    m.insert("tech_innovation".into(), Dynamic::from_float(market.tech_innovation));
    m.insert("market_volatility".into(), Dynamic::from_float(market.market_volatility));
    m
}

/// Turn a script result into a decision. `()` means no opinion; numeric map
/// entries other than `focus` become weights, anything else is ignored.
pub fn parse_decision(value: Dynamic) -> Result<Option<StrategyDecision>, StrategyError> {
    if value.is_unit() {
        return Ok(None);
    }
    let type_name = value.type_name();
    let map = value
        .try_cast::<Map>()
        .ok_or_else(|| StrategyError::Malformed(format!("expected a map, got {type_name}")))?;
    let focus: Focus = map
        .get("focus")
        .ok_or_else(|| StrategyError::Malformed("missing focus".into()))?
        .clone()
        .into_string()
        .map_err(|t| StrategyError::Malformed(format!("focus must be a string, got {t}")))?
        .parse()?;

    let mut decision = StrategyDecision::new(focus);
    for (key, v) in map.iter().filter(|(k, _)| k.as_str() != "focus") {
        let n = match (v.as_float(), v.as_int()) {
            (Ok(f), _) => f,
            (_, Ok(i)) => i as f64,
            _ => {
                debug!(key = %key, "ignoring non-numeric weight");
                continue;
            }
        };
        decision = decision.with_weight(key.as_str(), n);
    }
    Ok(Some(decision))
}

impl StrategyProvider for ScriptedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(
        &mut self,
        company: &Company,
        market: &MarketConditions,
    ) -> Result<Option<StrategyDecision>, StrategyError> {
        let mut scope = Scope::new();
        let value = self
            .engine
            .call_fn::<Dynamic>(
                &mut scope,
                &self.ast,
                ENTRY_POINT,
                (company_map(company), market_map(market)),
            )
            .map_err(|e| StrategyError::Provider(e.to_string()))?;
        parse_decision(value)
    }

    fn begin_cycle(&mut self, _cycle: u32) -> Result<(), StrategyError> {
        match self.reload_if_changed() {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(strategy = %self.name, error = %e, "keeping previous script");
                Err(StrategyError::Provider(e.to_string()))
            }
        }
    }
}
