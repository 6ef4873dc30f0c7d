#![deny(warnings)]

//! Persistence layer: SQLite run ledger and bincode snapshot checkpoints.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sim_core::{CompanyId, CycleSnapshot, HistoryRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("value out of range: {0}")]
    Range(String),
    #[error("unknown run {0}")]
    UnknownRun(i64),
}

/// Returns the default SQLite URL used for local saves.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/market.db"
}

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        label TEXT NOT NULL,
        seed INTEGER NOT NULL,
        total_cycles INTEGER NOT NULL,
        start_date TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS history (
        run_id INTEGER NOT NULL REFERENCES runs(id),
        seq INTEGER NOT NULL,
        cycle INTEGER NOT NULL,
        company_id TEXT NOT NULL,
        company TEXT NOT NULL,
        industry TEXT NOT NULL,
        capital_cents INTEGER NOT NULL,
        market_share REAL NOT NULL,
        PRIMARY KEY (run_id, seq)
    )",
    "CREATE TABLE IF NOT EXISTS snapshots (
        run_id INTEGER NOT NULL REFERENCES runs(id),
        cycle INTEGER NOT NULL,
        data BLOB NOT NULL,
        PRIMARY KEY (run_id, cycle)
    )",
];

/// Open (creating if needed) the database at `url` and apply the schema.
pub async fn init_db(url: &str) -> Result<SqlitePool, PersistenceError> {
    let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // Each connection to an in-memory database sees its own empty database.
    let max = if url.contains(":memory:") { 1 } else { 4 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max)
        .connect_with(opts)
        .await?;
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(&pool).await?;
    }
    info!(url, "database ready");
    Ok(pool)
}

/// Header of a stored run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: i64,
    pub label: String,
    pub seed: u64,
    pub total_cycles: u32,
    pub start_date: NaiveDate,
}

/// Register a new run and return its id.
pub async fn create_run(
    pool: &SqlitePool,
    label: &str,
    seed: u64,
    total_cycles: u32,
    start_date: NaiveDate,
) -> Result<i64, PersistenceError> {
    // Seeds are stored bit-for-bit in SQLite's signed 64-bit integer.
    let res = sqlx::query(
        "INSERT INTO runs (label, seed, total_cycles, start_date) VALUES (?, ?, ?, ?)",
    )
    .bind(label)
    .bind(seed as i64)
    .bind(i64::from(total_cycles))
    .bind(start_date.to_string())
    .execute(pool)
    .await?;
    let id = res.last_insert_rowid();
    info!(run_id = id, label, seed, "run created");
    Ok(id)
}

pub async fn load_run(pool: &SqlitePool, run_id: i64) -> Result<RunInfo, PersistenceError> {
    let row = sqlx::query("SELECT id, label, seed, total_cycles, start_date FROM runs WHERE id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await?
        .ok_or(PersistenceError::UnknownRun(run_id))?;
    let start: String = row.try_get("start_date")?;
    Ok(RunInfo {
        id: row.try_get("id")?,
        label: row.try_get("label")?,
        seed: row.try_get::<i64, _>("seed")? as u64,
        total_cycles: to_u32(row.try_get("total_cycles")?)?,
        start_date: NaiveDate::parse_from_str(&start, "%Y-%m-%d")
            .map_err(|e| PersistenceError::Range(format!("start_date {start}: {e}")))?,
    })
}

/// Money as whole cents, rounded half away from zero.
pub fn decimal_to_cents_i64(d: Decimal) -> Result<i64, PersistenceError> {
    d.checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|c| {
            c.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
        })
        .ok_or_else(|| PersistenceError::Range(format!("capital {d}")))
}

pub fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn to_u32(v: i64) -> Result<u32, PersistenceError> {
    u32::try_from(v).map_err(|_| PersistenceError::Range(format!("{v} does not fit u32")))
}

async fn ensure_run(pool: &SqlitePool, run_id: i64) -> Result<(), PersistenceError> {
    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM runs WHERE id = ?")
        .bind(run_id)
        .fetch_one(pool)
        .await?
        .try_get("n")?;
    if count == 0 {
        return Err(PersistenceError::UnknownRun(run_id));
    }
    Ok(())
}

/// Append history rows to a run in one transaction. Returns rows written.
pub async fn append_history(
    pool: &SqlitePool,
    run_id: i64,
    rows: &[HistoryRow],
) -> Result<u64, PersistenceError> {
    ensure_run(pool, run_id).await?;
    let mut tx = pool.begin().await?;
    let next: i64 = sqlx::query("SELECT COALESCE(MAX(seq) + 1, 0) AS next FROM history WHERE run_id = ?")
        .bind(run_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("next")?;
    for (offset, r) in rows.iter().enumerate() {
        sqlx::query(
            "INSERT INTO history
                (run_id, seq, cycle, company_id, company, industry, capital_cents, market_share)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(next + offset as i64)
        .bind(i64::from(r.cycle))
        .bind(&r.company_id.0)
        .bind(&r.company)
        .bind(&r.industry)
        .bind(decimal_to_cents_i64(r.capital)?)
        .bind(r.market_share)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    debug!(run_id, rows = rows.len(), "history appended");
    Ok(rows.len() as u64)
}

/// All history rows of a run in insertion order.
pub async fn load_history(pool: &SqlitePool, run_id: i64) -> Result<Vec<HistoryRow>, PersistenceError> {
    let rows = sqlx::query(
        "SELECT cycle, company_id, company, industry, capital_cents, market_share
         FROM history WHERE run_id = ? ORDER BY seq",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| -> Result<HistoryRow, PersistenceError> {
            Ok(HistoryRow {
                cycle: to_u32(row.try_get("cycle")?)?,
                company_id: CompanyId(row.try_get("company_id")?),
                company: row.try_get("company")?,
                industry: row.try_get("industry")?,
                capital: cents_to_decimal(row.try_get("capital_cents")?),
                market_share: row.try_get("market_share")?,
            })
        })
        .collect()
}

/// Serialize a snapshot for checkpointing.
pub fn encode_snapshot(snap: &CycleSnapshot) -> Result<Vec<u8>, PersistenceError> {
    Ok(bincode::serialize(snap)?)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<CycleSnapshot, PersistenceError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Store (or replace) the checkpoint of one cycle.
pub async fn save_snapshot(
    pool: &SqlitePool,
    run_id: i64,
    snap: &CycleSnapshot,
) -> Result<(), PersistenceError> {
    ensure_run(pool, run_id).await?;
    let data = encode_snapshot(snap)?;
    sqlx::query("INSERT OR REPLACE INTO snapshots (run_id, cycle, data) VALUES (?, ?, ?)")
        .bind(run_id)
        .bind(i64::from(snap.cycle))
        .bind(data)
        .execute(pool)
        .await?;
    Ok(())
}

/// Most recent checkpoint of a run, if any.
pub async fn latest_snapshot(
    pool: &SqlitePool,
    run_id: i64,
) -> Result<Option<CycleSnapshot>, PersistenceError> {
    let row = sqlx::query("SELECT data FROM snapshots WHERE run_id = ? ORDER BY cycle DESC LIMIT 1")
        .bind(run_id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => {
            let data: Vec<u8> = row.try_get("data")?;
            Ok(Some(decode_snapshot(&data)?))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sim_core::{CompanySummary, MarketConditions, StrategyDecision, Focus};

    fn row(cycle: u32, name: &str, cents: i64) -> HistoryRow {
        HistoryRow {
            cycle,
            company_id: CompanyId(format!("{:08x}", cents)),
            company: name.into(),
            industry: "SaaS Productivity".into(),
            capital: Decimal::new(cents, 2),
            market_share: 33.5,
        }
    }

    fn snapshot(cycle: u32) -> CycleSnapshot {
        CycleSnapshot {
            cycle,
            total_cycles: 12,
            date: NaiveDate::from_ymd_opt(2025, 1 + cycle, 1).unwrap(),
            companies: vec![CompanySummary {
                id: CompanyId("0000beef".into()),
                name: "NovaForge Productivity".into(),
                industry: "SaaS Productivity".into(),
                capital: Decimal::new(123_456, 2),
                market_share: 100.0,
                health: 0.75,
                talent: 11,
                last_profit: Decimal::new(-2_050, 2),
                last_revenue: Decimal::new(98_000, 2),
                strategy: StrategyDecision::new(Focus::Innovation).with_weight("spend_ratio", 0.1),
            }],
            market: MarketConditions {
                economic_growth: 0.12,
                tech_innovation: 0.5,
                market_volatility: 0.09,
            },
            bankruptcies: vec!["ApexEdge Productivity".into()],
        }
    }

    #[test]
    fn url_is_sqlite() {
        assert!(default_sqlite_url().starts_with("sqlite://"));
    }

    #[test]
    fn cents_conversion() {
        assert_eq!(decimal_to_cents_i64(Decimal::new(12_345, 2)).unwrap(), 12_345);
        assert_eq!(decimal_to_cents_i64(Decimal::new(-15, 3)).unwrap(), -2);
        assert_eq!(cents_to_decimal(-205), Decimal::new(-205, 2));
        assert!(decimal_to_cents_i64(Decimal::MAX).is_err());
    }

    #[test]
    fn snapshot_codec_roundtrip() {
        let snap = snapshot(3);
        let back = decode_snapshot(&encode_snapshot(&snap).unwrap()).unwrap();
        assert_eq!(back, snap);
        assert!(decode_snapshot(&[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn history_roundtrip() {
        let pool = init_db("sqlite::memory:").await.unwrap();
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let run = create_run(&pool, "test", u64::MAX, 12, start).await.unwrap();
        let info = load_run(&pool, run).await.unwrap();
        assert_eq!(info.seed, u64::MAX);
        assert_eq!(info.start_date, start);

        let first = vec![row(1, "A", 10_050), row(1, "B", -300)];
        let second = vec![row(2, "A", 12_000)];
        assert_eq!(append_history(&pool, run, &first).await.unwrap(), 2);
        append_history(&pool, run, &second).await.unwrap();
        let loaded = load_history(&pool, run).await.unwrap();
        let expected: Vec<_> = first.into_iter().chain(second).collect();
        assert_eq!(loaded, expected);
    }

    #[tokio::test]
    async fn unknown_run_rejected() {
        let pool = init_db("sqlite::memory:").await.unwrap();
        assert!(matches!(
            append_history(&pool, 99, &[row(1, "A", 1)]).await,
            Err(PersistenceError::UnknownRun(99))
        ));
        assert!(matches!(
            load_run(&pool, 99).await,
            Err(PersistenceError::UnknownRun(99))
        ));
    }

    #[tokio::test]
    async fn latest_snapshot_wins() {
        let pool = init_db("sqlite::memory:").await.unwrap();
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let run = create_run(&pool, "snap", 7, 12, start).await.unwrap();
        assert_eq!(latest_snapshot(&pool, run).await.unwrap(), None);
        save_snapshot(&pool, run, &snapshot(1)).await.unwrap();
        save_snapshot(&pool, run, &snapshot(2)).await.unwrap();
        let latest = latest_snapshot(&pool, run).await.unwrap().unwrap();
        assert_eq!(latest.cycle, 2);
    }

    proptest! {
        #[test]
        fn cents_roundtrip(cents in -1_000_000_000_000i64..1_000_000_000_000i64) {
            prop_assert_eq!(decimal_to_cents_i64(cents_to_decimal(cents)).unwrap(), cents);
        }
    }
}
