//! Append-only ledger of per-cycle company positions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::HistoryRow;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct History {
    rows: Vec<HistoryRow>,
}

/// Column-oriented view of the ledger, the shape charting front ends expect.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryColumns {
    pub cycle: Vec<u32>,
    pub company: Vec<String>,
    pub capital: Vec<Decimal>,
    pub market_share: Vec<f64>,
}

impl History {
    pub(crate) fn append(&mut self, rows: impl IntoIterator<Item = HistoryRow>) {
        self.rows.extend(rows);
    }

    pub fn rows(&self) -> &[HistoryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows recorded at the end of `cycle`.
    pub fn cycle(&self, cycle: u32) -> impl Iterator<Item = &HistoryRow> + '_ {
        self.rows.iter().filter(move |r| r.cycle == cycle)
    }

    /// Rows of one company, matched case-insensitively by name.
    pub fn company<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HistoryRow> + 'a {
        self.rows
            .iter()
            .filter(move |r| r.company.eq_ignore_ascii_case(name))
    }

    pub fn columns(&self) -> HistoryColumns {
        let mut cols = HistoryColumns::default();
        for r in &self.rows {
            cols.cycle.push(r.cycle);
            cols.company.push(r.company.clone());
            cols.capital.push(r.capital);
            cols.market_share.push(r.market_share);
        }
        cols
    }
}
