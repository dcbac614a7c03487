//! FinancialSeries: the in-memory, chronologically ordered record set.
//!
//! Loaded once per run, mutated only through `upsert`, written back as a
//! single snapshot by `csv_store::SnapshotStore::save_atomic`.

pub mod csv_store;
pub mod health;

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::{CompanyScope, FinancialRecord, NaturalKey};
use crate::pipeline::validation::growth_pct;

pub use csv_store::SnapshotStore;
pub use health::{check_snapshot, SnapshotHealth, SnapshotSummary};

#[derive(Error, Debug)]
pub enum SeriesError {
    #[error("Cannot read snapshot {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Invalid snapshot row {line}: {reason}")]
    InvalidRow { line: u64, reason: String },

    #[error("Duplicate key in snapshot: {0}")]
    DuplicateKey(NaturalKey),

    #[error("Snapshot write to {path} failed: {reason}")]
    Persistence { path: PathBuf, reason: String },
}

/// Result of inserting a record by natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Records partitioned by company, each partition sorted by report date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinancialSeries {
    by_company: BTreeMap<String, Vec<FinancialRecord>>,
}

impl FinancialSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_company.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &NaturalKey) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &NaturalKey) -> Option<&FinancialRecord> {
        self.by_company
            .get(&key.company_symbol)?
            .iter()
            .find(|r| r.source_file_identifier == key.file_identifier)
    }

    /// Company symbols present, sorted.
    pub fn symbols(&self) -> Vec<&str> {
        self.by_company
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(s, _)| s.as_str())
            .collect()
    }

    /// One company's records in chronological order.
    pub fn company(&self, symbol: &str) -> &[FinancialRecord] {
        self.by_company.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Records in scope, ascending by report date across companies.
    pub fn scoped(&self, scope: &CompanyScope) -> Vec<&FinancialRecord> {
        let mut rows: Vec<&FinancialRecord> = self
            .by_company
            .iter()
            .filter(|(symbol, _)| scope.includes(symbol))
            .flat_map(|(_, rows)| rows.iter())
            .collect();
        rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        rows
    }

    /// All records, chronological across companies.
    pub fn iter(&self) -> impl Iterator<Item = &FinancialRecord> {
        self.scoped(&CompanyScope::All).into_iter()
    }

    /// Latest record of the key's company dated strictly before `report_date`.
    pub fn prior_to(&self, key: &NaturalKey, report_date: chrono::NaiveDate) -> Option<&FinancialRecord> {
        self.company(&key.company_symbol)
            .iter()
            .filter(|r| r.report_date < report_date && r.source_file_identifier != key.file_identifier)
            .last()
    }

    /// Insert or replace by natural key, keeping the partition ordered and
    /// growth figures current.
    pub fn upsert(&mut self, record: FinancialRecord) -> UpsertOutcome {
        let symbol = record.company_symbol.clone();
        let rows = self.by_company.entry(symbol.clone()).or_default();

        let outcome = match rows
            .iter()
            .position(|r| r.source_file_identifier == record.source_file_identifier)
        {
            Some(idx) => {
                rows.remove(idx);
                UpsertOutcome::Replaced
            }
            None => UpsertOutcome::Inserted,
        };

        let at = rows.partition_point(|r| r.sort_key() <= record.sort_key());
        rows.insert(at, record);
        self.refresh_growth(&symbol);
        outcome
    }

    /// Recompute period-over-period growth for one company.
    pub fn refresh_growth(&mut self, symbol: &str) {
        let Some(rows) = self.by_company.get_mut(symbol) else {
            return;
        };
        let mut previous: Option<(chrono::NaiveDate, f64)> = None;
        let mut earlier_revenue: Option<f64> = None;
        for row in rows.iter_mut() {
            // Same-day rows share the same predecessor.
            if let Some((date, revenue)) = previous {
                if date < row.report_date {
                    earlier_revenue = Some(revenue);
                }
            }
            row.derived_metrics.period_over_period_growth =
                earlier_revenue.and_then(|p| growth_pct(row.revenue, p));
            previous = Some((row.report_date, row.revenue));
        }
    }
}
