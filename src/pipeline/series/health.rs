//! Snapshot health check, run by `fintrend check` before any analysis.

use chrono::NaiveDate;
use serde::Serialize;

use super::SnapshotStore;
use crate::models::Company;

/// Fewer rows than this cannot show a trend for two companies.
pub const MIN_HEALTHY_RECORDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSummary {
    pub records: usize,
    /// (symbol, record count), sorted by symbol.
    pub companies: Vec<(String, usize)>,
    pub first_report: NaiveDate,
    pub last_report: NaiveDate,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotHealth {
    Missing,
    Empty,
    Invalid { reason: String },
    Healthy(SnapshotSummary),
}

impl SnapshotHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy(_))
    }
}

/// Load the snapshot and describe what it holds.
pub fn check_snapshot(store: &SnapshotStore, known: &[Company]) -> SnapshotHealth {
    if !store.path().is_file() {
        return SnapshotHealth::Missing;
    }
    let series = match store.load() {
        Ok(series) => series,
        Err(e) => {
            tracing::warn!(error = %e, "Snapshot failed to load");
            return SnapshotHealth::Invalid {
                reason: e.to_string(),
            };
        }
    };
    let all = series.iter().collect::<Vec<_>>();
    let (Some(first), Some(last)) = (all.first(), all.last()) else {
        return SnapshotHealth::Empty;
    };

    let companies: Vec<(String, usize)> = series
        .symbols()
        .into_iter()
        .map(|s| (s.to_string(), series.company(s).len()))
        .collect();

    let mut warnings = Vec::new();
    if series.len() < MIN_HEALTHY_RECORDS {
        warnings.push(format!(
            "only {} records; at least {MIN_HEALTHY_RECORDS} are needed for trend analysis",
            series.len()
        ));
    }
    for (symbol, _) in &companies {
        if !known.iter().any(|c| &c.symbol == symbol) {
            warnings.push(format!("unknown company symbol {symbol}"));
        }
    }
    for company in known {
        if series.company(&company.symbol).is_empty() {
            warnings.push(format!("no records for {}", company.symbol));
        }
    }

    SnapshotHealth::Healthy(SnapshotSummary {
        records: series.len(),
        first_report: first.report_date,
        last_report: last.report_date,
        companies,
        warnings,
    })
}
