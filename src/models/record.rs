use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;

/// Text of one source report, read once per pipeline run.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub company_symbol: String,
    /// File name inside the company directory, e.g. `30062022.pdf`.
    pub file_identifier: String,
    pub source_path: PathBuf,
    pub raw_text: String,
}

impl RawDocument {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(&self.company_symbol, &self.file_identifier)
    }
}

/// (company, source document): at most one record per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NaturalKey {
    pub company_symbol: String,
    pub file_identifier: String,
}

impl NaturalKey {
    pub fn new(company_symbol: &str, file_identifier: &str) -> Self {
        Self {
            company_symbol: company_symbol.to_string(),
            file_identifier: file_identifier.to_string(),
        }
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.company_symbol, self.file_identifier)
    }
}

/// Unvalidated extraction result. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandidateRecord {
    pub company_symbol: String,
    pub source_file_identifier: String,
    pub report_date: Option<NaiveDate>,
    pub revenue: Option<f64>,
    pub cost_of_goods_sold: Option<f64>,
    pub gross_profit: Option<f64>,
    pub operating_expenses: Option<f64>,
    pub operating_income: Option<f64>,
    pub net_income: Option<f64>,
}

impl CandidateRecord {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(&self.company_symbol, &self.source_file_identifier)
    }
}

/// Ratios and growth computed from a validated record.
///
/// Margins are fractions of revenue and are absent when revenue is zero.
/// Growth is a signed percentage against the prior report of the same company.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub period_over_period_growth: Option<f64>,
}

/// A validated row of the financial series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialRecord {
    pub company_symbol: String,
    pub source_file_identifier: String,
    pub report_date: NaiveDate,
    pub revenue: f64,
    pub cost_of_goods_sold: f64,
    pub gross_profit: f64,
    pub operating_expenses: f64,
    pub operating_income: f64,
    pub net_income: f64,
    pub derived_metrics: DerivedMetrics,
}

impl FinancialRecord {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(&self.company_symbol, &self.source_file_identifier)
    }

    /// Chronological sort key; file identifier breaks same-day ties.
    pub fn sort_key(&self) -> (NaiveDate, &str, &str) {
        (
            self.report_date,
            self.company_symbol.as_str(),
            self.source_file_identifier.as_str(),
        )
    }
}
