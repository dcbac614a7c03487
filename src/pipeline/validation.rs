//! Record Validator.
//!
//! Pure checks applied between extraction and persistence, in order,
//! stopping at the first failure:
//! 1. presence, 2. type/range, 3. cross-field consistency, 4. derivation.
//! Violations are reported with the offending values and never corrected.

use serde::Serialize;
use thiserror::Error;

use crate::config::ToleranceSettings;
use crate::models::{CandidateRecord, DerivedMetrics, FinancialRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailureKind {
    Incomplete,
    OutOfRange,
    Inconsistent,
}

impl ValidationFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::OutOfRange => "out_of_range",
            Self::Inconsistent => "inconsistent",
        }
    }
}

impl std::fmt::Display for ValidationFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A rejected candidate and the values that caused it.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{kind} record {company_symbol}/{file_identifier}: {detail}")]
pub struct ValidationFailure {
    pub company_symbol: String,
    pub file_identifier: String,
    pub kind: ValidationFailureKind,
    pub detail: String,
    pub offending: Vec<(&'static str, Option<f64>)>,
}

/// Validates candidates against completeness, range and consistency rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordValidator {
    tolerance: ToleranceSettings,
}

impl RecordValidator {
    pub fn new(tolerance: ToleranceSettings) -> Self {
        Self { tolerance }
    }

    /// Allowed gap between reported and computed gross profit.
    pub fn gross_profit_tolerance(&self, revenue: f64) -> f64 {
        (revenue.abs() * self.tolerance.ratio).max(self.tolerance.absolute)
    }

    /// Validate a candidate and compute its derived metrics.
    ///
    /// `prior` is the chronologically previous record of the same company, if
    /// any; it only feeds the growth figure.
    pub fn validate(
        &self,
        candidate: &CandidateRecord,
        prior: Option<&FinancialRecord>,
    ) -> Result<FinancialRecord, ValidationFailure> {
        let reject = |kind: ValidationFailureKind, detail: String, offending: Vec<(&'static str, Option<f64>)>| {
            ValidationFailure {
                company_symbol: candidate.company_symbol.clone(),
                file_identifier: candidate.source_file_identifier.clone(),
                kind,
                detail,
                offending,
            }
        };

        // 1. Presence
        let fields = [
            ("revenue", candidate.revenue),
            ("cost_of_goods_sold", candidate.cost_of_goods_sold),
            ("gross_profit", candidate.gross_profit),
            ("operating_expenses", candidate.operating_expenses),
            ("operating_income", candidate.operating_income),
            ("net_income", candidate.net_income),
        ];
        let (
            Some(report_date),
            Some(revenue),
            Some(cogs),
            Some(gross_profit),
            Some(opex),
            Some(operating_income),
            Some(net_income),
        ) = (
            candidate.report_date,
            candidate.revenue,
            candidate.cost_of_goods_sold,
            candidate.gross_profit,
            candidate.operating_expenses,
            candidate.operating_income,
            candidate.net_income,
        )
        else {
            let absent: Vec<(&'static str, Option<f64>)> =
                fields.iter().filter(|(_, v)| v.is_none()).copied().collect();
            let mut names: Vec<&str> = absent.iter().map(|(name, _)| *name).collect();
            if candidate.report_date.is_none() {
                names.push("report_date");
            }
            return Err(reject(
                ValidationFailureKind::Incomplete,
                format!("missing {}", names.join(", ")),
                absent,
            ));
        };

        // 2. Type / range
        let non_finite: Vec<(&'static str, Option<f64>)> = fields
            .iter()
            .filter(|(_, v)| v.is_some_and(|x| !x.is_finite()))
            .copied()
            .collect();
        if !non_finite.is_empty() {
            return Err(reject(
                ValidationFailureKind::OutOfRange,
                "non-finite amount".into(),
                non_finite,
            ));
        }
        let negative: Vec<(&'static str, Option<f64>)> = fields
            .iter()
            .filter(|(name, v)| *name != "net_income" && v.is_some_and(|x| x < 0.0))
            .copied()
            .collect();
        if !negative.is_empty() {
            let names: Vec<&str> = negative.iter().map(|(n, _)| *n).collect();
            return Err(reject(
                ValidationFailureKind::OutOfRange,
                format!("negative {}", names.join(", ")),
                negative,
            ));
        }

        // 3. Consistency
        let expected_gross = revenue - cogs;
        let tolerance = self.gross_profit_tolerance(revenue);
        if (gross_profit - expected_gross).abs() > tolerance {
            return Err(reject(
                ValidationFailureKind::Inconsistent,
                format!(
                    "gross profit {gross_profit} differs from revenue - COGS = {expected_gross} by more than {tolerance}"
                ),
                vec![
                    ("revenue", Some(revenue)),
                    ("cost_of_goods_sold", Some(cogs)),
                    ("gross_profit", Some(gross_profit)),
                ],
            ));
        }
        if operating_income > gross_profit {
            return Err(reject(
                ValidationFailureKind::Inconsistent,
                format!("operating income {operating_income} exceeds gross profit {gross_profit}"),
                vec![
                    ("gross_profit", Some(gross_profit)),
                    ("operating_income", Some(operating_income)),
                ],
            ));
        }

        // 4. Derivation
        let prior = prior.filter(|p| {
            p.company_symbol == candidate.company_symbol && p.report_date < report_date
        });
        let derived_metrics = DerivedMetrics {
            gross_margin: margin(gross_profit, revenue),
            operating_margin: margin(operating_income, revenue),
            net_margin: margin(net_income, revenue),
            period_over_period_growth: prior.and_then(|p| growth_pct(revenue, p.revenue)),
        };

        Ok(FinancialRecord {
            company_symbol: candidate.company_symbol.clone(),
            source_file_identifier: candidate.source_file_identifier.clone(),
            report_date,
            revenue,
            cost_of_goods_sold: cogs,
            gross_profit,
            operating_expenses: opex,
            operating_income,
            net_income,
            derived_metrics,
        })
    }
}

/// `value / revenue`, absent when revenue is zero.
pub fn margin(value: f64, revenue: f64) -> Option<f64> {
    if revenue == 0.0 {
        None
    } else {
        Some(value / revenue)
    }
}

/// Signed revenue growth in percent, absent when the prior revenue is zero.
pub fn growth_pct(current: f64, prior: f64) -> Option<f64> {
    if prior == 0.0 {
        None
    } else {
        Some((current - prior) / prior.abs() * 100.0)
    }
}
