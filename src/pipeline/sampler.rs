//! Context Sampler: picks a bounded, recency-weighted subset of the series.
//!
//! When the scoped series fits in the row budget it is returned whole.
//! Otherwise the newest `ceil(max_rows * recency_ratio)` records are always
//! kept and the rest of the budget is spread evenly over the older records,
//! so long-range trend shape survives instead of only the earliest rows.

use serde::Serialize;

use crate::config::SamplerSettings;
use crate::models::{CompanyScope, FinancialRecord};
use crate::pipeline::series::FinancialSeries;

/// Columns rendered per row by `context::render_context`.
pub const CONTEXT_FIELDS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    Full,
    RecencyWeighted,
}

impl SamplingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::RecencyWeighted => "recency_weighted",
        }
    }
}

/// Rows handed to the query assistant, ascending by report date.
#[derive(Debug, Clone, Serialize)]
pub struct SampledContext {
    pub scope: CompanyScope,
    pub rows: Vec<FinancialRecord>,
    pub row_count: usize,
    pub token_estimate: usize,
    pub strategy: SamplingStrategy,
    /// Scoped series size before sampling.
    pub total_rows: usize,
    pub requested_max_rows: usize,
    /// Row budget actually applied after the token ceiling.
    pub effective_max_rows: usize,
}

impl SampledContext {
    pub fn omitted(&self) -> usize {
        self.total_rows - self.row_count
    }

    /// The token ceiling, not the requested budget, left rows out.
    pub fn budget_reduced(&self) -> bool {
        self.effective_max_rows < self.requested_max_rows
            && self.total_rows > self.effective_max_rows
    }
}

/// Coarse prompt size for `rows` rendered rows.
pub fn estimate_tokens(rows: usize, settings: &SamplerSettings) -> usize {
    settings.token_overhead + rows * CONTEXT_FIELDS * settings.tokens_per_field
}

/// Largest row count whose estimate stays under the ceiling, never below one.
fn rows_within_ceiling(settings: &SamplerSettings) -> usize {
    let per_row = (CONTEXT_FIELDS * settings.tokens_per_field).max(1);
    (settings.token_ceiling.saturating_sub(settings.token_overhead) / per_row).max(1)
}

/// Select at most `max_rows` records from the scoped series.
pub fn sample(
    series: &FinancialSeries,
    scope: &CompanyScope,
    max_rows: usize,
    settings: &SamplerSettings,
) -> SampledContext {
    let scoped = series.scoped(scope);
    let total = scoped.len();

    let effective = max_rows.min(rows_within_ceiling(settings));
    if effective < max_rows {
        tracing::info!(
            requested = max_rows,
            effective,
            ceiling = settings.token_ceiling,
            "Row budget reduced to fit token ceiling"
        );
    }

    let (picked, strategy) = if total <= effective {
        ((0..total).collect::<Vec<_>>(), SamplingStrategy::Full)
    } else {
        (
            recency_weighted_indices(total, effective, settings.recency_ratio),
            SamplingStrategy::RecencyWeighted,
        )
    };

    let rows: Vec<FinancialRecord> = picked.iter().map(|&i| scoped[i].clone()).collect();
    let row_count = rows.len();

    tracing::debug!(
        scope = %scope,
        total,
        row_count,
        strategy = strategy.as_str(),
        "Context sampled"
    );

    SampledContext {
        scope: scope.clone(),
        rows,
        row_count,
        token_estimate: estimate_tokens(row_count, settings),
        strategy,
        total_rows: total,
        requested_max_rows: max_rows,
        effective_max_rows: effective,
    }
}

/// Ascending indices into a chronological sequence of `total` records.
///
/// Requires `total > budget`. Each older pick is the centre of one of `k`
/// equal buckets, rounded half up so a tie lands on the more recent record.
fn recency_weighted_indices(total: usize, budget: usize, recency_ratio: f64) -> Vec<usize> {
    if budget == 0 {
        return Vec::new();
    }
    let recent = ((budget as f64 * recency_ratio).ceil() as usize).clamp(1, budget);
    let historical = budget - recent;
    let older = total - recent;

    let mut indices: Vec<usize> = (0..historical)
        .map(|i| ((2 * i + 1) * older) / (2 * historical))
        .collect();
    indices.extend(older..total);
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::render_context;
    use crate::pipeline::series::tests::record;

    fn series_of(symbol: &str, n: usize) -> FinancialSeries {
        let mut series = FinancialSeries::new();
        let start = chrono::NaiveDate::from_ymd_opt(2010, 1, 1).unwrap();
        for i in 0..n {
            let date = start + chrono::Days::new(91 * i as u64);
            let mut r = record(symbol, &format!("{i:03}.pdf"), (2010, 1, 1), 100.0 + i as f64);
            r.report_date = date;
            series.upsert(r);
        }
        series
    }

    fn settings() -> SamplerSettings {
        SamplerSettings::default()
    }

    fn single(symbol: &str) -> CompanyScope {
        CompanyScope::Single(symbol.into())
    }

    #[test]
    fn small_series_is_returned_whole() {
        let series = series_of("REXP", 3);
        let ctx = sample(&series, &single("REXP"), 10, &settings());
        assert_eq!(ctx.strategy, SamplingStrategy::Full);
        assert_eq!(ctx.row_count, 3);
        let files: Vec<&str> = ctx.rows.iter().map(|r| r.source_file_identifier.as_str()).collect();
        assert_eq!(files, vec!["000.pdf", "001.pdf", "002.pdf"]);
        assert_eq!(ctx.omitted(), 0);
    }

    #[test]
    fn large_series_keeps_recent_and_spreads_history() {
        let series = series_of("DIPD", 40);
        let ctx = sample(&series, &single("DIPD"), 10, &settings());
        assert_eq!(ctx.strategy, SamplingStrategy::RecencyWeighted);
        assert_eq!(ctx.row_count, 10);

        let files: Vec<String> = ctx.rows.iter().map(|r| r.source_file_identifier.clone()).collect();
        // Most recent six are always kept.
        for i in 34..40 {
            assert!(files.contains(&format!("{i:03}.pdf")));
        }
        // Remaining four come from the older 34 at bucket centres.
        assert_eq!(&files[..4], &["004.pdf", "012.pdf", "021.pdf", "029.pdf"]);
        assert_eq!(ctx.omitted(), 30);
    }

    #[test]
    fn row_count_never_exceeds_budget() {
        for n in 0..45 {
            let series = series_of("REXP", n);
            for max_rows in 0..20 {
                let ctx = sample(&series, &CompanyScope::All, max_rows, &settings());
                assert!(ctx.row_count <= max_rows, "n={n} max={max_rows}");
                if n <= max_rows {
                    assert_eq!(ctx.strategy, SamplingStrategy::Full);
                    assert_eq!(ctx.row_count, n);
                }
                let dates: Vec<_> = ctx.rows.iter().map(|r| r.report_date).collect();
                assert!(dates.windows(2).all(|w| w[0] < w[1]), "n={n} max={max_rows}");
            }
        }
    }

    #[test]
    fn most_recent_record_is_always_included() {
        for n in 2..45 {
            let series = series_of("REXP", n);
            for max_rows in 1..n {
                let ctx = sample(&series, &single("REXP"), max_rows, &settings());
                assert_eq!(ctx.strategy, SamplingStrategy::RecencyWeighted);
                let last = ctx.rows.last().unwrap();
                assert_eq!(last.source_file_identifier, format!("{:03}.pdf", n - 1));
            }
        }
    }

    #[test]
    fn equidistant_tie_picks_more_recent() {
        // budget 3 -> 2 recent, 1 historical over 2 older records: centre is 0.5.
        let series = series_of("REXP", 4);
        let ctx = sample(&series, &single("REXP"), 3, &settings());
        let files: Vec<&str> = ctx.rows.iter().map(|r| r.source_file_identifier.as_str()).collect();
        assert_eq!(files, vec!["001.pdf", "002.pdf", "003.pdf"]);
    }

    #[test]
    fn scope_all_merges_companies_chronologically() {
        let mut series = series_of("REXP", 3);
        let mut dipd = record("DIPD", "x.pdf", (2010, 2, 15), 500.0);
        dipd.report_date = chrono::NaiveDate::from_ymd_opt(2010, 2, 15).unwrap();
        series.upsert(dipd);
        let ctx = sample(&series, &CompanyScope::All, 10, &settings());
        let symbols: Vec<&str> = ctx.rows.iter().map(|r| r.company_symbol.as_str()).collect();
        assert_eq!(symbols, vec!["REXP", "DIPD", "REXP", "REXP"]);
        assert_eq!(sample(&series, &single("DIPD"), 10, &settings()).row_count, 1);
    }

    #[test]
    fn token_ceiling_shrinks_budget_and_reports_it() {
        let series = series_of("REXP", 40);
        let tight = SamplerSettings {
            token_ceiling: 120 + 5 * CONTEXT_FIELDS * 4,
            ..settings()
        };
        let ctx = sample(&series, &single("REXP"), 10, &tight);
        assert_eq!(ctx.effective_max_rows, 5);
        assert!(ctx.budget_reduced());
        assert_eq!(ctx.row_count, 5);
        assert!(ctx.token_estimate <= tight.token_ceiling);
    }

    #[test]
    fn ceiling_below_request_is_silent_when_everything_fits() {
        let series = series_of("REXP", 3);
        let tight = SamplerSettings {
            token_ceiling: 120 + 5 * CONTEXT_FIELDS * 4,
            ..settings()
        };
        let ctx = sample(&series, &single("REXP"), 10, &tight);
        assert_eq!(ctx.effective_max_rows, 5);
        assert_eq!(ctx.strategy, SamplingStrategy::Full);
        assert!(!ctx.budget_reduced());
        assert!(!render_context(&ctx).contains("Row budget reduced"));
    }

    #[test]
    fn token_estimate_is_deterministic() {
        let s = settings();
        assert_eq!(estimate_tokens(0, &s), 120);
        assert_eq!(estimate_tokens(10, &s), 120 + 10 * 9 * 4);
        let series = series_of("REXP", 3);
        let a = sample(&series, &CompanyScope::All, 10, &s);
        let b = sample(&series, &CompanyScope::All, 10, &s);
        assert_eq!(a.token_estimate, b.token_estimate);
    }

    #[test]
    fn zero_budget_selects_nothing() {
        let series = series_of("REXP", 5);
        let ctx = sample(&series, &CompanyScope::All, 0, &settings());
        assert_eq!(ctx.row_count, 0);
        assert_eq!(ctx.omitted(), 5);
    }
}
