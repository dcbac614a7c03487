//! Renders a `SampledContext` as the data section of an assistant prompt.

use chrono::Datelike;

use super::sampler::SampledContext;
use crate::models::FinancialRecord;

const TABLE_HEADER: &str = "Symbol | Quarter | Revenue | Gross Profit | Operating Income | \
                            Net Income | Gross Margin | Operating Margin | Net Margin";

/// Format sampled rows into labelled prompt sections.
pub fn render_context(context: &SampledContext) -> String {
    if context.rows.is_empty() {
        return "<FINANCIAL DATA SUMMARY>\nNo financial data available.\n</FINANCIAL DATA SUMMARY>"
            .to_string();
    }

    let mut sections: Vec<(&str, String)> = Vec::new();
    sections.push(("FINANCIAL DATA SUMMARY", format_summary(context)));

    let mut table = vec![TABLE_HEADER.to_string()];
    table.extend(context.rows.iter().map(format_row));
    sections.push(("FINANCIAL DATA", table.join("\n")));

    let mut notes = Vec::new();
    if context.omitted() > 0 {
        notes.push(format!(
            "Showing {} of {} records: the most recent quarters in full, older quarters at even intervals.",
            context.row_count, context.total_rows
        ));
    }
    if context.budget_reduced() {
        notes.push(format!(
            "Row budget reduced from {} to {} to fit the prompt size limit.",
            context.requested_max_rows, context.effective_max_rows
        ));
    }
    if !notes.is_empty() {
        sections.push(("NOTE", notes.join("\n")));
    }

    sections
        .iter()
        .map(|(label, content)| format!("<{label}>\n{content}\n</{label}>"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_summary(context: &SampledContext) -> String {
    let mut companies: Vec<&str> = context
        .rows
        .iter()
        .map(|r| r.company_symbol.as_str())
        .collect();
    companies.sort_unstable();
    companies.dedup();

    let mut lines = vec![
        format!("Total Records: {}", context.total_rows),
        format!("Companies: {}", companies.join(", ")),
    ];
    if let (Some(first), Some(last)) = (context.rows.first(), context.rows.last()) {
        lines.push(format!(
            "Date Range: {} to {}",
            first.report_date.format("%Y-%m-%d"),
            last.report_date.format("%Y-%m-%d")
        ));
    }
    lines.join("\n")
}

fn format_row(r: &FinancialRecord) -> String {
    let m = &r.derived_metrics;
    [
        r.company_symbol.clone(),
        quarter_label(r),
        format_money(r.revenue),
        format_money(r.gross_profit),
        format_money(r.operating_income),
        format_money(r.net_income),
        format_percent(m.gross_margin),
        format_percent(m.operating_margin),
        format_percent(m.net_margin),
    ]
    .join(" | ")
}

/// `2022-Q2` style label.
pub fn quarter_label(r: &FinancialRecord) -> String {
    let quarter = (r.report_date.month() - 1) / 3 + 1;
    format!("{}-Q{}", r.report_date.year(), quarter)
}

/// Whole currency units with thousands separators, e.g. `Rn2,767,931`.
pub fn format_money(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("Rn-{grouped}")
    } else {
        format!("Rn{grouped}")
    }
}

fn format_percent(fraction: Option<f64>) -> String {
    match fraction {
        Some(f) => format!("{:.1}%", f * 100.0),
        None => "n/a".to_string(),
    }
}
