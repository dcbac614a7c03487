use chrono::NaiveDate;

use super::parser::parse_statement_response;
use super::prompt::{build_extraction_prompt, EXTRACTION_SYSTEM_PROMPT};
use super::{ExtractionFailure, ExtractionFailureKind};
use crate::models::{CandidateRecord, RawDocument};
use crate::pipeline::llm::{LlmError, SharedLlmClient};

/// Default retries after the first attempt, transient failures only.
pub const DEFAULT_MAX_RETRIES: usize = 2;

/// Replies longer than this are truncated in logs.
const LOGGED_RESPONSE_CHARS: usize = 400;

/// Turns one document into a candidate record through the model.
pub struct StatementExtractor {
    llm: SharedLlmClient,
    model_name: String,
    max_retries: usize,
}

impl StatementExtractor {
    pub fn new(llm: SharedLlmClient, model_name: &str) -> Self {
        Self {
            llm,
            model_name: model_name.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Extract a candidate record. Every failure names the source document.
    pub fn extract(&self, document: &RawDocument) -> Result<CandidateRecord, ExtractionFailure> {
        let _span = tracing::debug_span!(
            "extract_statement",
            company = %document.company_symbol,
            file = %document.file_identifier
        )
        .entered();

        let prompt = build_extraction_prompt(document);
        let response = self
            .call_llm_with_retry(&prompt, document)
            .map_err(|(kind, reason)| failure(document, kind, reason, None))?;

        let parsed = parse_statement_response(&response).map_err(|e| {
            tracing::warn!(
                company = %document.company_symbol,
                file = %document.file_identifier,
                kind = %e.kind,
                response = %truncate(&response, LOGGED_RESPONSE_CHARS),
                "Unparseable extraction reply"
            );
            failure(document, e.kind, e.reason, Some(response.clone()))
        })?;

        let report_date = match report_date_from_file_identifier(&document.file_identifier) {
            Some(date) => Some(date),
            None => match parsed.report_date.as_deref() {
                Some(raw) => Some(parse_report_date(raw).ok_or_else(|| {
                    failure(
                        document,
                        ExtractionFailureKind::MalformedNumber,
                        format!("report date is not a calendar date: {raw}"),
                        Some(response.clone()),
                    )
                })?),
                None => None,
            },
        };

        // Statements print expense lines in parentheses; keep magnitudes.
        Ok(CandidateRecord {
            company_symbol: document.company_symbol.clone(),
            source_file_identifier: document.file_identifier.clone(),
            report_date,
            revenue: parsed.revenue,
            cost_of_goods_sold: parsed.cost_of_goods_sold.map(f64::abs),
            gross_profit: parsed.gross_profit,
            operating_expenses: parsed.operating_expenses.map(f64::abs),
            operating_income: parsed.operating_income,
            net_income: parsed.net_income,
        })
    }

    /// Call the model, retrying transient failures up to `max_retries` times.
    fn call_llm_with_retry(
        &self,
        prompt: &str,
        document: &RawDocument,
    ) -> Result<String, (ExtractionFailureKind, String)> {
        let mut attempt = 0;
        loop {
            match self
                .llm
                .generate(&self.model_name, prompt, EXTRACTION_SYSTEM_PROMPT)
            {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        company = %document.company_symbol,
                        file = %document.file_identifier,
                        attempt,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                }
                Err(e) => return Err(classify_llm_error(&e, attempt + 1)),
            }
        }
    }
}

fn classify_llm_error(e: &LlmError, attempts: usize) -> (ExtractionFailureKind, String) {
    if e.is_transient() {
        (
            ExtractionFailureKind::TransientExhausted,
            format!("gave up after {attempts} attempts: {e}"),
        )
    } else {
        (ExtractionFailureKind::ServiceRejected, e.to_string())
    }
}

fn failure(
    document: &RawDocument,
    kind: ExtractionFailureKind,
    reason: String,
    raw_response: Option<String>,
) -> ExtractionFailure {
    ExtractionFailure {
        company_symbol: document.company_symbol.clone(),
        file_identifier: document.file_identifier.clone(),
        kind,
        reason,
        raw_response,
    }
}

/// `30062022.pdf` → 2022-06-30. Also accepts `2022-06-30.pdf`.
pub fn report_date_from_file_identifier(file_identifier: &str) -> Option<NaiveDate> {
    let stem = file_identifier.split('.').next()?;
    NaiveDate::parse_from_str(stem, "%d%m%Y")
        .ok()
        .filter(|_| stem.len() == 8)
        .or_else(|| NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok())
}

fn parse_report_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::{MockLlmClient, ScriptedLlmClient};
    use std::path::PathBuf;
    use std::sync::Arc;

    const GOOD_REPLY: &str = r#"{"Simbol": "DIPD", "file_name": "31032023.pdf",
        "Revenue": 50000000, "Cost of Goods Sold (COGS)": -30000000,
        "Gross Profit": 20000000, "Operating Expenses": -8000000,
        "Operating Income": 12000000, "Net Income": 9000000}"#;

    fn doc(file: &str) -> RawDocument {
        RawDocument {
            company_symbol: "DIPD".into(),
            file_identifier: file.into(),
            source_path: PathBuf::from(file),
            raw_text: "STATEMENT OF PROFIT OR LOSS\nRevenue 50,000,000".into(),
        }
    }

    fn extractor(client: Arc<dyn crate::pipeline::llm::LlmClient + Send + Sync>) -> StatementExtractor {
        StatementExtractor::new(client, "test-model")
    }

    #[test]
    fn extracts_candidate_with_date_from_file_name() {
        let llm = Arc::new(MockLlmClient::new(GOOD_REPLY));
        let candidate = extractor(llm.clone()).extract(&doc("31032023.pdf")).unwrap();
        assert_eq!(candidate.company_symbol, "DIPD");
        assert_eq!(candidate.source_file_identifier, "31032023.pdf");
        assert_eq!(candidate.report_date, NaiveDate::from_ymd_opt(2023, 3, 31));
        assert_eq!(candidate.revenue, Some(50_000_000.0));
        assert_eq!(candidate.cost_of_goods_sold, Some(30_000_000.0));
        assert_eq!(candidate.operating_expenses, Some(8_000_000.0));
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn falls_back_to_reported_date() {
        let reply = GOOD_REPLY.replace("\"Net Income\": 9000000", "\"Net Income\": 9000000, \"Report Date\": \"2023-03-31\"");
        let llm = Arc::new(MockLlmClient::new(&reply));
        let candidate = extractor(llm).extract(&doc("q1-report.pdf")).unwrap();
        assert_eq!(candidate.report_date, NaiveDate::from_ymd_opt(2023, 3, 31));
    }

    #[test]
    fn missing_date_is_left_to_validation() {
        let llm = Arc::new(MockLlmClient::new(GOOD_REPLY));
        let candidate = extractor(llm).extract(&doc("q1-report.pdf")).unwrap();
        assert_eq!(candidate.report_date, None);
    }

    #[test]
    fn bad_reported_date_is_a_failure() {
        let reply = GOOD_REPLY.replace("\"Net Income\": 9000000", "\"Net Income\": 9000000, \"Report Date\": \"31st March\"");
        let llm = Arc::new(MockLlmClient::new(&reply));
        let err = extractor(llm).extract(&doc("q1-report.pdf")).unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::MalformedNumber);
        assert!(err.raw_response.is_some());
    }

    #[test]
    fn two_timeouts_then_success_is_accepted() {
        let llm = Arc::new(ScriptedLlmClient::new(
            vec![Err(LlmError::Timeout(30)), Err(LlmError::Timeout(30))],
            Ok(GOOD_REPLY.to_string()),
        ));
        let candidate = extractor(llm.clone()).extract(&doc("31032023.pdf")).unwrap();
        assert_eq!(candidate.gross_profit, Some(20_000_000.0));
        assert_eq!(llm.call_count(), 3);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let llm = Arc::new(ScriptedLlmClient::new(
            vec![],
            Err(LlmError::RateLimited { status: 429 }),
        ));
        let err = extractor(llm.clone()).extract(&doc("31032023.pdf")).unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::TransientExhausted);
        assert_eq!(err.file_identifier, "31032023.pdf");
        assert_eq!(llm.call_count(), 3);
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![], Err(LlmError::Timeout(1))));
        let err = extractor(llm.clone())
            .with_max_retries(0)
            .extract(&doc("31032023.pdf"))
            .unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::TransientExhausted);
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn deterministic_service_error_is_not_retried() {
        let llm = Arc::new(ScriptedLlmClient::new(
            vec![],
            Err(LlmError::Api {
                status: 401,
                body: "invalid x-api-key".into(),
            }),
        ));
        let err = extractor(llm.clone()).extract(&doc("31032023.pdf")).unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::ServiceRejected);
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn schema_failure_is_not_retried_and_keeps_raw_reply() {
        let llm = Arc::new(MockLlmClient::new("Sorry, I cannot help with that."));
        let err = extractor(llm.clone()).extract(&doc("31032023.pdf")).unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::MalformedResponse);
        assert_eq!(
            err.raw_response.as_deref(),
            Some("Sorry, I cannot help with that.")
        );
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn file_name_dates() {
        assert_eq!(
            report_date_from_file_identifier("30062022.pdf"),
            NaiveDate::from_ymd_opt(2022, 6, 30)
        );
        assert_eq!(
            report_date_from_file_identifier("2022-06-30.pdf"),
            NaiveDate::from_ymd_opt(2022, 6, 30)
        );
        assert_eq!(report_date_from_file_identifier("31022022.pdf"), None);
        assert_eq!(report_date_from_file_identifier("annual.pdf"), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ab", 3), "ab");
        assert_eq!(truncate("éééé", 2), "éé...");
    }
}
