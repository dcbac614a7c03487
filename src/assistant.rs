//! Natural-language questions over the persisted series.

use serde::Serialize;
use thiserror::Error;

use crate::config::SamplerSettings;
use crate::models::CompanyScope;
use crate::pipeline::context::render_context;
use crate::pipeline::llm::{LlmError, SharedLlmClient};
use crate::pipeline::sampler::{sample, SampledContext, SamplingStrategy};
use crate::pipeline::series::FinancialSeries;

pub const ANALYST_SYSTEM_PROMPT: &str = r#"You are a financial analyst assistant with access to quarterly income statement data for the companies in the provided context.

Your role:
1. Analyse the data and explain revenue, profitability and cost trends.
2. Compare companies when asked, using the same periods for both.
3. Calculate margins, growth rates and ratios accurately, showing the figures used.
4. Point out anomalies or unusual quarters.

Rules:
- Base every statement on the provided data only. If the data cannot answer the question, say so.
- Quote specific numbers and quarters.
- Amounts are in the reporting currency, shown with the Rn prefix.
- When the context notes that rows were omitted, say that older quarters were sampled.
- Be concise and use Markdown."#;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Question is empty")]
    EmptyQuestion,

    #[error("No financial data in scope {0}; run `fintrend extract` first")]
    NoData(String),

    #[error("Language model call failed: {0}")]
    Llm(#[from] LlmError),
}

/// An answer and a description of the data it was based on.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantAnswer {
    pub answer: String,
    pub rows_used: usize,
    pub total_rows: usize,
    pub strategy: SamplingStrategy,
    pub token_estimate: usize,
}

pub struct QueryAssistant {
    llm: SharedLlmClient,
    model_name: String,
    sampler: SamplerSettings,
}

impl QueryAssistant {
    pub fn new(llm: SharedLlmClient, model_name: &str, sampler: SamplerSettings) -> Self {
        Self {
            llm,
            model_name: model_name.to_string(),
            sampler,
        }
    }

    /// Sample the series, render it and ask the model.
    pub fn ask(
        &self,
        series: &FinancialSeries,
        scope: &CompanyScope,
        question: &str,
    ) -> Result<AssistantAnswer, AssistantError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AssistantError::EmptyQuestion);
        }

        let context = sample(series, scope, self.sampler.max_rows, &self.sampler);
        if context.rows.is_empty() {
            return Err(AssistantError::NoData(scope.to_string()));
        }

        let prompt = build_query_prompt(question, &context);
        tracing::info!(
            scope = %scope,
            rows = context.row_count,
            tokens = context.token_estimate,
            "Querying assistant"
        );
        let answer = self
            .llm
            .generate(&self.model_name, &prompt, ANALYST_SYSTEM_PROMPT)?;

        Ok(AssistantAnswer {
            answer: answer.trim().to_string(),
            rows_used: context.row_count,
            total_rows: context.total_rows,
            strategy: context.strategy,
            token_estimate: context.token_estimate,
        })
    }
}

/// Data sections followed by the user's question.
pub fn build_query_prompt(question: &str, context: &SampledContext) -> String {
    let mut prompt = render_context(context);
    prompt.push_str("\n\n");
    prompt.push_str(&format!("Question: {question}\n\n"));
    prompt.push_str(
        "Answer from the financial data above. Include specific numbers, quarters and calculations where relevant.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::{MockLlmClient, ScriptedLlmClient};
    use crate::pipeline::series::tests::record;
    use std::sync::Arc;

    fn series() -> FinancialSeries {
        let mut series = FinancialSeries::new();
        series.upsert(record("REXP", "30062022.pdf", (2022, 6, 30), 1_000_000.0));
        series.upsert(record("REXP", "30092022.pdf", (2022, 9, 30), 1_200_000.0));
        series
    }

    #[test]
    fn prompt_contains_context_and_question() {
        let llm = Arc::new(MockLlmClient::new("  Revenue grew 20%.\n"));
        let assistant = QueryAssistant::new(llm.clone(), "test-model", SamplerSettings::default());
        let answer = assistant
            .ask(&series(), &CompanyScope::All, "How did REXP revenue change?")
            .unwrap();

        assert_eq!(answer.answer, "Revenue grew 20%.");
        assert_eq!(answer.rows_used, 2);
        assert_eq!(answer.strategy, SamplingStrategy::Full);
        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains("<FINANCIAL DATA>"));
        assert!(prompt.contains("REXP | 2022-Q3 | Rn1,200,000"));
        assert!(prompt.contains("Question: How did REXP revenue change?"));
    }

    #[test]
    fn empty_question_makes_no_call() {
        let llm = Arc::new(MockLlmClient::new("x"));
        let assistant = QueryAssistant::new(llm.clone(), "m", SamplerSettings::default());
        assert!(matches!(
            assistant.ask(&series(), &CompanyScope::All, "   "),
            Err(AssistantError::EmptyQuestion)
        ));
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn scope_without_rows_is_reported() {
        let llm = Arc::new(MockLlmClient::new("x"));
        let assistant = QueryAssistant::new(llm.clone(), "m", SamplerSettings::default());
        let err = assistant
            .ask(&series(), &CompanyScope::Single("DIPD".into()), "Trend?")
            .unwrap_err();
        assert!(matches!(err, AssistantError::NoData(ref s) if s == "DIPD"));
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn model_failure_is_surfaced() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![], Err(LlmError::Timeout(30))));
        let assistant = QueryAssistant::new(llm, "m", SamplerSettings::default());
        assert!(matches!(
            assistant.ask(&series(), &CompanyScope::All, "Trend?"),
            Err(AssistantError::Llm(LlmError::Timeout(30)))
        ));
    }
}
