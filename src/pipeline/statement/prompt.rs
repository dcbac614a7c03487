use crate::models::RawDocument;

/// JSON keys the model must fill. Names follow the persisted column headers.
pub const FIELD_REVENUE: &str = "Revenue";
pub const FIELD_COGS: &str = "Cost of Goods Sold (COGS)";
pub const FIELD_GROSS_PROFIT: &str = "Gross Profit";
pub const FIELD_OPERATING_EXPENSES: &str = "Operating Expenses";
pub const FIELD_OPERATING_INCOME: &str = "Operating Income";
pub const FIELD_NET_INCOME: &str = "Net Income";
pub const FIELD_REPORT_DATE: &str = "Report Date";

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"
You are a financial statement extraction assistant. Your ONLY role is to read
the income statement text of one quarterly report and return the figures it
states for the current period.

RULES (ABSOLUTE, NO EXCEPTIONS):
1. Extract ONLY values explicitly present in the text. Never invent, estimate or
   recompute a figure that is not printed.
2. Use the FIRST numeric column only: it holds the current period.
3. Values in parentheses, e.g. (473,936), are negative.
4. Operating Expenses = Distribution Costs + Administrative Expenses + Other
   Operating Expenses. Cost of sales is NOT an operating expense; it is COGS.
5. Operating Income is the "Profit from Operations" (or "Results from Operating
   Activities") line as printed.
6. Net Income is the profit (or loss) for the period.
7. If a value is not present, output null for that field.

OUTPUT FORMAT:
Respond with a single JSON object and nothing else: no prose, no Markdown fences.
"#;

/// Build the extraction prompt for one document.
pub fn build_extraction_prompt(document: &RawDocument) -> String {
    format!(
        r#"Company: {symbol}
File: {file}

<document>
{text}
</document>

Return exactly this JSON object, numbers as plain JSON numbers without separators:
{{
  "Simbol": "{symbol}",
  "file_name": "{file}",
  "{FIELD_REVENUE}": 0,
  "{FIELD_COGS}": 0,
  "{FIELD_GROSS_PROFIT}": 0,
  "{FIELD_OPERATING_EXPENSES}": 0,
  "{FIELD_OPERATING_INCOME}": 0,
  "{FIELD_NET_INCOME}": 0,
  "{FIELD_REPORT_DATE}": "YYYY-MM-DD or null"
}}"#,
        symbol = document.company_symbol,
        file = document.file_identifier,
        text = document.raw_text.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn doc() -> RawDocument {
        RawDocument {
            company_symbol: "REXP".into(),
            file_identifier: "30062022.pdf".into(),
            source_path: PathBuf::from("data/raw/REXP/30062022.pdf"),
            raw_text: "Consolidated Income Statements\nRevenue 2,767,931\n".into(),
        }
    }

    #[test]
    fn prompt_embeds_document_and_schema() {
        let prompt = build_extraction_prompt(&doc());
        assert!(prompt.contains("<document>\nConsolidated Income Statements"));
        assert!(prompt.contains("\"Cost of Goods Sold (COGS)\": 0"));
        assert!(prompt.contains("\"file_name\": \"30062022.pdf\""));
        assert!(prompt.contains("\"Report Date\""));
    }

    #[test]
    fn system_prompt_forbids_prose() {
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("single JSON object"));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("parentheses"));
    }
}
