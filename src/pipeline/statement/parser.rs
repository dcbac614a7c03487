use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::prompt::*;
use super::ExtractionFailureKind;

/// Figures read from a model reply. `None` means the model answered null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedStatement {
    pub revenue: Option<f64>,
    pub cost_of_goods_sold: Option<f64>,
    pub gross_profit: Option<f64>,
    pub operating_expenses: Option<f64>,
    pub operating_income: Option<f64>,
    pub net_income: Option<f64>,
    pub report_date: Option<String>,
}

/// Syntactic failure while reading a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ExtractionFailureKind,
    pub reason: String,
}

impl ParseError {
    fn new(kind: ExtractionFailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Accepted spellings per field, compared after `normalize_key`.
const REQUIRED_FIELDS: &[(&str, &[&str])] = &[
    (FIELD_REVENUE, &["revenue", "totalrevenue"]),
    (
        FIELD_COGS,
        &["costofgoodssoldcogs", "costofgoodssold", "cogs", "costofsales"],
    ),
    (FIELD_GROSS_PROFIT, &["grossprofit"]),
    (FIELD_OPERATING_EXPENSES, &["operatingexpenses"]),
    (
        FIELD_OPERATING_INCOME,
        &["operatingincome", "profitfromoperations"],
    ),
    (FIELD_NET_INCOME, &["netincome", "profitfortheperiod"]),
];

/// Parse a model reply into statement figures.
///
/// Tolerates leading prose, Markdown fences, trailing commas and
/// single-quoted keys. Every required key must be present; values may be
/// null, JSON numbers, or strings such as `"(1,234)"` or `"Rs 2,767,931"`.
pub fn parse_statement_response(response: &str) -> Result<ParsedStatement, ParseError> {
    let object = extract_json_object(response)?;

    let mut values = Vec::with_capacity(REQUIRED_FIELDS.len());
    for (field, aliases) in REQUIRED_FIELDS {
        let value = lookup(&object, aliases).ok_or_else(|| {
            ParseError::new(
                ExtractionFailureKind::MissingField,
                format!("missing field '{field}'"),
            )
        })?;
        values.push(parse_amount_value(field, value)?);
    }

    let report_date = lookup(&object, &["reportdate"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string);

    Ok(ParsedStatement {
        revenue: values[0],
        cost_of_goods_sold: values[1],
        gross_profit: values[2],
        operating_expenses: values[3],
        operating_income: values[4],
        net_income: values[5],
        report_date,
    })
}

/// Locate the outermost JSON object in the reply and decode it.
fn extract_json_object(response: &str) -> Result<Map<String, Value>, ParseError> {
    let start = response.find('{');
    let end = response.rfind('}');
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => {
            return Err(ParseError::new(
                ExtractionFailureKind::MalformedResponse,
                "no JSON object in reply",
            ))
        }
    };

    static TRAILING_COMMA_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));
    let candidate = TRAILING_COMMA_RE.replace_all(&response[start..=end], "$1");

    let first = serde_json::from_str::<Map<String, Value>>(&candidate);
    match first {
        Ok(map) => Ok(map),
        Err(e) => {
            // Python-style dict literals use single quotes.
            if candidate.contains('\'') {
                let requoted = candidate.replace('\'', "\"");
                if let Ok(map) = serde_json::from_str::<Map<String, Value>>(&requoted) {
                    return Ok(map);
                }
            }
            Err(ParseError::new(
                ExtractionFailureKind::MalformedResponse,
                format!("invalid JSON: {e}"),
            ))
        }
    }
}

/// Lowercase, alphanumerics only: "Cost of Goods Sold (COGS)" → "costofgoodssoldcogs".
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn lookup<'a>(object: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    object
        .iter()
        .find(|(k, _)| aliases.contains(&normalize_key(k).as_str()))
        .map(|(_, v)| v)
}

fn parse_amount_value(field: &str, value: &Value) -> Result<Option<f64>, ParseError> {
    let malformed = |shown: &str| {
        ParseError::new(
            ExtractionFailureKind::MalformedNumber,
            format!("field '{field}' is not a number: {shown}"),
        )
    };

    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| malformed(&n.to_string())),
        Value::String(s) => parse_amount(s).map_err(|_| malformed(s)),
        other => Err(malformed(&other.to_string())),
    }
}

/// Parse a printed amount. Empty and "null"/"n/a" read as absent.
fn parse_amount(raw: &str) -> Result<Option<f64>, ()> {
    static NUMBER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("valid regex"));
    static CURRENCY_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^(r\$|rs\.?|rn|lkr|usd|\$)\s*").expect("valid regex"));

    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("n/a")
    {
        return Ok(None);
    }

    let (negative, inner) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner.trim()),
        None => (false, trimmed),
    };

    let without_currency = CURRENCY_RE.replace(inner, "");
    let cleaned: String = without_currency
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{a0}' | '_'))
        .collect();

    if !NUMBER_RE.is_match(&cleaned) {
        return Err(());
    }
    let value: f64 = cleaned.parse().map_err(|_| ())?;
    Ok(Some(if negative { -value } else { value }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_with_quoted_amounts() -> String {
        r#"```json
{
"index":0,
"Simbol": "REXP",
"file_name": "30062022.pdf",
"Revenue": 2767931,
"Cost of Goods Sold (COGS)": -1735091,
"Gross Profit": 1032840,
"Operating Expenses": -580822,
"Operating Income": 458611,
"Net Income": 991673,
}
```"#
        .to_string()
    }

    #[test]
    fn parses_fenced_reply_with_trailing_comma() {
        let parsed = parse_statement_response(&reply_with_quoted_amounts()).unwrap();
        assert_eq!(parsed.revenue, Some(2_767_931.0));
        assert_eq!(parsed.cost_of_goods_sold, Some(-1_735_091.0));
        assert_eq!(parsed.gross_profit, Some(1_032_840.0));
        assert_eq!(parsed.operating_expenses, Some(-580_822.0));
        assert_eq!(parsed.operating_income, Some(458_611.0));
        assert_eq!(parsed.net_income, Some(991_673.0));
        assert_eq!(parsed.report_date, None);
    }

    #[test]
    fn tolerates_leading_prose_and_string_amounts() {
        let reply = r#"Here is the data:
{"Revenue": "Rs 2,767,931", "COGS": "(1,735,091)", "Gross Profit": "1,032,840",
 "Operating Expenses": "(580,822)", "Operating Income": 458611.5,
 "Net Income": "-12", "Report Date": "2022-06-30"}"#;
        let parsed = parse_statement_response(reply).unwrap();
        assert_eq!(parsed.revenue, Some(2_767_931.0));
        assert_eq!(parsed.cost_of_goods_sold, Some(-1_735_091.0));
        assert_eq!(parsed.operating_income, Some(458_611.5));
        assert_eq!(parsed.net_income, Some(-12.0));
        assert_eq!(parsed.report_date.as_deref(), Some("2022-06-30"));
    }

    #[test]
    fn accepts_python_style_quotes() {
        let reply = "{'Revenue': 10, 'Cost of Goods Sold (COGS)': 6, 'Gross Profit': 4, \
                     'Operating Expenses': 1, 'Operating Income': 3, 'Net Income': 2}";
        let parsed = parse_statement_response(reply).unwrap();
        assert_eq!(parsed.gross_profit, Some(4.0));
    }

    #[test]
    fn null_values_are_absent_not_errors() {
        let reply = r#"{"Revenue": null, "Cost of Goods Sold (COGS)": 6, "Gross Profit": 4,
            "Operating Expenses": 1, "Operating Income": 3, "Net Income": ""}"#;
        let parsed = parse_statement_response(reply).unwrap();
        assert_eq!(parsed.revenue, None);
        assert_eq!(parsed.net_income, None);
    }

    #[test]
    fn missing_key_is_schema_failure() {
        let reply = r#"{"Revenue": 10, "Gross Profit": 4, "Operating Expenses": 1,
            "Operating Income": 3, "Net Income": 2}"#;
        let err = parse_statement_response(reply).unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::MissingField);
        assert!(err.reason.contains("Cost of Goods Sold"));
    }

    #[test]
    fn malformed_number_is_schema_failure() {
        let reply = r#"{"Revenue": "about ten million", "Cost of Goods Sold (COGS)": 6,
            "Gross Profit": 4, "Operating Expenses": 1, "Operating Income": 3, "Net Income": 2}"#;
        let err = parse_statement_response(reply).unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::MalformedNumber);
    }

    #[test]
    fn boolean_amount_is_malformed() {
        let reply = r#"{"Revenue": true, "Cost of Goods Sold (COGS)": 6,
            "Gross Profit": 4, "Operating Expenses": 1, "Operating Income": 3, "Net Income": 2}"#;
        let err = parse_statement_response(reply).unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::MalformedNumber);
    }

    #[test]
    fn reply_without_object_is_malformed() {
        let err = parse_statement_response("I could not find the statement.").unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::MalformedResponse);
        let err = parse_statement_response("{ broken: ").unwrap_err();
        assert_eq!(err.kind, ExtractionFailureKind::MalformedResponse);
    }

    #[test]
    fn amount_parsing_rules() {
        assert_eq!(parse_amount("(473,936)"), Ok(Some(-473_936.0)));
        assert_eq!(parse_amount("LKR 1 000"), Ok(Some(1000.0)));
        assert_eq!(parse_amount("n/a"), Ok(None));
        assert_eq!(parse_amount("12.5"), Ok(Some(12.5)));
        assert!(parse_amount("1e9").is_err());
        assert!(parse_amount("NaN").is_err());
        assert!(parse_amount("12-3").is_err());
    }

    #[test]
    fn key_normalization() {
        assert_eq!(normalize_key("Cost of Goods Sold (COGS)"), "costofgoodssoldcogs");
        assert_eq!(normalize_key("net_income"), "netincome");
    }
}
