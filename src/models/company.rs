use serde::Serialize;

/// A reporting company whose quarterly statements are ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Company {
    /// Ticker symbol, also the name of its raw-document directory.
    pub symbol: String,
    /// Heading that identifies the income statement page in its reports.
    pub statement_marker: Option<String>,
}

impl Company {
    pub fn new(symbol: &str, statement_marker: Option<&str>) -> Self {
        Self {
            symbol: symbol.to_string(),
            statement_marker: statement_marker.map(str::to_string),
        }
    }
}

/// The two companies covered out of the box.
pub fn default_companies() -> Vec<Company> {
    vec![
        Company::new("REXP", Some("Consolidated Income Statements")),
        Company::new("DIPD", Some("STATEMENT OF PROFIT OR LOSS")),
    ]
}

/// Which companies an operation covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyScope {
    All,
    Single(String),
}

impl CompanyScope {
    pub fn from_option(symbol: Option<&str>) -> Self {
        match symbol {
            Some(s) => Self::Single(s.to_ascii_uppercase()),
            None => Self::All,
        }
    }

    pub fn includes(&self, symbol: &str) -> bool {
        match self {
            Self::All => true,
            Self::Single(s) => s.eq_ignore_ascii_case(symbol),
        }
    }
}

impl std::fmt::Display for CompanyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Single(s) => write!(f, "{s}"),
        }
    }
}
