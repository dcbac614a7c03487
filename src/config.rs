//! Runtime settings.
//!
//! Defaults mirror the layout the pipeline expects on disk:
//! `<data>/raw/<SYMBOL>/*.pdf` for source reports and
//! `<data>/processed/financial_data.csv` for the persisted series.
//! `Settings::from_env()` overlays `FINTREND_*` variables on top.

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::models::company::{default_companies, Company};

/// Application-level constants
pub const APP_NAME: &str = "fintrend";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default log filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "fintrend=info"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },

    #[error("Unknown company symbol: {0}")]
    UnknownCompany(String),

    #[error("Missing API key: set {0}")]
    MissingApiKey(&'static str),
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Which language-model service backs extraction and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    Ollama,
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::Invalid {
                key: "FINTREND_PROVIDER".into(),
                value: s.to_string(),
            }),
        }
    }
}

/// Language-model connection settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub anthropic_url: String,
    pub ollama_url: String,
    /// Per-request timeout. A timeout counts as a transient failure.
    pub timeout_secs: u64,
    /// Retries after the first attempt, transient failures only.
    pub max_retries: usize,
    pub max_response_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: DEFAULT_MODEL.into(),
            api_key: None,
            anthropic_url: DEFAULT_ANTHROPIC_URL.into(),
            ollama_url: DEFAULT_OLLAMA_URL.into(),
            timeout_secs: 120,
            max_retries: 2,
            max_response_tokens: 4096,
        }
    }
}

/// Consistency tolerance for gross profit checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceSettings {
    /// Relative tolerance as a fraction of revenue.
    pub ratio: f64,
    /// Absolute floor, in reporting currency units.
    pub absolute: f64,
}

impl Default for ToleranceSettings {
    fn default() -> Self {
        Self {
            ratio: 0.01,
            absolute: 1.0,
        }
    }
}

/// Context sampler tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    pub max_rows: usize,
    /// Share of the row budget reserved for the most recent records.
    pub recency_ratio: f64,
    /// Hard ceiling on the estimated prompt tokens of one context.
    pub token_ceiling: usize,
    pub tokens_per_field: usize,
    pub token_overhead: usize,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            max_rows: 35,
            recency_ratio: 0.6,
            token_ceiling: 6000,
            tokens_per_field: 4,
            token_overhead: 120,
        }
    }
}

/// Full runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub companies: Vec<Company>,
    pub llm: LlmSettings,
    pub tolerance: ToleranceSettings,
    pub sampler: SamplerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            companies: default_companies(),
            llm: LlmSettings::default(),
            tolerance: ToleranceSettings::default(),
            sampler: SamplerSettings::default(),
        }
    }
}

impl Settings {
    /// Directory holding one sub-directory of reports per company.
    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    /// Persisted series snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("processed").join("financial_data.csv")
    }

    /// Look up a company by symbol (case-insensitive).
    pub fn company(&self, symbol: &str) -> Result<&Company, ConfigError> {
        self.companies
            .iter()
            .find(|c| c.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ConfigError::UnknownCompany(symbol.to_string()))
    }

    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup. Used by `from_env()` and tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(dir) = lookup("FINTREND_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(provider) = lookup("FINTREND_PROVIDER") {
            settings.llm.provider = provider.parse()?;
        }
        if let Some(model) = lookup("FINTREND_MODEL") {
            settings.llm.model = model;
        }
        settings.llm.api_key = lookup("ANTHROPIC_API_KEY").filter(|k| !k.trim().is_empty());
        if let Some(url) = lookup("FINTREND_ANTHROPIC_URL") {
            settings.llm.anthropic_url = url;
        }
        if let Some(url) = lookup("FINTREND_OLLAMA_URL") {
            settings.llm.ollama_url = url;
        }

        overlay(&lookup, "FINTREND_LLM_TIMEOUT_SECS", &mut settings.llm.timeout_secs)?;
        overlay(&lookup, "FINTREND_MAX_RETRIES", &mut settings.llm.max_retries)?;
        overlay(&lookup, "FINTREND_MAX_RESPONSE_TOKENS", &mut settings.llm.max_response_tokens)?;
        overlay(&lookup, "FINTREND_TOLERANCE_RATIO", &mut settings.tolerance.ratio)?;
        overlay(&lookup, "FINTREND_TOLERANCE_ABSOLUTE", &mut settings.tolerance.absolute)?;
        overlay(&lookup, "FINTREND_MAX_CONTEXT_ROWS", &mut settings.sampler.max_rows)?;
        overlay(&lookup, "FINTREND_RECENCY_RATIO", &mut settings.sampler.recency_ratio)?;
        overlay(&lookup, "FINTREND_TOKEN_CEILING", &mut settings.sampler.token_ceiling)?;

        if !(0.0..=1.0).contains(&settings.sampler.recency_ratio) {
            return Err(ConfigError::Invalid {
                key: "FINTREND_RECENCY_RATIO".into(),
                value: settings.sampler.recency_ratio.to_string(),
            });
        }
        if settings.tolerance.ratio < 0.0 || settings.tolerance.absolute < 0.0 {
            return Err(ConfigError::Invalid {
                key: "FINTREND_TOLERANCE_*".into(),
                value: format!("{}/{}", settings.tolerance.ratio, settings.tolerance.absolute),
            });
        }

        Ok(settings)
    }
}

fn overlay<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}
