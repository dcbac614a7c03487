//! Statement Extractor: one document's text → candidate record via the model.
//!
//! Only syntactic checks happen here. Financial consistency is the
//! validator's job.

pub mod prompt;
pub mod parser;
pub mod extractor;

pub use prompt::*;
pub use parser::*;
pub use extractor::*;

use serde::Serialize;
use thiserror::Error;

/// Why a document produced no candidate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailureKind {
    /// File missing, corrupt, or without a text layer.
    UnreadableSource,
    /// Timeouts, rate limits or outages outlasted the retry budget.
    TransientExhausted,
    /// The model service refused the request (auth, bad request).
    ServiceRejected,
    /// Reply held no decodable JSON object.
    MalformedResponse,
    /// A required key was absent from the reply.
    MissingField,
    /// A value could not be read as a number or date.
    MalformedNumber,
}

impl ExtractionFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnreadableSource => "unreadable_source",
            Self::TransientExhausted => "transient_exhausted",
            Self::ServiceRejected => "service_rejected",
            Self::MalformedResponse => "malformed_response",
            Self::MissingField => "missing_field",
            Self::MalformedNumber => "malformed_number",
        }
    }
}

impl std::fmt::Display for ExtractionFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A per-document extraction failure. Never aborts a run.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{kind} for {company_symbol}/{file_identifier}: {reason}")]
pub struct ExtractionFailure {
    pub company_symbol: String,
    pub file_identifier: String,
    pub kind: ExtractionFailureKind,
    pub reason: String,
    /// Last model reply, kept for diagnosis.
    pub raw_response: Option<String>,
}
