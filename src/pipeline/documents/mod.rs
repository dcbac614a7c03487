//! Document Store: enumerates source reports per company and reads their text.

pub mod pdf;
pub mod store;

pub use pdf::*;
pub use store::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Report directory not found for {symbol}: {path}")]
    MissingDirectory { symbol: String, path: PathBuf },

    #[error("Cannot list {path}: {source}")]
    Listing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unreadable source {file_identifier}: {reason}")]
    Unreadable {
        file_identifier: String,
        reason: String,
    },
}

impl DocumentError {
    pub(crate) fn unreadable(file_identifier: &str, reason: impl Into<String>) -> Self {
        DocumentError::Unreadable {
            file_identifier: file_identifier.to_string(),
            reason: reason.into(),
        }
    }
}
