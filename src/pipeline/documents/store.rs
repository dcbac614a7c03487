use std::path::{Path, PathBuf};

use super::pdf::{default_sources, select_statement_pages, TextSource};
use super::DocumentError;
use crate::models::{Company, NaturalKey, RawDocument};
use crate::pipeline::series::FinancialSeries;

/// Enumerates `<raw_dir>/<SYMBOL>/` and reads report text on demand.
pub struct DocumentStore {
    raw_dir: PathBuf,
    sources: Vec<Box<dyn TextSource>>,
}

impl DocumentStore {
    pub fn new(raw_dir: impl Into<PathBuf>) -> Self {
        Self::with_sources(raw_dir, default_sources())
    }

    pub fn with_sources(raw_dir: impl Into<PathBuf>, sources: Vec<Box<dyn TextSource>>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            sources,
        }
    }

    pub fn company_dir(&self, company: &Company) -> PathBuf {
        self.raw_dir.join(&company.symbol)
    }

    fn source_for(&self, path: &Path) -> Option<&dyn TextSource> {
        self.sources
            .iter()
            .find(|s| s.accepts(path))
            .map(|s| s.as_ref())
    }

    /// Report files for a company, ordered by file name, plus any directory
    /// entries that could not be read.
    pub fn list_all(&self, company: &Company) -> Result<ReportListing, DocumentError> {
        let dir = self.company_dir(company);
        if !dir.is_dir() {
            return Err(DocumentError::MissingDirectory {
                symbol: company.symbol.clone(),
                path: dir,
            });
        }

        let entries = std::fs::read_dir(&dir).map_err(|source| DocumentError::Listing {
            path: dir.clone(),
            source,
        })?;

        let mut listing = ReportListing::default();
        for entry in entries {
            match entry {
                // Dangling links stay in the list and fail when read.
                Ok(entry) => {
                    let path = entry.path();
                    if !path.is_dir() && self.source_for(&path).is_some() {
                        listing.files.push(path);
                    }
                }
                Err(source) => listing.unreadable_entries.push(DocumentError::Listing {
                    path: dir.clone(),
                    source,
                }),
            }
        }
        listing.files.sort_by_key(|p| file_identifier(p));
        Ok(listing)
    }

    /// Documents that still need extraction, in deterministic order.
    ///
    /// A document is processed when the series already holds its natural key.
    /// `force` treats every document as unprocessed. Text is read lazily, one
    /// document per `next()`; the series is never touched.
    pub fn list_unprocessed<'a>(
        &'a self,
        company: &'a Company,
        series: &FinancialSeries,
        force: bool,
    ) -> Result<UnprocessedDocuments<'a>, DocumentError> {
        let listing = self.list_all(company)?;
        let total = listing.files.len();

        let pending: Vec<PathBuf> = listing
            .files
            .into_iter()
            .filter(|p| {
                force || !series.contains(&NaturalKey::new(&company.symbol, &file_identifier(p)))
            })
            .collect();

        let skipped = total - pending.len();
        if skipped > 0 {
            tracing::debug!(
                company = %company.symbol,
                skipped,
                "Skipping documents already present in the series"
            );
        }

        Ok(UnprocessedDocuments {
            store: self,
            company,
            pending: pending.into_iter(),
            skipped_existing: skipped,
            unreadable_entries: listing.unreadable_entries,
        })
    }

    /// Read one document and keep its statement pages.
    pub fn read_document(&self, company: &Company, path: &Path) -> Result<RawDocument, DocumentError> {
        let file_id = file_identifier(path);
        let source = self
            .source_for(path)
            .ok_or_else(|| DocumentError::unreadable(&file_id, "unsupported file type"))?;

        let bytes = std::fs::read(path).map_err(|e| DocumentError::unreadable(&file_id, e.to_string()))?;
        let pages = source
            .extract_pages(&bytes)
            .map_err(|reason| DocumentError::unreadable(&file_id, reason))?;

        let (raw_text, matched) = select_statement_pages(&pages, company.statement_marker.as_deref());
        if raw_text.trim().is_empty() {
            return Err(DocumentError::unreadable(&file_id, "no extractable text"));
        }
        if !matched && company.statement_marker.is_some() {
            tracing::warn!(
                company = %company.symbol,
                file = %file_id,
                "Statement heading not found, using full document text"
            );
        }

        Ok(RawDocument {
            company_symbol: company.symbol.clone(),
            file_identifier: file_id,
            source_path: path.to_path_buf(),
            raw_text,
        })
    }
}

/// Result of scanning one company directory.
#[derive(Debug, Default)]
pub struct ReportListing {
    pub files: Vec<PathBuf>,
    pub unreadable_entries: Vec<DocumentError>,
}

/// Lazy, finite sequence of unprocessed documents for one company.
pub struct UnprocessedDocuments<'a> {
    store: &'a DocumentStore,
    company: &'a Company,
    pending: std::vec::IntoIter<PathBuf>,
    skipped_existing: usize,
    unreadable_entries: Vec<DocumentError>,
}

impl UnprocessedDocuments<'_> {
    /// Documents excluded because their key is already in the series.
    pub fn skipped_existing(&self) -> usize {
        self.skipped_existing
    }

    /// Directory entries skipped because they could not be read.
    pub fn unreadable_entries(&self) -> &[DocumentError] {
        &self.unreadable_entries
    }

    /// Documents not yet yielded.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl Iterator for UnprocessedDocuments<'_> {
    type Item = Result<RawDocument, DocumentError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.pending.next()?;
        Some(self.store.read_document(self.company, &path))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pending.size_hint()
    }
}

/// File name used as the document half of the natural key.
pub fn file_identifier(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
