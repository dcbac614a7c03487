//! ExtractionPipeline: documents → extractor → validator → one snapshot write.
//!
//! One worker per company runs on a scoped thread; inside a company documents
//! are handled one at a time in file-name order. Workers only read the loaded
//! series. Accepted records are upserted after every worker has finished and
//! the snapshot is replaced once at the end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::documents::{DocumentError, DocumentStore};
use super::series::{FinancialSeries, SeriesError, SnapshotStore, UpsertOutcome};
use super::statement::{ExtractionFailure, ExtractionFailureKind, StatementExtractor};
use super::validation::{RecordValidator, ValidationFailure};
use crate::config::Settings;
use crate::models::{Company, CompanyScope, FinancialRecord, RawDocument};
use crate::pipeline::llm::SharedLlmClient;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No configured company matches {0}")]
    UnknownCompany(String),

    #[error("Failed to load the series: {0}")]
    Load(#[source] SeriesError),

    #[error("Failed to persist the series, previous snapshot kept: {0}")]
    Persistence(#[source] SeriesError),

    #[error("Worker for {0} panicked")]
    WorkerPanicked(String),
}

/// Lifecycle of one document within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Pending,
    Extracting,
    Validating,
    Accepted,
    Rejected,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Validating => "validating",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// Where a document was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Listing,
    Extraction,
    Validation,
}

/// One skipped document, enough to find and re-supply it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureDetail {
    pub company_symbol: String,
    pub file_identifier: String,
    pub stage: FailureStage,
    pub kind: String,
    pub detail: String,
}

impl FailureDetail {
    /// A company directory, or an entry in it, that could not be listed.
    fn listing(company: &Company, e: &DocumentError) -> Self {
        let location = match e {
            DocumentError::Listing { path, .. } => path.display().to_string(),
            _ => String::new(),
        };
        Self {
            company_symbol: company.symbol.clone(),
            file_identifier: location,
            stage: FailureStage::Listing,
            kind: "listing".to_string(),
            detail: e.to_string(),
        }
    }
}

impl From<&ExtractionFailure> for FailureDetail {
    fn from(f: &ExtractionFailure) -> Self {
        Self {
            company_symbol: f.company_symbol.clone(),
            file_identifier: f.file_identifier.clone(),
            stage: FailureStage::Extraction,
            kind: f.kind.as_str().to_string(),
            detail: f.reason.clone(),
        }
    }
}

impl From<&ValidationFailure> for FailureDetail {
    fn from(f: &ValidationFailure) -> Self {
        Self {
            company_symbol: f.company_symbol.clone(),
            file_identifier: f.file_identifier.clone(),
            stage: FailureStage::Validation,
            kind: f.kind.as_str().to_string(),
            detail: f.detail.clone(),
        }
    }
}

/// Outcome of `ExtractionPipeline::run`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub newly_accepted: usize,
    pub overwritten: usize,
    pub rejected: usize,
    pub extraction_failed: usize,
    /// Documents left out because their key was already in the series.
    pub skipped_existing: usize,
    pub failures: Vec<FailureDetail>,
    /// Run stopped early at a document boundary.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.newly_accepted + self.overwritten + self.rejected + self.extraction_failed
    }
}

/// What one company's worker hands back after its batch.
#[derive(Debug, Default)]
struct CompanyBatch {
    accepted: Vec<FinancialRecord>,
    failures: Vec<FailureDetail>,
    rejected: usize,
    extraction_failed: usize,
    skipped_existing: usize,
    cancelled: bool,
}

enum DocumentOutcome {
    Accepted(FinancialRecord),
    ExtractionFailed(ExtractionFailure),
    Rejected(ValidationFailure),
}

/// Drives a full extraction run.
pub struct ExtractionPipeline {
    companies: Vec<Company>,
    documents: DocumentStore,
    extractor: StatementExtractor,
    validator: RecordValidator,
    snapshot: SnapshotStore,
    cancel: Arc<AtomicBool>,
}

impl ExtractionPipeline {
    pub fn new(
        companies: Vec<Company>,
        documents: DocumentStore,
        extractor: StatementExtractor,
        validator: RecordValidator,
        snapshot: SnapshotStore,
    ) -> Self {
        Self {
            companies,
            documents,
            extractor,
            validator,
            snapshot,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire the pipeline from settings and a model client.
    pub fn from_settings(settings: &Settings, llm: SharedLlmClient) -> Self {
        Self::new(
            settings.companies.clone(),
            DocumentStore::new(settings.raw_dir()),
            StatementExtractor::new(llm, &settings.llm.model).with_max_retries(settings.llm.max_retries),
            RecordValidator::new(settings.tolerance),
            SnapshotStore::new(settings.snapshot_path(), settings.tolerance),
        )
    }

    /// Flag that stops the run at the next document boundary when set.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn companies_in_scope(&self, scope: &CompanyScope) -> Result<Vec<&Company>, PipelineError> {
        let selected: Vec<&Company> = self
            .companies
            .iter()
            .filter(|c| scope.includes(&c.symbol))
            .collect();
        if selected.is_empty() {
            return Err(PipelineError::UnknownCompany(scope.to_string()));
        }
        Ok(selected)
    }

    /// Process every unprocessed document in scope and persist the result.
    ///
    /// Per-document failures are collected in the summary. Only loading or
    /// persisting the snapshot fails the run.
    pub fn run(&self, scope: &CompanyScope, force: bool) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("extraction_run", run_id = %run_id, scope = %scope, force);
        let _guard = span.enter();

        let companies = self.companies_in_scope(scope)?;
        let mut series = self.snapshot.load().map_err(PipelineError::Load)?;
        tracing::info!(
            companies = companies.len(),
            existing = series.len(),
            "Extraction run started"
        );

        let batches = std::thread::scope(|s| {
            let handles: Vec<_> = companies
                .iter()
                .map(|company| {
                    let series = &series;
                    let span = span.clone();
                    let handle = s.spawn(move || {
                        let _guard = span.enter();
                        self.process_company(company, series, force)
                    });
                    (company.symbol.clone(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(symbol, handle)| {
                    handle
                        .join()
                        .map_err(|_| PipelineError::WorkerPanicked(symbol))
                })
                .collect::<Result<Vec<CompanyBatch>, PipelineError>>()
        })?;

        let mut summary = RunSummary {
            run_id,
            ..Default::default()
        };
        for batch in batches {
            for record in batch.accepted {
                match series.upsert(record) {
                    UpsertOutcome::Inserted => summary.newly_accepted += 1,
                    UpsertOutcome::Replaced => summary.overwritten += 1,
                }
            }
            summary.rejected += batch.rejected;
            summary.extraction_failed += batch.extraction_failed;
            summary.skipped_existing += batch.skipped_existing;
            summary.failures.extend(batch.failures);
            summary.cancelled |= batch.cancelled;
        }

        self.snapshot
            .save_atomic(&series)
            .map_err(PipelineError::Persistence)?;

        tracing::info!(
            newly_accepted = summary.newly_accepted,
            overwritten = summary.overwritten,
            rejected = summary.rejected,
            extraction_failed = summary.extraction_failed,
            skipped_existing = summary.skipped_existing,
            cancelled = summary.cancelled,
            total = series.len(),
            "Extraction run finished"
        );
        Ok(summary)
    }

    /// Sequential pass over one company's unprocessed documents.
    fn process_company(&self, company: &Company, series: &FinancialSeries, force: bool) -> CompanyBatch {
        let mut batch = CompanyBatch::default();

        let documents = match self.documents.list_unprocessed(company, series, force) {
            Ok(docs) => docs,
            Err(e @ DocumentError::MissingDirectory { .. }) => {
                tracing::warn!(company = %company.symbol, error = %e, "No reports to process");
                return batch;
            }
            Err(e) => {
                tracing::warn!(company = %company.symbol, error = %e, "Cannot list reports");
                batch.failures.push(FailureDetail::listing(company, &e));
                return batch;
            }
        };
        for e in documents.unreadable_entries() {
            tracing::warn!(company = %company.symbol, error = %e, "Skipping unreadable directory entry");
            batch.failures.push(FailureDetail::listing(company, e));
        }
        batch.skipped_existing = documents.skipped_existing();
        tracing::info!(
            company = %company.symbol,
            pending = documents.remaining(),
            skipped = batch.skipped_existing,
            "Processing company"
        );

        for document in documents {
            if self.cancelled() {
                tracing::info!(company = %company.symbol, "Run cancelled, stopping at document boundary");
                batch.cancelled = true;
                break;
            }

            let outcome = match document {
                Ok(doc) => self.process_document(&doc, series, &batch.accepted),
                Err(e) => DocumentOutcome::ExtractionFailed(unreadable(company, e)),
            };

            match outcome {
                DocumentOutcome::Accepted(record) => batch.accepted.push(record),
                DocumentOutcome::ExtractionFailed(failure) => {
                    tracing::warn!(
                        company = %failure.company_symbol,
                        file = %failure.file_identifier,
                        kind = %failure.kind,
                        reason = %failure.reason,
                        "Document skipped: extraction failed"
                    );
                    batch.extraction_failed += 1;
                    batch.failures.push(FailureDetail::from(&failure));
                }
                DocumentOutcome::Rejected(failure) => {
                    tracing::warn!(
                        company = %failure.company_symbol,
                        file = %failure.file_identifier,
                        kind = %failure.kind,
                        values = ?failure.offending,
                        "Document skipped: validation failed"
                    );
                    batch.rejected += 1;
                    batch.failures.push(FailureDetail::from(&failure));
                }
            }
        }
        batch
    }

    fn process_document(
        &self,
        doc: &RawDocument,
        series: &FinancialSeries,
        accepted_so_far: &[FinancialRecord],
    ) -> DocumentOutcome {
        let _span = tracing::info_span!(
            "document",
            company = %doc.company_symbol,
            file = %doc.file_identifier
        )
        .entered();
        let mut state = DocumentState::Pending;
        let mut advance = |next: DocumentState| {
            tracing::debug!(from = state.as_str(), to = next.as_str(), "Document state");
            state = next;
        };

        advance(DocumentState::Extracting);
        let candidate = match self.extractor.extract(doc) {
            Ok(c) => c,
            Err(failure) => {
                advance(DocumentState::Rejected);
                return DocumentOutcome::ExtractionFailed(failure);
            }
        };

        advance(DocumentState::Validating);
        let key = candidate.key();
        let prior = candidate.report_date.and_then(|date| {
            let stored = series.prior_to(&key, date);
            let fresh = accepted_so_far
                .iter()
                .filter(|r| r.report_date < date && r.source_file_identifier != key.file_identifier)
                .max_by(|a, b| a.sort_key().cmp(&b.sort_key()));
            match (stored, fresh) {
                (Some(a), Some(b)) => Some(if b.sort_key() > a.sort_key() { b } else { a }),
                (a, b) => a.or(b),
            }
        });

        match self.validator.validate(&candidate, prior) {
            Ok(record) => {
                advance(DocumentState::Accepted);
                DocumentOutcome::Accepted(record)
            }
            Err(failure) => {
                advance(DocumentState::Rejected);
                DocumentOutcome::Rejected(failure)
            }
        }
    }
}

fn unreadable(company: &Company, e: DocumentError) -> ExtractionFailure {
    let file_identifier = match &e {
        DocumentError::Unreadable { file_identifier, .. } => file_identifier.clone(),
        _ => String::new(),
    };
    ExtractionFailure {
        company_symbol: company.symbol.clone(),
        file_identifier,
        kind: ExtractionFailureKind::UnreadableSource,
        reason: e.to_string(),
        raw_response: None,
    }
}
