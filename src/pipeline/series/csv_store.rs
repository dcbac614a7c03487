use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{FinancialSeries, SeriesError};
use crate::config::ToleranceSettings;
use crate::models::{CandidateRecord, FinancialRecord, NaturalKey};
use crate::pipeline::validation::RecordValidator;

/// Column order of the persisted series. The first nine columns are the
/// historical layout; derived columns follow and are recomputed on load.
pub const SNAPSHOT_HEADER: [&str; 13] = [
    "Simbol",
    "file_name",
    "Revenue",
    "Cost of Goods Sold (COGS)",
    "Gross Profit",
    "Operating Expenses",
    "Operating Income",
    "Net Income",
    "Report Date",
    "Gross Margin",
    "Operating Margin",
    "Net Margin",
    "Revenue Growth %",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    #[serde(rename = "Simbol")]
    symbol: String,
    #[serde(rename = "file_name")]
    file_name: String,
    #[serde(rename = "Revenue")]
    revenue: Option<f64>,
    #[serde(rename = "Cost of Goods Sold (COGS)")]
    cost_of_goods_sold: Option<f64>,
    #[serde(rename = "Gross Profit")]
    gross_profit: Option<f64>,
    #[serde(rename = "Operating Expenses")]
    operating_expenses: Option<f64>,
    #[serde(rename = "Operating Income")]
    operating_income: Option<f64>,
    #[serde(rename = "Net Income")]
    net_income: Option<f64>,
    #[serde(rename = "Report Date", default)]
    report_date: Option<String>,
    #[serde(rename = "Gross Margin", default)]
    gross_margin: Option<f64>,
    #[serde(rename = "Operating Margin", default)]
    operating_margin: Option<f64>,
    #[serde(rename = "Net Margin", default)]
    net_margin: Option<f64>,
    #[serde(rename = "Revenue Growth %", default)]
    revenue_growth_pct: Option<f64>,
}

impl From<&FinancialRecord> for SnapshotRow {
    fn from(r: &FinancialRecord) -> Self {
        Self {
            symbol: r.company_symbol.clone(),
            file_name: r.source_file_identifier.clone(),
            revenue: Some(r.revenue),
            cost_of_goods_sold: Some(r.cost_of_goods_sold),
            gross_profit: Some(r.gross_profit),
            operating_expenses: Some(r.operating_expenses),
            operating_income: Some(r.operating_income),
            net_income: Some(r.net_income),
            report_date: Some(r.report_date.format(DATE_FORMAT).to_string()),
            gross_margin: r.derived_metrics.gross_margin,
            operating_margin: r.derived_metrics.operating_margin,
            net_margin: r.derived_metrics.net_margin,
            revenue_growth_pct: r.derived_metrics.period_over_period_growth,
        }
    }
}

impl SnapshotRow {
    /// Stored derived columns are discarded; expense lines are read as magnitudes.
    fn into_candidate(self) -> Result<CandidateRecord, String> {
        let report_date = match self.report_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_snapshot_date(raw).ok_or_else(|| format!("bad report date '{raw}'"))?),
        };
        Ok(CandidateRecord {
            company_symbol: self.symbol.trim().to_string(),
            source_file_identifier: self.file_name.trim().to_string(),
            report_date,
            revenue: self.revenue,
            cost_of_goods_sold: self.cost_of_goods_sold.map(f64::abs),
            gross_profit: self.gross_profit,
            operating_expenses: self.operating_expenses.map(f64::abs),
            operating_income: self.operating_income,
            net_income: self.net_income,
        })
    }
}

fn parse_snapshot_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Reads and atomically replaces the CSV snapshot of the series.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    validator: RecordValidator,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>, tolerance: ToleranceSettings) -> Self {
        Self {
            path: path.into(),
            validator: RecordValidator::new(tolerance),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the series. A missing file is an empty series; any row that would
    /// not pass validation fails the whole load.
    pub fn load(&self) -> Result<FinancialSeries, SeriesError> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "No snapshot yet, starting with an empty series");
            return Ok(FinancialSeries::new());
        }

        let read_error = |reason: String| SeriesError::Read {
            path: self.path.clone(),
            reason,
        };
        let file = File::open(&self.path).map_err(|e| read_error(e.to_string()))?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .flexible(true)
            .from_reader(file);

        let mut series = FinancialSeries::new();
        for (idx, row) in reader.deserialize::<SnapshotRow>().enumerate() {
            let line = idx as u64 + 2;
            let row = row.map_err(|e| SeriesError::InvalidRow {
                line,
                reason: e.to_string(),
            })?;
            let candidate = row
                .into_candidate()
                .map_err(|reason| SeriesError::InvalidRow { line, reason })?;

            let key: NaturalKey = candidate.key();
            if series.contains(&key) {
                return Err(SeriesError::DuplicateKey(key));
            }
            let record = self
                .validator
                .validate(&candidate, None)
                .map_err(|e| SeriesError::InvalidRow {
                    line,
                    reason: e.to_string(),
                })?;
            series.upsert(record);
        }

        tracing::debug!(path = %self.path.display(), records = series.len(), "Snapshot loaded");
        Ok(series)
    }

    /// Write the whole series to a temporary file beside the snapshot, flush
    /// it to disk, then rename it over the snapshot. On any failure the
    /// previous snapshot is left as it was.
    pub fn save_atomic(&self, series: &FinancialSeries) -> Result<(), SeriesError> {
        let persistence = |reason: String| SeriesError::Persistence {
            path: self.path.clone(),
            reason,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| persistence(e.to_string()))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".financial_data")
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(|e| persistence(e.to_string()))?;

        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer
                .write_record(SNAPSHOT_HEADER)
                .map_err(|e| persistence(e.to_string()))?;
            for record in series.iter() {
                writer
                    .serialize(SnapshotRow::from(record))
                    .map_err(|e| persistence(e.to_string()))?;
            }
            writer.flush().map_err(|e| persistence(e.to_string()))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| persistence(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| persistence(e.error.to_string()))?;

        // Make the rename durable.
        if let Err(e) = File::open(&parent).and_then(|dir| dir.sync_all()) {
            tracing::debug!(error = %e, "Directory sync unavailable");
        }

        tracing::info!(path = %self.path.display(), records = series.len(), "Snapshot written");
        Ok(())
    }
}
