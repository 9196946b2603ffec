use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{AttendanceRecord, HierarchyLevel};

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default)]
    source_key: Option<String>,
    cell_date: String,
    region: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    district: String,
    #[serde(default)]
    cell_name: String,
    total_present: i64,
    #[serde(default)]
    bible_study: Option<i64>,
    #[serde(default)]
    miracle_hour: Option<i64>,
    #[serde(default)]
    sunday_service: Option<i64>,
    #[serde(default)]
    registered_men: Option<i64>,
    #[serde(default)]
    registered_women: Option<i64>,
    #[serde(default)]
    registered_children: Option<i64>,
    #[serde(default)]
    invited_count: Option<i64>,
    #[serde(default)]
    visits_count: Option<i64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("unparseable cell date {0:?}")]
    InvalidDate(String),
    #[error("{field} must be a non-negative count, got {value}")]
    InvalidCount { field: &'static str, value: i64 },
    #[error("{0} name is empty")]
    MissingLevel(HierarchyLevel),
}

#[derive(Debug, Clone)]
pub struct ImportedReport {
    pub source_key: Option<String>,
    pub record: AttendanceRecord,
}

#[derive(Debug, Default)]
pub struct LoadedReports {
    pub reports: Vec<ImportedReport>,
    pub skipped: usize,
}

impl LoadedReports {
    pub fn into_records(self) -> Vec<AttendanceRecord> {
        self.reports.into_iter().map(|report| report.record).collect()
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (its UTC date).
pub fn parse_cell_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|timestamp| timestamp.naive_utc().date())
        })
}

fn count(field: &'static str, value: i64) -> Result<u32, RowError> {
    u32::try_from(value).map_err(|_| RowError::InvalidCount { field, value })
}

impl CsvRow {
    fn into_report(self) -> Result<ImportedReport, RowError> {
        let occurred_on = parse_cell_date(&self.cell_date)
            .ok_or_else(|| RowError::InvalidDate(self.cell_date.clone()))?;
        let record = AttendanceRecord {
            occurred_on,
            total_present: count("total_present", self.total_present)?,
            region: self.region.trim().to_string(),
            group: self.group.trim().to_string(),
            district: self.district.trim().to_string(),
            cell_name: self.cell_name.trim().to_string(),
            bible_study: count("bible_study", self.bible_study.unwrap_or(0))?,
            miracle_hour: count("miracle_hour", self.miracle_hour.unwrap_or(0))?,
            sunday_service: count("sunday_service", self.sunday_service.unwrap_or(0))?,
            registered_men: count("registered_men", self.registered_men.unwrap_or(0))?,
            registered_women: count("registered_women", self.registered_women.unwrap_or(0))?,
            registered_children: count(
                "registered_children",
                self.registered_children.unwrap_or(0),
            )?,
            invited_count: count("invited_count", self.invited_count.unwrap_or(0))?,
            visits_count: count("visits_count", self.visits_count.unwrap_or(0))?,
        };

        // Every report belongs to a named cell at the bottom of the hierarchy.
        if let Some(level) = record.missing_level() {
            return Err(RowError::MissingLevel(level));
        }

        Ok(ImportedReport {
            source_key: self.source_key.filter(|key| !key.trim().is_empty()),
            record,
        })
    }
}

pub fn load_csv(path: &Path) -> anyhow::Result<LoadedReports> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let loaded = read_reports(file).with_context(|| format!("failed to read {}", path.display()))?;
    info!(
        path = %path.display(),
        loaded = loaded.reports.len(),
        skipped = loaded.skipped,
        "loaded report csv"
    );
    Ok(loaded)
}

/// Reads report rows, skipping (and counting) rows that fail validation.
pub fn read_reports<R: Read>(input: R) -> anyhow::Result<LoadedReports> {
    let mut reader = csv::Reader::from_reader(input);
    let mut loaded = LoadedReports::default();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("malformed csv row {}", index + 1))?;
        match row.into_report() {
            Ok(report) => loaded.reports.push(report),
            Err(err) => {
                warn!(row = index + 1, error = %err, "skipping report row");
                loaded.skipped += 1;
            }
        }
    }

    Ok(loaded)
}
