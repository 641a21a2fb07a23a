//! Report export for scan results.
//!
//! Reports are written as JSON (`.json`) or CSV (anything else).

pub mod csv;

use crate::core::error::{Error, Result};
use crate::core::types::ScanReport;
use std::path::Path;

pub use csv::CsvExporter;

/// Report format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Json,
}

impl ReportFormat {
    /// Pick the format from the output file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ReportFormat::Json,
            _ => ReportFormat::Csv,
        }
    }
}

/// Write a scan report in the given format.
pub fn generate_report(report: &ScanReport, format: ReportFormat, output_path: &Path) -> Result<()> {
    match format {
        ReportFormat::Csv => CsvExporter::new().export(report, output_path),
        ReportFormat::Json => {
            let json = serde_json::to_string_pretty(report)?;
            std::fs::write(output_path, json).map_err(|e| Error::file_write(output_path, e))
        }
    }
}

/// Write a scan report, choosing the format from the file extension.
pub fn export_report(report: &ScanReport, output_path: &Path) -> Result<ReportFormat> {
    let format = ReportFormat::from_path(output_path);
    generate_report(report, format, output_path)?;
    log::info!("Report written to {:?} ({:?})", output_path, format);
    Ok(format)
}
