//! User interface components.
//!
//! This module provides:
//! - The command-line interface
//! - Report export (JSON, CSV)

pub mod cli;
pub mod report;

pub use cli::Cli;
pub use report::{export_report, generate_report, CsvExporter, ReportFormat};
