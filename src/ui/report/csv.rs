//! CSV export functionality.
//!
//! Exports scan reports to CSV format for spreadsheet analysis.

use crate::core::error::{Error, Result};
use crate::core::types::{Disposition, Outcome, ScanReport, Verdict};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// CSV exporter for scan reports.
pub struct CsvExporter {
    /// Delimiter character
    delimiter: char,
    /// Include header row
    include_header: bool,
    /// Include the `#` summary lines
    include_summary: bool,
}

impl CsvExporter {
    /// Create a new CSV exporter.
    pub fn new() -> Self {
        Self {
            delimiter: ',',
            include_header: true,
            include_summary: true,
        }
    }

    /// Set the delimiter character.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set whether to include headers.
    pub fn with_header(mut self, include: bool) -> Self {
        self.include_header = include;
        self
    }

    /// Set whether to include the summary comment lines.
    pub fn with_summary(mut self, include: bool) -> Self {
        self.include_summary = include;
        self
    }

    /// Export a scan report to a CSV file.
    pub fn export(&self, report: &ScanReport, output_path: &Path) -> Result<()> {
        let file = File::create(output_path).map_err(|e| Error::file_write(output_path, e))?;
        let mut writer = BufWriter::new(file);
        self.write(report, &mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| Error::file_write(output_path, e))
    }

    /// Write a scan report as CSV.
    pub fn write<W: Write>(&self, report: &ScanReport, out: &mut W) -> std::io::Result<()> {
        if self.include_summary {
            let c = &report.counts;
            writeln!(out, "# SecureShield Scan Report")?;
            writeln!(out, "# Session ID: {}", report.session_id)?;
            writeln!(out, "# Root: {}", report.root.display())?;
            writeln!(out, "# State: {}", report.state)?;
            writeln!(out, "# Start Time: {}", report.started_at.to_rfc3339())?;
            writeln!(out, "# End Time: {}", report.finished_at.to_rfc3339())?;
            writeln!(
                out,
                "# Total: {} | Scanned: {} | Clean: {} | Matched: {} | Quarantined: {} | Quarantine Failed: {} | Unreadable: {} | Skipped: {} | Unscanned: {}",
                c.total,
                c.scanned,
                c.clean,
                c.matched,
                c.quarantined,
                c.quarantine_failed,
                c.unreadable,
                c.skipped,
                c.unscanned
            )?;
            writeln!(out)?;
        }

        if self.include_header {
            let header = [
                "Path",
                "Outcome",
                "Signature ID",
                "Label",
                "Reason",
                "Disposition",
                "Entry ID",
                "Size",
                "SHA256",
                "Scanned At",
            ];
            writeln!(out, "{}", header.join(&self.delimiter.to_string()))?;
        }

        for verdict in &report.verdicts {
            let fields = Self::fields(verdict)
                .iter()
                .map(|f| self.escape_csv(f))
                .collect::<Vec<_>>();
            writeln!(out, "{}", fields.join(&self.delimiter.to_string()))?;
        }

        Ok(())
    }

    fn fields(verdict: &Verdict) -> [String; 10] {
        let (signature_id, label, reason) = match &verdict.outcome {
            Outcome::Matched {
                signature_id,
                label,
            } => (signature_id.clone(), label.clone(), String::new()),
            Outcome::Unreadable { reason } => (String::new(), String::new(), reason.to_string()),
            Outcome::Skipped { reason } => (String::new(), String::new(), reason.clone()),
            Outcome::Clean | Outcome::Unscanned => Default::default(),
        };
        let (disposition, entry_id) = match &verdict.disposition {
            Disposition::None => (String::new(), String::new()),
            Disposition::Quarantined { entry_id } => ("quarantined".to_string(), entry_id.clone()),
            Disposition::QuarantineFailed { reason } => {
                (format!("quarantine-failed: {}", reason), String::new())
            }
            Disposition::ReportOnly => ("report-only".to_string(), String::new()),
        };

        [
            verdict.record.path.display().to_string(),
            verdict.outcome.as_str().to_string(),
            signature_id,
            label,
            reason,
            disposition,
            entry_id,
            verdict.record.size.map(|s| s.to_string()).unwrap_or_default(),
            verdict.record.sha256.clone().unwrap_or_default(),
            verdict.record.scanned_at.to_rfc3339(),
        ]
    }

    /// Escape a CSV field.
    fn escape_csv(&self, field: &str) -> String {
        if field.contains(self.delimiter)
            || field.contains('"')
            || field.contains('\n')
            || field.contains('\r')
        {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FileRecord, ScanCounts, SessionState, UnreadableReason};
    use chrono::Utc;
    use std::path::PathBuf;

    fn sample_report() -> ScanReport {
        let mut matched = Verdict::new(
            FileRecord::new("/scan/b,1.txt").with_size(12).with_sha256("ab12"),
            Outcome::Matched {
                signature_id: "KW-004".to_string(),
                label: "Keyword.Malware".to_string(),
            },
        );
        matched.disposition = Disposition::Quarantined {
            entry_id: "e-1".to_string(),
        };
        let verdicts = vec![
            Verdict::new(FileRecord::new("/scan/a.txt").with_size(3), Outcome::Clean),
            matched,
            Verdict::unreadable(FileRecord::new("/scan/c.txt"), UnreadableReason::PermissionDenied),
        ];
        ScanReport {
            session_id: "s-1".to_string(),
            root: PathBuf::from("/scan"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            state: SessionState::Complete,
            counts: ScanCounts::from_verdicts(&verdicts),
            verdicts,
        }
    }

    fn render(exporter: &CsvExporter) -> String {
        let mut out = Vec::new();
        exporter.write(&sample_report(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_escape_csv() {
        let exporter = CsvExporter::new();
        assert_eq!(exporter.escape_csv("simple"), "simple");
        assert_eq!(exporter.escape_csv("with,comma"), "\"with,comma\"");
        assert_eq!(exporter.escape_csv("with\"quote"), "\"with\"\"quote\"");
        assert_eq!(exporter.escape_csv("with\nnewline"), "\"with\nnewline\"");

        let semi = CsvExporter::new().with_delimiter(';');
        assert_eq!(semi.escape_csv("a;b"), "\"a;b\"");
        assert_eq!(semi.escape_csv("a,b"), "a,b");
    }

    #[test]
    fn test_write_rows() {
        let csv = render(&CsvExporter::new().with_summary(false));
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Path,Outcome,Signature ID"));
        assert!(lines[1].starts_with("/scan/a.txt,clean,"));
        assert!(lines[2].starts_with("\"/scan/b,1.txt\",matched,KW-004,Keyword.Malware,,quarantined,e-1,12,ab12,"));
        assert!(lines[3].starts_with("/scan/c.txt,unreadable,,,permission-denied,"));
    }

    #[test]
    fn test_summary_lines() {
        let csv = render(&CsvExporter::new());
        assert!(csv.starts_with("# SecureShield Scan Report"));
        assert!(csv.contains("Matched: 1 | Quarantined: 1"));

        let bare = render(&CsvExporter::new().with_summary(false).with_header(false));
        assert!(bare.starts_with("/scan/a.txt"));
    }
}
