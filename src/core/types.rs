//! Core type definitions used throughout SecureShield.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Severity level attached to a signature.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low risk
    Low,
    /// Medium risk
    #[default]
    Medium,
    /// High risk
    High,
    /// Critical risk
    Critical,
}

impl Severity {
    /// Get string representation for ledger storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Category of a signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Virus,
    Trojan,
    Worm,
    Malware,
    Attack,
    Payload,
    /// Generic / unclassified
    #[default]
    Generic,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Virus => "virus",
            Category::Trojan => "trojan",
            Category::Worm => "worm",
            Category::Malware => "malware",
            Category::Attack => "attack",
            Category::Payload => "payload",
            Category::Generic => "generic",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "virus" => Some(Category::Virus),
            "trojan" => Some(Category::Trojan),
            "worm" => Some(Category::Worm),
            "malware" => Some(Category::Malware),
            "attack" => Some(Category::Attack),
            "payload" => Some(Category::Payload),
            "generic" => Some(Category::Generic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Virus => write!(f, "Virus"),
            Category::Trojan => write!(f, "Trojan"),
            Category::Worm => write!(f, "Worm"),
            Category::Malware => write!(f, "Malware"),
            Category::Attack => write!(f, "Attack"),
            Category::Payload => write!(f, "Payload"),
            Category::Generic => write!(f, "Generic"),
        }
    }
}

/// Facts gathered about one enumerated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path as enumerated
    pub path: PathBuf,
    /// Size in bytes, if metadata could be read
    pub size: Option<u64>,
    /// SHA-256 of the content, if the content was read
    pub sha256: Option<String>,
    /// When the file was classified
    pub scanned_at: DateTime<Utc>,
}

impl FileRecord {
    /// Create a record with nothing known but the path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: None,
            sha256: None,
            scanned_at: Utc::now(),
        }
    }

    /// Set the size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the SHA-256 checksum.
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// Why a file could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnreadableReason {
    TooLarge,
    PermissionDenied,
    BrokenSymlink,
    NotFound,
    NotARegularFile,
    IoError(String),
}

impl UnreadableReason {
    /// Map an I/O error to a reason.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => UnreadableReason::PermissionDenied,
            std::io::ErrorKind::NotFound => UnreadableReason::NotFound,
            _ => UnreadableReason::IoError(err.to_string()),
        }
    }
}

impl std::fmt::Display for UnreadableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnreadableReason::TooLarge => write!(f, "too-large"),
            UnreadableReason::PermissionDenied => write!(f, "permission-denied"),
            UnreadableReason::BrokenSymlink => write!(f, "broken-symlink"),
            UnreadableReason::NotFound => write!(f, "not-found"),
            UnreadableReason::NotARegularFile => write!(f, "not-a-regular-file"),
            UnreadableReason::IoError(msg) => write!(f, "io-error({})", msg),
        }
    }
}

/// Classification outcome for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Outcome {
    Clean,
    Matched {
        signature_id: String,
        label: String,
    },
    Unreadable {
        reason: UnreadableReason,
    },
    /// Recorded during enumeration but not classified (symlinks)
    Skipped {
        reason: String,
    },
    /// Not reached before the session was cancelled
    Unscanned,
}

impl Outcome {
    /// Short name used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Clean => "clean",
            Outcome::Matched { .. } => "matched",
            Outcome::Unreadable { .. } => "unreadable",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Unscanned => "unscanned",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Clean => write!(f, "clean"),
            Outcome::Matched {
                signature_id,
                label,
            } => write!(f, "matched {} ({})", label, signature_id),
            Outcome::Unreadable { reason } => write!(f, "unreadable: {}", reason),
            Outcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            Outcome::Unscanned => write!(f, "unscanned"),
        }
    }
}

/// What happened to a file after classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Disposition {
    #[default]
    None,
    Quarantined {
        entry_id: String,
    },
    QuarantineFailed {
        reason: String,
    },
    /// Matched, but the session was told to leave files in place
    ReportOnly,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::None => write!(f, "-"),
            Disposition::Quarantined { entry_id } => write!(f, "quarantined as {}", entry_id),
            Disposition::QuarantineFailed { reason } => write!(f, "quarantine failed: {}", reason),
            Disposition::ReportOnly => write!(f, "report only"),
        }
    }
}

/// A file record with its outcome and disposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub record: FileRecord,
    pub outcome: Outcome,
    #[serde(default)]
    pub disposition: Disposition,
}

impl Verdict {
    /// Create a verdict with no disposition.
    pub fn new(record: FileRecord, outcome: Outcome) -> Self {
        Self {
            record,
            outcome,
            disposition: Disposition::None,
        }
    }

    /// Shorthand for an unreadable verdict.
    pub fn unreadable(record: FileRecord, reason: UnreadableReason) -> Self {
        Self::new(record, Outcome::Unreadable { reason })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.record.path
    }

    /// Whether the file matched a signature.
    pub fn is_match(&self) -> bool {
        matches!(self.outcome, Outcome::Matched { .. })
    }

    /// Whether this verdict should be listed as a failure in the report.
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Unreadable { .. })
            || matches!(self.disposition, Disposition::QuarantineFailed { .. })
    }
}

/// Aggregated counts of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCounts {
    pub total: u64,
    pub scanned: u64,
    pub clean: u64,
    pub matched: u64,
    pub quarantined: u64,
    pub quarantine_failed: u64,
    pub unreadable: u64,
    pub skipped: u64,
    pub unscanned: u64,
}

impl ScanCounts {
    /// Aggregate counts from a list of verdicts.
    pub fn from_verdicts(verdicts: &[Verdict]) -> Self {
        let mut counts = Self::default();
        for verdict in verdicts {
            counts.record(verdict);
        }
        counts
    }

    /// Add one verdict to the counts.
    pub fn record(&mut self, verdict: &Verdict) {
        self.total += 1;
        match verdict.outcome {
            Outcome::Clean => self.clean += 1,
            Outcome::Matched { .. } => self.matched += 1,
            Outcome::Unreadable { .. } => self.unreadable += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Unscanned => {
                self.unscanned += 1;
                return;
            }
        }
        self.scanned += 1;

        match verdict.disposition {
            Disposition::Quarantined { .. } => self.quarantined += 1,
            Disposition::QuarantineFailed { .. } => self.quarantine_failed += 1,
            Disposition::None | Disposition::ReportOnly => {}
        }
    }

    /// Check the counting invariants.
    pub fn is_consistent(&self) -> bool {
        self.scanned + self.unscanned == self.total
            && self.clean + self.matched + self.unreadable + self.skipped == self.scanned
            && self.quarantined + self.quarantine_failed <= self.matched
    }
}

/// Lifecycle state of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Enumerating,
    Scanning,
    Finalizing,
    Complete,
    Cancelled,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Enumerating => write!(f, "enumerating"),
            SessionState::Scanning => write!(f, "scanning"),
            SessionState::Finalizing => write!(f, "finalizing"),
            SessionState::Complete => write!(f, "complete"),
            SessionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a finished scan session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Unique session identifier
    pub session_id: String,
    /// Scan root as given by the caller
    pub root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Final state, `complete` or `cancelled`
    pub state: SessionState,
    /// Verdicts in enumeration order
    pub verdicts: Vec<Verdict>,
    pub counts: ScanCounts,
}

impl ScanReport {
    /// Scan duration in seconds.
    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    /// Whether any file matched a signature.
    pub fn has_matches(&self) -> bool {
        self.counts.matched > 0
    }

    /// Verdicts that matched a signature.
    pub fn matches(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| v.is_match())
    }

    /// Verdicts that could not be classified or quarantined.
    pub fn failures(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| v.is_failure())
    }
}
