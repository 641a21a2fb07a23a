//! Error types and result handling for SecureShield.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for SecureShield operations.
#[derive(Error, Debug)]
pub enum Error {
    // ===== I/O Errors =====
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file: {path}")]
    FileDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to access directory: {path}")]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Permission denied: {path}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ===== Configuration Errors =====
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("Failed to save configuration: {0}")]
    ConfigSave(String),

    #[error("Invalid configuration value: {field} - {message}")]
    ConfigInvalid { field: String, message: String },

    // ===== Rule Errors =====
    #[error("Failed to load rules from {source_name}: {reason}")]
    RuleLoad { source_name: String, reason: String },

    #[error("Invalid rule #{index} ({id}): {reason}")]
    InvalidRuleFormat {
        index: usize,
        id: String,
        reason: String,
    },

    // ===== Scanning Errors =====
    #[error("Failed to enumerate scan root: {path}")]
    Enumeration {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Scan session already used (state: {0})")]
    SessionReused(String),

    // ===== Quarantine Errors =====
    #[error("Quarantine name collision: {name} already holds different content")]
    QuarantineCollision { name: String, path: PathBuf },

    #[error("File already quarantined: {path} (as {name})")]
    AlreadyQuarantined { name: String, path: PathBuf },

    #[error("Failed to quarantine file: {path}")]
    QuarantineFailed {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Restore checksum mismatch for {id}: expected {expected}, got {actual}")]
    RestoreChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Restore target already exists with different content: {path}")]
    RestoreTargetExists { id: String, path: PathBuf },

    #[error("Quarantine entry not found: {0}")]
    QuarantineEntryNotFound(String),

    #[error("Quarantine ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error("Failed to initialize quarantine store: {0}")]
    StorageInit(String),

    #[error("Quarantine store is in use by another process: {0}")]
    StoreLocked(PathBuf),

    // ===== Concurrency Errors =====
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    // ===== Serialization Errors =====
    #[error("JSON serialization error")]
    JsonSerialize(#[from] serde_json::Error),

    // ===== Generic Errors =====
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a file read error.
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Create a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a file delete error.
    pub fn file_delete(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileDelete {
            path: path.into(),
            source,
        }
    }

    /// Create a permission denied error.
    pub fn permission_denied(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PermissionDenied {
            path: path.into(),
            source,
        }
    }

    /// Create a rule-file level load error.
    pub fn rule_load(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RuleLoad {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an error for a single malformed rule entry.
    pub fn invalid_rule(index: usize, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRuleFormat {
            index,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a lock poisoned error.
    pub fn lock_poisoned(context: impl Into<String>) -> Self {
        Self::LockPoisoned {
            context: context.into(),
        }
    }

    /// Check if this error is recoverable (scan can continue).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::FileRead { .. }
                | Error::FileWrite { .. }
                | Error::FileDelete { .. }
                | Error::PermissionDenied { .. }
                | Error::QuarantineCollision { .. }
                | Error::AlreadyQuarantined { .. }
                | Error::QuarantineFailed { .. }
                | Error::RestoreChecksumMismatch { .. }
                | Error::RestoreTargetExists { .. }
                | Error::QuarantineEntryNotFound(_)
        )
    }

    /// Check if this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RuleLoad { .. }
                | Error::InvalidRuleFormat { .. }
                | Error::StorageInit(_)
                | Error::StoreLocked(_)
                | Error::Enumeration { .. }
                | Error::ConfigLoad(_)
                | Error::ConfigInvalid { .. }
        )
    }

    /// Get a user-friendly suggestion for how to resolve this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::PermissionDenied { .. } => {
                Some("Try running with elevated privileges (sudo/administrator)")
            }
            Error::PathNotFound(_) => Some("Check that the path exists and is accessible"),
            Error::ConfigLoad(_) | Error::ConfigInvalid { .. } => {
                Some("Check your configuration file for syntax errors or missing fields")
            }
            Error::RuleLoad { .. } | Error::InvalidRuleFormat { .. } => {
                Some("Validate the rule file with: secureshield rules check <FILE>")
            }
            Error::QuarantineCollision { .. } => {
                Some("Inspect the quarantine store; an unrelated file occupies the derived name")
            }
            Error::RestoreChecksumMismatch { .. } => {
                Some("The quarantined copy is damaged; run: secureshield quarantine verify")
            }
            Error::RestoreTargetExists { .. } => {
                Some("Move the existing file away or restore with --to <PATH>")
            }
            Error::QuarantineEntryNotFound(_) => {
                Some("The entry may have been restored or purged; run: secureshield quarantine list")
            }
            Error::Ledger(_) | Error::StorageInit(_) => {
                Some("Check that the quarantine directory is writable")
            }
            Error::StoreLocked(_) => {
                Some("Wait for the running scan or quarantine command to finish")
            }
            Error::LockPoisoned { .. } => Some("Internal error: restart the application"),
            _ => None,
        }
    }

    /// Get the error category for logging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::FileRead { .. }
            | Error::FileWrite { .. }
            | Error::FileDelete { .. }
            | Error::DirectoryAccess { .. }
            | Error::PathNotFound(_)
            | Error::PermissionDenied { .. }
            | Error::Io(_) => ErrorCategory::Io,

            Error::ConfigLoad(_) | Error::ConfigSave(_) | Error::ConfigInvalid { .. } => {
                ErrorCategory::Configuration
            }

            Error::RuleLoad { .. } | Error::InvalidRuleFormat { .. } => ErrorCategory::Rules,

            Error::Enumeration { .. } | Error::SessionReused(_) => ErrorCategory::Scanning,

            Error::QuarantineCollision { .. }
            | Error::AlreadyQuarantined { .. }
            | Error::QuarantineFailed { .. }
            | Error::RestoreChecksumMismatch { .. }
            | Error::RestoreTargetExists { .. }
            | Error::QuarantineEntryNotFound(_)
            | Error::Ledger(_)
            | Error::StorageInit(_)
            | Error::StoreLocked(_) => ErrorCategory::Quarantine,

            Error::LockPoisoned { .. } => ErrorCategory::Concurrency,

            Error::JsonSerialize(_) => ErrorCategory::Serialization,

            Error::Other(_) => ErrorCategory::Other,
        }
    }
}

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Io,
    Configuration,
    Rules,
    Scanning,
    Quarantine,
    Concurrency,
    Serialization,
    Other,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io => write!(f, "I/O"),
            Self::Configuration => write!(f, "Configuration"),
            Self::Rules => write!(f, "Rules"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Quarantine => write!(f, "Quarantine"),
            Self::Concurrency => write!(f, "Concurrency"),
            Self::Serialization => write!(f, "Serialization"),
            Self::Other => write!(f, "Other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PathNotFound(PathBuf::from("/test/path"));
        assert_eq!(err.to_string(), "Path not found: /test/path");

        let err = Error::invalid_rule(3, "KW-004", "empty pattern");
        assert_eq!(err.to_string(), "Invalid rule #3 (KW-004): empty pattern");
    }

    #[test]
    fn test_recoverable_vs_fatal() {
        let err = Error::QuarantineCollision {
            name: "abc-def-b.txt".to_string(),
            path: PathBuf::from("/scan/b.txt"),
        };
        assert!(err.is_recoverable());
        assert!(!err.is_fatal());

        let err = Error::rule_load("rules.json", "unexpected end of input");
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());

        let err = Error::StoreLocked(PathBuf::from("/store/ledger.db"));
        assert!(err.is_fatal());
        assert_eq!(err.category(), ErrorCategory::Quarantine);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::invalid_rule(0, "x", "bad").category(),
            ErrorCategory::Rules
        );
        assert_eq!(
            Error::QuarantineEntryNotFound("id".into()).category(),
            ErrorCategory::Quarantine
        );
        assert_eq!(ErrorCategory::Quarantine.to_string(), "Quarantine");
    }

    #[test]
    fn test_suggestions() {
        let err = Error::RestoreChecksumMismatch {
            id: "id".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(err.suggestion().is_some());
        assert!(Error::Io("x".into()).suggestion().is_none());
    }
}
