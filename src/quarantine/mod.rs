//! Quarantine store management.
//!
//! This module handles:
//! - Crash-safe isolation of matched files
//! - The SQLite ledger of quarantined files
//! - Verified restoration and secure purging
//! - Recovery of interrupted operations when a store is opened

pub mod ledger;
pub mod operations;
pub mod vault;

pub use ledger::{EntryState, QuarantineEntry};
pub use vault::{QuarantineManager, QuarantineStats, RecoveryReport, VerifyReport};

/// Subdirectory of the store holding the copies.
pub const FILES_DIR: &str = "files";

/// Ledger database file name.
pub const LEDGER_FILE: &str = "ledger.db";

/// Prefix of copies that are not yet durable.
pub const PARTIAL_PREFIX: &str = ".partial-";
