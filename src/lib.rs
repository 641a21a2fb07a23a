//! SecureShield: a file-integrity scanning engine
//!
//! This crate classifies files against a set of byte-pattern, hash and
//! extension rules, moves matching files into a crash-safe quarantine store
//! with an SQLite ledger, and restores them byte-for-byte on request.

pub mod core;
pub mod detection;
pub mod quarantine;
pub mod scanner;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use crate::core::config::EngineConfig;
pub use crate::core::error::{Error, Result};
pub use crate::core::types::*;
pub use crate::detection::SignatureStore;
pub use crate::quarantine::{QuarantineEntry, QuarantineManager};
pub use crate::scanner::{CancelToken, ScanOptions, ScanSession, Scanner};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "SecureShield";
