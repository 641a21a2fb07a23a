//! File scanning functionality.
//!
//! This module provides:
//! - Classification of single files against the signature store
//! - Depth-first enumeration of scan roots
//! - Scan sessions that drive classification and quarantine
//! - Progress tracking and cooperative cancellation

pub mod file;
pub mod progress;
pub mod session;

pub use file::{EnumeratedEntry, Enumeration, Scanner, TargetWalker};
pub use progress::{CancelToken, ConsoleProgressReporter, ProgressTracker, ScanProgress};
pub use session::{ScanOptions, ScanSession};
