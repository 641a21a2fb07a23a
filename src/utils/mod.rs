//! Utility functions and helpers.

pub mod hash;
pub mod logging;

pub use hash::{ContentDigests, HashCalculator};
pub use logging::{init_logging, LogConfig};
