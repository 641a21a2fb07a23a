//! Signature rules and matching.
//!
//! - [`signature`]: rule types and the JSON rule file format
//! - [`store`]: the loaded, indexed [`SignatureStore`]

pub mod signature;
pub mod store;

pub use signature::{
    HashAlgorithm, Payload, RuleEntry, RuleFile, Signature, SignatureKind,
    SUPPORTED_FORMAT_VERSION,
};
pub use store::{SignatureStore, StoreInfo};
