//! Signature types and the JSON rule file format.

use crate::core::error::{Error, Result};
use crate::core::types::{Category, Severity};
use crate::utils::hash::is_hex_digest;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Highest rule file `format_version` this build understands.
pub const SUPPORTED_FORMAT_VERSION: u32 = 1;

/// Kind of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureKind {
    /// Byte substring, ASCII case-insensitive
    Pattern,
    /// Exact content digest
    Hash,
    /// File extension denylist entry
    Extension,
}

impl SignatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureKind::Pattern => "pattern",
            SignatureKind::Hash => "hash",
            SignatureKind::Extension => "extension",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pattern" => Some(SignatureKind::Pattern),
            "hash" => Some(SignatureKind::Hash),
            "extension" => Some(SignatureKind::Extension),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Digest algorithm of a hash rule, inferred from the digest length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Md5,
}

impl HashAlgorithm {
    /// Infer the algorithm from a hex digest.
    pub fn from_digest(digest: &str) -> Option<Self> {
        if is_hex_digest(digest, 64) {
            Some(HashAlgorithm::Sha256)
        } else if is_hex_digest(digest, 32) {
            Some(HashAlgorithm::Md5)
        } else {
            None
        }
    }
}

/// What a signature matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw bytes to search for
    Pattern(Vec<u8>),
    /// Lowercase hex digest
    Digest {
        algorithm: HashAlgorithm,
        digest: String,
    },
    /// Lowercase extension without the leading dot
    Extension(String),
}

/// An immutable detection rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Stable identifier (e.g. "KW-001")
    pub id: String,
    /// Human-readable label (e.g. "Keyword.Malware")
    pub label: String,
    pub payload: Payload,
    pub category: Category,
    pub severity: Severity,
}

impl Signature {
    /// Create a text pattern signature.
    pub fn new_pattern(
        id: impl Into<String>,
        label: impl Into<String>,
        pattern: impl Into<Vec<u8>>,
        category: Category,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            payload: Payload::Pattern(pattern.into()),
            category,
            severity: Severity::Medium,
        }
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn kind(&self) -> SignatureKind {
        match self.payload {
            Payload::Pattern(_) => SignatureKind::Pattern,
            Payload::Digest { .. } => SignatureKind::Hash,
            Payload::Extension(_) => SignatureKind::Extension,
        }
    }

    /// Payload rendered for display.
    pub fn payload_display(&self) -> String {
        match &self.payload {
            Payload::Pattern(bytes) if is_printable(bytes) => {
                String::from_utf8_lossy(bytes).into_owned()
            }
            Payload::Pattern(bytes) => format!("hex:{}", hex::encode(bytes)),
            Payload::Digest { digest, .. } => digest.clone(),
            Payload::Extension(ext) => format!(".{}", ext),
        }
    }

    /// Convert back to the rule file representation.
    pub fn to_rule(&self) -> RuleEntry {
        let mut rule = RuleEntry {
            id: self.id.clone(),
            label: self.label.clone(),
            kind: self.kind().as_str().to_string(),
            category: Some(self.category.as_str().to_string()),
            severity: Some(self.severity.as_str().to_string()),
            ..RuleEntry::default()
        };
        match &self.payload {
            Payload::Pattern(bytes) if is_printable(bytes) => {
                rule.pattern = Some(String::from_utf8_lossy(bytes).into_owned());
            }
            Payload::Pattern(bytes) => {
                rule.pattern = Some(hex::encode(bytes));
                rule.encoding = Some("hex".to_string());
            }
            Payload::Digest { digest, .. } => rule.digest = Some(digest.clone()),
            Payload::Extension(ext) => rule.extension = Some(ext.clone()),
        }
        rule
    }
}

fn is_printable(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
}

/// One entry of a rule file, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// `text` (default) or `hex`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// Rule file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFile {
    /// Schema version of the document
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Content version of the rule set (e.g. "2025.01.15")
    #[serde(default)]
    pub version: String,
    pub rules: Vec<RuleEntry>,
}

fn default_format_version() -> u32 {
    SUPPORTED_FORMAT_VERSION
}

impl RuleFile {
    /// Build a rule file from loaded signatures.
    pub fn from_signatures<'a>(
        version: impl Into<String>,
        signatures: impl IntoIterator<Item = &'a Signature>,
    ) -> Self {
        Self {
            format_version: SUPPORTED_FORMAT_VERSION,
            version: version.into(),
            rules: signatures.into_iter().map(Signature::to_rule).collect(),
        }
    }

    /// Parse a rule file document. Entries are not validated here.
    pub fn parse(json: &str, source_name: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::rule_load(source_name, e.to_string()))
    }

    /// Read and parse a rule file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::rule_load(path.display().to_string(), e.to_string()))?;
        Self::parse(&contents, &path.display().to_string())
    }

    /// Save to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|e| Error::file_write(path, e))
    }

    /// Whether entries of unknown kinds may be skipped.
    pub fn is_lenient(&self) -> bool {
        self.format_version > SUPPORTED_FORMAT_VERSION
    }

    /// Validate every entry and convert it to a signature.
    ///
    /// Any malformed entry fails the whole file. For documents newer than
    /// [`SUPPORTED_FORMAT_VERSION`], entries of unknown kinds are skipped
    /// with a warning instead.
    pub fn into_signatures(self) -> Result<Vec<Signature>> {
        let lenient = self.is_lenient();
        if lenient {
            log::warn!(
                "Rule file format version {} is newer than supported version {}; unknown rule kinds will be skipped",
                self.format_version,
                SUPPORTED_FORMAT_VERSION
            );
        }

        let mut seen = std::collections::HashSet::new();
        let mut signatures = Vec::with_capacity(self.rules.len());

        for (index, entry) in self.rules.into_iter().enumerate() {
            if lenient && SignatureKind::parse(&entry.kind).is_none() {
                log::warn!(
                    "Skipping rule #{} ({}): unknown kind '{}'",
                    index,
                    entry.id,
                    entry.kind
                );
                continue;
            }

            let signature = validate_entry(index, entry)?;
            if !seen.insert(signature.id.clone()) {
                return Err(Error::invalid_rule(
                    index,
                    signature.id,
                    "duplicate id",
                ));
            }
            signatures.push(signature);
        }

        Ok(signatures)
    }
}

fn validate_entry(index: usize, entry: RuleEntry) -> Result<Signature> {
    let id = entry.id.trim().to_string();
    let bad = |reason: &str| Error::invalid_rule(index, id.clone(), reason);

    if id.is_empty() {
        return Err(bad("empty id"));
    }
    if entry.label.trim().is_empty() {
        return Err(bad("empty label"));
    }

    let kind = SignatureKind::parse(&entry.kind)
        .ok_or_else(|| bad(&format!("unknown kind '{}'", entry.kind)))?;

    let payload = match kind {
        SignatureKind::Pattern => {
            let raw = entry.pattern.as_deref().ok_or_else(|| bad("missing pattern"))?;
            let bytes = match entry.encoding.as_deref().unwrap_or("text") {
                "text" => raw.as_bytes().to_vec(),
                "hex" => {
                    let compact: String = raw.split_whitespace().collect();
                    hex::decode(&compact).map_err(|e| bad(&format!("invalid hex: {}", e)))?
                }
                other => return Err(bad(&format!("unknown encoding '{}'", other))),
            };
            if bytes.is_empty() {
                return Err(bad("empty pattern"));
            }
            Payload::Pattern(bytes)
        }
        SignatureKind::Hash => {
            let digest = entry
                .digest
                .as_deref()
                .ok_or_else(|| bad("missing digest"))?
                .trim()
                .to_lowercase();
            let algorithm = HashAlgorithm::from_digest(&digest)
                .ok_or_else(|| bad("digest must be 32 (MD5) or 64 (SHA-256) hex digits"))?;
            Payload::Digest { algorithm, digest }
        }
        SignatureKind::Extension => {
            let ext = entry
                .extension
                .as_deref()
                .ok_or_else(|| bad("missing extension"))?
                .trim()
                .trim_start_matches('.')
                .to_lowercase();
            if ext.is_empty() {
                return Err(bad("empty extension"));
            }
            Payload::Extension(ext)
        }
    };

    let category = match entry.category.as_deref() {
        None => Category::Generic,
        Some(s) => Category::parse(s).ok_or_else(|| bad(&format!("unknown category '{}'", s)))?,
    };
    let severity = match entry.severity.as_deref() {
        None => Severity::Medium,
        Some(s) => Severity::parse(s).ok_or_else(|| bad(&format!("unknown severity '{}'", s)))?,
    };

    Ok(Signature {
        id,
        label: entry.label.trim().to_string(),
        payload,
        category,
        severity,
    })
}
