//! Loaded, indexed signature set.

use crate::core::config::RulesConfig;
use crate::core::error::{Error, Result};
use crate::core::types::{Category, Severity};
use crate::detection::signature::{
    HashAlgorithm, Payload, RuleFile, Signature, SignatureKind, SUPPORTED_FORMAT_VERSION,
};
use crate::utils::hash::ContentDigests;
use aho_corasick::AhoCorasick;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Version string reported for the built-in rule set.
pub const BUILTIN_VERSION: &str = "builtin";

/// Immutable set of signatures with a compiled pattern automaton.
///
/// Rules are evaluated in load order and the first matching rule wins,
/// whatever its kind.
#[derive(Debug)]
pub struct SignatureStore {
    signatures: Vec<Signature>,
    /// Automaton pattern id for each signature, `None` for non-pattern rules
    pattern_slots: Vec<Option<usize>>,
    matcher: Option<AhoCorasick>,
    version: String,
    format_version: u32,
    source: String,
    has_hash_rules: bool,
}

/// Summary of a loaded store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    pub source: String,
    pub version: String,
    pub format_version: u32,
    pub total: usize,
    pub pattern_count: usize,
    pub hash_count: usize,
    pub extension_count: usize,
}

impl SignatureStore {
    /// Load and validate a JSON rule file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = RuleFile::load(path)?;
        let store = Self::from_rule_file(file, path.display().to_string())?;
        log::info!(
            "Loaded {} signature(s) from {} (version {})",
            store.len(),
            store.source,
            store.version
        );
        Ok(store)
    }

    /// Load from a JSON document held in memory.
    pub fn from_json(json: &str, source_name: &str) -> Result<Self> {
        let file = RuleFile::parse(json, source_name)?;
        Self::from_rule_file(file, source_name.to_string())
    }

    /// Build from a parsed rule file.
    pub fn from_rule_file(file: RuleFile, source: String) -> Result<Self> {
        let version = file.version.clone();
        let format_version = file.format_version;
        let signatures = file.into_signatures()?;
        Self::build(signatures, version, format_version, source)
    }

    /// The keyword rules used when no rule file is configured.
    pub fn builtin() -> Result<Self> {
        let keywords = [
            ("KW-001", "Keyword.Virus", "virus", Category::Virus, Severity::High),
            ("KW-002", "Keyword.Trojan", "trojan", Category::Trojan, Severity::High),
            ("KW-003", "Keyword.Worm", "worm", Category::Worm, Severity::High),
            ("KW-004", "Keyword.Malware", "malware", Category::Malware, Severity::High),
            ("KW-005", "Keyword.Attack", "attack", Category::Attack, Severity::Medium),
            ("KW-006", "Keyword.Payload", "payload", Category::Payload, Severity::Medium),
        ];
        let signatures = keywords
            .iter()
            .map(|(id, label, kw, cat, severity)| {
                Signature::new_pattern(*id, *label, kw.as_bytes(), *cat).with_severity(*severity)
            })
            .collect();

        Self::build(
            signatures,
            BUILTIN_VERSION.to_string(),
            SUPPORTED_FORMAT_VERSION,
            BUILTIN_VERSION.to_string(),
        )
    }

    /// Load the rule source named by the `rules` config section.
    pub fn from_config(rules: &RulesConfig) -> Result<Self> {
        match &rules.rule_file {
            Some(path) => Self::load(path),
            None if rules.use_builtin => Self::builtin(),
            None => Err(Error::rule_load("config", "no rule file configured")),
        }
    }

    fn build(
        signatures: Vec<Signature>,
        version: String,
        format_version: u32,
        source: String,
    ) -> Result<Self> {
        // Patterns that differ only in ASCII case share one automaton slot.
        let mut patterns: Vec<&[u8]> = Vec::new();
        let mut by_folded: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut pattern_slots = Vec::with_capacity(signatures.len());
        for sig in &signatures {
            let slot = match &sig.payload {
                Payload::Pattern(bytes) => {
                    let next = patterns.len();
                    let slot = *by_folded.entry(bytes.to_ascii_lowercase()).or_insert(next);
                    if slot == next {
                        patterns.push(bytes.as_slice());
                    }
                    Some(slot)
                }
                _ => None,
            };
            pattern_slots.push(slot);
        }

        let matcher = if patterns.is_empty() {
            None
        } else {
            let matcher = AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(&patterns)
                .map_err(|e| {
                    Error::rule_load(&source, format!("pattern compilation failed: {}", e))
                })?;
            Some(matcher)
        };
        let has_hash_rules = signatures.iter().any(|s| s.kind() == SignatureKind::Hash);

        Ok(Self {
            signatures,
            pattern_slots,
            matcher,
            version,
            format_version,
            source,
            has_hash_rules,
        })
    }

    /// First signature matching the content, in load order.
    ///
    /// Extension rules never match here; use [`find_match_for`](Self::find_match_for).
    pub fn find_match(&self, bytes: &[u8]) -> Option<&Signature> {
        let digests = self.has_hash_rules.then(|| ContentDigests::of(bytes));
        self.first_match(None, bytes, digests.as_ref())
    }

    /// First signature matching a file's path, content or digests, in load order.
    pub fn find_match_for(
        &self,
        path: &Path,
        bytes: &[u8],
        digests: &ContentDigests,
    ) -> Option<&Signature> {
        self.first_match(Some(path), bytes, Some(digests))
    }

    fn first_match(
        &self,
        path: Option<&Path>,
        bytes: &[u8],
        digests: Option<&ContentDigests>,
    ) -> Option<&Signature> {
        let hits = self.pattern_hits(bytes);
        let extension = path
            .and_then(|p| p.extension())
            .map(|e| e.to_string_lossy().to_lowercase());

        self.signatures
            .iter()
            .zip(&self.pattern_slots)
            .find(|(sig, slot)| match &sig.payload {
                Payload::Pattern(_) => slot.is_some_and(|i| hits.get(i).copied().unwrap_or(false)),
                Payload::Digest { algorithm, digest } => digests.is_some_and(|d| match algorithm {
                    HashAlgorithm::Sha256 => d.sha256 == *digest,
                    HashAlgorithm::Md5 => d.md5 == *digest,
                }),
                Payload::Extension(ext) => extension.as_deref() == Some(ext.as_str()),
            })
            .map(|(sig, _)| sig)
    }

    /// Which automaton patterns occur in `bytes`.
    fn pattern_hits(&self, bytes: &[u8]) -> Vec<bool> {
        let Some(matcher) = &self.matcher else {
            return Vec::new();
        };
        let mut hits = vec![false; matcher.patterns_len()];
        let mut remaining = hits.len();
        for mat in matcher.find_overlapping_iter(bytes) {
            let slot = &mut hits[mat.pattern().as_usize()];
            if !*slot {
                *slot = true;
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }
        }
        hits
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// All signatures in load order.
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Look up a signature by id.
    pub fn get(&self, id: &str) -> Option<&Signature> {
        self.signatures.iter().find(|s| s.id == id)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn info(&self) -> StoreInfo {
        let count = |kind| self.signatures.iter().filter(|s| s.kind() == kind).count();
        StoreInfo {
            source: self.source.clone(),
            version: self.version.clone(),
            format_version: self.format_version,
            total: self.signatures.len(),
            pattern_count: count(SignatureKind::Pattern),
            hash_count: count(SignatureKind::Hash),
            extension_count: count(SignatureKind::Extension),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hash::HashCalculator;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const RULES: &str = r#"{
        "format_version": 1,
        "version": "2025.01.15",
        "rules": [
            { "id": "E-001", "label": "Denied.Scr", "kind": "extension", "extension": "scr" },
            { "id": "KW-001", "label": "Keyword.Virus", "kind": "pattern", "pattern": "virus" },
            { "id": "HX-001", "label": "Hex.Marker", "kind": "pattern", "pattern": "4d5a9000", "encoding": "hex" },
            { "id": "H-001", "label": "Known.Hello", "kind": "hash",
              "digest": "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824" },
            { "id": "H-002", "label": "Known.Md5", "kind": "hash", "digest": "5D41402ABC4B2A76B9719D911017C592" },
            { "id": "KW-002", "label": "Keyword.Malware", "kind": "pattern", "pattern": "MALWARE" }
        ]
    }"#;

    #[test]
    fn test_builtin_keywords() {
        let store = SignatureStore::builtin().unwrap();
        assert_eq!(store.len(), 6);
        assert_eq!(store.version(), BUILTIN_VERSION);

        let sig = store.find_match(b"this file contains MALWARE bytes").unwrap();
        assert_eq!(sig.id, "KW-004");
        assert!(store.find_match(b"perfectly harmless").is_none());
    }

    #[test]
    fn test_export_reloads_identically() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("exported.json");

        let original = SignatureStore::from_json(RULES, "inline").unwrap();
        RuleFile::from_signatures(original.version(), original.signatures())
            .save(&path)
            .unwrap();

        let reloaded = SignatureStore::load(&path).unwrap();
        assert_eq!(reloaded.version(), "2025.01.15");
        assert_eq!(reloaded.signatures(), original.signatures());
        assert_eq!(
            reloaded.find_match(&[0x00, 0x4d, 0x5a, 0x90, 0x00]).unwrap().id,
            "HX-001"
        );

        let builtin = SignatureStore::builtin().unwrap();
        RuleFile::from_signatures(builtin.version(), builtin.signatures())
            .save(&path)
            .unwrap();
        let reloaded = SignatureStore::load(&path).unwrap();
        assert_eq!(reloaded.get("KW-001").unwrap().severity, Severity::High);
        assert_eq!(reloaded.get("KW-006").unwrap().severity, Severity::Medium);
    }

    #[test]
    fn test_first_match_in_load_order() {
        let store = SignatureStore::builtin().unwrap();
        // "payload" occurs first in the buffer but "virus" is loaded earlier.
        let sig = store.find_match(b"payload ... virus").unwrap();
        assert_eq!(sig.id, "KW-001");
    }

    #[test]
    fn test_case_insensitive_patterns() {
        let store = SignatureStore::from_json(RULES, "inline").unwrap();
        assert_eq!(store.find_match(b"ViRuS").unwrap().id, "KW-001");
        assert_eq!(store.find_match(b"some malware here").unwrap().id, "KW-002");
        assert_eq!(
            store.find_match(&[0x00, 0x4d, 0x5a, 0x90, 0x00]).unwrap().id,
            "HX-001"
        );
    }

    #[test]
    fn test_hash_rules() {
        let store = SignatureStore::from_json(RULES, "inline").unwrap();
        // "hello" matches both H-001 (sha256) and H-002 (md5); H-001 is first.
        assert_eq!(store.find_match(b"hello").unwrap().id, "H-001");
        assert!(store.find_match(b"hello!").is_none());
    }

    #[test]
    fn test_extension_rules_only_with_path() {
        let store = SignatureStore::from_json(RULES, "inline").unwrap();
        let data = b"nothing to see";
        let digests = ContentDigests::of(data);

        assert!(store.find_match(data).is_none());
        let sig = store
            .find_match_for(Path::new("/tmp/Screen.SCR"), data, &digests)
            .unwrap();
        assert_eq!(sig.id, "E-001");
        assert!(store
            .find_match_for(Path::new("/tmp/readme.txt"), data, &digests)
            .is_none());
    }

    #[test]
    fn test_duplicate_patterns_share_slot() {
        let json = r#"{ "rules": [
            { "id": "A", "label": "A", "kind": "pattern", "pattern": "Worm" },
            { "id": "B", "label": "B", "kind": "pattern", "pattern": "worm" }
        ] }"#;
        let store = SignatureStore::from_json(json, "inline").unwrap();
        assert_eq!(store.find_match(b"a WORM").unwrap().id, "A");
    }

    #[test]
    fn test_malformed_file_fails_whole_load() {
        let json = r#"{ "rules": [
            { "id": "OK", "label": "Ok", "kind": "pattern", "pattern": "ok" },
            { "id": "BAD", "label": "Bad", "kind": "pattern", "pattern": "" }
        ] }"#;
        let err = SignatureStore::from_json(json, "inline").unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::InvalidRuleFormat { index: 1, .. }));
    }

    #[test]
    fn test_load_from_file_and_info() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();

        let store = SignatureStore::load(file.path()).unwrap();
        let info = store.info();
        assert_eq!(info.total, 6);
        assert_eq!(info.pattern_count, 3);
        assert_eq!(info.hash_count, 2);
        assert_eq!(info.extension_count, 1);
        assert_eq!(info.version, "2025.01.15");
        assert!(store.get("H-002").is_some());

        let sha = HashCalculator::sha256_bytes(b"hello");
        assert_eq!(store.get("H-001").unwrap().payload_display(), sha);
    }

    #[test]
    fn test_from_config() {
        let rules = RulesConfig::default();
        assert_eq!(SignatureStore::from_config(&rules).unwrap().len(), 6);

        let missing = RulesConfig {
            rule_file: Some("/nonexistent/rules.json".into()),
            use_builtin: true,
        };
        assert!(matches!(
            SignatureStore::from_config(&missing),
            Err(Error::RuleLoad { .. })
        ));
    }
}
