//! File classification and scan-target enumeration.

use crate::core::config::ScanConfig;
use crate::core::error::{Error, Result};
use crate::core::types::{FileRecord, Outcome, UnreadableReason, Verdict};
use crate::detection::SignatureStore;
use crate::scanner::progress::CancelToken;
use crate::utils::hash::ContentDigests;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Reason recorded for symlinks met during enumeration.
pub const SYMLINK_SKIP_REASON: &str = "symlink";

/// Classifies single files against a signature store.
///
/// Classification only reads: it never modifies the file system.
#[derive(Debug, Clone)]
pub struct Scanner {
    store: Arc<SignatureStore>,
    max_file_size: u64,
}

impl Scanner {
    /// Create a scanner that inspects at most `max_file_size` bytes per file.
    pub fn new(store: Arc<SignatureStore>, max_file_size: u64) -> Self {
        Self {
            store,
            max_file_size,
        }
    }

    pub fn store(&self) -> &Arc<SignatureStore> {
        &self.store
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Classify the file at `path`.
    ///
    /// Every failure is expressed in the returned verdict.
    pub fn classify(&self, path: &Path) -> Verdict {
        let record = FileRecord::new(path);

        let metadata = match fs::symlink_metadata(path) {
            Ok(m) if m.file_type().is_symlink() => match fs::metadata(path) {
                Ok(target) => target,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Verdict::unreadable(record, UnreadableReason::BrokenSymlink)
                }
                Err(e) => return Verdict::unreadable(record, UnreadableReason::from_io(&e)),
            },
            Ok(m) => m,
            Err(e) => return Verdict::unreadable(record, UnreadableReason::from_io(&e)),
        };

        if !metadata.is_file() {
            return Verdict::unreadable(record, UnreadableReason::NotARegularFile);
        }

        let record = record.with_size(metadata.len());
        if metadata.len() > self.max_file_size {
            log::debug!("Skipping oversized file: {:?}", path);
            return Verdict::unreadable(record, UnreadableReason::TooLarge);
        }

        let content = match read_bounded(path, self.max_file_size, metadata.len()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Verdict::unreadable(record, UnreadableReason::TooLarge),
            Err(e) => {
                log::trace!("Failed to read {:?}: {}", path, e);
                return Verdict::unreadable(record, UnreadableReason::from_io(&e));
            }
        };

        let digests = ContentDigests::of(&content);
        let record = record
            .with_size(content.len() as u64)
            .with_sha256(digests.sha256.clone());

        match self.store.find_match_for(path, &content, &digests) {
            Some(sig) => Verdict::new(
                record,
                Outcome::Matched {
                    signature_id: sig.id.clone(),
                    label: sig.label.clone(),
                },
            ),
            None => Verdict::new(record, Outcome::Clean),
        }
    }
}

/// Read at most `cap` bytes. Returns `None` if the file holds more.
fn read_bounded(path: &Path, cap: u64, size_hint: u64) -> std::io::Result<Option<Vec<u8>>> {
    let file = File::open(path)?;
    let mut buffer = Vec::with_capacity(size_hint.min(cap) as usize);
    file.take(cap.saturating_add(1)).read_to_end(&mut buffer)?;
    if buffer.len() as u64 > cap {
        return Ok(None);
    }
    Ok(Some(buffer))
}

/// One item found while walking a scan root.
#[derive(Debug, Clone)]
pub enum EnumeratedEntry {
    /// A regular file to classify
    Candidate(PathBuf),
    /// An entry whose verdict was decided by the walk itself
    Decided(Verdict),
}

impl EnumeratedEntry {
    pub fn path(&self) -> &Path {
        match self {
            EnumeratedEntry::Candidate(path) => path,
            EnumeratedEntry::Decided(verdict) => verdict.path(),
        }
    }
}

/// Result of walking a scan root.
#[derive(Debug, Default)]
pub struct Enumeration {
    /// Entries in enumeration order
    pub entries: Vec<EnumeratedEntry>,
    /// Whether the walk stopped early on cancellation
    pub cancelled: bool,
}

impl Enumeration {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walks scan roots depth-first with siblings sorted by file name.
///
/// Symlinks are recorded without being followed.
#[derive(Debug, Clone)]
pub struct TargetWalker {
    exclude_paths: Vec<String>,
    exclude_extensions: Vec<String>,
    exclude_dirs: Vec<PathBuf>,
}

impl TargetWalker {
    /// Create a walker honouring the configured exclusions.
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            exclude_paths: config.exclude_paths.clone(),
            exclude_extensions: config
                .exclude_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_dirs: Vec::new(),
        }
    }

    /// Never descend into `dir`.
    pub fn exclude_dir(mut self, dir: &Path) -> Self {
        self.exclude_dirs
            .push(fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf()));
        self
    }

    /// Check if a path should be excluded from scanning.
    ///
    /// `absolute` is the entry's path resolved against the canonical root.
    pub fn should_exclude(&self, path: &Path, absolute: &Path, is_dir: bool) -> bool {
        if self.exclude_dirs.iter().any(|d| absolute.starts_with(d)) {
            return true;
        }

        let path_str = path.to_string_lossy();
        if self
            .exclude_paths
            .iter()
            .any(|excluded| !excluded.is_empty() && path_str.contains(excluded.as_str()))
        {
            return true;
        }

        if !is_dir {
            if let Some(ext) = path.extension() {
                let ext_lower = ext.to_string_lossy().to_lowercase();
                if self.exclude_extensions.contains(&ext_lower) {
                    return true;
                }
            }
        }

        false
    }

    /// Enumerate `root`.
    ///
    /// Fails only when the root itself cannot be accessed. Entries below the
    /// root that cannot be read are recorded as unreadable.
    pub fn walk(&self, root: &Path, cancel: &CancelToken) -> Result<Enumeration> {
        if let Err(e) = fs::symlink_metadata(root) {
            return Err(match e.kind() {
                ErrorKind::NotFound => Error::PathNotFound(root.to_path_buf()),
                ErrorKind::PermissionDenied => Error::permission_denied(root, e),
                _ => Error::DirectoryAccess {
                    path: root.to_path_buf(),
                    source: e,
                },
            });
        }
        let canonical_root = fs::canonicalize(root).map_err(|e| Error::DirectoryAccess {
            path: root.to_path_buf(),
            source: e,
        })?;
        let absolute = |p: &Path| match p.strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => canonical_root.join(rel),
            _ => canonical_root.clone(),
        };

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !self.should_exclude(e.path(), &absolute(e.path()), e.file_type().is_dir())
            });

        let mut enumeration = Enumeration::default();
        for entry in walker {
            if cancel.is_cancelled() {
                log::info!("Enumeration cancelled after {} entries", enumeration.len());
                enumeration.cancelled = true;
                break;
            }

            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => {
                    return Err(Error::Enumeration {
                        path: root.to_path_buf(),
                        source: e,
                    })
                }
                Err(e) => {
                    let path = e.path().unwrap_or(root).to_path_buf();
                    let reason = e
                        .io_error()
                        .map(UnreadableReason::from_io)
                        .unwrap_or_else(|| UnreadableReason::IoError(e.to_string()));
                    log::warn!("Cannot enumerate {:?}: {}", path, reason);
                    enumeration.entries.push(EnumeratedEntry::Decided(Verdict::unreadable(
                        FileRecord::new(path),
                        reason,
                    )));
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }

            let path = entry.into_path();
            let item = if file_type.is_symlink() {
                EnumeratedEntry::Decided(Verdict::new(
                    FileRecord::new(path),
                    Outcome::Skipped {
                        reason: SYMLINK_SKIP_REASON.to_string(),
                    },
                ))
            } else if file_type.is_file() {
                EnumeratedEntry::Candidate(path)
            } else {
                EnumeratedEntry::Decided(Verdict::unreadable(
                    FileRecord::new(path),
                    UnreadableReason::NotARegularFile,
                ))
            };
            enumeration.entries.push(item);
        }

        log::debug!("Enumerated {} entries under {:?}", enumeration.len(), root);
        Ok(enumeration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scanner(cap: u64) -> Scanner {
        Scanner::new(Arc::new(SignatureStore::builtin().unwrap()), cap)
    }

    fn paths(enumeration: &Enumeration, root: &Path) -> Vec<String> {
        enumeration
            .entries
            .iter()
            .map(|e| {
                e.path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_classify_clean_and_matched() {
        let temp_dir = TempDir::new().unwrap();
        let clean = temp_dir.path().join("clean.txt");
        let bad = temp_dir.path().join("bad.txt");
        fs::write(&clean, b"nothing to see").unwrap();
        fs::write(&bad, b"contains MALWARE here").unwrap();

        let scanner = scanner(1024);
        let verdict = scanner.classify(&clean);
        assert_eq!(verdict.outcome, Outcome::Clean);
        assert_eq!(verdict.record.size, Some(14));
        assert!(verdict.record.sha256.is_some());

        let verdict = scanner.classify(&bad);
        assert_eq!(
            verdict.outcome,
            Outcome::Matched {
                signature_id: "KW-004".to_string(),
                label: "Keyword.Malware".to_string(),
            }
        );
        assert_eq!(fs::read(&bad).unwrap(), b"contains MALWARE here");
    }

    #[test]
    fn test_classify_too_large() {
        let temp_dir = TempDir::new().unwrap();
        let big = temp_dir.path().join("big.bin");
        fs::write(&big, b"0123456789virus").unwrap();

        let verdict = scanner(10).classify(&big);
        assert_eq!(
            verdict.outcome,
            Outcome::Unreadable {
                reason: UnreadableReason::TooLarge
            }
        );
        assert_eq!(verdict.record.size, Some(15));
        assert!(verdict.record.sha256.is_none());
    }

    #[test]
    fn test_classify_at_cap_is_read() {
        let temp_dir = TempDir::new().unwrap();
        let exact = temp_dir.path().join("exact.txt");
        fs::write(&exact, b"worm!").unwrap();

        assert!(scanner(5).classify(&exact).is_match());
    }

    #[test]
    fn test_classify_missing_and_directory() {
        let temp_dir = TempDir::new().unwrap();
        let scanner = scanner(1024);

        let verdict = scanner.classify(&temp_dir.path().join("missing"));
        assert_eq!(
            verdict.outcome,
            Outcome::Unreadable {
                reason: UnreadableReason::NotFound
            }
        );

        let verdict = scanner.classify(temp_dir.path());
        assert_eq!(
            verdict.outcome,
            Outcome::Unreadable {
                reason: UnreadableReason::NotARegularFile
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_broken_symlink() {
        let temp_dir = TempDir::new().unwrap();
        let link = temp_dir.path().join("dangling");
        std::os::unix::fs::symlink(temp_dir.path().join("gone"), &link).unwrap();

        let verdict = scanner(1024).classify(&link);
        assert_eq!(
            verdict.outcome,
            Outcome::Unreadable {
                reason: UnreadableReason::BrokenSymlink
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_permission_denied() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let locked = temp_dir.path().join("locked.txt");
        fs::write(&locked, b"virus").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read the file regardless of its mode.
        let denied = File::open(&locked).is_err();
        let verdict = scanner(1024).classify(&locked);
        if denied {
            assert_eq!(
                verdict.outcome,
                Outcome::Unreadable {
                    reason: UnreadableReason::PermissionDenied
                }
            );
        } else {
            assert!(verdict.is_match());
        }

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_walk_order() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("b/inner")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("c.txt"), b"c").unwrap();
        fs::write(root.join("b/z.txt"), b"z").unwrap();
        fs::write(root.join("b/inner/y.txt"), b"y").unwrap();
        fs::write(root.join("a/x.txt"), b"x").unwrap();

        let walker = TargetWalker::new(&ScanConfig::default());
        let enumeration = walker.walk(root, &CancelToken::new()).unwrap();

        assert!(!enumeration.cancelled);
        assert_eq!(
            paths(&enumeration, root),
            vec!["a/x.txt", "b/inner/y.txt", "b/z.txt", "c.txt"]
        );
    }

    #[test]
    fn test_walk_single_file_root() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("only.txt");
        fs::write(&file, b"x").unwrap();

        let walker = TargetWalker::new(&ScanConfig::default());
        let enumeration = walker.walk(&file, &CancelToken::new()).unwrap();
        assert_eq!(enumeration.len(), 1);
        assert_eq!(enumeration.entries[0].path(), file.as_path());
    }

    #[test]
    fn test_walk_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let walker = TargetWalker::new(&ScanConfig::default());
        let result = walker.walk(&temp_dir.path().join("missing"), &CancelToken::new());
        assert!(matches!(result, Err(Error::PathNotFound(_))));
    }

    #[test]
    fn test_walk_exclusions() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("store/files")).unwrap();
        fs::create_dir_all(root.join("scratch-area")).unwrap();
        fs::write(root.join("store/files/copy"), b"virus").unwrap();
        fs::write(root.join("scratch-area/tmp.txt"), b"x").unwrap();
        fs::write(root.join("keep.txt"), b"x").unwrap();
        fs::write(root.join("skip.LOG"), b"x").unwrap();

        let config = ScanConfig {
            exclude_paths: vec!["scratch-area".to_string()],
            exclude_extensions: vec!["log".to_string()],
            ..ScanConfig::default()
        };
        let walker = TargetWalker::new(&config).exclude_dir(&root.join("store"));
        let enumeration = walker.walk(root, &CancelToken::new()).unwrap();

        assert_eq!(paths(&enumeration, root), vec!["keep.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_records_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("real")).unwrap();
        fs::write(root.join("real/f.txt"), b"f").unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        let walker = TargetWalker::new(&ScanConfig::default());
        let enumeration = walker.walk(root, &CancelToken::new()).unwrap();

        assert_eq!(paths(&enumeration, root), vec!["link", "real/f.txt"]);
        match &enumeration.entries[0] {
            EnumeratedEntry::Decided(v) => assert_eq!(
                v.outcome,
                Outcome::Skipped {
                    reason: SYMLINK_SKIP_REASON.to_string()
                }
            ),
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn test_walk_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"a").unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let walker = TargetWalker::new(&ScanConfig::default());
        let enumeration = walker.walk(temp_dir.path(), &cancel).unwrap();
        assert!(enumeration.cancelled);
        assert!(enumeration.is_empty());
    }
}
