//! Quarantine store manager.
//!
//! A store is a directory holding `files/` (byte-for-byte copies of isolated
//! files) and `ledger.db` (one row per copy). A manager holds an exclusive
//! lock on `ledger.db` for its whole lifetime, so a second manager on the same
//! directory, in this process or another, fails to open. Within a manager all
//! mutating operations take the ledger mutex for their whole duration, so one
//! isolate, restore or purge runs at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::ledger::{EntryState, Ledger, QuarantineEntry};
use super::operations::{
    copy_durable, modified_time, remove_file, set_modified, sync_dir, FilePermissions,
    SecureOperations,
};
use super::{FILES_DIR, LEDGER_FILE, PARTIAL_PREFIX};
use crate::core::config::QuarantineConfig;
use crate::core::error::{Error, Result};
use crate::detection::Signature;
use crate::utils::hash::HashCalculator;

/// Longest basename kept in a quarantine file name.
const MAX_BASENAME_LEN: usize = 200;

/// Derive the quarantine file name for a file.
///
/// `<sha256[0..16]>-<sha256(original path)[0..8]>-<basename>`: two files that
/// share a basename but differ in content or location never collide.
pub fn quarantine_name(content_sha256: &str, original_path: &Path) -> String {
    let path_hash = HashCalculator::sha256_bytes(original_path.to_string_lossy().as_bytes());
    let basename = original_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    let mut end = basename.len().min(MAX_BASENAME_LEN);
    while !basename.is_char_boundary(end) {
        end -= 1;
    }

    format!(
        "{}-{}-{}",
        &content_sha256[..16.min(content_sha256.len())],
        &path_hash[..8],
        &basename[..end]
    )
}

/// What recovery did when the store was opened.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Temporary copies from interrupted isolations
    pub removed_partials: usize,
    /// Copies without a ledger entry
    pub removed_orphans: Vec<String>,
    /// Pending entries whose original was still in place and intact
    pub rolled_back: Vec<String>,
    /// Pending entries whose original was gone or replaced by other content
    pub promoted: Vec<String>,
    /// Entries whose copy was gone but whose original was restored intact
    pub dropped_restored: Vec<String>,
    /// Entries whose copy is gone and whose original is missing or different
    pub damaged: Vec<String>,
}

impl RecoveryReport {
    /// Whether recovery found nothing to do.
    pub fn is_clean(&self) -> bool {
        self.removed_partials == 0
            && self.removed_orphans.is_empty()
            && self.rolled_back.is_empty()
            && self.promoted.is_empty()
            && self.dropped_restored.is_empty()
            && self.damaged.is_empty()
    }
}

/// Result of [`QuarantineManager::verify`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub ok: usize,
    /// Entries without a copy
    pub missing: Vec<String>,
    /// Entries whose copy no longer has the recorded checksum
    pub corrupted: Vec<String>,
    /// Files in the store without an entry
    pub orphans: Vec<String>,
    /// Entries still in the pending state
    pub pending: Vec<String>,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.missing.is_empty()
            && self.corrupted.is_empty()
            && self.orphans.is_empty()
            && self.pending.is_empty()
    }
}

/// Statistics about the quarantine store.
#[derive(Debug, Clone, Serialize)]
pub struct QuarantineStats {
    pub total_count: usize,
    /// Sum of the recorded sizes
    pub total_original_size: u64,
    /// Bytes actually used by copies on disk
    pub store_size: u64,
    /// Entry count per triggering signature id
    pub by_signature: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
}

/// Owns one quarantine directory and its ledger.
pub struct QuarantineManager {
    root: PathBuf,
    files_dir: PathBuf,
    ledger: Mutex<Ledger>,
    deleter: SecureOperations,
    recovery: RecoveryReport,
}

impl QuarantineManager {
    /// Open (or create) a store with secure deletion enabled, running recovery.
    ///
    /// Fails with [`Error::StoreLocked`] while another manager has the store open.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with(root, SecureOperations::new())
    }

    /// Open the store described by the `quarantine` config section.
    pub fn from_config(config: &QuarantineConfig) -> Result<Self> {
        Self::open_with(
            &config.quarantine_dir(),
            SecureOperations::from_setting(config.secure_delete),
        )
    }

    fn open_with(root: &Path, deleter: SecureOperations) -> Result<Self> {
        let init = |e: Error| Error::StorageInit(format!("{}: {}", root.display(), e));

        let files_dir = root.join(FILES_DIR);
        fs::create_dir_all(&files_dir)
            .map_err(|e| {
                Error::DirectoryAccess {
                    path: files_dir.clone(),
                    source: e,
                }
            })
            .map_err(init)?;
        let ledger = Ledger::open(&root.join(LEDGER_FILE)).map_err(|e| match e {
            Error::StoreLocked(_) => e,
            other => init(other),
        })?;

        let mut manager = Self {
            root: root.to_path_buf(),
            files_dir,
            ledger: Mutex::new(ledger),
            deleter,
            recovery: RecoveryReport::default(),
        };
        manager.recovery = manager.recover().map_err(init)?;

        let report = &manager.recovery;
        if report.is_clean() {
            log::debug!("Opened quarantine store at {}", root.display());
        } else {
            log::warn!(
                "Recovered quarantine store at {}: {} partial(s) and {} orphan(s) removed, {} rolled back, {} promoted, {} dropped, {} damaged",
                root.display(),
                report.removed_partials,
                report.removed_orphans.len(),
                report.rolled_back.len(),
                report.promoted.len(),
                report.dropped_restored.len(),
                report.damaged.len()
            );
        }
        Ok(manager)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the copies.
    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// What recovery did when this manager was opened.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    fn ledger(&self) -> Result<MutexGuard<'_, Ledger>> {
        self.ledger
            .lock()
            .map_err(|_| Error::lock_poisoned("quarantine ledger"))
    }

    /// Move a matched file into the store.
    ///
    /// The original is removed only after the copy and its ledger entry are
    /// durable. On any failure before that point the original stays in place.
    pub fn isolate(&self, path: &Path, signature: &Signature) -> Result<QuarantineEntry> {
        let ledger = self.ledger()?;
        let original_path = absolute_path(path);

        let mut source = File::open(path).map_err(|e| Error::file_read(path, e))?;
        let metadata = source.metadata().map_err(|e| Error::file_read(path, e))?;
        if !metadata.is_file() {
            return Err(Error::QuarantineFailed {
                path: path.to_path_buf(),
                source: "not a regular file".into(),
            });
        }
        let permissions = FilePermissions::from_metadata(&metadata);
        let modified_at = modified_time(&metadata);

        // 1. Durable copy under a temporary name.
        let partial = self
            .files_dir
            .join(format!("{}{}", PARTIAL_PREFIX, Uuid::new_v4()));
        let (size, sha256) = copy_durable(&mut source, &partial)?;
        drop(source);

        // 2. Move it to its final name, never replacing an existing copy.
        let file_name = quarantine_name(&sha256, &original_path);
        let target = self.files_dir.join(&file_name);
        if target.exists() {
            let _ = fs::remove_file(&partial);
            let existing = HashCalculator::sha256_file(&target)?;
            return Err(if existing == sha256 {
                Error::AlreadyQuarantined {
                    name: file_name,
                    path: path.to_path_buf(),
                }
            } else {
                Error::QuarantineCollision {
                    name: file_name,
                    path: path.to_path_buf(),
                }
            });
        }
        if let Err(e) = fs::rename(&partial, &target) {
            let _ = fs::remove_file(&partial);
            return Err(Error::file_write(&target, e));
        }
        sync_dir(&self.files_dir)?;

        // 3. Ledger entry, pending until the original is gone.
        let mut entry = QuarantineEntry {
            id: Uuid::new_v4().to_string(),
            original_path,
            file_name,
            sha256,
            size,
            mode: permissions.mode,
            readonly: permissions.readonly,
            modified_at,
            signature_id: signature.id.clone(),
            signature_label: signature.label.clone(),
            isolated_at: Utc::now(),
            state: EntryState::Pending,
        };
        if let Err(e) = ledger.insert(&entry) {
            let _ = fs::remove_file(&target);
            return Err(e);
        }

        // 4. Remove the original.
        if let Err(e) = remove_file(path) {
            if let Err(undo) = ledger.remove(&entry.id) {
                log::error!("Failed to roll back ledger entry {}: {}", entry.id, undo);
            } else {
                let _ = fs::remove_file(&target);
            }
            return Err(e);
        }
        if let Some(parent) = path.parent() {
            if let Err(e) = sync_dir(parent) {
                log::debug!("Could not sync {}: {}", parent.display(), e);
            }
        }

        // 5. Done. A failure here is repaired by recovery on next open.
        match ledger.set_state(&entry.id, EntryState::Isolated) {
            Ok(true) => entry.state = EntryState::Isolated,
            Ok(false) => {
                log::error!(
                    "Ledger entry {} vanished while isolating {}",
                    entry.id,
                    path.display()
                );
                return Err(Error::QuarantineFailed {
                    path: path.to_path_buf(),
                    source: format!("ledger entry {} vanished", entry.id).into(),
                });
            }
            Err(e) => log::warn!("Entry {} left pending: {}", entry.id, e),
        }

        log::info!(
            "Quarantined {} as {} ({})",
            path.display(),
            entry.file_name,
            entry.signature_label
        );
        Ok(entry)
    }

    /// Restore an entry to its original path.
    pub fn restore(&self, id: &str) -> Result<PathBuf> {
        self.restore_to(id, None)
    }

    /// Restore an entry, optionally to a different path.
    ///
    /// The copy is verified against the recorded checksum before anything is
    /// renamed into place. An existing file at the destination is only
    /// accepted if it already holds the same content.
    pub fn restore_to(&self, id: &str, destination: Option<&Path>) -> Result<PathBuf> {
        let ledger = self.ledger()?;
        let entry = ledger
            .get(id)?
            .ok_or_else(|| Error::QuarantineEntryNotFound(id.to_string()))?;
        let copy = self.files_dir.join(&entry.file_name);
        let target = destination
            .map(Path::to_path_buf)
            .unwrap_or_else(|| entry.original_path.clone());

        if target.exists() {
            let existing = HashCalculator::sha256_file(&target)?;
            if existing != entry.sha256 {
                return Err(Error::RestoreTargetExists {
                    id: id.to_string(),
                    path: target,
                });
            }
            log::info!(
                "{} already holds the content of {}, finishing restore",
                target.display(),
                id
            );
        } else {
            self.write_restored(&entry, &copy, &target)?;
        }

        // The content lives on at the destination, so the copy needs no wipe.
        SecureOperations::plain().delete(&copy)?;
        sync_dir(&self.files_dir)?;
        ledger.remove(id)?;

        log::info!("Restored {} to {}", entry.id, target.display());
        Ok(target)
    }

    /// Copy, verify and rename the quarantined content into place.
    fn write_restored(&self, entry: &QuarantineEntry, copy: &Path, target: &Path) -> Result<()> {
        let parent = target.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|e| Error::DirectoryAccess {
            path: parent.to_path_buf(),
            source: e,
        })?;

        let mut source = File::open(copy).map_err(|e| Error::file_read(copy, e))?;
        let temp = parent.join(format!(".{}.restore-{}", entry.id, Uuid::new_v4().simple()));
        let (_, actual) = copy_durable(&mut source, &temp)?;
        drop(source);

        if actual != entry.sha256 {
            let _ = fs::remove_file(&temp);
            return Err(Error::RestoreChecksumMismatch {
                id: entry.id.clone(),
                expected: entry.sha256.clone(),
                actual,
            });
        }

        let finish = || -> Result<()> {
            if let Some(modified_at) = entry.modified_at {
                let handle = OpenOptions::new()
                    .write(true)
                    .open(&temp)
                    .map_err(|e| Error::file_write(&temp, e))?;
                set_modified(&handle, &temp, modified_at)?;
                handle.sync_all().map_err(|e| Error::file_write(&temp, e))?;
            }
            FilePermissions {
                mode: entry.mode,
                readonly: entry.readonly,
            }
            .apply(&temp)?;
            fs::rename(&temp, target).map_err(|e| Error::file_write(target, e))?;
            sync_dir(parent)
        };

        finish().inspect_err(|_| {
            let _ = fs::remove_file(&temp);
        })
    }

    /// Permanently delete an entry and its copy.
    pub fn purge(&self, id: &str) -> Result<()> {
        let ledger = self.ledger()?;
        self.purge_locked(&ledger, id)
    }

    fn purge_locked(&self, ledger: &Ledger, id: &str) -> Result<()> {
        let entry = ledger
            .get(id)?
            .ok_or_else(|| Error::QuarantineEntryNotFound(id.to_string()))?;

        self.deleter.delete(&self.files_dir.join(&entry.file_name))?;
        sync_dir(&self.files_dir)?;
        ledger.remove(id)?;

        log::info!("Purged quarantine entry {} ({})", id, entry.original_path.display());
        Ok(())
    }

    /// Purge every entry. Returns the number purged.
    pub fn purge_all(&self) -> Result<usize> {
        let ledger = self.ledger()?;
        let entries = ledger.list()?;
        for entry in &entries {
            self.purge_locked(&ledger, &entry.id)?;
        }
        Ok(entries.len())
    }

    /// Purge entries isolated longer than `retention` ago.
    pub fn purge_expired(&self, retention: chrono::Duration) -> Result<usize> {
        let ledger = self.ledger()?;
        let cutoff = Utc::now() - retention;
        let expired = ledger.list_isolated_before(&cutoff)?;
        for entry in &expired {
            self.purge_locked(&ledger, &entry.id)?;
        }
        if !expired.is_empty() {
            log::info!("Purged {} expired quarantine entr(ies)", expired.len());
        }
        Ok(expired.len())
    }

    /// All entries, ordered by isolation time then id.
    pub fn list(&self) -> Result<Vec<QuarantineEntry>> {
        self.ledger()?.list()
    }

    pub fn get(&self, id: &str) -> Result<Option<QuarantineEntry>> {
        self.ledger()?.get(id)
    }

    pub fn count(&self) -> Result<usize> {
        self.ledger()?.count()
    }

    pub fn total_size(&self) -> Result<u64> {
        self.ledger()?.total_size()
    }

    /// Get store statistics.
    pub fn stats(&self) -> Result<QuarantineStats> {
        let entries = self.list()?;
        let mut by_signature = BTreeMap::new();
        for entry in &entries {
            *by_signature.entry(entry.signature_id.clone()).or_insert(0) += 1;
        }

        let store_size = self
            .store_files()?
            .iter()
            .filter_map(|name| fs::metadata(self.files_dir.join(name)).ok())
            .map(|m| m.len())
            .sum();

        Ok(QuarantineStats {
            total_count: entries.len(),
            total_original_size: entries.iter().map(|e| e.size).sum(),
            store_size,
            by_signature,
            oldest: entries.first().map(|e| e.isolated_at),
        })
    }

    /// Re-check every entry against its copy.
    pub fn verify(&self) -> Result<VerifyReport> {
        let ledger = self.ledger()?;
        let entries = ledger.list()?;
        let mut report = VerifyReport {
            checked: entries.len(),
            ..VerifyReport::default()
        };

        let known: HashSet<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
        for name in self.store_files()? {
            if !known.contains(name.as_str()) {
                report.orphans.push(name);
            }
        }

        for entry in &entries {
            if entry.state == EntryState::Pending {
                report.pending.push(entry.id.clone());
            }
            let copy = self.files_dir.join(&entry.file_name);
            if !copy.exists() {
                report.missing.push(entry.id.clone());
            } else if !HashCalculator::verify_sha256(&copy, &entry.sha256)? {
                report.corrupted.push(entry.id.clone());
            } else {
                report.ok += 1;
            }
        }

        Ok(report)
    }

    /// Names of all files in `files/`, temporary ones included.
    fn store_files(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.files_dir).map_err(|e| Error::DirectoryAccess {
            path: self.files_dir.clone(),
            source: e,
        })?;
        let mut names = Vec::new();
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Bring the store back to "one entry per copy" after a crash.
    fn recover(&self) -> Result<RecoveryReport> {
        let ledger = self.ledger()?;
        let mut report = RecoveryReport::default();

        let entries = ledger.list()?;
        let known: HashSet<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();

        for name in self.store_files()? {
            let path = self.files_dir.join(&name);
            if name.starts_with(PARTIAL_PREFIX) {
                remove_file(&path)?;
                report.removed_partials += 1;
            } else if !known.contains(name.as_str()) {
                // The ledger write precedes original removal, so the original is still in place.
                remove_file(&path)?;
                report.removed_orphans.push(name);
            }
        }

        for entry in &entries {
            let copy = self.files_dir.join(&entry.file_name);
            let original_present = entry.original_path.is_file();

            if !copy.exists() {
                let intact = original_present
                    && HashCalculator::verify_sha256(&entry.original_path, &entry.sha256)
                        .unwrap_or(false);
                if intact {
                    ledger.remove(&entry.id)?;
                    report.dropped_restored.push(entry.id.clone());
                } else {
                    log::error!(
                        "Quarantine entry {} ({}) has no copy in the store",
                        entry.id,
                        entry.original_path.display()
                    );
                    report.damaged.push(entry.id.clone());
                }
                continue;
            }

            if entry.state == EntryState::Pending {
                let original_intact = original_present
                    && HashCalculator::verify_sha256(&entry.original_path, &entry.sha256)
                        .unwrap_or(false);
                if original_intact {
                    remove_file(&copy)?;
                    ledger.remove(&entry.id)?;
                    report.rolled_back.push(entry.id.clone());
                } else {
                    if original_present {
                        log::warn!(
                            "{} holds different content than pending entry {}, keeping the copy",
                            entry.original_path.display(),
                            entry.id
                        );
                    }
                    ledger.set_state(&entry.id, EntryState::Isolated)?;
                    report.promoted.push(entry.id.clone());
                }
            }
        }

        sync_dir(&self.files_dir)?;
        Ok(report)
    }
}

/// Absolute form of `path` with its parent resolved, without following the file itself.
fn absolute_path(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    match fs::canonicalize(parent) {
        Ok(dir) => dir.join(name),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Category;
    use tempfile::TempDir;

    fn signature() -> Signature {
        Signature::new_pattern("KW-004", "Keyword.Malware", "malware", Category::Malware)
    }

    fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn setup() -> (TempDir, QuarantineManager, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let manager = QuarantineManager::open(&temp_dir.path().join("store")).unwrap();
        let scan_dir = temp_dir.path().join("scan");
        fs::create_dir_all(&scan_dir).unwrap();
        (temp_dir, manager, scan_dir)
    }

    #[test]
    fn test_open_creates_layout() {
        let (temp_dir, manager, _) = setup();
        assert_eq!(manager.count().unwrap(), 0);
        assert!(manager.files_dir().is_dir());
        assert!(temp_dir.path().join("store").join(LEDGER_FILE).exists());
        assert!(manager.recovery_report().is_clean());
    }

    #[test]
    fn test_quarantine_name() {
        let sha = "0123456789abcdef".repeat(4);
        let a = quarantine_name(&sha, Path::new("/one/report.txt"));
        let b = quarantine_name(&sha, Path::new("/two/report.txt"));
        assert!(a.starts_with("0123456789abcdef-"));
        assert!(a.ends_with("-report.txt"));
        assert_ne!(a, b);

        let long = "x".repeat(400);
        assert!(quarantine_name(&sha, Path::new(&long)).len() <= 16 + 1 + 8 + 1 + MAX_BASENAME_LEN);
    }

    #[test]
    fn test_isolate_and_restore_roundtrip() {
        let (_t, manager, scan_dir) = setup();
        let content = b"this file carries malware";
        let path = create_test_file(&scan_dir, "b.txt", content);
        let expected = HashCalculator::sha256_bytes(content);

        let entry = manager.isolate(&path, &signature()).unwrap();
        assert!(!path.exists());
        assert_eq!(entry.state, EntryState::Isolated);
        assert_eq!(entry.sha256, expected);
        assert_eq!(entry.size, content.len() as u64);
        assert_eq!(
            HashCalculator::sha256_file(&manager.files_dir().join(&entry.file_name)).unwrap(),
            expected
        );

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, entry.id);

        let restored = manager.restore(&entry.id).unwrap();
        assert_eq!(fs::read(&restored).unwrap(), content);
        assert_eq!(fs::canonicalize(&restored).unwrap(), fs::canonicalize(&path).unwrap());
        assert_eq!(manager.count().unwrap(), 0);
        assert_eq!(fs::read_dir(manager.files_dir()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_preserves_mode_and_mtime() {
        use std::os::unix::fs::PermissionsExt;

        let (_t, manager, scan_dir) = setup();
        let path = create_test_file(&scan_dir, "script.sh", b"payload");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o750)).unwrap();
        let before = modified_time(&fs::metadata(&path).unwrap()).unwrap();

        let entry = manager.isolate(&path, &signature()).unwrap();
        assert_eq!(entry.mode, Some(0o750));
        manager.restore(&entry.id).unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o7777, 0o750);
        let after = modified_time(&meta).unwrap();
        assert!((after - before).num_milliseconds().abs() < 1000);
    }

    #[test]
    fn test_same_basename_different_dirs() {
        let (_t, manager, scan_dir) = setup();
        let a = create_test_file(&scan_dir.join("one"), "notes.txt", b"malware one");
        let b = create_test_file(&scan_dir.join("two"), "notes.txt", b"malware two");

        let ea = manager.isolate(&a, &signature()).unwrap();
        let eb = manager.isolate(&b, &signature()).unwrap();
        assert_ne!(ea.file_name, eb.file_name);
        assert_eq!(manager.count().unwrap(), 2);
    }

    #[test]
    fn test_already_quarantined_keeps_original() {
        let (_t, manager, scan_dir) = setup();
        let path = create_test_file(&scan_dir, "b.txt", b"malware");
        manager.isolate(&path, &signature()).unwrap();

        // Same content reappears at the same path.
        fs::write(&path, b"malware").unwrap();
        let err = manager.isolate(&path, &signature()).unwrap_err();
        assert!(matches!(err, Error::AlreadyQuarantined { .. }));
        assert!(path.exists());
        assert_eq!(manager.count().unwrap(), 1);
        assert!(manager.verify().unwrap().is_healthy());
    }

    #[test]
    fn test_collision_never_overwrites() {
        let (_t, manager, scan_dir) = setup();
        let path = create_test_file(&scan_dir, "b.txt", b"malware");
        let sha = HashCalculator::sha256_bytes(b"malware");
        let name = quarantine_name(&sha, &absolute_path(&path));

        // Foreign content squatting on the derived name.
        fs::write(manager.files_dir().join(&name), b"something else").unwrap();

        let err = manager.isolate(&path, &signature()).unwrap_err();
        assert!(matches!(err, Error::QuarantineCollision { .. }));
        assert!(path.exists());
        assert_eq!(
            fs::read(manager.files_dir().join(&name)).unwrap(),
            b"something else"
        );
    }

    #[test]
    fn test_restore_checksum_mismatch_leaves_entry() {
        let (_t, manager, scan_dir) = setup();
        let path = create_test_file(&scan_dir, "b.txt", b"malware");
        let entry = manager.isolate(&path, &signature()).unwrap();

        let copy = manager.files_dir().join(&entry.file_name);
        fs::write(&copy, b"tampered").unwrap();

        let err = manager.restore(&entry.id).unwrap_err();
        assert!(matches!(err, Error::RestoreChecksumMismatch { .. }));
        assert!(!path.exists());
        assert!(copy.exists());
        assert!(manager.get(&entry.id).unwrap().is_some());
        assert_eq!(manager.verify().unwrap().corrupted, vec![entry.id]);

        // No temporary restore file is left behind.
        assert_eq!(fs::read_dir(&scan_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_restore_target_exists() {
        let (_t, manager, scan_dir) = setup();
        let path = create_test_file(&scan_dir, "b.txt", b"malware");
        let entry = manager.isolate(&path, &signature()).unwrap();

        fs::write(&path, b"a new unrelated file").unwrap();
        let err = manager.restore(&entry.id).unwrap_err();
        assert!(matches!(err, Error::RestoreTargetExists { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"a new unrelated file");

        // Identical content at the target completes the restore.
        fs::write(&path, b"malware").unwrap();
        manager.restore(&entry.id).unwrap();
        assert_eq!(manager.count().unwrap(), 0);
    }

    #[test]
    fn test_restore_to_other_path() {
        let (t, manager, scan_dir) = setup();
        let path = create_test_file(&scan_dir, "b.txt", b"malware");
        let entry = manager.isolate(&path, &signature()).unwrap();

        let dest = t.path().join("elsewhere").join("b.txt");
        let restored = manager.restore_to(&entry.id, Some(&dest)).unwrap();
        assert_eq!(restored, dest);
        assert_eq!(fs::read(&dest).unwrap(), b"malware");
        assert!(!path.exists());
    }

    #[test]
    fn test_restore_unknown_id() {
        let (_t, manager, _) = setup();
        assert!(matches!(
            manager.restore("nope"),
            Err(Error::QuarantineEntryNotFound(_))
        ));
    }

    #[test]
    fn test_purge_and_stats() {
        let (_t, manager, scan_dir) = setup();
        let a = create_test_file(&scan_dir, "a.txt", b"malware a");
        let b = create_test_file(&scan_dir, "b.txt", b"malware bb");
        let ea = manager.isolate(&a, &signature()).unwrap();
        manager.isolate(&b, &signature()).unwrap();

        let stats = manager.stats().unwrap();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.total_original_size, 19);
        assert_eq!(stats.store_size, 19);
        assert_eq!(stats.by_signature.get("KW-004"), Some(&2));
        assert_eq!(manager.total_size().unwrap(), 19);

        manager.purge(&ea.id).unwrap();
        assert_eq!(manager.count().unwrap(), 1);
        assert!(!a.exists());

        assert_eq!(manager.purge_all().unwrap(), 1);
        assert_eq!(manager.count().unwrap(), 0);
        assert_eq!(fs::read_dir(manager.files_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let (_t, manager, scan_dir) = setup();
        let a = create_test_file(&scan_dir, "a.txt", b"malware");
        manager.isolate(&a, &signature()).unwrap();

        assert_eq!(manager.purge_expired(chrono::Duration::days(30)).unwrap(), 0);
        // A negative retention puts the cutoff in the future.
        assert_eq!(manager.purge_expired(chrono::Duration::seconds(-1)).unwrap(), 1);
        assert_eq!(manager.count().unwrap(), 0);
    }

    #[test]
    fn test_recovery_removes_partials_and_orphans() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("store");
        {
            let manager = QuarantineManager::open(&root).unwrap();
            fs::write(manager.files_dir().join(".partial-abc"), b"half").unwrap();
            fs::write(manager.files_dir().join("deadbeef-orphan.txt"), b"orphan").unwrap();
        }

        let manager = QuarantineManager::open(&root).unwrap();
        let report = manager.recovery_report();
        assert_eq!(report.removed_partials, 1);
        assert_eq!(report.removed_orphans, vec!["deadbeef-orphan.txt".to_string()]);
        assert_eq!(fs::read_dir(manager.files_dir()).unwrap().count(), 0);
        assert!(manager.verify().unwrap().is_healthy());
    }

    #[test]
    fn test_recovery_of_pending_entries() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("store");
        let scan_dir = temp_dir.path().join("scan");
        let kept = create_test_file(&scan_dir, "kept.txt", b"malware kept");
        let gone = create_test_file(&scan_dir, "gone.txt", b"malware gone");

        let (kept_id, gone_id) = {
            let manager = QuarantineManager::open(&root).unwrap();
            let kept_entry = manager.isolate(&kept, &signature()).unwrap();
            let gone_entry = manager.isolate(&gone, &signature()).unwrap();
            // Simulate a crash between ledger write and original removal for `kept`,
            // and between original removal and state update for `gone`.
            fs::write(&kept, b"malware kept").unwrap();
            let ledger = manager.ledger().unwrap();
            ledger.set_state(&kept_entry.id, EntryState::Pending).unwrap();
            ledger.set_state(&gone_entry.id, EntryState::Pending).unwrap();
            (kept_entry.id, gone_entry.id)
        };

        let manager = QuarantineManager::open(&root).unwrap();
        let report = manager.recovery_report();
        assert_eq!(report.rolled_back, vec![kept_id.clone()]);
        assert_eq!(report.promoted, vec![gone_id.clone()]);

        assert!(kept.exists());
        assert!(manager.get(&kept_id).unwrap().is_none());
        assert_eq!(
            manager.get(&gone_id).unwrap().unwrap().state,
            EntryState::Isolated
        );
        assert!(manager.verify().unwrap().is_healthy());
    }

    #[test]
    fn test_recovery_keeps_copy_when_original_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("store");
        let scan_dir = temp_dir.path().join("scan");
        let path = create_test_file(&scan_dir, "b.txt", b"malware original");

        let entry = {
            let manager = QuarantineManager::open(&root).unwrap();
            let entry = manager.isolate(&path, &signature()).unwrap();
            // Crash after the original was removed, then a new file took its place.
            manager
                .ledger()
                .unwrap()
                .set_state(&entry.id, EntryState::Pending)
                .unwrap();
            fs::write(&path, b"unrelated new file").unwrap();
            entry
        };

        let manager = QuarantineManager::open(&root).unwrap();
        let report = manager.recovery_report();
        assert!(report.rolled_back.is_empty());
        assert_eq!(report.promoted, vec![entry.id.clone()]);

        let copy = manager.files_dir().join(&entry.file_name);
        assert_eq!(fs::read(&copy).unwrap(), b"malware original");
        assert_eq!(fs::read(&path).unwrap(), b"unrelated new file");
        assert_eq!(
            manager.get(&entry.id).unwrap().unwrap().state,
            EntryState::Isolated
        );
        assert!(manager.verify().unwrap().is_healthy());
    }

    #[test]
    fn test_second_manager_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("store");
        let scan_dir = temp_dir.path().join("scan");
        let path = create_test_file(&scan_dir, "b.txt", b"malware");

        let manager = QuarantineManager::open(&root).unwrap();
        let entry = manager.isolate(&path, &signature()).unwrap();
        fs::write(manager.files_dir().join(".partial-inflight"), b"half").unwrap();

        assert!(matches!(
            QuarantineManager::open(&root),
            Err(Error::StoreLocked(_))
        ));
        // The refused open did not run recovery.
        assert!(manager.files_dir().join(".partial-inflight").exists());
        assert!(manager.files_dir().join(&entry.file_name).exists());

        drop(manager);
        let manager = QuarantineManager::open(&root).unwrap();
        assert_eq!(manager.recovery_report().removed_partials, 1);
        assert_eq!(manager.count().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_opens_never_lose_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("store");
        let scan_dir = temp_dir.path().join("scan");
        let paths: Vec<PathBuf> = (0..40)
            .map(|i| {
                let content = format!("malware {}", i);
                create_test_file(&scan_dir, &format!("f{:02}.txt", i), content.as_bytes())
            })
            .collect();

        let manager = QuarantineManager::open(&root).unwrap();
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let opener = {
            let root = root.clone();
            let done = std::sync::Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(std::sync::atomic::Ordering::SeqCst) {
                    match QuarantineManager::open(&root) {
                        Err(Error::StoreLocked(_)) => {}
                        other => panic!("unexpected open result: {:?}", other.err()),
                    }
                }
            })
        };

        for path in &paths {
            manager.isolate(path, &signature()).unwrap();
        }
        done.store(true, std::sync::atomic::Ordering::SeqCst);
        opener.join().unwrap();

        for path in &paths {
            assert!(!path.exists());
        }
        assert_eq!(manager.count().unwrap(), paths.len());
        assert!(manager.verify().unwrap().is_healthy());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_restore_non_utf8_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_t, manager, scan_dir) = setup();
        let path = scan_dir.join(OsStr::from_bytes(b"bad\xFFname.txt"));
        fs::write(&path, b"malware").unwrap();

        let entry = manager.isolate(&path, &signature()).unwrap();
        assert!(!path.exists());
        assert_eq!(entry.original_path.file_name(), path.file_name());

        let restored = manager.restore(&entry.id).unwrap();
        assert_eq!(restored.file_name(), path.file_name());
        assert_eq!(fs::read(&path).unwrap(), b"malware");
    }

    #[test]
    fn test_recovery_of_interrupted_restore() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("store");
        let scan_dir = temp_dir.path().join("scan");
        let restored = create_test_file(&scan_dir, "restored.txt", b"malware r");
        let lost = create_test_file(&scan_dir, "lost.txt", b"malware l");

        let (restored_id, lost_id) = {
            let manager = QuarantineManager::open(&root).unwrap();
            let r = manager.isolate(&restored, &signature()).unwrap();
            let l = manager.isolate(&lost, &signature()).unwrap();
            // Restore of `r` crashed after the rename but before the ledger update.
            fs::write(&restored, b"malware r").unwrap();
            fs::remove_file(manager.files_dir().join(&r.file_name)).unwrap();
            // The copy of `l` vanished with no original to fall back on.
            fs::remove_file(manager.files_dir().join(&l.file_name)).unwrap();
            (r.id, l.id)
        };

        let manager = QuarantineManager::open(&root).unwrap();
        let report = manager.recovery_report();
        assert_eq!(report.dropped_restored, vec![restored_id]);
        assert_eq!(report.damaged, vec![lost_id.clone()]);
        assert_eq!(manager.count().unwrap(), 1);
        assert_eq!(manager.verify().unwrap().missing, vec![lost_id]);
    }
}
