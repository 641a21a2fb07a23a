//! File operations used by the quarantine store.
//!
//! Provides:
//! - Durable copies with SHA-256 computed in the same pass
//! - Directory fsync after renames
//! - Capture and re-application of permissions and modification time
//! - Secure deletion with random overwrite

use chrono::{DateTime, Utc};
use rand::RngCore;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::core::error::{Error, Result};
use crate::utils::hash::HashCalculator;

/// Number of overwrite passes for secure deletion.
const SECURE_DELETE_PASSES: usize = 3;

/// Copy `source` into a new file at `dest`, fsync it, and return the byte
/// count and SHA-256 of what was written.
///
/// `dest` must not exist. On failure the partial file is removed.
pub fn copy_durable(source: &mut File, dest: &Path) -> Result<(u64, String)> {
    let mut out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| Error::file_write(dest, e))?;

    let result = HashCalculator::copy_hashing(source, &mut out).and_then(|copied| {
        out.sync_all()?;
        Ok(copied)
    });

    match result {
        Ok(copied) => Ok(copied),
        Err(e) => {
            drop(out);
            let _ = fs::remove_file(dest);
            Err(Error::file_write(dest, e))
        }
    }
}

/// Flush directory metadata so that a rename inside it is durable.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| Error::DirectoryAccess {
            path: dir.to_path_buf(),
            source: e,
        })
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Permission bits of a file as recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePermissions {
    /// Unix mode bits
    pub mode: Option<u32>,
    pub readonly: bool,
}

impl FilePermissions {
    /// Capture permissions from metadata.
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode() & 0o7777)
        };
        #[cfg(not(unix))]
        let mode = None;

        Self {
            mode,
            readonly: metadata.permissions().readonly(),
        }
    }

    /// Apply these permissions to `path`.
    pub fn apply(&self, path: &Path) -> Result<()> {
        let mut perms = fs::metadata(path)
            .map_err(|e| Error::file_read(path, e))?
            .permissions();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            match self.mode {
                Some(mode) => perms.set_mode(mode),
                None => perms.set_readonly(self.readonly),
            }
        }
        #[cfg(not(unix))]
        perms.set_readonly(self.readonly);

        fs::set_permissions(path, perms).map_err(|e| Error::file_write(path, e))
    }
}

/// Modification time of a file, if the platform reports one.
pub fn modified_time(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

/// Set the modification time through an open, writable handle.
pub fn set_modified(file: &File, path: &Path, time: DateTime<Utc>) -> Result<()> {
    file.set_modified(time.into())
        .map_err(|e| Error::file_write(path, e))
}

/// Remove a file, clearing the read-only flag first where the platform requires it.
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        #[cfg(windows)]
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            let mut perms = fs::metadata(path)
                .map_err(|e| Error::file_read(path, e))?
                .permissions();
            perms.set_readonly(false);
            fs::set_permissions(path, perms).map_err(|e| Error::file_write(path, e))?;
            fs::remove_file(path).map_err(|e| Error::file_delete(path, e))
        }
        Err(e) => Err(Error::file_delete(path, e)),
    }
}

/// Deletion of quarantine copies.
pub struct SecureOperations {
    /// Number of overwrite passes; zero means plain deletion
    overwrite_passes: usize,
}

impl SecureOperations {
    /// Overwrite before deleting, with the default number of passes.
    pub fn new() -> Self {
        Self {
            overwrite_passes: SECURE_DELETE_PASSES,
        }
    }

    /// Plain deletion without overwrite.
    pub fn plain() -> Self {
        Self {
            overwrite_passes: 0,
        }
    }

    /// Pick secure or plain deletion from the `quarantine.secure_delete` setting.
    pub fn from_setting(secure_delete: bool) -> Self {
        if secure_delete {
            Self::new()
        } else {
            Self::plain()
        }
    }

    pub fn is_secure(&self) -> bool {
        self.overwrite_passes > 0
    }

    /// Delete a file, overwriting it first when configured.
    ///
    /// Returns `false` if the file did not exist.
    pub fn delete(&self, path: &Path) -> Result<bool> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::file_read(path, e)),
        };

        if self.is_secure() && metadata.is_file() && metadata.len() > 0 {
            for _pass in 0..self.overwrite_passes {
                self.overwrite_with_random(path, metadata.len())?;
            }

            // Rename to a random name so the original name does not linger.
            let random_path = path
                .parent()
                .unwrap_or(Path::new("."))
                .join(format!(".wipe-{}", random_name()));
            fs::rename(path, &random_path).map_err(|e| Error::file_delete(path, e))?;
            fs::remove_file(&random_path).map_err(|e| Error::file_delete(path, e))?;
            return Ok(true);
        }

        remove_file(path)?;
        Ok(true)
    }

    fn overwrite_with_random(&self, path: &Path, size: u64) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| Error::file_write(path, e))?;

        const CHUNK_SIZE: u64 = 8192;
        let mut rng = rand::thread_rng();
        let mut buffer = vec![0u8; CHUNK_SIZE.min(size) as usize];
        let mut remaining = size;

        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::file_write(path, e))?;

        while remaining > 0 {
            let write_size = remaining.min(CHUNK_SIZE) as usize;
            rng.fill_bytes(&mut buffer[..write_size]);
            file.write_all(&buffer[..write_size])
                .map_err(|e| Error::file_write(path, e))?;
            remaining -= write_size as u64;
        }

        file.sync_all().map_err(|e| Error::file_write(path, e))
    }
}

impl Default for SecureOperations {
    fn default() -> Self {
        Self::new()
    }
}

fn random_name() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
