//! Hash calculation utilities.

use crate::core::error::{Error, Result};
use md5::{Digest, Md5};
use sha2::Sha256;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Buffer size for streaming reads (64KB).
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Digests of a buffer, as consulted by hash rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigests {
    /// SHA-256, lowercase hex
    pub sha256: String,
    /// MD5, lowercase hex
    pub md5: String,
}

impl ContentDigests {
    /// Compute both digests of `data` in one pass.
    pub fn of(data: &[u8]) -> Self {
        let mut sha256 = Sha256::new();
        let mut md5 = Md5::new();
        for chunk in data.chunks(BUFFER_SIZE) {
            sha256.update(chunk);
            md5.update(chunk);
        }
        Self {
            sha256: hex::encode(sha256.finalize()),
            md5: hex::encode(md5.finalize()),
        }
    }
}

/// Hash calculator for files and byte slices.
pub struct HashCalculator;

impl HashCalculator {
    /// Calculate SHA-256 of a file, streaming.
    pub fn sha256_file(path: &Path) -> Result<String> {
        let mut file = File::open(path).map_err(|e| Error::file_read(path, e))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];

        loop {
            let bytes_read = file
                .read(&mut buffer)
                .map_err(|e| Error::file_read(path, e))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Calculate SHA-256 of bytes.
    pub fn sha256_bytes(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Calculate MD5 of bytes.
    pub fn md5_bytes(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Verify a file matches an expected SHA-256.
    pub fn verify_sha256(path: &Path, expected: &str) -> Result<bool> {
        let actual = Self::sha256_file(path)?;
        Ok(actual.eq_ignore_ascii_case(expected))
    }

    /// Copy `reader` into `writer`, returning the byte count and SHA-256 of
    /// what was written.
    pub fn copy_hashing<R: Read, W: Write>(
        reader: &mut R,
        writer: &mut W,
    ) -> std::io::Result<(u64, String)> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut total = 0u64;

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            writer.write_all(&buffer[..n])?;
            hasher.update(&buffer[..n]);
            total += n as u64;
        }

        Ok((total, hex::encode(hasher.finalize())))
    }
}

/// Check that `s` is exactly `len` hex digits.
pub fn is_hex_digest(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}
