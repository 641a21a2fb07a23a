//! Quarantine ledger stored in SQLite.
//!
//! The ledger is the source of truth for what the store holds. Every file in
//! `files/` must have exactly one row here.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{Error, Result};

/// Lifecycle state of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Copy is durable, original not yet removed
    Pending,
    /// Original removed, copy is the only instance
    Isolated,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Isolated => "isolated",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EntryState::Pending),
            "isolated" => Some(EntryState::Isolated),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One quarantined file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Where the file lived before isolation
    pub original_path: PathBuf,
    /// Name of the copy inside `files/`
    pub file_name: String,
    /// SHA-256 of the content
    pub sha256: String,
    pub size: u64,
    /// Unix permission bits, if known
    pub mode: Option<u32>,
    pub readonly: bool,
    /// Original modification time
    pub modified_at: Option<DateTime<Utc>>,
    pub signature_id: String,
    pub signature_label: String,
    pub isolated_at: DateTime<Utc>,
    pub state: EntryState,
}

const COLUMNS: &str = "id, original_path, file_name, sha256, size, mode, readonly,
     modified_at, signature_id, signature_label, isolated_at, state";

/// Fixed-width UTC timestamps so that text ordering is time ordering.
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(index: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

/// Raw bytes of a path, so names that are not valid UTF-8 survive the ledger.
#[cfg(unix)]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

/// UTF-16 code units, little endian.
#[cfg(windows)]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str()
        .encode_wide()
        .flat_map(u16::to_le_bytes)
        .collect()
}

#[cfg(windows)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::windows::ffi::OsStringExt;
    let wide: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    PathBuf::from(std::ffi::OsString::from_wide(&wide))
}

#[cfg(not(any(unix, windows)))]
fn path_to_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(not(any(unix, windows)))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<QuarantineEntry> {
    let modified_at = match row.get::<_, Option<String>>(7)? {
        Some(s) => Some(parse_time(7, &s)?),
        None => None,
    };
    let state_str: String = row.get(11)?;
    let state = EntryState::parse(&state_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            11,
            Type::Text,
            format!("unknown entry state '{}'", state_str).into(),
        )
    })?;

    let original_path = match row.get_ref(1)? {
        ValueRef::Blob(bytes) => path_from_bytes(bytes),
        ValueRef::Text(text) => PathBuf::from(String::from_utf8_lossy(text).into_owned()),
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                1,
                "original_path".to_string(),
                other.data_type(),
            ))
        }
    };

    Ok(QuarantineEntry {
        id: row.get(0)?,
        original_path,
        file_name: row.get(2)?,
        sha256: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        mode: row.get::<_, Option<i64>>(5)?.map(|m| m as u32),
        readonly: row.get::<_, i32>(6)? != 0,
        modified_at,
        signature_id: row.get(8)?,
        signature_label: row.get(9)?,
        isolated_at: parse_time(10, &row.get::<_, String>(10)?)?,
        state,
    })
}

/// SQLite-backed ledger.
///
/// An opened ledger holds an exclusive lock on its database until it is
/// dropped, so at most one ledger per store exists across all processes.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Create or open the ledger database and lock it.
    ///
    /// Fails with [`Error::StoreLocked`] if another ledger holds the lock.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::DirectoryAccess {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let locked = |e: rusqlite::Error| {
            let busy = matches!(
                &e,
                rusqlite::Error::SqliteFailure(err, _)
                    if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            );
            if busy {
                Error::StoreLocked(db_path.to_path_buf())
            } else {
                Error::Ledger(e)
            }
        };

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::ZERO)?;
        conn.pragma_update_and_check(None, "locking_mode", "EXCLUSIVE", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "FULL").map_err(locked)?;
        // The write lock taken here is kept until the connection closes.
        conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;").map_err(locked)?;

        let ledger = Self { conn };
        ledger.initialize().map_err(|e| match e {
            Error::Ledger(inner) => locked(inner),
            other => other,
        })?;
        Ok(ledger)
    }

    /// Create an in-memory ledger (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self { conn };
        ledger.initialize()?;
        Ok(ledger)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS quarantine_entries (
                id TEXT PRIMARY KEY,
                original_path BLOB NOT NULL,
                file_name TEXT NOT NULL UNIQUE,
                sha256 TEXT NOT NULL,
                size INTEGER NOT NULL,
                mode INTEGER,
                readonly INTEGER NOT NULL DEFAULT 0,
                modified_at TEXT,
                signature_id TEXT NOT NULL,
                signature_label TEXT NOT NULL,
                isolated_at TEXT NOT NULL,
                state TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_isolated_at
                ON quarantine_entries(isolated_at, id);",
        )?;
        Ok(())
    }

    /// Record a new entry.
    pub fn insert(&self, entry: &QuarantineEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO quarantine_entries
             (id, original_path, file_name, sha256, size, mode, readonly,
              modified_at, signature_id, signature_label, isolated_at, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.id,
                path_to_bytes(&entry.original_path),
                entry.file_name,
                entry.sha256,
                entry.size as i64,
                entry.mode.map(i64::from),
                entry.readonly as i32,
                entry.modified_at.as_ref().map(format_time),
                entry.signature_id,
                entry.signature_label,
                format_time(&entry.isolated_at),
                entry.state.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Change the state of an entry.
    pub fn set_state(&self, id: &str, state: EntryState) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE quarantine_entries SET state = ?1 WHERE id = ?2",
            params![state.as_str(), id],
        )?;
        Ok(rows > 0)
    }

    /// Get an entry by id.
    pub fn get(&self, id: &str) -> Result<Option<QuarantineEntry>> {
        let sql = format!("SELECT {} FROM quarantine_entries WHERE id = ?1", COLUMNS);
        let entry = self
            .conn
            .query_row(&sql, [id], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    /// Get the entry owning a quarantine file name.
    pub fn get_by_file_name(&self, file_name: &str) -> Result<Option<QuarantineEntry>> {
        let sql = format!(
            "SELECT {} FROM quarantine_entries WHERE file_name = ?1",
            COLUMNS
        );
        let entry = self
            .conn
            .query_row(&sql, [file_name], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    /// All entries, ordered by isolation time then id.
    pub fn list(&self) -> Result<Vec<QuarantineEntry>> {
        let sql = format!(
            "SELECT {} FROM quarantine_entries ORDER BY isolated_at, id",
            COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Entries isolated strictly before `cutoff`.
    pub fn list_isolated_before(&self, cutoff: &DateTime<Utc>) -> Result<Vec<QuarantineEntry>> {
        let sql = format!(
            "SELECT {} FROM quarantine_entries WHERE isolated_at < ?1 ORDER BY isolated_at, id",
            COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map([format_time(cutoff)], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Remove an entry.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM quarantine_entries WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM quarantine_entries", [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    /// Sum of the original sizes of all entries.
    pub fn total_size(&self) -> Result<u64> {
        let size: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM quarantine_entries",
            [],
            |row| row.get(0),
        )?;
        Ok(size as u64)
    }
}
