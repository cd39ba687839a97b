//! Cache record persistence.
//!
//! # Design
//! The pipeline only needs two operations from storage: look up the row for
//! (url, serialized params) and upsert it. `RecordStore` is that narrow
//! contract. Records are mapped to rows explicitly (`CacheRow`), and the
//! body and params columns are base64-obfuscated at rest.
//!
//! Uniqueness is enforced by the table itself: `upsert` queries for the key
//! first and overwrites the match in place, so a key never has two rows.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::envelope::Status;
use crate::error::{CourierError, Result};

/// Last known outcome for one (url, params) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub url: String,
    /// `RequestParams::serialized()` of the call.
    pub params: String,
    pub status: Status,
    pub body: String,
    pub exception: Option<String>,
}

/// Persisted layout of a `CacheRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRow {
    pub url: String,
    pub params: String,
    pub code: String,
    pub body: String,
    pub exception: Option<String>,
}

fn obfuscate(plain: &str) -> String {
    STANDARD.encode(plain.as_bytes())
}

fn reveal(stored: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(stored)
        .map_err(|e| CourierError::Store(format!("corrupt cache column: {e}")))?;
    String::from_utf8(bytes).map_err(|e| CourierError::Store(format!("corrupt cache column: {e}")))
}

impl From<&CacheRecord> for CacheRow {
    fn from(r: &CacheRecord) -> Self {
        CacheRow {
            url: r.url.clone(),
            params: obfuscate(&r.params),
            code: r.status.code().to_string(),
            body: obfuscate(&r.body),
            exception: r.exception.clone(),
        }
    }
}

impl TryFrom<&CacheRow> for CacheRecord {
    type Error = CourierError;

    fn try_from(row: &CacheRow) -> Result<Self> {
        let status = row
            .code
            .parse::<i32>()
            .ok()
            .and_then(Status::from_code)
            .ok_or_else(|| CourierError::Store(format!("bad status code `{}`", row.code)))?;
        Ok(CacheRecord {
            url: row.url.clone(),
            params: reveal(&row.params)?,
            status,
            body: reveal(&row.body)?,
            exception: row.exception.clone(),
        })
    }
}

/// Key → record table used by the completion queue.
pub trait RecordStore: Send + Sync {
    fn find(&self, url: &str, params: &str) -> Result<Option<CacheRecord>>;
    /// Insert the record, or overwrite the existing row with the same key.
    fn upsert(&self, record: &CacheRecord) -> Result<()>;
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Rows plus the query-then-upsert sequence shared by both stores.
#[derive(Debug, Default)]
struct RowTable {
    rows: Vec<CacheRow>,
}

impl RowTable {
    fn position(&self, url: &str, stored_params: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r.url == url && r.params == stored_params)
    }

    fn find(&self, url: &str, params: &str) -> Result<Option<CacheRecord>> {
        self.position(url, &obfuscate(params))
            .map(|i| CacheRecord::try_from(&self.rows[i]))
            .transpose()
    }

    fn upsert(&mut self, record: &CacheRecord) {
        let row = CacheRow::from(record);
        match self.position(&row.url, &row.params) {
            Some(i) => self.rows[i] = row,
            None => self.rows.push(row),
        }
    }
}

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<RowTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw rows as they sit in memory, obfuscated columns included.
    pub fn rows(&self) -> Vec<CacheRow> {
        self.table.lock().rows.clone()
    }
}

impl RecordStore for MemoryStore {
    fn find(&self, url: &str, params: &str) -> Result<Option<CacheRecord>> {
        self.table.lock().find(url, params)
    }

    fn upsert(&self, record: &CacheRecord) -> Result<()> {
        self.table.lock().upsert(record);
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.table.lock().rows.len())
    }
}

/// Store backed by one JSON file, rewritten on every upsert.
///
/// Writes go to a sibling temp file first and are renamed over the target so
/// a crash never leaves a truncated table behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    table: Mutex<RowTable>,
}

impl FileStore {
    /// Open `path`, loading existing rows. A missing file is an empty table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let rows = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CourierError::Store(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), rows = rows.len(), "opened cache file");
        Ok(Self {
            path,
            table: Mutex::new(RowTable { rows }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &RowTable) -> Result<()> {
        let bytes = serde_json::to_vec(&table.rows)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RecordStore for FileStore {
    fn find(&self, url: &str, params: &str) -> Result<Option<CacheRecord>> {
        self.table.lock().find(url, params)
    }

    fn upsert(&self, record: &CacheRecord) -> Result<()> {
        let mut table = self.table.lock();
        table.upsert(record);
        self.persist(&table)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.table.lock().rows.len())
    }
}
