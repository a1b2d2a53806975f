//! Shared list of active routers.
//!
//! Routers append themselves when they start and remove themselves on a
//! graceful stop; broadcasts are forwarded to every other listed router.
//! The file-backed registry replaces the file atomically on every write but
//! takes no lock, so two routers starting or stopping at the same moment can
//! still lose one of the updates.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use manet_core::{Endpoint, ManetError, Result, RouterId, RouterRecord};

/// Read/append/remove access to the router list.
pub trait Registry: Send + Sync {
    /// Current rows, in file order.
    fn list(&self) -> Result<Vec<RouterRecord>>;

    /// Add a row. A row with the same id is replaced.
    fn append(&self, record: RouterRecord) -> Result<()>;

    /// Remove the row with this id. Returns whether a row was removed.
    fn remove(&self, id: &str) -> Result<bool>;
}

/// Smallest `R<n>` (n ≥ 1) not already in use.
pub fn next_router_id(records: &[RouterRecord]) -> RouterId {
    (1u32..)
        .map(|n| format!("R{n}"))
        .find(|candidate| !records.iter().any(|r| &r.id == candidate))
        .unwrap_or_else(|| "R0".to_string())
}

/// Smallest `base + k * stride` (k ≥ 0) not already in use.
pub fn next_router_port(records: &[RouterRecord], base: u16, stride: u16) -> Result<u16> {
    let stride = stride.max(1);
    let mut port = base;
    loop {
        if !records.iter().any(|r| r.endpoint.port == port) {
            return Ok(port);
        }
        port = port.checked_add(stride).ok_or_else(|| {
            ManetError::Registry(format!("no free router port above {base}"))
        })?;
    }
}

// ── In-memory ──────────────────────────────────────────────────

/// Registry held in process memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    rows: Mutex<Vec<RouterRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for MemoryRegistry {
    fn list(&self) -> Result<Vec<RouterRecord>> {
        Ok(self.rows.lock().clone())
    }

    fn append(&self, record: RouterRecord) -> Result<()> {
        let mut rows = self.rows.lock();
        rows.retain(|r| r.id != record.id);
        rows.push(record);
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(rows.len() != before)
    }
}

// ── File-backed ────────────────────────────────────────────────

/// Registry stored as newline-delimited `id,address,port` rows.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_rows(&self, rows: &[RouterRecord]) -> Result<()> {
        let body = rows
            .iter()
            .map(format_row)
            .collect::<Vec<_>>()
            .join("\n");

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(body.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| ManetError::Registry(format!("{}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), rows = rows.len(), "registry written");
        Ok(())
    }
}

impl Registry for FileRegistry {
    fn list(&self) -> Result<Vec<RouterRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match parse_row(line) {
                Some(record) => Some(record),
                None => {
                    warn!(path = %self.path.display(), row = line, "skipping malformed registry row");
                    None
                }
            })
            .collect())
    }

    fn append(&self, record: RouterRecord) -> Result<()> {
        let mut rows = self.list()?;
        rows.retain(|r| r.id != record.id);
        rows.push(record);
        self.write_rows(&rows)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut rows = self.list()?;
        let before = rows.len();
        rows.retain(|r| r.id != id);
        if rows.len() == before {
            return Ok(false);
        }
        self.write_rows(&rows)?;
        Ok(true)
    }
}

fn parse_row(line: &str) -> Option<RouterRecord> {
    let mut fields = line.trim().split(',');
    let id = fields.next()?.trim();
    let address = fields.next()?.trim();
    let port = fields.next()?.trim().parse::<u16>().ok()?;
    if fields.next().is_some() || id.is_empty() || address.is_empty() {
        return None;
    }
    Some(RouterRecord::new(id, Endpoint::new(address, port)))
}

fn format_row(record: &RouterRecord) -> String {
    format!(
        "{},{},{}",
        record.id, record.endpoint.address, record.endpoint.port
    )
}
