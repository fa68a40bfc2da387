//! Backing stores for the audit chain.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::entry::AuditEntry;
use super::AuditError;

/// Append-only persistence for sealed entries.
pub trait AuditStore: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;

    /// Every entry in append order.
    fn load(&self) -> Result<Vec<AuditEntry>, AuditError>;

    fn last(&self) -> Result<Option<AuditEntry>, AuditError> {
        Ok(self.load()?.pop())
    }
}

/// In-process store. Contents are lost at exit.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing entries, e.g. to replay a captured chain.
    pub fn with_entries(entries: Vec<AuditEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(entry.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.entries.lock().map_err(|_| AuditError::Poisoned)?.clone())
    }

    fn last(&self) -> Result<Option<AuditEntry>, AuditError> {
        Ok(self.entries.lock().map_err(|_| AuditError::Poisoned)?.last().cloned())
    }
}

/// One JSON object per line, opened in append mode for every write.
///
/// A line is only considered written once its trailing newline is on disk.
/// A failed write is truncated away; an unterminated final line left by a
/// crash is ignored on read and discarded by the next append.
#[derive(Debug)]
pub struct JsonlAuditStore {
    path: PathBuf,
    fsync: bool,
    // Serializes writers sharing this store.
    write_lock: Mutex<()>,
}

const TAIL_CHUNK: u64 = 8 * 1024;

impl JsonlAuditStore {
    pub fn new(path: impl Into<PathBuf>, fsync: bool) -> Self {
        Self {
            path: path.into(),
            fsync,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_for_append(&self) -> Result<File, AuditError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?)
    }

    /// Drop an unterminated final line. Returns the resulting length.
    fn discard_torn_tail(&self, file: &mut File) -> io::Result<u64> {
        let len = file.metadata()?.len();
        let complete = line_start(file, len)?;
        if complete < len {
            tracing::warn!(
                path = %self.path.display(),
                bytes = len - complete,
                "Discarding incomplete audit line"
            );
            file.set_len(complete)?;
        }
        Ok(complete)
    }

    fn write_line(&self, file: &mut File, line: &[u8]) -> io::Result<()> {
        file.write_all(line)?;
        file.flush()?;
        if self.fsync {
            file.sync_data()?;
        }
        Ok(())
    }
}

impl AuditStore for JsonlAuditStore {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().map_err(|_| AuditError::Poisoned)?;
        let mut file = self.open_for_append()?;
        let len = self.discard_torn_tail(&mut file)?;
        if let Err(e) = self.write_line(&mut file, &line) {
            if let Err(truncate) = file.set_len(len) {
                tracing::error!(path = %self.path.display(), error = %truncate, "Failed to roll back partial audit line");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn load(&self) -> Result<Vec<AuditEntry>, AuditError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        let mut line = Vec::new();
        let mut number = 0;
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            number += 1;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice(&line) {
                Ok(entry) => entries.push(entry),
                Err(_) if line.last() != Some(&b'\n') => {
                    tracing::warn!(path = %self.path.display(), line = number, "Ignoring incomplete final audit line");
                    break;
                }
                Err(source) => return Err(AuditError::Corrupt { line: number, source }),
            }
        }
        Ok(entries)
    }

    /// Reads backwards from the end of the file instead of loading it.
    fn last(&self) -> Result<Option<AuditEntry>, AuditError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        let mut end = line_start(&mut file, len)?;
        while end > 0 {
            let start = line_start(&mut file, end - 1)?;
            let mut line = vec![0u8; usize::try_from(end - start).unwrap_or(0)];
            file.seek(SeekFrom::Start(start))?;
            file.read_exact(&mut line)?;
            if !line.iter().all(u8::is_ascii_whitespace) {
                let entry = serde_json::from_slice(&line).map_err(|source| AuditError::CorruptTail { source })?;
                return Ok(Some(entry));
            }
            end = start;
        }
        Ok(None)
    }
}

/// Offset just past the last newline before `end`, or 0 if there is none.
fn line_start(file: &mut File, end: u64) -> io::Result<u64> {
    let mut buf = vec![0u8; TAIL_CHUNK as usize];
    let mut pos = end;
    while pos > 0 {
        let read = TAIL_CHUNK.min(pos);
        pos -= read;
        let chunk = &mut buf[..read as usize];
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(chunk)?;
        if let Some(i) = chunk.iter().rposition(|b| *b == b'\n') {
            return Ok(pos + i as u64 + 1);
        }
    }
    Ok(0)
}
