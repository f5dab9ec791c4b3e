use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::CacheEntry;
use crate::{CacheErrorKind, FloorError};

const RECORD_EXT: &str = "json";

/// One file per key; the filename is the SHA-256 of the logical key.
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    stored_at_ms: u64,
    ttl_ms: u64,
    value: Value,
}

#[derive(Debug)]
pub(crate) struct DiskTier {
    dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl DiskTier {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tmp_seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.{RECORD_EXT}", hex::encode(digest)))
    }

    pub(crate) fn get(&self, key: &str, now_ms: u64) -> Result<Option<Value>, FloorError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(CacheErrorKind::ReadFailed, &path, e)),
        };

        let record: DiskRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(FloorError::cache(
                    CacheErrorKind::ReadFailed,
                    format!("corrupt cache record {}", path.display()),
                )
                .with_cause(e));
            }
        };

        if record.key != key {
            return Ok(None);
        }
        let entry = CacheEntry {
            key: record.key,
            value: record.value,
            stored_at_ms: record.stored_at_ms,
            ttl_ms: record.ttl_ms,
        };
        if entry.is_expired(now_ms) {
            ftrace!(key, "disk tier record expired");
            let _ = fs::remove_file(&path);
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    /// Writes the record through a temp file so readers never observe a partial write.
    pub(crate) fn put(&self, entry: &CacheEntry) -> Result<(), FloorError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| io_error(CacheErrorKind::WriteFailed, &self.dir, e))?;

        let record = DiskRecord {
            key: entry.key.clone(),
            stored_at_ms: entry.stored_at_ms,
            ttl_ms: entry.ttl_ms,
            value: entry.value.clone(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| {
            FloorError::cache(CacheErrorKind::WriteFailed, "cache value is not serializable")
                .with_cause(e)
        })?;

        let path = self.path_for(&entry.key);
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{RECORD_EXT}.{seq}.tmp"));
        if let Err(e) = fs::write(&tmp, &bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(io_error(write_kind(&e), &tmp, e));
        }
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            io_error(CacheErrorKind::WriteFailed, &path, e)
        })
    }

    pub(crate) fn remove(&self, key: &str) -> Result<bool, FloorError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(CacheErrorKind::WriteFailed, &path, e)),
        }
    }

    pub(crate) fn clear(&self) -> Result<usize, FloorError> {
        let mut removed = 0;
        for path in self.record_paths()? {
            if fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Deletes expired and unreadable records.
    pub(crate) fn purge_expired(&self, now_ms: u64) -> Result<usize, FloorError> {
        let mut purged = 0;
        for path in self.record_paths()? {
            let stale = match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<DiskRecord>(&bytes) {
                    Ok(r) => r.ttl_ms > 0 && now_ms.saturating_sub(r.stored_at_ms) > r.ttl_ms,
                    Err(_) => true,
                },
                Err(_) => false,
            };
            if stale && fs::remove_file(&path).is_ok() {
                purged += 1;
            }
        }
        Ok(purged)
    }

    fn record_paths(&self) -> Result<Vec<PathBuf>, FloorError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(CacheErrorKind::ReadFailed, &self.dir, e)),
        };
        Ok(entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == RECORD_EXT))
            .collect())
    }
}

fn write_kind(e: &io::Error) -> CacheErrorKind {
    match e.kind() {
        io::ErrorKind::StorageFull => CacheErrorKind::StorageFull,
        _ => CacheErrorKind::WriteFailed,
    }
}

fn io_error(kind: CacheErrorKind, path: &Path, e: io::Error) -> FloorError {
    FloorError::cache(kind, format!("{}: {e}", path.display())).with_cause(e)
}
