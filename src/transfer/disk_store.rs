//! Durable keyed storage for expert records.
//!
//! One file per expert under a root directory. File names are derived from
//! the id deterministically; writes go through a temporary file and a rename
//! so a concurrent reader never observes a half-written record.
//!
//! Calls are blocking: the swapper runs them on its I/O executor.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::cache::record::ExpertRecord;
use crate::config::CompressionConfig;
use crate::transfer::codec::{CodecError, RecordCodec};

/// File extension of record files.
pub const RECORD_EXT: &str = "expert";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Expert {id} not found at {path}")]
    NotFound { id: String, path: PathBuf },

    #[error("Corrupt record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("Failed to encode expert {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: CodecError,
    },

    #[error("Record at {path} belongs to expert {found}, expected {expected}")]
    IdMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

/// Keyed whole-record storage.
///
/// Implementations are shared between the owner thread and I/O workers.
pub trait ExpertStore: Send + Sync {
    /// Persist `record`, replacing any existing record with the same id.
    fn write(&self, record: &ExpertRecord) -> Result<(), StoreError>;

    /// Load the record for `id`. Fails with [`StoreError::NotFound`] if absent.
    fn read(&self, id: &str) -> Result<ExpertRecord, StoreError>;

    /// Delete the record for `id`. Absent records are a no-op.
    fn remove(&self, id: &str) -> Result<(), StoreError>;

    fn exists(&self, id: &str) -> bool;
}

/// Store I/O statistics.
#[derive(Debug, Default)]
pub struct StoreStats {
    total_writes: AtomicU64,
    total_reads: AtomicU64,
    total_removes: AtomicU64,
    total_bytes_written: AtomicU64,
    total_bytes_read: AtomicU64,
}

/// Point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatsSnapshot {
    pub total_writes: u64,
    pub total_reads: u64,
    pub total_removes: u64,
    pub total_bytes_written: u64,
    pub total_bytes_read: u64,
}

impl StoreStats {
    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            total_writes: self.total_writes.load(Ordering::Relaxed),
            total_reads: self.total_reads.load(Ordering::Relaxed),
            total_removes: self.total_removes.load(Ordering::Relaxed),
            total_bytes_written: self.total_bytes_written.load(Ordering::Relaxed),
            total_bytes_read: self.total_bytes_read.load(Ordering::Relaxed),
        }
    }
}

/// Filesystem-backed [`ExpertStore`].
pub struct FileStore {
    root: PathBuf,
    codec: RecordCodec,
    stats: StoreStats,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>, compression: CompressionConfig) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "Opened expert store");
        Ok(Self {
            root,
            codec: RecordCodec::new(compression),
            stats: StoreStats::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record file for `id`.
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{RECORD_EXT}", escape_id(id)))
    }

    pub fn stats(&self) -> StoreStatsSnapshot {
        self.stats.snapshot()
    }
}

impl ExpertStore for FileStore {
    fn write(&self, record: &ExpertRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.id);
        let data = self.codec.encode(record).map_err(|source| StoreError::Encode {
            id: record.id.clone(),
            source,
        })?;

        let tmp = self.root.join(format!(".{}.tmp", Uuid::new_v4()));
        let written = (|| -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_data()?;
            fs::rename(&tmp, &path)
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(
            expert = %record.id,
            path = %path.display(),
            size = data.len(),
            "Wrote expert to disk"
        );

        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn read(&self, id: &str) -> Result<ExpertRecord, StoreError> {
        let path = self.record_path(id);
        let data = match fs::read(&path) {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    id: id.to_string(),
                    path,
                });
            }
            Err(e) => return Err(e.into()),
        };
        let size = data.len();

        let record = self.codec.decode(data).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        if record.id != id {
            return Err(StoreError::IdMismatch {
                path,
                expected: id.to_string(),
                found: record.id,
            });
        }

        debug!(expert = id, path = %path.display(), size, "Read expert from disk");

        self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_read
            .fetch_add(size as u64, Ordering::Relaxed);
        Ok(record)
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(expert = id, path = %path.display(), "Deleted expert file");
                self.stats.total_removes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, id: &str) -> bool {
        self.record_path(id).is_file()
    }
}

/// Map an arbitrary id to a file stem.
///
/// `[A-Za-z0-9_-]` pass through, every other byte (including `.` and `%`)
/// becomes `%XX`. The mapping is injective and never yields a path separator
/// or a leading dot.
fn escape_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for &b in id.as_bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::record::{ExpertWeights, Metadata};
    use tempfile::TempDir;

    fn record(id: &str) -> ExpertRecord {
        ExpertRecord::new(
            id,
            ExpertWeights::new(vec![1u8; 256], vec![2u8; 256], vec![3u8; 128]),
            Metadata::new(),
        )
    }

    #[test]
    fn test_write_and_read_record() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path().join("experts"), CompressionConfig::default()).unwrap();

        store.write(&record("e1")).unwrap();
        assert!(store.exists("e1"));

        let back = store.read("e1").unwrap();
        assert_eq!(back, record("e1"));

        let stats = store.stats();
        assert_eq!(stats.total_writes, 1);
        assert_eq!(stats.total_reads, 1);
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path(), CompressionConfig::default()).unwrap();
        let err = store.read("ghost").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path(), CompressionConfig::default()).unwrap();

        store.write(&record("e2")).unwrap();
        store.remove("e2").unwrap();
        store.remove("e2").unwrap();
        assert!(!store.exists("e2"));
        assert_eq!(store.stats().total_removes, 1);
    }

    #[test]
    fn test_overwrite_replaces_record() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path(), CompressionConfig::default()).unwrap();

        store.write(&record("e3")).unwrap();
        let replacement = ExpertRecord::new(
            "e3",
            ExpertWeights::new(vec![9u8; 4], vec![9u8; 4], vec![9u8; 4]),
            Metadata::new(),
        );
        store.write(&replacement).unwrap();
        assert_eq!(store.read("e3").unwrap(), replacement);
    }

    #[test]
    fn test_escape_is_injective_and_contained() {
        assert_eq!(escape_id("blk.0.ffn_up-3"), "blk%2E0%2Effn_up-3");
        assert_eq!(escape_id("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_ne!(escape_id("a/b"), escape_id("a%2Fb"));
        assert_ne!(escape_id("a.b"), escape_id("a%2Eb"));

        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path(), CompressionConfig::default()).unwrap();
        let path = store.record_path("../../outside");
        assert_eq!(path.parent(), Some(tmp.path()));
    }
}
