//! On-disk snapshot directory.
//!
//! Each snapshot is one file named after the last log index it covers:
//!
//! ```text
//! snapshot_{index:016x}.snap
//!   magic    [u8; 4]   "SCSN"
//!   version  u32 LE
//!   meta_len u64 LE, meta (JSON SnapshotMeta)
//!   data_len u64 LE, data (JSON Config)
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{ClusterError, ClusterResult};
use crate::types::ClusterSnapshotMeta;

const SNAPSHOT_MAGIC: &[u8; 4] = b"SCSN";
const SNAPSHOT_VERSION: u32 = 1;

/// A snapshot as held in memory and on disk.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    /// Raft metadata (last log id, membership, snapshot id).
    pub meta: ClusterSnapshotMeta,
    /// Serialized config document.
    pub data: Vec<u8>,
}

/// Directory of persisted snapshots with bounded retention.
#[derive(Debug)]
pub struct SnapshotStore {
    directory: PathBuf,
    retained: usize,
}

impl SnapshotStore {
    /// Open (and create) the snapshot directory.
    pub fn open(directory: impl Into<PathBuf>, retained: usize) -> ClusterResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            retained: retained.max(1),
        })
    }

    /// Directory holding the snapshot files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Persist a snapshot and drop the oldest files beyond retention.
    pub fn save(&self, snapshot: &StoredSnapshot) -> ClusterResult<PathBuf> {
        let index = snapshot.meta.last_log_id.map_or(0, |id| id.index);
        let path = self.snapshot_path(index);
        let temp_path = path.with_extension("snap.tmp");

        let meta = serde_json::to_vec(&snapshot.meta)?;
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(SNAPSHOT_MAGIC)?;
        writer.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
        writer.write_all(&(meta.len() as u64).to_le_bytes())?;
        writer.write_all(&meta)?;
        writer.write_all(&(snapshot.data.len() as u64).to_le_bytes())?;
        writer.write_all(&snapshot.data)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&temp_path, &path)?;

        tracing::info!(
            index,
            snapshot_id = %snapshot.meta.snapshot_id,
            bytes = snapshot.data.len(),
            "Persisted snapshot"
        );

        self.cleanup();
        Ok(path)
    }

    /// Load the newest snapshot, if any.
    ///
    /// A newest file that cannot be decoded is an error; older files are
    /// never used in its place.
    pub fn load_latest(&self) -> ClusterResult<Option<StoredSnapshot>> {
        let Some(index) = self.snapshot_indexes()?.into_iter().max() else {
            return Ok(None);
        };
        let path = self.snapshot_path(index);
        let file = File::open(&path)?;
        let snapshot = read_snapshot(BufReader::new(file)).map_err(|reason| {
            tracing::error!(path = %path.display(), %reason, "Snapshot is unreadable");
            ClusterError::SnapshotCorrupt {
                path: path.display().to_string(),
                reason,
            }
        })?;
        tracing::info!(index, path = %path.display(), "Loaded snapshot");
        Ok(Some(snapshot))
    }

    fn snapshot_indexes(&self) -> ClusterResult<Vec<u64>> {
        let mut indexes = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let name = entry?.file_name();
            let index = name
                .to_str()
                .and_then(|s| s.strip_prefix("snapshot_"))
                .and_then(|s| s.strip_suffix(".snap"))
                .and_then(|s| u64::from_str_radix(s, 16).ok());
            if let Some(index) = index {
                indexes.push(index);
            }
        }
        Ok(indexes)
    }

    fn cleanup(&self) {
        let mut indexes = match self.snapshot_indexes() {
            Ok(indexes) => indexes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list snapshots for cleanup");
                return;
            }
        };
        if indexes.len() <= self.retained {
            return;
        }
        indexes.sort_unstable();
        let excess = indexes.len() - self.retained;
        for index in indexes.into_iter().take(excess) {
            let path = self.snapshot_path(index);
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(index, "Removed old snapshot"),
                Err(e) => tracing::warn!(index, error = %e, "Failed to remove old snapshot"),
            }
        }
    }

    fn snapshot_path(&self, index: u64) -> PathBuf {
        self.directory.join(format!("snapshot_{:016x}.snap", index))
    }
}

fn read_snapshot(mut reader: impl Read) -> Result<StoredSnapshot, String> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| format!("failed to read magic: {e}"))?;
    if &magic != SNAPSHOT_MAGIC {
        return Err("invalid snapshot magic".to_string());
    }

    let mut version = [0u8; 4];
    reader
        .read_exact(&mut version)
        .map_err(|e| format!("failed to read version: {e}"))?;
    let version = u32::from_le_bytes(version);
    if version != SNAPSHOT_VERSION {
        return Err(format!("unsupported snapshot version {version}"));
    }

    let meta = read_section(&mut reader, "meta")?;
    let meta: ClusterSnapshotMeta =
        serde_json::from_slice(&meta).map_err(|e| format!("invalid meta: {e}"))?;
    let data = read_section(&mut reader, "data")?;
    Ok(StoredSnapshot { meta, data })
}

fn read_section(reader: &mut impl Read, what: &str) -> Result<Vec<u8>, String> {
    let mut len = [0u8; 8];
    reader
        .read_exact(&mut len)
        .map_err(|e| format!("failed to read {what} length: {e}"))?;
    let len = u64::from_le_bytes(len);
    let mut buf = Vec::new();
    reader
        .take(len)
        .read_to_end(&mut buf)
        .map_err(|e| format!("failed to read {what}: {e}"))?;
    if buf.len() as u64 != len {
        return Err(format!("{what} truncated: {} of {len} bytes", buf.len()));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::{CommittedLeaderId, LogId};
    use tempfile::TempDir;

    fn snapshot(index: u64, data: &[u8]) -> StoredSnapshot {
        StoredSnapshot {
            meta: ClusterSnapshotMeta {
                last_log_id: Some(LogId::new(CommittedLeaderId::new(1, 1), index)),
                last_membership: Default::default(),
                snapshot_id: format!("1-{index}"),
            },
            data: data.to_vec(),
        }
    }

    #[test]
    fn empty_directory_has_no_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), 2).unwrap();
        assert!(store.load_latest().unwrap().is_none());
    }

    #[test]
    fn latest_snapshot_wins() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), 2).unwrap();
        store.save(&snapshot(5, b"five")).unwrap();
        store.save(&snapshot(9, b"nine")).unwrap();

        let loaded = store.load_latest().unwrap().unwrap();
        assert_eq!(loaded.data, b"nine");
        assert_eq!(loaded.meta.snapshot_id, "1-9");
    }

    #[test]
    fn retention_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), 2).unwrap();
        for index in [3, 6, 9, 12] {
            store.save(&snapshot(index, b"x")).unwrap();
        }
        let mut indexes = store.snapshot_indexes().unwrap();
        indexes.sort_unstable();
        assert_eq!(indexes, vec![9, 12]);
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), 2).unwrap();
        store.save(&snapshot(4, b"good")).unwrap();
        let newest = store.save(&snapshot(8, b"good too")).unwrap();

        let mut bytes = fs::read(&newest).unwrap();
        bytes.truncate(bytes.len() - 3);
        fs::write(&newest, bytes).unwrap();

        let err = store.load_latest().unwrap_err();
        assert!(matches!(err, ClusterError::SnapshotCorrupt { .. }));
    }

    #[test]
    fn bad_magic_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path(), 2).unwrap();
        fs::write(dir.path().join("snapshot_0000000000000001.snap"), b"nope").unwrap();
        let err = store.load_latest().unwrap_err();
        assert!(matches!(err, ClusterError::SnapshotCorrupt { .. }));
    }
}
