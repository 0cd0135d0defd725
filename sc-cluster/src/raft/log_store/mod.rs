//! Durable Raft log backed by segment files.
//!
//! ```text
//! raft/
//! ├── hard_state.json            # vote, committed, last purged
//! └── segments/
//!     ├── seg_00000000000000000001.log
//!     └── seg_00000000000000001001.log   # tail, open for appends
//! ```
//!
//! All entries are also kept in memory; the config log is small and
//! compacted by snapshots.

mod hard_state;
mod segments;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io;
use std::ops::RangeBounds;
use std::path::PathBuf;
use std::sync::Arc;

use openraft::storage::{LogFlushed, RaftLogStorage};
use openraft::{LogState, RaftLogReader, StorageIOError};
use tokio::sync::RwLock;

use crate::types::{ClusterEntry, ClusterLogId, ClusterStorageError, ClusterVote, TypeConfig};
use hard_state::HardState;
use segments::Segments;

/// Entries per segment file.
pub const SEGMENT_MAX_ENTRIES: usize = 1_000;

struct LogStoreInner {
    dir: PathBuf,
    logs: BTreeMap<u64, ClusterEntry>,
    hard_state: HardState,
    segments: Segments,
}

impl LogStoreInner {
    fn save_hard_state(&self) -> io::Result<()> {
        self.hard_state.store(&self.dir)
    }
}

/// Raft log storage handle. Clones share the same files.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<RwLock<LogStoreInner>>,
}

impl LogStore {
    /// Open the log in `dir`, loading everything already on disk.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        Self::with_segment_size(dir, SEGMENT_MAX_ENTRIES)
    }

    /// Like [`LogStore::open`] with a custom segment size.
    pub fn with_segment_size(dir: impl Into<PathBuf>, max_entries: usize) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let hard_state = HardState::load(&dir)?;
        let mut segments = Segments::open(dir.join("segments"), max_entries)?;
        let logs = segments.load(hard_state.last_purged.map(|id| id.index))?;

        tracing::debug!(
            dir = %dir.display(),
            entries = logs.len(),
            last_purged = ?hard_state.last_purged,
            "Opened raft log"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(LogStoreInner {
                dir,
                logs,
                hard_state,
                segments,
            })),
        })
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug>(
        &mut self,
        range: RB,
    ) -> Result<Vec<ClusterEntry>, ClusterStorageError> {
        let inner = self.inner.read().await;
        Ok(inner.logs.range(range).map(|(_, e)| e.clone()).collect())
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, ClusterStorageError> {
        let inner = self.inner.read().await;
        let last_purged_log_id = inner.hard_state.last_purged;
        let last_log_id = inner
            .logs
            .values()
            .next_back()
            .map(|e| e.log_id)
            .or(last_purged_log_id);
        Ok(LogState {
            last_purged_log_id,
            last_log_id,
        })
    }

    async fn save_committed(&mut self, committed: Option<ClusterLogId>) -> Result<(), ClusterStorageError> {
        let mut inner = self.inner.write().await;
        inner.hard_state.committed = committed;
        inner
            .save_hard_state()
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<ClusterLogId>, ClusterStorageError> {
        Ok(self.inner.read().await.hard_state.committed)
    }

    async fn save_vote(&mut self, vote: &ClusterVote) -> Result<(), ClusterStorageError> {
        let mut inner = self.inner.write().await;
        inner.hard_state.vote = Some(*vote);
        inner
            .save_hard_state()
            .map_err(|e| StorageIOError::write_vote(&e))?;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<ClusterVote>, ClusterStorageError> {
        Ok(self.inner.read().await.hard_state.vote)
    }

    async fn append<I>(&mut self, entries: I, callback: LogFlushed<TypeConfig>) -> Result<(), ClusterStorageError>
    where
        I: IntoIterator<Item = ClusterEntry>,
    {
        let mut inner = self.inner.write().await;
        let entries: Vec<ClusterEntry> = entries.into_iter().collect();
        inner
            .segments
            .append(&entries)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        for entry in entries {
            inner.logs.insert(entry.log_id.index, entry);
        }
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: ClusterLogId) -> Result<(), ClusterStorageError> {
        tracing::debug!(index = log_id.index, "Truncating raft log");
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;
        inner.logs.retain(|index, _| *index < log_id.index);
        inner
            .segments
            .truncate_from(log_id.index, &inner.logs)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn purge(&mut self, log_id: ClusterLogId) -> Result<(), ClusterStorageError> {
        tracing::debug!(index = log_id.index, "Purging raft log");
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;
        inner.hard_state.last_purged = Some(log_id);
        inner
            .save_hard_state()
            .map_err(|e| StorageIOError::write_logs(&e))?;
        inner.logs = inner.logs.split_off(&(log_id.index + 1));
        inner
            .segments
            .purge_through(log_id.index, &inner.logs)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}
