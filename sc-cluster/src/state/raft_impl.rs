//! OpenRaft state machine glue for [`ConfigFsm`].

use std::io::Cursor;
use std::sync::Arc;

use openraft::storage::RaftStateMachine;
use openraft::{EntryPayload, RaftSnapshotBuilder, RaftTypeConfig, StorageIOError, StoredMembership};

use super::fsm::ConfigFsm;
use super::snapshot_store::StoredSnapshot;
use crate::command::CommandResponse;
use crate::error::ClusterError;
use crate::types::{
    ClusterLogId, ClusterSnapshot, ClusterSnapshotMeta, ClusterStorageError,
    ClusterStoredMembership, TypeConfig,
};

fn to_snapshot(stored: StoredSnapshot) -> ClusterSnapshot {
    ClusterSnapshot {
        meta: stored.meta,
        snapshot: Box::new(Cursor::new(stored.data)),
    }
}

fn snapshot_write_error(meta: Option<&ClusterSnapshotMeta>, e: &ClusterError) -> ClusterStorageError {
    StorageIOError::write_snapshot(meta.map(|m| m.signature()), e).into()
}

impl RaftSnapshotBuilder<TypeConfig> for Arc<ConfigFsm> {
    async fn build_snapshot(&mut self) -> Result<ClusterSnapshot, ClusterStorageError> {
        let stored = ConfigFsm::build_snapshot(self).map_err(|e| snapshot_write_error(None, &e))?;
        tracing::info!(snapshot_id = %stored.meta.snapshot_id, "Built snapshot");
        Ok(to_snapshot(stored))
    }
}

impl RaftStateMachine<TypeConfig> for Arc<ConfigFsm> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<ClusterLogId>, ClusterStoredMembership), ClusterStorageError> {
        Ok(ConfigFsm::applied_state(self))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<CommandResponse>, ClusterStorageError>
    where
        I: IntoIterator<Item = openraft::Entry<TypeConfig>> + Send,
    {
        let mut responses = Vec::new();
        for entry in entries {
            let log_id = entry.log_id;
            match entry.payload {
                EntryPayload::Blank => {
                    self.mark_applied(log_id);
                    responses.push(CommandResponse {
                        index: log_id.index,
                        changed: false,
                    });
                }
                EntryPayload::Normal(command) => {
                    responses.push(self.apply_command(log_id, command));
                }
                EntryPayload::Membership(membership) => {
                    tracing::info!(index = log_id.index, %membership, "Applying membership change");
                    self.set_membership(log_id, StoredMembership::new(Some(log_id), membership));
                    responses.push(CommandResponse {
                        index: log_id.index,
                        changed: false,
                    });
                }
            }
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        Arc::clone(self)
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<<TypeConfig as RaftTypeConfig>::SnapshotData>, ClusterStorageError> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &ClusterSnapshotMeta,
        snapshot: Box<<TypeConfig as RaftTypeConfig>::SnapshotData>,
    ) -> Result<(), ClusterStorageError> {
        tracing::info!(
            snapshot_id = %meta.snapshot_id,
            snapshot_size = snapshot.get_ref().len(),
            "Installing snapshot from leader"
        );
        let stored = StoredSnapshot {
            meta: meta.clone(),
            data: snapshot.into_inner(),
        };
        ConfigFsm::install_snapshot(self, stored).map_err(|e| match e {
            ClusterError::SnapshotCorrupt { .. } => {
                StorageIOError::read_snapshot(Some(meta.signature()), &e).into()
            }
            other => snapshot_write_error(Some(meta), &other),
        })
    }

    async fn get_current_snapshot(&mut self) -> Result<Option<ClusterSnapshot>, ClusterStorageError> {
        Ok(self.current_snapshot().map(to_snapshot))
    }
}
