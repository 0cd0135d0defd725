//! The replicated config state machine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use sc_core::Config;
use tokio::sync::watch;

use super::snapshot_store::{SnapshotStore, StoredSnapshot};
use crate::command::{Command, CommandResponse};
use crate::error::{ClusterError, ClusterResult};
use crate::types::{ClusterLogId, ClusterSnapshotMeta, ClusterStoredMembership};

/// Invoked with the new document after every committed change.
pub type ChangeCallback = Arc<dyn Fn(&Config) + Send + Sync>;

#[derive(Debug, Default)]
struct Applied {
    config: Arc<Config>,
    last_applied: Option<ClusterLogId>,
    last_membership: ClusterStoredMembership,
}

/// Owns the authoritative [`Config`] replica of this node.
///
/// The document is only replaced by applying committed commands or by
/// installing a snapshot. Each replacement is written to the mirror file,
/// published to watchers and handed to the change callback.
pub struct ConfigFsm {
    applied: RwLock<Applied>,
    snapshots: SnapshotStore,
    current_snapshot: RwLock<Option<StoredSnapshot>>,
    snapshot_idx: AtomicU64,
    mirror_path: Option<PathBuf>,
    on_change: ChangeCallback,
    config_tx: watch::Sender<Arc<Config>>,
}

impl std::fmt::Debug for ConfigFsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let applied = self.applied.read();
        f.debug_struct("ConfigFsm")
            .field("last_applied", &applied.last_applied)
            .field("projects", &applied.config.projects.len())
            .field("mirror_path", &self.mirror_path)
            .finish()
    }
}

impl ConfigFsm {
    /// Open the state machine, restoring the newest snapshot in `snapshots`.
    ///
    /// Fails with [`ClusterError::SnapshotCorrupt`] if that snapshot cannot
    /// be decoded.
    pub fn open(
        snapshots: SnapshotStore,
        mirror_path: Option<PathBuf>,
        on_change: ChangeCallback,
    ) -> ClusterResult<Arc<Self>> {
        let restored = snapshots.load_latest()?;
        let (config_tx, _) = watch::channel(Arc::new(Config::default()));

        let fsm = Arc::new(Self {
            applied: RwLock::new(Applied::default()),
            snapshots,
            current_snapshot: RwLock::new(None),
            snapshot_idx: AtomicU64::new(0),
            mirror_path,
            on_change,
            config_tx,
        });

        if let Some(snapshot) = restored {
            let config = decode_config(&snapshot).map_err(|reason| ClusterError::SnapshotCorrupt {
                path: fsm.snapshots.directory().display().to_string(),
                reason,
            })?;
            let config = Arc::new(config);
            {
                let mut applied = fsm.applied.write();
                applied.config = Arc::clone(&config);
                applied.last_applied = snapshot.meta.last_log_id;
                applied.last_membership = snapshot.meta.last_membership.clone();
            }
            tracing::info!(
                index = snapshot.meta.last_log_id.map_or(0, |id| id.index),
                projects = config.projects.len(),
                "Restored config from snapshot"
            );
            *fsm.current_snapshot.write() = Some(snapshot);

            if config.projects.is_empty() {
                fsm.config_tx.send_replace(config);
            } else {
                fsm.publish(&config);
            }
        }

        Ok(fsm)
    }

    /// The current local replica.
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.applied.read().config)
    }

    /// Log id of the last applied entry.
    pub fn last_applied(&self) -> Option<ClusterLogId> {
        self.applied.read().last_applied
    }

    /// Index of the last applied entry, 0 before anything was applied.
    pub fn last_applied_index(&self) -> u64 {
        self.last_applied().map_or(0, |id| id.index)
    }

    /// Watch the document. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.config_tx.subscribe()
    }

    pub(crate) fn applied_state(&self) -> (Option<ClusterLogId>, ClusterStoredMembership) {
        let applied = self.applied.read();
        (applied.last_applied, applied.last_membership.clone())
    }

    /// Apply one committed command.
    ///
    /// The change callback fires for every command, including ones that
    /// left the document as it was.
    pub(crate) fn apply_command(&self, log_id: ClusterLogId, command: Command) -> CommandResponse {
        tracing::debug!(index = log_id.index, command = command.name(), "Applying command");

        let mut next = Config::clone(&self.config());
        let changed = command.apply_to(&mut next);
        let next = Arc::new(next);
        {
            let mut applied = self.applied.write();
            applied.last_applied = Some(log_id);
            applied.config = Arc::clone(&next);
        }

        self.publish(&next);
        CommandResponse {
            index: log_id.index,
            changed,
        }
    }

    /// Record a log entry that does not touch the document.
    pub(crate) fn mark_applied(&self, log_id: ClusterLogId) {
        self.applied.write().last_applied = Some(log_id);
    }

    pub(crate) fn set_membership(&self, log_id: ClusterLogId, membership: ClusterStoredMembership) {
        let mut applied = self.applied.write();
        applied.last_applied = Some(log_id);
        applied.last_membership = membership;
    }

    /// Serialize the current document and persist it as the newest snapshot.
    pub(crate) fn build_snapshot(&self) -> ClusterResult<StoredSnapshot> {
        let (config, last_applied, last_membership) = {
            let applied = self.applied.read();
            (
                Arc::clone(&applied.config),
                applied.last_applied,
                applied.last_membership.clone(),
            )
        };
        let data = serde_json::to_vec(&*config)?;

        let snapshot_idx = self.snapshot_idx.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot_id = match last_applied {
            Some(last) => format!("{}-{}-{}", last.leader_id, last.index, snapshot_idx),
            None => format!("--{}", snapshot_idx),
        };
        let snapshot = StoredSnapshot {
            meta: ClusterSnapshotMeta {
                last_log_id: last_applied,
                last_membership,
                snapshot_id,
            },
            data,
        };

        self.snapshots.save(&snapshot)?;
        *self.current_snapshot.write() = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Replace the document wholesale from a snapshot received from the leader.
    pub(crate) fn install_snapshot(&self, snapshot: StoredSnapshot) -> ClusterResult<()> {
        let config = decode_config(&snapshot).map_err(|reason| ClusterError::SnapshotCorrupt {
            path: snapshot.meta.snapshot_id.clone(),
            reason,
        })?;
        self.snapshots.save(&snapshot)?;

        let config = Arc::new(config);
        {
            let mut applied = self.applied.write();
            applied.config = Arc::clone(&config);
            applied.last_applied = snapshot.meta.last_log_id;
            applied.last_membership = snapshot.meta.last_membership.clone();
        }
        tracing::info!(
            snapshot_id = %snapshot.meta.snapshot_id,
            projects = config.projects.len(),
            "Installed snapshot"
        );
        *self.current_snapshot.write() = Some(snapshot);

        self.publish(&config);
        Ok(())
    }

    pub(crate) fn current_snapshot(&self) -> Option<StoredSnapshot> {
        self.current_snapshot.read().clone()
    }

    fn publish(&self, config: &Arc<Config>) {
        if let Some(path) = &self.mirror_path {
            if let Err(e) = sc_core::store_config(config, path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write config mirror");
            }
        }
        self.config_tx.send_replace(Arc::clone(config));
        (self.on_change)(config);
    }
}

fn decode_config(snapshot: &StoredSnapshot) -> Result<Config, String> {
    serde_json::from_slice(&snapshot.data).map_err(|e| format!("invalid config: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::CommittedLeaderId;
    use parking_lot::Mutex;
    use sc_core::{Project, StaticRoute};
    use tempfile::TempDir;

    fn log_id(index: u64) -> ClusterLogId {
        ClusterLogId::new(CommittedLeaderId::new(1, 0), index)
    }

    fn recording() -> (ChangeCallback, Arc<Mutex<Vec<Config>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ChangeCallback = Arc::new(move |config: &Config| {
            sink.lock().push(config.clone());
        });
        (callback, seen)
    }

    fn open_fsm(dir: &TempDir, callback: ChangeCallback) -> Arc<ConfigFsm> {
        let store = SnapshotStore::open(dir.path().join("snapshots"), 2).unwrap();
        ConfigFsm::open(store, Some(dir.path().join("config.yaml")), callback).unwrap()
    }

    #[test]
    fn apply_updates_config_mirror_and_callback() {
        let dir = TempDir::new().unwrap();
        let (callback, seen) = recording();
        let fsm = open_fsm(&dir, callback);

        let response = fsm.apply_command(log_id(1), Command::SetProject(Project::new("p1")));
        assert_eq!(response, CommandResponse { index: 1, changed: true });
        assert_eq!(fsm.config().projects.len(), 1);
        assert_eq!(fsm.last_applied_index(), 1);
        assert_eq!(seen.lock().len(), 1);

        let mirrored = sc_core::load_config(dir.path().join("config.yaml")).unwrap();
        assert_eq!(mirrored, *fsm.config());
    }

    #[test]
    fn deleting_absent_project_is_silent() {
        let dir = TempDir::new().unwrap();
        let (callback, seen) = recording();
        let fsm = open_fsm(&dir, callback);

        let response = fsm.apply_command(log_id(1), Command::DeleteProject { id: "nope".into() });
        assert!(!response.changed);
        assert_eq!(fsm.last_applied_index(), 1);
        assert_eq!(*fsm.config(), Config::default());
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn static_routes_are_replaced() {
        let dir = TempDir::new().unwrap();
        let (callback, _) = recording();
        let fsm = open_fsm(&dir, callback);
        let route = |id: &str| StaticRoute {
            id: id.into(),
            ..Default::default()
        };

        fsm.apply_command(log_id(1), Command::SetStaticRoutes(vec![route("a"), route("b")]));
        fsm.apply_command(log_id(2), Command::SetStaticRoutes(vec![route("c")]));
        let routes = &fsm.config().static_config.routes;
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id, "c");
    }

    #[test]
    fn snapshot_restores_on_reopen() {
        let dir = TempDir::new().unwrap();
        let (callback, _) = recording();
        let fsm = open_fsm(&dir, callback);
        fsm.apply_command(log_id(1), Command::SetProject(Project::new("p1")));
        fsm.apply_command(log_id(2), Command::SetProject(Project::new("p2")));
        fsm.build_snapshot().unwrap();
        let expected = fsm.config();
        drop(fsm);

        let (callback, seen) = recording();
        let reopened = open_fsm(&dir, callback);
        assert_eq!(reopened.config(), expected);
        assert_eq!(reopened.last_applied_index(), 2);
        // Restored projects are announced once at startup.
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn corrupt_snapshot_refuses_to_open() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path().join("snapshots"), 2).unwrap();
        store
            .save(&StoredSnapshot {
                meta: ClusterSnapshotMeta {
                    last_log_id: Some(log_id(3)),
                    last_membership: Default::default(),
                    snapshot_id: "bad".into(),
                },
                data: b"{not json".to_vec(),
            })
            .unwrap();

        let (callback, _) = recording();
        let err = ConfigFsm::open(store, None, callback).unwrap_err();
        assert!(matches!(err, ClusterError::SnapshotCorrupt { .. }));
    }

    #[test]
    fn mirror_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let store = SnapshotStore::open(dir.path().join("snapshots"), 2).unwrap();
        let (callback, seen) = recording();
        let fsm = ConfigFsm::open(store, Some(blocker.join("config.yaml")), callback).unwrap();

        fsm.apply_command(log_id(1), Command::SetProject(Project::new("p1")));
        assert_eq!(fsm.config().projects.len(), 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn installed_snapshot_replaces_config() {
        let dir = TempDir::new().unwrap();
        let (callback, seen) = recording();
        let fsm = open_fsm(&dir, callback);
        fsm.apply_command(log_id(1), Command::SetProject(Project::new("old")));

        let mut incoming = Config::default();
        incoming.upsert_project(Project::new("new"));
        fsm.install_snapshot(StoredSnapshot {
            meta: ClusterSnapshotMeta {
                last_log_id: Some(log_id(10)),
                last_membership: Default::default(),
                snapshot_id: "leader-10".into(),
            },
            data: serde_json::to_vec(&incoming).unwrap(),
        })
        .unwrap();

        assert_eq!(*fsm.config(), incoming);
        assert_eq!(fsm.last_applied_index(), 10);
        assert_eq!(seen.lock().len(), 2);
    }
}
