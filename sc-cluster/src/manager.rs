//! `ClusterManager`: the surface the rest of the platform talks to.
//!
//! Every mutating call turns into exactly one [`Command`](crate::Command)
//! on the configured [`ConfigBackend`]. Project-scoped edits read the
//! project from the local replica, change it and write it back whole with
//! `SetProject`. Writes from one manager are serialized so that two edits
//! of the same project cannot overwrite each other. Reads never leave the
//! node.

use std::sync::Arc;

use parking_lot::Mutex;
use sc_core::{
    Config, EventingRule, FileRule, FileStore, Project, Service, StaticRoute, TableRule,
};
use tokio::sync::{Mutex as AsyncMutex, watch};

use crate::backend::{ConfigBackend, RaftBackend};
use crate::command::CommandResponse;
use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::membership::MembershipService;
use crate::node::ClusterNode;
use crate::raft::{BootstrapOutcome, ConsensusLog, bootstrap_cluster, register_status_handler};
use crate::reconcile::ReconciliationLoop;
use crate::state::{ChangeCallback, ConfigFsm, SnapshotStore};
use crate::tokens::{TokenRange, assign_tokens};

struct Coordination {
    membership: Arc<MembershipService>,
    log: Arc<ConsensusLog>,
    reconciler: Mutex<Option<ReconciliationLoop>>,
}

/// Cluster-wide config access for one node.
pub struct ClusterManager {
    local: ClusterNode,
    max_tokens: u32,
    backend: Arc<dyn ConfigBackend>,
    coordination: Option<Coordination>,
    // Held from the read of a project until its rewrite has been applied.
    write_lock: AsyncMutex<()>,
}

impl ClusterManager {
    /// Start a clustered node.
    ///
    /// Restores the newest snapshot, starts gossip and Raft, joins the
    /// seeds, runs the bootstrap protocol and starts voter reconciliation.
    /// A corrupt snapshot or unreachable seeds abort startup.
    pub async fn start(config: ClusterConfig, on_change: ChangeCallback) -> ClusterResult<Self> {
        config.validate().map_err(ClusterError::Config)?;
        let local = config.local_node()?;

        let snapshots = SnapshotStore::open(config.snapshot_dir(), config.snapshot.retained_snapshots)?;
        let fsm = ConfigFsm::open(snapshots, Some(config.config_file()), on_change).map_err(|e| {
            tracing::error!(error = %e, "Refusing to start with unreadable state");
            e
        })?;

        let membership = Arc::new(
            MembershipService::start(local.clone(), config.gossip_bind_addr()?, config.swim.clone())
                .await?,
        );
        let log = Arc::new(ConsensusLog::start(&config, local.clone(), fsm).await?);
        register_status_handler(&membership, &log);

        let seeds = config.seed_addrs()?;
        if !seeds.is_empty() {
            if let Err(e) = membership.join(&seeds, config.bootstrap.join_timeout).await {
                tracing::error!(error = %e, "Could not join the cluster");
                membership.shutdown().await;
                let _ = log.shutdown().await;
                return Err(e);
            }
        }

        let outcome = bootstrap_cluster(&membership, &log, config.bootstrap.query_timeout).await?;
        if outcome == BootstrapOutcome::LostRace {
            tracing::debug!("Another node bootstrapped first");
        }

        let reconciler = ReconciliationLoop::spawn(
            Arc::clone(&membership),
            Arc::clone(&log),
            config.reconcile.clone(),
        );

        tracing::info!(node = %local.id, raft_id = local.raft_id(), ?outcome, "Cluster manager started");
        Ok(Self {
            local,
            max_tokens: config.max_tokens,
            backend: Arc::new(RaftBackend::new(Arc::clone(&log))),
            coordination: Some(Coordination {
                membership,
                log,
                reconciler: Mutex::new(Some(reconciler)),
            }),
            write_lock: AsyncMutex::new(()),
        })
    }

    /// Run against an arbitrary backend with no gossip or consensus.
    ///
    /// The node sees itself as the only member and as leader.
    pub fn with_backend(local: ClusterNode, backend: Arc<dyn ConfigBackend>, max_tokens: u32) -> Self {
        tracing::info!(node = %local.id, backend = backend.name(), "Cluster manager started");
        Self {
            local,
            max_tokens,
            backend,
            coordination: None,
            write_lock: AsyncMutex::new(()),
        }
    }

    /// The local node.
    pub fn local(&self) -> &ClusterNode {
        &self.local
    }

    /// The backend in use.
    pub fn backend(&self) -> &Arc<dyn ConfigBackend> {
        &self.backend
    }

    /// Gossip membership, when clustered.
    pub fn membership(&self) -> Option<&Arc<MembershipService>> {
        self.coordination.as_ref().map(|c| &c.membership)
    }

    /// The consensus log, when clustered.
    pub fn consensus(&self) -> Option<&Arc<ConsensusLog>> {
        self.coordination.as_ref().map(|c| &c.log)
    }

    // Writes

    /// Insert or replace a project.
    pub async fn set_project(&self, project: Project) -> ClusterResult<CommandResponse> {
        let _guard = self.write_lock.lock().await;
        self.backend.set_project(project).await
    }

    /// Remove a project. Removing an absent project succeeds.
    pub async fn delete_project(&self, id: &str) -> ClusterResult<CommandResponse> {
        let _guard = self.write_lock.lock().await;
        self.backend.delete_project(id.to_string()).await
    }

    /// Replace the operator static routes.
    pub async fn set_static_routes(&self, routes: Vec<StaticRoute>) -> ClusterResult<CommandResponse> {
        let _guard = self.write_lock.lock().await;
        self.backend.set_static_routes(routes).await
    }

    /// Upsert platform-registered routes by ID.
    pub async fn add_internal_routes(&self, routes: Vec<StaticRoute>) -> ClusterResult<CommandResponse> {
        let _guard = self.write_lock.lock().await;
        self.backend.add_internal_routes(routes).await
    }

    /// Add or replace an eventing rule.
    pub async fn set_eventing_rule(
        &self,
        project: &str,
        name: &str,
        rule: EventingRule,
    ) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| {
            p.set_eventing_rule(name, rule);
            Ok(())
        })
        .await
    }

    /// Delete an eventing rule.
    pub async fn delete_eventing_rule(&self, project: &str, name: &str) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| {
            p.delete_eventing_rule(name);
            Ok(())
        })
        .await
    }

    /// Point eventing at its event-log collection.
    pub async fn set_eventing_config(
        &self,
        project: &str,
        db_type: &str,
        col: &str,
        enabled: bool,
    ) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| {
            p.set_eventing_config(db_type, col, enabled);
            Ok(())
        })
        .await
    }

    /// Set the rules of one collection.
    pub async fn set_collection_rules(
        &self,
        project: &str,
        db_alias: &str,
        col: &str,
        rule: TableRule,
    ) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| Ok(p.set_collection_rules(db_alias, col, rule)?))
            .await
    }

    /// Delete a collection and its rules.
    pub async fn delete_collection_rules(
        &self,
        project: &str,
        db_alias: &str,
        col: &str,
    ) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| Ok(p.delete_collection(db_alias, col)?))
            .await
    }

    /// Add or update a database connection.
    pub async fn set_database_connection(
        &self,
        project: &str,
        db_alias: &str,
        conn: &str,
        enabled: bool,
    ) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| {
            p.set_database_connection(db_alias, conn, enabled);
            Ok(())
        })
        .await
    }

    /// Remove a database with all its collections.
    pub async fn remove_database_config(&self, project: &str, db_alias: &str) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| {
            p.remove_database_config(db_alias);
            Ok(())
        })
        .await
    }

    /// Replace the file-store settings, keeping its rules.
    pub async fn set_file_store(&self, project: &str, store: FileStore) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| {
            p.set_file_store(store);
            Ok(())
        })
        .await
    }

    /// Add or replace a file rule.
    pub async fn set_file_rule(&self, project: &str, rule: FileRule) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| {
            p.set_file_rule(rule);
            Ok(())
        })
        .await
    }

    /// Delete a file rule.
    pub async fn delete_file_rule(&self, project: &str, name: &str) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| {
            p.delete_file_rule(name);
            Ok(())
        })
        .await
    }

    /// Add or replace a remote service.
    pub async fn set_service(
        &self,
        project: &str,
        name: &str,
        service: Service,
    ) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| {
            p.set_service(name, service);
            Ok(())
        })
        .await
    }

    /// Delete a remote service.
    pub async fn delete_service(&self, project: &str, name: &str) -> ClusterResult<CommandResponse> {
        self.update_project(project, |p| {
            p.delete_service(name);
            Ok(())
        })
        .await
    }

    async fn update_project<F>(&self, id: &str, edit: F) -> ClusterResult<CommandResponse>
    where
        F: FnOnce(&mut Project) -> ClusterResult<()>,
    {
        let _guard = self.write_lock.lock().await;
        let mut project = self
            .backend
            .config()
            .project(id)
            .cloned()
            .ok_or_else(|| ClusterError::ProjectNotFound(id.to_string()))?;
        edit(&mut project)?;
        self.backend.set_project(project).await
    }

    // Reads

    /// This node's replica of the document.
    pub fn get_config(&self) -> Arc<Config> {
        self.backend.config()
    }

    /// One project from the local replica.
    pub fn get_project(&self, id: &str) -> Option<Project> {
        self.backend.config().project(id).cloned()
    }

    /// Watch the local replica.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.backend.subscribe()
    }

    /// The token range this node owns under the current membership.
    pub fn assigned_tokens(&self) -> Option<TokenRange> {
        let members = match self.membership() {
            Some(membership) => membership.members(),
            None => vec![self.local.clone()],
        };
        assign_tokens(members.iter().map(|m| m.id.as_str()), &self.local.id, self.max_tokens)
    }

    /// Members known to gossip in any state, plus this node.
    pub fn cluster_size(&self) -> usize {
        self.membership()
            .map_or(1, |membership| membership.stats().total() + 1)
    }

    /// Alive members including this node.
    pub fn alive_node_count(&self) -> usize {
        self.membership().map_or(1, |membership| membership.alive_count())
    }

    /// Whether this node leads the consensus group.
    pub fn is_leader(&self) -> bool {
        self.consensus().is_none_or(|log| log.is_leader())
    }

    // Lifecycle

    /// Announce departure to the gossip peers.
    pub async fn leave(&self) -> ClusterResult<()> {
        match self.membership() {
            Some(membership) => membership.leave().await,
            None => Ok(()),
        }
    }

    /// Stop reconciliation, Raft and gossip.
    pub async fn shutdown(&self) -> ClusterResult<()> {
        let Some(coordination) = self.coordination.as_ref() else {
            return Ok(());
        };
        let reconciler = coordination.reconciler.lock().take();
        if let Some(reconciler) = reconciler {
            reconciler.shutdown().await;
        }
        let result = coordination.log.shutdown().await;
        coordination.membership.shutdown().await;
        tracing::info!(node = %self.local.id, "Cluster manager stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendFuture, MemoryBackend};
    use crate::command::Command;
    use sc_core::Rule;
    use std::collections::BTreeMap;

    /// Gives other tasks a chance to run before every write lands.
    struct YieldingBackend(MemoryBackend);

    impl ConfigBackend for YieldingBackend {
        fn name(&self) -> &'static str {
            "yielding"
        }

        fn execute(&self, command: Command) -> BackendFuture<'_, CommandResponse> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                self.0.execute(command).await
            })
        }

        fn config(&self) -> Arc<Config> {
            self.0.config()
        }

        fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
            self.0.subscribe()
        }
    }

    fn manager() -> ClusterManager {
        let local = ClusterNode::new("127.0.0.1:4235", "127.0.0.1:4234".parse().unwrap(), "127.0.0.1:4235");
        let backend = Arc::new(MemoryBackend::new(Config::default(), Arc::new(|_| {})));
        ClusterManager::with_backend(local, backend, 100)
    }

    #[tokio::test]
    async fn test_project_edits_need_existing_project() {
        let manager = manager();
        let err = manager
            .set_eventing_rule("ghost", "on-insert", EventingRule::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::ProjectNotFound(id) if id == "ghost"));
        assert!(manager.get_config().projects.is_empty());
    }

    #[tokio::test]
    async fn test_project_edits_rewrite_whole_project() {
        let manager = manager();
        manager.set_project(Project::new("todo")).await.unwrap();
        manager
            .set_database_connection("todo", "db", "postgres://localhost", true)
            .await
            .unwrap();

        let mut rules = BTreeMap::new();
        rules.insert(
            "read".to_string(),
            Rule {
                rule: "allow".to_string(),
                ..Default::default()
            },
        );
        manager
            .set_collection_rules(
                "todo",
                "db",
                "items",
                TableRule {
                    rules,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        manager
            .set_eventing_rule("todo", "notify", EventingRule::default())
            .await
            .unwrap();

        let project = manager.get_project("todo").unwrap();
        assert_eq!(project.modules.crud["db"].conn, "postgres://localhost");
        assert!(project.modules.crud["db"].collections["items"].rules.contains_key("read"));
        assert!(project.modules.eventing.rules.contains_key("notify"));

        manager.delete_collection_rules("todo", "db", "items").await.unwrap();
        manager.remove_database_config("todo", "db").await.unwrap();
        assert!(manager.get_project("todo").unwrap().modules.crud.is_empty());
    }

    #[tokio::test]
    async fn test_collection_rules_need_database() {
        let manager = manager();
        manager.set_project(Project::new("todo")).await.unwrap();
        let err = manager
            .set_collection_rules("todo", "missing", "items", TableRule::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Core(_)));
    }

    #[tokio::test]
    async fn test_concurrent_edits_of_one_project_both_land() {
        let local = ClusterNode::new("127.0.0.1:4235", "127.0.0.1:4234".parse().unwrap(), "127.0.0.1:4235");
        let backend = YieldingBackend(MemoryBackend::new(Config::default(), Arc::new(|_| {})));
        let manager = ClusterManager::with_backend(local, Arc::new(backend), 100);
        manager.set_project(Project::new("todo")).await.unwrap();

        let (rule, service) = tokio::join!(
            manager.set_eventing_rule("todo", "notify", EventingRule::default()),
            manager.set_service("todo", "billing", Service::default()),
        );
        rule.unwrap();
        service.unwrap();

        let project = manager.get_project("todo").unwrap();
        assert!(project.modules.eventing.rules.contains_key("notify"));
        assert!(project.modules.services.unwrap().services.contains_key("billing"));
    }

    #[tokio::test]
    async fn test_standalone_reads() {
        let manager = manager();
        assert!(manager.is_leader());
        assert_eq!(manager.cluster_size(), 1);
        assert_eq!(manager.alive_node_count(), 1);
        assert_eq!(
            manager.assigned_tokens(),
            Some(TokenRange { start: 0, end: 99 })
        );
        manager.delete_project("absent").await.unwrap();
        manager.shutdown().await.unwrap();
    }
}
