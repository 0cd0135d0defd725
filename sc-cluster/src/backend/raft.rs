//! Consensus-backed config storage.

use std::sync::Arc;

use sc_core::Config;
use tokio::sync::watch;

use super::{BackendFuture, ConfigBackend};
use crate::command::{Command, CommandResponse};
use crate::raft::ConsensusLog;

/// Routes every change through the replicated log.
///
/// Reads come from the local state machine and may trail the leader.
pub struct RaftBackend {
    log: Arc<ConsensusLog>,
}

impl RaftBackend {
    /// Wrap a running consensus log.
    pub fn new(log: Arc<ConsensusLog>) -> Self {
        Self { log }
    }

    /// The underlying log.
    pub fn log(&self) -> &Arc<ConsensusLog> {
        &self.log
    }
}

impl ConfigBackend for RaftBackend {
    fn name(&self) -> &'static str {
        "raft"
    }

    fn execute(&self, command: Command) -> BackendFuture<'_, CommandResponse> {
        Box::pin(async move { self.log.propose(command).await })
    }

    fn config(&self) -> Arc<Config> {
        self.log.fsm().config()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.log.fsm().subscribe()
    }
}
