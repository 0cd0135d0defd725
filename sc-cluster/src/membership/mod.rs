//! SWIM-style gossip membership.
//!
//! Every node runs a [`MembershipService`]. It probes one random peer per
//! interval, asks relays for indirect probes when a direct probe fails, and
//! piggybacks membership rumors and durable events on every message. The
//! service also answers named queries, used during cluster bootstrap.

mod message;
mod runtime;
mod state;
mod transport;

pub use runtime::{QueryHandler, QueryResponse};
pub use state::{
    MemberSnapshot, MemberState, MembershipStats, MembershipUpdate, SwimState, UserEvent,
};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SwimConfig;
use crate::error::ClusterResult;
use crate::node::ClusterNode;
use parking_lot::Mutex;
use runtime::{SwimHandle, SwimRuntime};
use tokio::sync::broadcast;
use tracing::info;
use transport::GossipTransport;

/// A running gossip member.
pub struct MembershipService {
    state: Arc<SwimState>,
    runtime: Arc<SwimRuntime>,
    handle: Mutex<Option<SwimHandle>>,
}

impl MembershipService {
    /// Bind the gossip socket and start the background tasks.
    pub async fn start(
        local: ClusterNode,
        bind_addr: SocketAddr,
        config: SwimConfig,
    ) -> ClusterResult<Self> {
        let transport = GossipTransport::bind(bind_addr).await?;
        let bound = transport.local_addr()?;
        info!(node = %local.id, %bound, "Gossip listening");

        let state = Arc::new(SwimState::new(local, config));
        let (runtime, handle) = SwimRuntime::spawn(Arc::clone(&state), transport);
        Ok(Self {
            state,
            runtime,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The local member.
    pub fn local_node(&self) -> &ClusterNode {
        self.state.local_node()
    }

    /// The shared member table.
    pub fn state(&self) -> &Arc<SwimState> {
        &self.state
    }

    /// Address the gossip socket is bound to.
    pub fn local_addr(&self) -> ClusterResult<SocketAddr> {
        self.runtime.local_addr()
    }

    /// Contact `seeds` and merge their view of the cluster.
    ///
    /// Seeds equal to our own address are skipped. Succeeds with the number
    /// of seeds reached; fails only if none answered within `timeout`.
    pub async fn join(&self, seeds: &[SocketAddr], timeout: Duration) -> ClusterResult<usize> {
        let reached = self.runtime.join(seeds, timeout).await?;
        info!(reached, seeds = seeds.len(), "Joined gossip cluster");
        Ok(reached)
    }

    /// Currently alive members, including the local node.
    pub fn members(&self) -> Vec<ClusterNode> {
        let mut members = self.state.alive_nodes();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    /// Every tracked remote member regardless of state.
    pub fn snapshots(&self) -> Vec<MemberSnapshot> {
        self.state.snapshots()
    }

    /// Per-state counts of remote members.
    pub fn stats(&self) -> MembershipStats {
        self.state.stats()
    }

    /// Number of alive members, including the local node.
    pub fn alive_count(&self) -> usize {
        self.state.alive_nodes().len()
    }

    /// Ask every alive peer `name` and collect their answers.
    pub async fn query(
        &self,
        name: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> ClusterResult<Vec<QueryResponse>> {
        self.runtime.query(name, payload, timeout).await
    }

    /// Register the handler answering queries called `name`.
    pub fn set_query_handler<F>(&self, name: &str, handler: F)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.runtime.set_query_handler(name, Arc::new(handler));
    }

    /// Broadcast a durable event. Peers keep it and pass it on to members
    /// that join later.
    pub async fn emit_event(&self, name: &str, payload: Vec<u8>) -> ClusterResult<()> {
        let event = self.state.record_event(name, payload);
        info!(event = name, ltime = event.ltime, "Emitting cluster event");
        self.runtime.broadcast_all(Vec::new(), vec![event]).await
    }

    /// Whether an event with this name has been observed.
    pub fn has_event(&self, name: &str) -> bool {
        self.state.has_event(name)
    }

    /// Subscribe to member state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipUpdate> {
        self.state.subscribe()
    }

    /// Subscribe to newly observed events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<UserEvent> {
        self.state.subscribe_events()
    }

    /// Announce a graceful leave to every peer.
    pub async fn leave(&self) -> ClusterResult<()> {
        let update = self.state.mark_left();
        info!(node = %update.node.id, "Leaving gossip cluster");
        self.runtime.broadcast_all(vec![update], Vec::new()).await
    }

    /// Stop the background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.request_shutdown();
            handle.wait().await;
        }
    }
}

impl Drop for MembershipService {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().as_ref() {
            handle.request_shutdown();
        }
    }
}
