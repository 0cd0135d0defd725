//! Background gossip tasks: probing, receiving, reaping, queries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::message::GossipMessage;
use super::state::{MembershipUpdate, ProbeResult, SwimState, UserEvent};
use super::transport::GossipTransport;
use crate::error::{ClusterError, ClusterResult};
use crate::node::ClusterNode;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace, warn};

/// Events piggybacked per probe message.
const EVENTS_PER_MESSAGE: usize = 4;

/// Answers a named query with a response body.
pub type QueryHandler = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// One member's answer to a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    /// Responding member.
    pub from: ClusterNode,
    /// Response body.
    pub payload: Vec<u8>,
}

pub(crate) struct SwimRuntime {
    state: Arc<SwimState>,
    transport: Arc<GossipTransport>,
    pending: DashMap<String, oneshot::Sender<ProbeResult>>,
    queries: DashMap<u64, mpsc::UnboundedSender<QueryResponse>>,
    handlers: DashMap<String, QueryHandler>,
}

impl SwimRuntime {
    pub(crate) fn spawn(
        state: Arc<SwimState>,
        transport: GossipTransport,
    ) -> (Arc<Self>, SwimHandle) {
        let runtime = Arc::new(Self {
            state,
            transport: Arc::new(transport),
            pending: DashMap::new(),
            queries: DashMap::new(),
            handlers: DashMap::new(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(Self::probe_loop(Arc::clone(&runtime), shutdown_rx.clone())),
            tokio::spawn(Self::recv_loop(Arc::clone(&runtime), shutdown_rx.clone())),
            tokio::spawn(Self::timeout_loop(Arc::clone(&runtime), shutdown_rx)),
        ];

        (runtime, SwimHandle { shutdown_tx, tasks })
    }

    pub(crate) fn local_addr(&self) -> ClusterResult<SocketAddr> {
        self.transport.local_addr()
    }

    async fn probe_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.state.config().ping_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.run_probe_cycle().await {
                        warn!("probe cycle failed: {err}");
                    }
                }
            }
        }
    }

    async fn timeout_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.state.config().suspicion_timeout / 2);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let updates = self.state.reap_timeouts(Instant::now());
                    for update in &updates {
                        debug!(node = %update.node.id, "Member declared dead");
                    }
                    for id in self.state.reap_departed(Instant::now()) {
                        debug!(node = %id, "Forgot departed member");
                    }
                    if let Err(err) = self.broadcast(updates, Vec::new()).await {
                        warn!("timeout gossip failed: {err}");
                    }
                }
            }
        }
    }

    async fn recv_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.transport.recv() => {
                    match received {
                        Ok((message, _addr)) => {
                            if let Err(err) = self.handle_message(message).await {
                                warn!("failed to handle gossip message: {err}");
                            }
                        }
                        Err(err) => warn!("gossip recv error: {err}"),
                    }
                }
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, message: GossipMessage) -> ClusterResult<()> {
        match message {
            GossipMessage::Ping {
                from,
                incarnation,
                rumors,
                events,
            } => {
                trace!(peer = %from.id, "received ping");
                self.state
                    .observe_direct(from.clone(), incarnation, Instant::now());
                self.state.apply_updates(rumors);
                self.state.merge_events(events);
                self.send_ack(from.gossip_addr).await?;
            }
            GossipMessage::Ack {
                from,
                incarnation,
                rumors,
                events,
            } => {
                trace!(peer = %from.id, "received ack");
                self.state
                    .observe_direct(from.clone(), incarnation, Instant::now());
                self.state.apply_updates(rumors);
                self.state.merge_events(events);
                self.complete_probe(&from.id, ProbeResult::Ack { incarnation });
            }
            GossipMessage::PingReq {
                from,
                target,
                incarnation,
                rumors,
            } => {
                self.state
                    .observe_direct(from.clone(), incarnation, Instant::now());
                self.state.apply_updates(rumors);
                let runtime = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(err) = runtime.process_ping_req(from, target).await {
                        warn!("ping-req handling failed: {err}");
                    }
                });
            }
            GossipMessage::Gossip { rumors, events } => {
                self.state.apply_updates(rumors);
                self.state.merge_events(events);
            }
            GossipMessage::Query {
                id,
                name,
                from,
                payload,
            } => {
                let handler = self.handlers.get(&name).map(|h| Arc::clone(h.value()));
                match handler {
                    Some(handler) => {
                        let response = GossipMessage::QueryResponse {
                            id,
                            from: self.state.local_node().clone(),
                            payload: handler(&payload),
                        };
                        self.transport.send(&response, from.gossip_addr).await?;
                    }
                    None => trace!(query = %name, "no handler for query"),
                }
            }
            GossipMessage::QueryResponse { id, from, payload } => {
                if let Some(collector) = self.queries.get(&id) {
                    let _ = collector.send(QueryResponse { from, payload });
                }
            }
        }
        Ok(())
    }

    async fn process_ping_req(&self, requester: ClusterNode, target: ClusterNode) -> ClusterResult<()> {
        trace!(from = %requester.id, target = %target.id, "handling ping-req");
        if let Some(ProbeResult::Ack { incarnation }) = self.try_direct_probe(&target).await? {
            let message = GossipMessage::Ack {
                from: target,
                incarnation,
                rumors: self.state.collect_updates(),
                events: Vec::new(),
            };
            self.transport.send(&message, requester.gossip_addr).await?;
        }
        Ok(())
    }

    async fn run_probe_cycle(self: &Arc<Self>) -> ClusterResult<()> {
        if self.state.has_left() {
            return Ok(());
        }
        let Some(plan) = self.state.choose_probe() else {
            return Ok(());
        };
        trace!(target = %plan.target.id, "probing peer");

        if let Some(result) = self.try_direct_probe(&plan.target).await? {
            self.apply_probe_result(&plan.target.id, result);
            return Ok(());
        }

        if plan.relays.is_empty() {
            self.apply_probe_result(&plan.target.id, ProbeResult::Timeout);
            return Ok(());
        }

        let receiver = self.register_probe(&plan.target.id);
        for relay in &plan.relays {
            let message = GossipMessage::PingReq {
                from: self.state.local_node().clone(),
                target: plan.target.clone(),
                incarnation: self.state.local_incarnation(),
                rumors: self.state.collect_updates(),
            };
            self.transport.send(&message, relay.gossip_addr).await?;
        }

        let result = self
            .await_probe(&plan.target.id, receiver)
            .await
            .unwrap_or(ProbeResult::Timeout);
        self.apply_probe_result(&plan.target.id, result);
        Ok(())
    }

    async fn try_direct_probe(&self, target: &ClusterNode) -> ClusterResult<Option<ProbeResult>> {
        let receiver = self.register_probe(&target.id);
        self.send_ping(target.gossip_addr).await?;
        Ok(self.await_probe(&target.id, receiver).await)
    }

    fn apply_probe_result(self: &Arc<Self>, node_id: &str, result: ProbeResult) {
        if let Some(update) = self.state.record_probe_result(node_id, result, Instant::now()) {
            debug!(node = node_id, state = ?update.state, "membership state changed");
            let runtime = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(err) = runtime.broadcast(vec![update], Vec::new()).await {
                    warn!("failed to broadcast update: {err}");
                }
            });
        }
    }

    fn register_probe(&self, node_id: &str) -> oneshot::Receiver<ProbeResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(node_id.to_string(), tx);
        rx
    }

    async fn await_probe(
        &self,
        node_id: &str,
        receiver: oneshot::Receiver<ProbeResult>,
    ) -> Option<ProbeResult> {
        match time::timeout(self.state.config().ack_timeout, receiver).await {
            Ok(Ok(result)) => Some(result),
            _ => {
                self.pending.remove(node_id);
                None
            }
        }
    }

    fn complete_probe(&self, node_id: &str, result: ProbeResult) {
        if let Some((_, sender)) = self.pending.remove(node_id) {
            let _ = sender.send(result);
        }
    }

    async fn send_ping(&self, addr: SocketAddr) -> ClusterResult<()> {
        let message = GossipMessage::Ping {
            from: self.state.local_node().clone(),
            incarnation: self.state.local_incarnation(),
            rumors: self.state.collect_updates(),
            events: self.state.recent_events(EVENTS_PER_MESSAGE),
        };
        self.transport.send(&message, addr).await
    }

    async fn send_ack(&self, addr: SocketAddr) -> ClusterResult<()> {
        let message = GossipMessage::Ack {
            from: self.state.local_node().clone(),
            incarnation: self.state.local_incarnation(),
            rumors: self.state.collect_updates(),
            events: self.state.recent_events(EVENTS_PER_MESSAGE),
        };
        self.transport.send(&message, addr).await
    }

    /// Send rumors and events to a random subset of peers.
    async fn broadcast(&self, rumors: Vec<MembershipUpdate>, events: Vec<UserEvent>) -> ClusterResult<()> {
        if rumors.is_empty() && events.is_empty() {
            return Ok(());
        }
        let fanout = self.state.config().indirect_probes.max(3);
        let message = GossipMessage::Gossip { rumors, events };
        for peer in self.state.random_members(fanout) {
            self.transport.send(&message, peer.gossip_addr).await?;
        }
        Ok(())
    }

    /// Send rumors and events to every reachable peer.
    pub(crate) async fn broadcast_all(
        &self,
        rumors: Vec<MembershipUpdate>,
        events: Vec<UserEvent>,
    ) -> ClusterResult<()> {
        let message = GossipMessage::Gossip { rumors, events };
        for peer in self.state.random_members(usize::MAX) {
            if let Err(err) = self.transport.send(&message, peer.gossip_addr).await {
                warn!(peer = %peer.id, "gossip send failed: {err}");
            }
        }
        Ok(())
    }

    /// Ping seeds until at least one answers.
    ///
    /// Returns the number of seeds that answered. Once the first seed has
    /// answered the remaining ones get one more ping interval.
    pub(crate) async fn join(&self, seeds: &[SocketAddr], timeout: Duration) -> ClusterResult<usize> {
        let local_addr = self.state.local_node().gossip_addr;
        let seeds: Vec<SocketAddr> = seeds
            .iter()
            .copied()
            .filter(|addr| *addr != local_addr)
            .collect();
        if seeds.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let deadline = started + timeout;
        let mut grace_deadline: Option<Instant> = None;
        loop {
            let reached = self.reached_seeds(&seeds);
            if reached == seeds.len() {
                return Ok(reached);
            }
            let now = Instant::now();
            if reached > 0 {
                let grace = *grace_deadline.get_or_insert(now + self.state.config().ping_interval);
                if now >= grace {
                    return Ok(reached);
                }
            }
            if now >= deadline {
                if reached > 0 {
                    return Ok(reached);
                }
                return Err(ClusterError::JoinFailed(
                    seeds.iter().map(ToString::to_string).collect(),
                ));
            }

            for seed in &seeds {
                if let Err(err) = self.send_ping(*seed).await {
                    debug!(%seed, "join ping failed: {err}");
                }
            }
            time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn reached_seeds(&self, seeds: &[SocketAddr]) -> usize {
        let alive = self.state.alive_nodes();
        seeds
            .iter()
            .filter(|seed| alive.iter().any(|node| node.gossip_addr == **seed))
            .count()
    }

    pub(crate) fn set_query_handler(&self, name: &str, handler: QueryHandler) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Ask every alive peer and collect answers until all replied or
    /// `timeout` passed.
    pub(crate) async fn query(
        &self,
        name: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> ClusterResult<Vec<QueryResponse>> {
        let local_id = self.state.local_node().id.clone();
        let targets: Vec<ClusterNode> = self
            .state
            .alive_nodes()
            .into_iter()
            .filter(|node| node.id != local_id)
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let id = self.state.next_random();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.queries.insert(id, tx);

        let message = GossipMessage::Query {
            id,
            name: name.to_string(),
            from: self.state.local_node().clone(),
            payload,
        };
        for target in &targets {
            if let Err(err) = self.transport.send(&message, target.gossip_addr).await {
                warn!(peer = %target.id, query = name, "query send failed: {err}");
            }
        }

        let mut responses: Vec<QueryResponse> = Vec::with_capacity(targets.len());
        let deadline = time::Instant::now() + timeout;
        while responses.len() < targets.len() {
            match time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(response)) => {
                    if !responses.iter().any(|r| r.from.id == response.from.id) {
                        responses.push(response);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        self.queries.remove(&id);

        debug!(query = name, asked = targets.len(), answered = responses.len(), "Query finished");
        Ok(responses)
    }
}

/// Handle used to stop the background gossip tasks.
pub(crate) struct SwimHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SwimHandle {
    pub(crate) fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) async fn wait(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
