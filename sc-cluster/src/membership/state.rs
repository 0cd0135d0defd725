//! Local SWIM member table and durable event store.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::config::SwimConfig;
use crate::node::ClusterNode;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Liveness of a member as seen by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    /// Answering probes.
    Alive,
    /// Missed a probe; may still refute.
    Suspect,
    /// Suspicion timed out.
    Dead,
    /// Announced a graceful leave.
    Left,
}

impl MemberState {
    const fn is_probe_candidate(self) -> bool {
        matches!(self, Self::Alive | Self::Suspect)
    }

    // Rumors at equal incarnation resolve towards the later state.
    const fn precedence(self) -> u8 {
        match self {
            Self::Alive => 0,
            Self::Suspect => 1,
            Self::Dead => 2,
            Self::Left => 3,
        }
    }
}

/// Outcome of a direct or indirect probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The peer answered with its incarnation.
    Ack {
        /// Incarnation reported by the peer.
        incarnation: u64,
    },
    /// No answer within the ack timeout.
    Timeout,
}

/// Probe planned for the next tick.
#[derive(Debug, Clone)]
pub struct ProbePlan {
    /// Node probed directly.
    pub target: ClusterNode,
    /// Peers asked to probe indirectly if the direct probe fails.
    pub relays: Vec<ClusterNode>,
}

/// A membership state change, disseminated by gossip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipUpdate {
    /// Member the rumor is about.
    pub node: ClusterNode,
    /// Reported state.
    pub state: MemberState,
    /// Incarnation the state applies to.
    pub incarnation: u64,
}

/// A named fact broadcast once and retained by every member.
///
/// Members that join later receive retained events piggybacked on probe
/// traffic, so the fact is eventually observed cluster-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    /// Event name.
    pub name: String,
    /// Event body.
    pub payload: Vec<u8>,
    /// Lamport time of emission.
    pub ltime: u64,
}

/// Counts of tracked remote members per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipStats {
    /// Alive peers.
    pub alive: usize,
    /// Suspected peers.
    pub suspect: usize,
    /// Dead peers.
    pub dead: usize,
    /// Peers that left.
    pub left: usize,
}

impl MembershipStats {
    /// Total peers tracked locally.
    #[must_use]
    pub const fn total(self) -> usize {
        self.alive + self.suspect + self.dead + self.left
    }
}

/// Point-in-time view of a member.
#[derive(Debug, Clone)]
pub struct MemberSnapshot {
    /// Member identity.
    pub node: ClusterNode,
    /// Current state.
    pub state: MemberState,
    /// Last observed incarnation.
    pub incarnation: u64,
    /// When the state last changed.
    pub last_update: Instant,
}

struct MemberRecord {
    node: ClusterNode,
    state: MemberState,
    incarnation: u64,
    last_update: Instant,
    suspect_deadline: Option<Instant>,
}

impl MemberRecord {
    fn update(&self) -> MembershipUpdate {
        MembershipUpdate {
            node: self.node.clone(),
            state: self.state,
            incarnation: self.incarnation,
        }
    }
}

/// Member table owned by the gossip runtime.
pub struct SwimState {
    local: ClusterNode,
    members: DashMap<String, MemberRecord>,
    events: DashMap<String, UserEvent>,
    rng: Mutex<SmallRng>,
    config: SwimConfig,
    local_incarnation: AtomicU64,
    event_clock: AtomicU64,
    left: AtomicBool,
    updates_tx: broadcast::Sender<MembershipUpdate>,
    events_tx: broadcast::Sender<UserEvent>,
}

impl SwimState {
    /// Create an empty table for `local`.
    #[must_use]
    pub fn new(local: ClusterNode, config: SwimConfig) -> Self {
        let (updates_tx, _) = broadcast::channel(256);
        let (events_tx, _) = broadcast::channel(64);
        Self {
            local,
            members: DashMap::new(),
            events: DashMap::new(),
            rng: Mutex::new(SmallRng::from_entropy()),
            config,
            local_incarnation: AtomicU64::new(0),
            event_clock: AtomicU64::new(0),
            left: AtomicBool::new(false),
            updates_tx,
            events_tx,
        }
    }

    /// The local member.
    #[must_use]
    pub const fn local_node(&self) -> &ClusterNode {
        &self.local
    }

    /// Current incarnation of the local member.
    #[must_use]
    pub fn local_incarnation(&self) -> u64 {
        self.local_incarnation.load(Ordering::Acquire)
    }

    fn bump_local_incarnation(&self) -> u64 {
        self.local_incarnation.fetch_add(1, Ordering::AcqRel) + 1
    }

    // Outbid a rumor about ourselves. Peers may remember an incarnation
    // from before a restart, so counting up locally is not enough.
    fn refute_incarnation(&self, rumored: u64) -> u64 {
        let next = rumored.saturating_add(1);
        self.local_incarnation
            .fetch_max(next, Ordering::AcqRel)
            .max(next)
    }

    /// Gossip tuning in effect.
    #[must_use]
    pub const fn config(&self) -> &SwimConfig {
        &self.config
    }

    /// Whether the local member has announced a leave.
    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::Acquire)
    }

    /// Record direct contact with `node` (it sent us a message).
    pub fn observe_direct(&self, node: ClusterNode, incarnation: u64, now: Instant) {
        if node.id == self.local.id {
            return;
        }

        let mut changed = false;
        self.members
            .entry(node.id.clone())
            .and_modify(|record| {
                if record.state != MemberState::Alive || record.node != node {
                    record.state = MemberState::Alive;
                    record.node = node.clone();
                    record.last_update = now;
                    changed = true;
                }
                record.incarnation = record.incarnation.max(incarnation);
                record.suspect_deadline = None;
            })
            .or_insert_with(|| {
                changed = true;
                MemberRecord {
                    node: node.clone(),
                    state: MemberState::Alive,
                    incarnation,
                    last_update: now,
                    suspect_deadline: None,
                }
            });

        if changed {
            let incarnation = self
                .members
                .get(&node.id)
                .map_or(incarnation, |record| record.incarnation);
            self.publish_update(MembershipUpdate {
                node,
                state: MemberState::Alive,
                incarnation,
            });
        }
    }

    /// Pick the next probe target and its relays.
    pub fn choose_probe(&self) -> Option<ProbePlan> {
        let mut candidates: Vec<_> = self
            .members
            .iter()
            .filter(|entry| entry.value().state.is_probe_candidate())
            .map(|entry| entry.value().node.clone())
            .collect();

        let mut rng = self.rng.lock();
        candidates.shuffle(&mut *rng);
        let target = candidates.pop()?;

        let relays = candidates
            .into_iter()
            .take(self.config.indirect_probes)
            .collect();
        drop(rng);

        Some(ProbePlan { target, relays })
    }

    /// Apply a probe outcome. Returns the rumor if the member's state changed.
    pub fn record_probe_result(
        &self,
        node_id: &str,
        result: ProbeResult,
        now: Instant,
    ) -> Option<MembershipUpdate> {
        let update = {
            let mut entry = self.members.get_mut(node_id)?;
            let record = entry.value_mut();
            match result {
                ProbeResult::Ack { incarnation } => {
                    let changed = record.state != MemberState::Alive;
                    record.state = MemberState::Alive;
                    record.incarnation = record.incarnation.max(incarnation);
                    record.suspect_deadline = None;
                    if changed {
                        record.last_update = now;
                    }
                    changed.then(|| record.update())
                }
                ProbeResult::Timeout => match record.state {
                    MemberState::Alive => {
                        record.state = MemberState::Suspect;
                        record.last_update = now;
                        record.suspect_deadline = Some(now + self.config.suspicion_timeout);
                        Some(record.update())
                    }
                    MemberState::Suspect => {
                        let expired = record
                            .suspect_deadline
                            .is_some_and(|deadline| deadline <= now);
                        if expired {
                            record.state = MemberState::Dead;
                            record.last_update = now;
                            Some(record.update())
                        } else {
                            None
                        }
                    }
                    MemberState::Dead | MemberState::Left => None,
                },
            }
        };

        if let Some(update) = &update {
            self.publish_update(update.clone());
        }
        update
    }

    /// Declare suspects whose deadline passed as dead.
    pub fn reap_timeouts(&self, now: Instant) -> Vec<MembershipUpdate> {
        let mut rumors = Vec::new();
        for mut entry in self.members.iter_mut() {
            let record = entry.value_mut();
            let expired = record.state == MemberState::Suspect
                && record
                    .suspect_deadline
                    .is_some_and(|deadline| deadline <= now);
            if expired {
                record.state = MemberState::Dead;
                record.last_update = now;
                rumors.push(record.update());
            }
        }
        for rumor in &rumors {
            self.publish_update(rumor.clone());
        }
        rumors
    }

    /// Forget dead and departed members after the retention window.
    ///
    /// Returns the IDs dropped from the table.
    pub fn reap_departed(&self, now: Instant) -> Vec<String> {
        let retention = self.config.dead_retention;
        let mut reaped = Vec::new();
        self.members.retain(|id, record| {
            let departed = matches!(record.state, MemberState::Dead | MemberState::Left)
                && now.saturating_duration_since(record.last_update) >= retention;
            if departed {
                reaped.push(id.clone());
            }
            !departed
        });
        reaped
    }

    /// Rumors to piggyback on the next message: ourselves first, then the
    /// most recently changed members.
    pub fn collect_updates(&self) -> Vec<MembershipUpdate> {
        let mut recent: Vec<_> = self
            .members
            .iter()
            .map(|entry| (entry.value().last_update, entry.value().update()))
            .collect();
        recent.sort_unstable_by_key(|(last_update, _)| Reverse(*last_update));

        let local_state = if self.has_left() {
            MemberState::Left
        } else {
            MemberState::Alive
        };
        let mut rumors = Vec::with_capacity(self.config.gossip_batch + 1);
        rumors.push(MembershipUpdate {
            node: self.local.clone(),
            state: local_state,
            incarnation: self.local_incarnation(),
        });
        rumors.extend(
            recent
                .into_iter()
                .take(self.config.gossip_batch)
                .map(|(_, update)| update),
        );
        rumors
    }

    /// Merge rumors received from peers.
    pub fn apply_updates(&self, updates: impl IntoIterator<Item = MembershipUpdate>) {
        let now = Instant::now();
        for update in updates {
            if self.merge_member_state(&update, now) {
                self.publish_update(update);
            }
        }
    }

    fn merge_member_state(&self, update: &MembershipUpdate, now: Instant) -> bool {
        if update.node.id == self.local.id {
            // Refute suspicion about ourselves with a fresh incarnation.
            if update.state != MemberState::Alive
                && !self.has_left()
                && update.incarnation >= self.local_incarnation()
            {
                let incarnation = self.refute_incarnation(update.incarnation);
                tracing::debug!(incarnation, state = ?update.state, "Refuting rumor about local node");
            }
            return false;
        }

        // A departure of a member we never knew carries no information and
        // would resurrect records other members already reaped.
        let departed = matches!(update.state, MemberState::Dead | MemberState::Left);
        if departed && !self.members.contains_key(&update.node.id) {
            return false;
        }

        let mut changed = false;
        self.members
            .entry(update.node.id.clone())
            .and_modify(|record| {
                let supersedes = update.incarnation > record.incarnation
                    || (update.incarnation == record.incarnation
                        && update.state.precedence() > record.state.precedence());
                if supersedes {
                    record.node = update.node.clone();
                    record.incarnation = update.incarnation;
                    if record.state != update.state {
                        record.state = update.state;
                        record.last_update = now;
                        record.suspect_deadline = (update.state == MemberState::Suspect)
                            .then(|| now + self.config.suspicion_timeout);
                        changed = true;
                    }
                }
            })
            .or_insert_with(|| {
                changed = true;
                MemberRecord {
                    node: update.node.clone(),
                    state: update.state,
                    incarnation: update.incarnation,
                    last_update: now,
                    suspect_deadline: (update.state == MemberState::Suspect)
                        .then(|| now + self.config.suspicion_timeout),
                }
            });
        changed
    }

    /// Mark the local member as leaving and return the rumor announcing it.
    pub fn mark_left(&self) -> MembershipUpdate {
        self.left.store(true, Ordering::Release);
        MembershipUpdate {
            node: self.local.clone(),
            state: MemberState::Left,
            incarnation: self.bump_local_incarnation(),
        }
    }

    /// Alive members, including the local one unless it has left.
    pub fn alive_nodes(&self) -> Vec<ClusterNode> {
        let mut nodes = Vec::with_capacity(self.members.len() + 1);
        if !self.has_left() {
            nodes.push(self.local.clone());
        }
        nodes.extend(self.members.iter().filter_map(|entry| {
            (entry.value().state == MemberState::Alive).then(|| entry.value().node.clone())
        }));
        nodes
    }

    /// Random probe-eligible peers, for dissemination.
    pub fn random_members(&self, max: usize) -> Vec<ClusterNode> {
        let mut peers: Vec<_> = self
            .members
            .iter()
            .filter(|entry| entry.value().state.is_probe_candidate())
            .map(|entry| entry.value().node.clone())
            .collect();
        {
            let mut rng = self.rng.lock();
            peers.shuffle(&mut *rng);
        }
        peers.truncate(max);
        peers
    }

    /// Random 64-bit value from the gossip RNG.
    pub fn next_random(&self) -> u64 {
        use rand::Rng;
        self.rng.lock().r#gen()
    }

    /// Snapshot of every tracked remote member.
    pub fn snapshots(&self) -> Vec<MemberSnapshot> {
        self.members
            .iter()
            .map(|entry| {
                let record = entry.value();
                MemberSnapshot {
                    node: record.node.clone(),
                    state: record.state,
                    incarnation: record.incarnation,
                    last_update: record.last_update,
                }
            })
            .collect()
    }

    /// Number of tracked remote members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when no remote members are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Per-state counts of remote members.
    #[must_use]
    pub fn stats(&self) -> MembershipStats {
        let mut stats = MembershipStats::default();
        for entry in &self.members {
            match entry.value().state {
                MemberState::Alive => stats.alive += 1,
                MemberState::Suspect => stats.suspect += 1,
                MemberState::Dead => stats.dead += 1,
                MemberState::Left => stats.left += 1,
            }
        }
        stats
    }

    /// Subscribe to member state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipUpdate> {
        self.updates_tx.subscribe()
    }

    /// Subscribe to newly observed durable events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<UserEvent> {
        self.events_tx.subscribe()
    }

    fn publish_update(&self, update: MembershipUpdate) {
        let _ = self.updates_tx.send(update);
    }

    /// Record a locally emitted event.
    pub fn record_event(&self, name: &str, payload: Vec<u8>) -> UserEvent {
        let event = UserEvent {
            name: name.to_string(),
            payload,
            ltime: self.event_clock.fetch_add(1, Ordering::AcqRel) + 1,
        };
        self.events.insert(event.name.clone(), event.clone());
        let _ = self.events_tx.send(event.clone());
        event
    }

    /// Merge events from a peer, keeping the latest per name.
    pub fn merge_events(&self, events: impl IntoIterator<Item = UserEvent>) {
        for event in events {
            self.event_clock.fetch_max(event.ltime, Ordering::AcqRel);
            let is_new = self
                .events
                .get(&event.name)
                .is_none_or(|known| known.ltime < event.ltime);
            if is_new {
                tracing::debug!(event = %event.name, ltime = event.ltime, "Observed cluster event");
                self.events.insert(event.name.clone(), event.clone());
                let _ = self.events_tx.send(event);
            }
        }
    }

    /// Whether an event with this name has been observed.
    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    /// The most recent retained events, newest first.
    pub fn recent_events(&self, max: usize) -> Vec<UserEvent> {
        let mut events: Vec<_> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_unstable_by_key(|event| Reverse(event.ltime));
        events.truncate(max);
        events
    }
}
