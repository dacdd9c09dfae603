//! Simulated Raft cluster driven by the fuzzer.
//!
//! Owns `N` raft-rs `RawNode` instances plus one FIFO queue per ordered
//! replica pair. No network calls are made: the fuzzer decides which queue
//! to drain at every step, so message interleaving is entirely under
//! schedule control. Crashed replicas keep their `MemStorage` (log, term,
//! vote survive); a restart rebuilds the `RawNode` on top of it.

use std::collections::{BTreeMap, HashMap, VecDeque};

use raft::eraftpb::{ConfState, Entry, EntryType, Message, MessageType, Snapshot};
use raft::storage::MemStorage;
use raft::{Config, RawNode, StateRole, NO_LIMIT};
use slog::o;
use tracing::{debug, warn};

use crate::config::ClusterConfig;
use crate::schedule::{Event, ReplicaId, TimeoutKind, CLIENT};

/// FIFO message queues, one per ordered `(from, to)` replica pair.
pub struct MessageQueues {
    queues: HashMap<(ReplicaId, ReplicaId), VecDeque<Message>>,
}

impl MessageQueues {
    pub fn new(replicas: u64) -> Self {
        let mut queues = HashMap::new();
        for from in 1..=replicas {
            for to in 1..=replicas {
                if from != to {
                    queues.insert((from, to), VecDeque::new());
                }
            }
        }
        Self { queues }
    }

    /// Routes a message into its pair queue. Returns false (and drops the
    /// message) when either endpoint is outside the cluster.
    pub fn enqueue(&mut self, msg: Message) -> bool {
        match self.queues.get_mut(&(msg.from, msg.to)) {
            Some(queue) => {
                queue.push_back(msg);
                true
            }
            None => false,
        }
    }

    /// Pops up to `max` messages from the `(from, to)` queue, oldest first.
    pub fn dequeue(&mut self, from: ReplicaId, to: ReplicaId, max: usize) -> Vec<Message> {
        let Some(queue) = self.queues.get_mut(&(from, to)) else {
            return Vec::new();
        };
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }

    pub fn pending(&self, from: ReplicaId, to: ReplicaId) -> usize {
        self.queues.get(&(from, to)).map_or(0, VecDeque::len)
    }

    pub fn reset(&mut self) {
        for queue in self.queues.values_mut() {
            queue.clear();
        }
    }
}

struct Replica {
    id: ReplicaId,
    raw: RawNode<MemStorage>,
    storage: MemStorage,
    crashed: bool,
    role: StateRole,
    committed: Vec<String>,
    commit_index: u64,
}

/// The simulated cluster: replicas, pair queues, and the event buffer the
/// current step has produced.
pub struct RaftEnvironment {
    config: ClusterConfig,
    replicas: BTreeMap<ReplicaId, Replica>,
    queues: MessageQueues,
    events: Vec<Event>,
}

impl RaftEnvironment {
    /// Creates all replicas with the full peer list and empty storage.
    pub fn new(config: ClusterConfig) -> Result<Self, raft::Error> {
        let voters: Vec<u64> = (1..=config.replicas).collect();
        let mut replicas = BTreeMap::new();
        for id in 1..=config.replicas {
            let conf_state = ConfState::from((voters.clone(), vec![]));
            let storage = MemStorage::new_with_conf_state(conf_state);
            let raw = Self::build_node(&config, id, storage.clone())?;
            replicas.insert(
                id,
                Replica {
                    id,
                    raw,
                    storage,
                    crashed: false,
                    role: StateRole::Follower,
                    committed: Vec::new(),
                    commit_index: 0,
                },
            );
        }
        Ok(Self {
            queues: MessageQueues::new(config.replicas),
            config,
            replicas,
            events: Vec::new(),
        })
    }

    fn build_node(
        config: &ClusterConfig,
        id: ReplicaId,
        storage: MemStorage,
    ) -> Result<RawNode<MemStorage>, raft::Error> {
        let raft_config = Config {
            id,
            election_tick: config.election_tick,
            heartbeat_tick: config.heartbeat_tick,
            max_size_per_msg: NO_LIMIT,
            max_inflight_msgs: 256,
            ..Default::default()
        };
        raft_config.validate()?;
        let logger = slog::Logger::root(slog::Discard, o!());
        let mut raw = RawNode::new(&raft_config, storage, &logger)?;
        raw.raft
            .set_randomized_election_timeout(Self::pinned_timeout(config, id));
        Ok(raw)
    }

    // The library jitters the election timeout from a thread RNG, and role
    // transitions re-draw it. Pinning a per-replica value (and re-pinning
    // after every tick batch and step) keeps replays of one schedule
    // reproducible. The value must stay inside the library's accepted
    // `[election_tick, 2 * election_tick)` window.
    fn pinned_timeout(config: &ClusterConfig, id: ReplicaId) -> usize {
        let election_tick = config.election_tick;
        election_tick + 1 + (id as usize - 1) % (election_tick - 1).max(1)
    }

    /// Advances logical time by `ticks_per_step` on every live replica and
    /// harvests all outbound messages. The caller routes each message into
    /// its pair queue via [`RaftEnvironment::enqueue`].
    pub fn tick(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        let mut events = Vec::new();
        for replica in self.replicas.values_mut() {
            if replica.crashed {
                continue;
            }
            for _ in 0..self.config.ticks_per_step {
                replica.raw.tick();
            }
            replica
                .raw
                .raft
                .set_randomized_election_timeout(Self::pinned_timeout(&self.config, replica.id));
            Self::observe_role(replica, &mut events);
            out.extend(Self::process_ready(replica, &mut events));
        }
        self.events.extend(events);
        out
    }

    /// Delivers one message to its target replica. Dropped silently when the
    /// target is crashed or unknown; follow-up messages are harvested on the
    /// next [`RaftEnvironment::tick`].
    pub fn step(&mut self, msg: Message) {
        let to = msg.to;
        let Some(replica) = self.replicas.get_mut(&to) else {
            return;
        };
        if replica.crashed {
            return;
        }
        if let Err(err) = replica.raw.step(msg) {
            debug!(node = to, %err, "replica rejected message");
        }
        replica
            .raw
            .raft
            .set_randomized_election_timeout(Self::pinned_timeout(&self.config, to));
        let mut events = Vec::new();
        Self::observe_role(replica, &mut events);
        self.events.extend(events);
    }

    /// Crashes a replica. Durable state is preserved. Returns false when the
    /// replica is unknown or already down.
    pub fn stop(&mut self, node: ReplicaId) -> bool {
        match self.replicas.get_mut(&node) {
            Some(replica) if !replica.crashed => {
                replica.crashed = true;
                true
            }
            _ => false,
        }
    }

    /// Restarts a crashed replica on top of its retained storage. Election
    /// and heartbeat timers start a fresh session; the applied log is rebuilt
    /// from the durable commit index.
    pub fn start(&mut self, node: ReplicaId) -> Result<bool, raft::Error> {
        let config = self.config.clone();
        let Some(replica) = self.replicas.get_mut(&node) else {
            return Ok(false);
        };
        if !replica.crashed {
            return Ok(false);
        }
        replica.raw = Self::build_node(&config, node, replica.storage.clone())?;
        replica.crashed = false;
        replica.role = StateRole::Follower;
        replica.committed.clear();
        replica.commit_index = 0;
        Ok(true)
    }

    /// Injects a client write carrying `request` as its payload, addressed
    /// to `target`. Followers forward the proposal once a leader is known.
    pub fn client_request(&mut self, target: ReplicaId, request: usize) {
        let mut entry = Entry::default();
        entry.set_data(request.to_string().into_bytes().into());
        let mut msg = Message::default();
        msg.set_msg_type(MessageType::MsgPropose);
        msg.from = CLIENT;
        msg.to = target;
        msg.entries = vec![entry].into();
        self.step(msg);
    }

    pub fn enqueue(&mut self, msg: Message) {
        if !self.queues.enqueue(msg) {
            debug!("dropped message addressed outside the cluster");
        }
    }

    pub fn dequeue(&mut self, from: ReplicaId, to: ReplicaId, max: usize) -> Vec<Message> {
        self.queues.dequeue(from, to, max)
    }

    pub fn pending(&self, from: ReplicaId, to: ReplicaId) -> usize {
        self.queues.pending(from, to)
    }

    /// Drains the protocol events observed since the last call.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Committed entry payloads per replica, in commit order.
    pub fn committed(&self) -> BTreeMap<ReplicaId, Vec<String>> {
        self.replicas
            .iter()
            .map(|(id, replica)| (*id, replica.committed.clone()))
            .collect()
    }

    pub fn contains(&self, node: ReplicaId) -> bool {
        self.replicas.contains_key(&node)
    }

    pub fn is_crashed(&self, node: ReplicaId) -> bool {
        self.replicas.get(&node).is_some_and(|r| r.crashed)
    }

    pub fn alive(&self) -> Vec<ReplicaId> {
        self.replicas
            .values()
            .filter(|r| !r.crashed)
            .map(|r| r.id)
            .collect()
    }

    pub fn down(&self) -> Vec<ReplicaId> {
        self.replicas
            .values()
            .filter(|r| r.crashed)
            .map(|r| r.id)
            .collect()
    }

    /// The live replica currently in the leader role, if any.
    pub fn leader(&self) -> Option<ReplicaId> {
        self.replicas
            .values()
            .find(|r| !r.crashed && r.raw.raft.state == StateRole::Leader)
            .map(|r| r.id)
    }

    /// Preferred target for a client write: the leader when one is known,
    /// otherwise the lowest-id live replica.
    pub fn request_target(&self) -> Option<ReplicaId> {
        self.leader().or_else(|| self.alive().first().copied())
    }

    fn observe_role(replica: &mut Replica, events: &mut Vec<Event>) {
        let role = replica.raw.raft.state;
        if role == replica.role {
            return;
        }
        match role {
            StateRole::Candidate | StateRole::PreCandidate => events.push(Event::Timeout {
                node: replica.id,
                kind: TimeoutKind::Election,
            }),
            StateRole::Leader => events.push(Event::BecomeLeader {
                node: replica.id,
                term: replica.raw.raft.term,
            }),
            StateRole::Follower => {}
        }
        replica.role = role;
    }

    // The canonical raft-rs ready loop: persist, apply, advance, harvest.
    fn process_ready(replica: &mut Replica, events: &mut Vec<Event>) -> Vec<Message> {
        if !replica.raw.has_ready() {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut ready = replica.raw.ready();
        out.extend(ready.take_messages());
        if ready.snapshot() != &Snapshot::default() {
            let snapshot = ready.snapshot().clone();
            if let Err(err) = replica.storage.wl().apply_snapshot(snapshot) {
                warn!(node = replica.id, %err, "apply snapshot failed");
            }
        }
        let committed = ready.take_committed_entries();
        Self::apply_committed(replica, committed, events);
        if !ready.entries().is_empty() {
            if let Err(err) = replica.storage.wl().append(ready.entries()) {
                warn!(node = replica.id, %err, "append entries failed");
            }
        }
        if let Some(hs) = ready.hs() {
            replica.storage.wl().set_hardstate(hs.clone());
        }
        out.extend(ready.take_persisted_messages());
        let mut light = replica.raw.advance(ready);
        if let Some(commit) = light.commit_index() {
            replica.storage.wl().mut_hard_state().set_commit(commit);
        }
        out.extend(light.take_messages());
        let committed = light.take_committed_entries();
        Self::apply_committed(replica, committed, events);
        replica.raw.advance_apply();
        if out
            .iter()
            .any(|m| m.get_msg_type() == MessageType::MsgHeartbeat)
        {
            events.push(Event::Timeout {
                node: replica.id,
                kind: TimeoutKind::Heartbeat,
            });
        }
        out
    }

    fn apply_committed(replica: &mut Replica, entries: Vec<Entry>, events: &mut Vec<Event>) {
        let mut last_index = None;
        for entry in entries {
            last_index = Some(entry.index);
            if entry.get_entry_type() != EntryType::EntryNormal || entry.get_data().is_empty() {
                continue;
            }
            replica
                .committed
                .push(String::from_utf8_lossy(entry.get_data()).into_owned());
        }
        if let Some(index) = last_index {
            if index > replica.commit_index {
                replica.commit_index = index;
                events.push(Event::AdvanceCommitIndex {
                    node: replica.id,
                    index,
                });
            }
        }
    }
}

/// Event describing a message leaving its sender's outbound buffer.
pub fn send_event(msg: &Message) -> Event {
    Event::SendMessage {
        from: msg.from,
        to: msg.to,
        msg_type: format!("{:?}", msg.get_msg_type()),
        term: msg.term,
        index: msg.index,
        entries: msg.entries.len(),
    }
}

/// Event describing a message handed to its target replica.
pub fn deliver_event(msg: &Message) -> Event {
    Event::DeliverMessage {
        from: msg.from,
        to: msg.to,
        msg_type: format!("{:?}", msg.get_msg_type()),
        term: msg.term,
        index: msg.index,
        entries: msg.entries.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: ReplicaId, to: ReplicaId, index: u64) -> Message {
        let mut msg = Message::default();
        msg.set_msg_type(MessageType::MsgAppend);
        msg.from = from;
        msg.to = to;
        msg.index = index;
        msg
    }

    #[test]
    fn test_queue_is_fifo_per_pair() {
        let mut queues = MessageQueues::new(3);
        for index in 0..4 {
            assert!(queues.enqueue(message(1, 2, index)));
        }
        queues.enqueue(message(2, 1, 99));

        let first = queues.dequeue(1, 2, 2);
        assert_eq!(
            first.iter().map(|m| m.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        let rest = queues.dequeue(1, 2, 10);
        assert_eq!(rest.iter().map(|m| m.index).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(queues.pending(1, 2), 0);
        assert_eq!(queues.pending(2, 1), 1);
    }

    #[test]
    fn test_queue_rejects_out_of_cluster_pairs() {
        let mut queues = MessageQueues::new(3);
        assert!(!queues.enqueue(message(1, 1, 0)));
        assert!(!queues.enqueue(message(0, 2, 0)));
        assert!(!queues.enqueue(message(1, 4, 0)));
    }

    #[test]
    fn test_queue_reset_clears_every_pair() {
        let mut queues = MessageQueues::new(2);
        queues.enqueue(message(1, 2, 0));
        queues.enqueue(message(2, 1, 0));
        queues.reset();
        assert_eq!(queues.pending(1, 2), 0);
        assert_eq!(queues.pending(2, 1), 0);
    }

    #[test]
    fn test_send_event_captures_message_shape() {
        let event = send_event(&message(2, 3, 7));
        match event {
            Event::SendMessage {
                from,
                to,
                msg_type,
                index,
                ..
            } => {
                assert_eq!((from, to, index), (2, 3, 7));
                assert_eq!(msg_type, "MsgAppend");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
