//! Scheduling choices, recorded events, and their wire representations.
//!
//! A [`Schedule`] is the unit the corpus stores and the mutators rework: an
//! ordered sequence of tagged [`Choice`] values. An iteration consumes it
//! positionally (message-channel and random-draw choices through FIFO
//! cursors, crash/restart/client-request choices indexed by step) and emits
//! an [`Event`] trace, which is what the TLC-backed guiders inspect.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Identifier of one simulated replica. Replicas are numbered `1..=N`.
pub type ReplicaId = u64;

/// Reserved sender id for synthesized client proposals.
pub const CLIENT: ReplicaId = 0;

/// One scheduling decision inside a [`Schedule`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Choice {
    /// Deliver up to `max_messages` pending messages from `from` to `to`.
    Node {
        from: ReplicaId,
        to: ReplicaId,
        max_messages: usize,
    },
    /// Pins one boolean drawn by the strategy during replay.
    RandomBoolean { value: bool },
    /// Pins one integer drawn by the strategy during replay.
    RandomInteger { value: u64 },
    /// Restart `node` at logical step `step`.
    StartNode { step: usize, node: ReplicaId },
    /// Crash `node` at logical step `step`.
    StopNode { step: usize, node: ReplicaId },
    /// Inject a client write carrying sequence number `request` at `step`.
    ClientRequest { step: usize, request: usize },
}

/// An ordered sequence of scheduling choices driving one iteration.
pub type Schedule = Vec<Choice>;

/// Kind of replica timer that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutKind {
    Election,
    Heartbeat,
}

/// One observable protocol event recorded during replay.
///
/// The serialized form keeps the discriminator explicit (`name`) so the TLC
/// mapper can dispatch on it without peeking at payload fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum Event {
    /// Sentinel appended before a trace is submitted to TLC.
    Reset,
    /// Membership extension, reserved for future cluster reconfiguration.
    AddNode { step: usize, node: ReplicaId },
    /// Membership removal, reserved for future cluster reconfiguration.
    RemoveNode { step: usize, node: ReplicaId },
    SendMessage {
        from: ReplicaId,
        to: ReplicaId,
        #[serde(rename = "type")]
        msg_type: String,
        term: u64,
        index: u64,
        entries: usize,
    },
    DeliverMessage {
        from: ReplicaId,
        to: ReplicaId,
        #[serde(rename = "type")]
        msg_type: String,
        term: u64,
        index: u64,
        entries: usize,
    },
    ClientRequest { request: usize, node: ReplicaId },
    Timeout { node: ReplicaId, kind: TimeoutKind },
    BecomeLeader { node: ReplicaId, term: u64 },
    AdvanceCommitIndex { node: ReplicaId, index: u64 },
}

impl Event {
    /// Canonical signature used for trace-coverage hashing.
    ///
    /// `Reset` sentinels are dropped and message events are normalized down
    /// to the fields the model distinguishes, so payload-level noise (log
    /// indexes, batch sizes) collapses to the same signature.
    pub fn signature(&self) -> Option<String> {
        match self {
            Event::Reset => None,
            Event::AddNode { step, node } => Some(format!("Add({step},{node})")),
            Event::RemoveNode { step, node } => Some(format!("Remove({step},{node})")),
            Event::SendMessage {
                from,
                to,
                msg_type,
                term,
                ..
            } => Some(format!("Send({from},{to},{msg_type},{term})")),
            Event::DeliverMessage {
                from,
                to,
                msg_type,
                term,
                ..
            } => Some(format!("Deliver({from},{to},{msg_type},{term})")),
            Event::ClientRequest { request, node } => Some(format!("Request({request},{node})")),
            Event::Timeout { node, kind } => Some(format!("Timeout({node},{kind:?})")),
            Event::BecomeLeader { node, term } => Some(format!("Leader({node},{term})")),
            Event::AdvanceCommitIndex { node, index } => Some(format!("Commit({node},{index})")),
        }
    }
}

/// One model-checker state: an opaque representation plus its equality key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub repr: String,
    pub key: String,
}

/// Canonical hash of an event trace, used by the trace-coverage guider.
pub fn trace_hash(events: &[Event]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for sig in events.iter().filter_map(Event::signature) {
        sig.hash(&mut hasher);
    }
    hasher.finish()
}
