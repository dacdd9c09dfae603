//! Coverage-guided schedule fuzzing for a simulated Raft cluster.
//!
//! The engine replays schedules (sequences of message-delivery, crash,
//! restart, and client-request choices) against an in-process cluster of
//! raft-rs nodes, scores each run with a pluggable coverage oracle (TLC
//! model states, canonical event traces, or SUT line coverage), and mutates
//! high-novelty schedules to push deeper into the protocol's state space.

pub mod checker;
pub mod compare;
pub mod config;
pub mod environment;
pub mod errors;
pub mod fuzzer;
pub mod guider;
pub mod mutator;
pub mod schedule;
pub mod strategy;
pub mod tlc;

pub use config::{ClusterConfig, FuzzConfig};
pub use errors::FuzzError;
pub use fuzzer::{Fuzzer, IterationRun, Stats};
pub use schedule::{Choice, Event, Schedule, State};
