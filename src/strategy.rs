//! Random decision oracle consulted when a schedule pins nothing.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::schedule::ReplicaId;

/// Per-step decision source. Every draw a replay cannot satisfy from its
/// mimic comes from here, and the drawn value is recorded back into the
/// concrete trace so mutants can pin it.
pub trait Strategy {
    /// A message channel: `(from, to, max_messages)` with `from != to` and
    /// `1 <= max_messages <= max`.
    fn pick_node(&mut self) -> (ReplicaId, ReplicaId, usize);

    fn pick_bool(&mut self) -> bool;

    fn pick_int(&mut self) -> u64;
}

/// Uniform strategy over a seedable PRNG; one instance per iteration keeps
/// replays reproducible.
pub struct RandomStrategy {
    rng: StdRng,
    replicas: u64,
    max_messages: usize,
}

impl RandomStrategy {
    pub fn new(seed: u64, replicas: u64, max_messages: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            replicas,
            max_messages,
        }
    }
}

impl Strategy for RandomStrategy {
    fn pick_node(&mut self) -> (ReplicaId, ReplicaId, usize) {
        let from = self.rng.gen_range(1..=self.replicas);
        // Draw the target from the remaining ids so every ordered pair is
        // equally likely.
        let mut to = self.rng.gen_range(1..=self.replicas - 1);
        if to >= from {
            to += 1;
        }
        let max_messages = self.rng.gen_range(1..=self.max_messages);
        (from, to, max_messages)
    }

    fn pick_bool(&mut self) -> bool {
        self.rng.gen()
    }

    fn pick_int(&mut self) -> u64 {
        self.rng.gen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_node_respects_ranges() {
        let mut strategy = RandomStrategy::new(11, 4, 6);
        for _ in 0..500 {
            let (from, to, max_messages) = strategy.pick_node();
            assert!((1..=4).contains(&from));
            assert!((1..=4).contains(&to));
            assert_ne!(from, to);
            assert!((1..=6).contains(&max_messages));
        }
    }

    #[test]
    fn test_same_seed_replays_identically() {
        let mut a = RandomStrategy::new(42, 3, 5);
        let mut b = RandomStrategy::new(42, 3, 5);
        for _ in 0..100 {
            assert_eq!(a.pick_node(), b.pick_node());
            assert_eq!(a.pick_int(), b.pick_int());
            assert_eq!(a.pick_bool(), b.pick_bool());
        }
    }

    #[test]
    fn test_two_replica_cluster_always_picks_the_other() {
        let mut strategy = RandomStrategy::new(5, 2, 1);
        for _ in 0..50 {
            let (from, to, _) = strategy.pick_node();
            assert_eq!(to, if from == 1 { 2 } else { 1 });
        }
    }
}
