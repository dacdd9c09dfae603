//! Mutation operators over schedules.
//!
//! Every operator works on a deep copy of the input and returns `None` when
//! the schedule has nothing it can rework; the fuzzer just discards those.

use rand::{Rng, RngCore};

use crate::schedule::{Choice, Event, ReplicaId, Schedule};

pub trait Mutator: Send {
    fn name(&self) -> &'static str;

    /// Produces one candidate schedule derived from `trace`, or `None` when
    /// the input offers no applicable material.
    fn mutate(&self, trace: &Schedule, events: &[Event], rng: &mut dyn RngCore)
        -> Option<Schedule>;
}

fn positions_of(trace: &Schedule, matches: impl Fn(&Choice) -> bool) -> Vec<usize> {
    trace
        .iter()
        .enumerate()
        .filter(|(_, choice)| matches(choice))
        .map(|(index, _)| index)
        .collect()
}

/// Permutes message-channel choices pairwise, preserving their multiset.
pub struct SwapNodeMutator {
    pub swaps: usize,
}

impl Mutator for SwapNodeMutator {
    fn name(&self) -> &'static str {
        "swap_node"
    }

    fn mutate(
        &self,
        trace: &Schedule,
        _events: &[Event],
        rng: &mut dyn RngCore,
    ) -> Option<Schedule> {
        let positions = positions_of(trace, |c| matches!(c, Choice::Node { .. }));
        if positions.len() < 2 {
            return None;
        }
        let mut next = trace.clone();
        for _ in 0..self.swaps {
            let a = positions[rng.gen_range(0..positions.len())];
            let b = positions[rng.gen_range(0..positions.len())];
            next.swap(a, b);
        }
        Some(next)
    }
}

/// Reassigns crash points to other replicas and perturbs when they fire.
/// Paired restarts are moved with their crash so start still follows stop.
pub struct SwapCrashNodeMutator {
    pub swaps: usize,
    pub replicas: u64,
    pub horizon: usize,
}

impl SwapCrashNodeMutator {
    fn shift(&self, step: usize, delta: i64) -> usize {
        let horizon = self.horizon as i64;
        (step as i64 + delta).clamp(0, horizon - 1) as usize
    }
}

impl Mutator for SwapCrashNodeMutator {
    fn name(&self) -> &'static str {
        "swap_crash"
    }

    fn mutate(
        &self,
        trace: &Schedule,
        _events: &[Event],
        rng: &mut dyn RngCore,
    ) -> Option<Schedule> {
        let stops = positions_of(trace, |c| matches!(c, Choice::StopNode { .. }));
        if stops.is_empty() {
            return None;
        }
        let mut next = trace.clone();
        for _ in 0..self.swaps {
            let position = stops[rng.gen_range(0..stops.len())];
            let Choice::StopNode { step, node } = next[position].clone() else {
                continue;
            };
            let new_node: ReplicaId = rng.gen_range(1..=self.replicas);
            let mut delta = 0i64;
            if rng.gen_bool(0.5) {
                let span = (self.horizon / 4).max(1) as i64;
                delta = rng.gen_range(1..=span);
                if rng.gen_bool(0.5) {
                    delta = -delta;
                }
            }
            for choice in next.iter_mut() {
                if let Choice::StartNode {
                    step: start_step,
                    node: start_node,
                } = choice
                {
                    if *start_node == node && *start_step > step {
                        *start_node = new_node;
                        *start_step = self.shift(*start_step, delta);
                    }
                }
            }
            next[position] = Choice::StopNode {
                step: self.shift(step, delta),
                node: new_node,
            };
        }
        Some(next)
    }
}

/// Resamples the delivery budget of message-channel choices.
pub struct SwapMaxMessagesMutator {
    pub swaps: usize,
    pub max_messages: usize,
}

impl Mutator for SwapMaxMessagesMutator {
    fn name(&self) -> &'static str {
        "swap_max_messages"
    }

    fn mutate(
        &self,
        trace: &Schedule,
        _events: &[Event],
        rng: &mut dyn RngCore,
    ) -> Option<Schedule> {
        let positions = positions_of(trace, |c| matches!(c, Choice::Node { .. }));
        if positions.is_empty() {
            return None;
        }
        let mut next = trace.clone();
        for _ in 0..self.swaps {
            let position = positions[rng.gen_range(0..positions.len())];
            if let Choice::Node { max_messages, .. } = &mut next[position] {
                *max_messages = rng.gen_range(1..=self.max_messages);
            }
        }
        Some(next)
    }
}

/// Never produces a mutant; the "random" baseline runs with this so its
/// corpus never grows beyond the seed population.
pub struct EmptyMutator;

impl Mutator for EmptyMutator {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn mutate(
        &self,
        _trace: &Schedule,
        _events: &[Event],
        _rng: &mut dyn RngCore,
    ) -> Option<Schedule> {
        None
    }
}

/// Picks one constituent uniformly at random per call.
pub struct CombinedMutator {
    parts: Vec<Box<dyn Mutator>>,
}

impl CombinedMutator {
    pub fn new(parts: Vec<Box<dyn Mutator>>) -> Self {
        Self { parts }
    }

    /// The full operator set used by guided fuzzing runs.
    pub fn standard(replicas: u64, horizon: usize, max_messages: usize) -> Self {
        Self::new(vec![
            Box::new(SwapNodeMutator { swaps: 3 }),
            Box::new(SwapCrashNodeMutator {
                swaps: 2,
                replicas,
                horizon,
            }),
            Box::new(SwapMaxMessagesMutator {
                swaps: 3,
                max_messages,
            }),
        ])
    }
}

impl Mutator for CombinedMutator {
    fn name(&self) -> &'static str {
        "combined"
    }

    fn mutate(
        &self,
        trace: &Schedule,
        events: &[Event],
        rng: &mut dyn RngCore,
    ) -> Option<Schedule> {
        if self.parts.is_empty() {
            return None;
        }
        let pick = rng.gen_range(0..self.parts.len());
        self.parts[pick].mutate(trace, events, rng)
    }
}
