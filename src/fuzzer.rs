//! The coverage-guided fuzzing loop.
//!
//! Each iteration replays one schedule from the corpus (or a purely random
//! one) against a fresh simulated cluster and scores the resulting event
//! trace with the guider. When the iteration covered new ground, the fuzzer
//! queues mutants of the *executed* trace in proportion to its novelty. Pinned
//! choices are advisory: quota limits, crashed targets, and cursor
//! exhaustion all make the replay diverge, and the concrete trace is what
//! enters the corpus next.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checker::{default_checker, Checker, CommittedLogs};
use crate::config::FuzzConfig;
use crate::environment::{deliver_event, send_event, RaftEnvironment};
use crate::errors::FuzzError;
use crate::guider::Guider;
use crate::mutator::Mutator;
use crate::schedule::{Choice, Event, ReplicaId, Schedule};
use crate::strategy::{RandomStrategy, Strategy};

/// Derives one reproducible PRNG stream from a base seed.
pub fn derive_seed(base: u64, stream: u64) -> u64 {
    base ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Kind-keyed view of a mimic schedule, consumed positionally during replay.
#[derive(Default)]
struct Cursors {
    nodes: VecDeque<(ReplicaId, ReplicaId, usize)>,
    bools: VecDeque<bool>,
    ints: VecDeque<u64>,
    starts: HashMap<usize, ReplicaId>,
    stops: HashMap<usize, ReplicaId>,
    requests: HashMap<usize, usize>,
}

impl Cursors {
    // Step-indexed kinds are last-write-wins on duplicates.
    fn sort(schedule: &Schedule) -> Self {
        let mut cursors = Self::default();
        for choice in schedule {
            match choice {
                Choice::Node {
                    from,
                    to,
                    max_messages,
                } => cursors.nodes.push_back((*from, *to, *max_messages)),
                Choice::RandomBoolean { value } => cursors.bools.push_back(*value),
                Choice::RandomInteger { value } => cursors.ints.push_back(*value),
                Choice::StartNode { step, node } => {
                    cursors.starts.insert(*step, *node);
                }
                Choice::StopNode { step, node } => {
                    cursors.stops.insert(*step, *node);
                }
                Choice::ClientRequest { step, request } => {
                    cursors.requests.insert(*step, *request);
                }
            }
        }
        cursors
    }
}

fn draw_int(cursors: &mut Cursors, strategy: &mut dyn Strategy, trace: &mut Schedule) -> u64 {
    let value = cursors
        .ints
        .pop_front()
        .unwrap_or_else(|| strategy.pick_int());
    trace.push(Choice::RandomInteger { value });
    value
}

fn draw_bool(cursors: &mut Cursors, strategy: &mut dyn Strategy, trace: &mut Schedule) -> bool {
    let value = cursors
        .bools
        .pop_front()
        .unwrap_or_else(|| strategy.pick_bool());
    trace.push(Choice::RandomBoolean { value });
    value
}

/// Output of one executed iteration.
pub struct IterationRun {
    /// The concrete schedule that actually ran.
    pub trace: Schedule,
    /// Protocol events observed during the run.
    pub events: Vec<Event>,
    /// Committed log payloads per replica at iteration end.
    pub committed: CommittedLogs,
}

/// Counters and series accumulated over one fuzzing run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Stats {
    pub random_executions: usize,
    pub mutated_executions: usize,
    pub buggy_executions: usize,
    /// Novelty reported by the guider, per iteration.
    pub new_states: Vec<usize>,
    /// Cumulative guider coverage, per iteration.
    pub coverage: Vec<usize>,
}

impl Stats {
    pub fn final_coverage(&self) -> usize {
        self.coverage.last().copied().unwrap_or(0)
    }
}

#[derive(Serialize)]
struct TraceRecord<'a> {
    trace: &'a Schedule,
    events: &'a [Event],
    coverage: usize,
}

pub struct Fuzzer {
    config: FuzzConfig,
    guider: Box<dyn Guider>,
    mutator: Box<dyn Mutator>,
    checker: Option<Checker>,
    corpus: VecDeque<Schedule>,
    stats: Stats,
}

impl Fuzzer {
    pub fn new(
        config: FuzzConfig,
        guider: Box<dyn Guider>,
        mutator: Box<dyn Mutator>,
    ) -> Result<Self, FuzzError> {
        config.validate()?;
        Ok(Self {
            config,
            guider,
            mutator,
            checker: Some(default_checker()),
            corpus: VecDeque::new(),
            stats: Stats::default(),
        })
    }

    /// Replaces (or disables) the end-of-iteration safety check.
    pub fn with_checker(mut self, checker: Option<Checker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn config(&self) -> &FuzzConfig {
        &self.config
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }

    pub fn guider_coverage(&self) -> usize {
        self.guider.coverage()
    }

    pub fn guider_failures(&self) -> usize {
        self.guider.failures()
    }

    /// Clears corpus, statistics, and guider coverage for a fresh run under
    /// a new base seed. Used between comparison runs.
    pub fn reset(&mut self, seed: u64) {
        self.config.seed = seed;
        self.corpus.clear();
        self.stats = Stats::default();
        self.guider.reset();
    }

    /// Executes the configured iteration budget.
    pub async fn run(&mut self) -> Result<&Stats, FuzzError> {
        let save = self.config.save_path.clone();
        fs::create_dir_all(&save).map_err(|source| FuzzError::Save {
            path: save.clone(),
            source,
        })?;

        for iteration in 0..self.config.iterations {
            if iteration % self.config.reseed_frequency == 0 {
                self.seed_corpus(iteration)?;
            }
            let mimic = self.corpus.pop_front();
            if mimic.is_some() {
                self.stats.mutated_executions += 1;
            } else {
                self.stats.random_executions += 1;
            }

            let seed = derive_seed(self.config.seed, iteration as u64);
            let run = self.run_iteration(seed, mimic.as_ref())?;

            let (new_units, novelty) = self.guider.check(&run.trace, &run.events).await;
            if new_units > 0 {
                debug!(iteration, new_units, novelty, "novel schedule, mutating");
                let mut rng = StdRng::seed_from_u64(derive_seed(seed, u64::MAX));
                for _ in 0..new_units * self.config.mutations_per_trace {
                    if let Some(mutant) = self.mutator.mutate(&run.trace, &run.events, &mut rng) {
                        self.corpus.push_back(mutant);
                    }
                }
            }
            self.stats.new_states.push(new_units);
            self.stats.coverage.push(self.guider.coverage());

            if let Some(checker) = &self.checker {
                if !checker(&run.committed) {
                    self.stats.buggy_executions += 1;
                    warn!(iteration, "checker violation, persisting trace");
                    self.persist_run(&save.join("violations"), iteration, &run)?;
                }
            }
            if self.config.record_traces {
                self.persist_run(&save.join("traces"), iteration, &run)?;
            }
            if (iteration + 1) % 100 == 0 {
                info!(
                    iteration = iteration + 1,
                    coverage = self.guider.coverage(),
                    corpus = self.corpus.len(),
                    "progress"
                );
            }
        }

        info!(
            coverage = self.stats.final_coverage(),
            random = self.stats.random_executions,
            mutated = self.stats.mutated_executions,
            buggy = self.stats.buggy_executions,
            transport_failures = self.guider.failures(),
            "fuzzing complete"
        );
        Ok(&self.stats)
    }

    /// Discards the corpus and refills it with freshly-sampled random
    /// schedules, executed without a mimic.
    fn seed_corpus(&mut self, iteration: usize) -> Result<(), FuzzError> {
        info!(
            iteration,
            population = self.config.seed_population,
            "reseeding corpus"
        );
        self.corpus.clear();
        let stream = derive_seed(self.config.seed, !(iteration as u64));
        for sample in 0..self.config.seed_population {
            let run = self.run_iteration(derive_seed(stream, sample as u64), None)?;
            self.corpus.push_back(run.trace);
        }
        Ok(())
    }

    /// Replays one (possibly absent) mimic schedule against a fresh cluster.
    ///
    /// The returned trace is the concrete sequence of choices that actually
    /// drove the run; it only matches the mimic when every pinned choice was
    /// applicable.
    pub fn run_iteration(
        &self,
        seed: u64,
        mimic: Option<&Schedule>,
    ) -> Result<IterationRun, FuzzError> {
        let config = &self.config;
        let replicas = config.cluster.replicas;
        let mut strategy = RandomStrategy::new(seed, replicas, config.max_messages);
        let mut cursors = mimic.map(Cursors::sort).unwrap_or_default();
        let mut env = RaftEnvironment::new(config.cluster.clone())?;

        let mut trace: Schedule = Vec::new();
        let mut events: Vec<Event> = Vec::new();
        let mut crashes = 0;
        let mut injected = 0;

        for step in 0..config.steps {
            // Restarts before crashes: a schedule pinning both on one step
            // leaves the node down at step end.
            match cursors.starts.get(&step).copied() {
                Some(node) => {
                    if env.is_crashed(node) {
                        env.start(node)?;
                        trace.push(Choice::StartNode { step, node });
                    }
                }
                None => {
                    let down = env.down();
                    if !down.is_empty() {
                        let gate = draw_int(&mut cursors, &mut strategy, &mut trace) as usize
                            % config.steps
                            < config.crash_quota;
                        if gate {
                            let pick = draw_int(&mut cursors, &mut strategy, &mut trace) as usize;
                            let node = down[pick % down.len()];
                            env.start(node)?;
                            trace.push(Choice::StartNode { step, node });
                        }
                    }
                }
            }

            match cursors.stops.get(&step).copied() {
                Some(node) => {
                    if crashes < config.crash_quota
                        && env.contains(node)
                        && !env.is_crashed(node)
                        && env.alive().len() > 1
                        && env.stop(node)
                    {
                        trace.push(Choice::StopNode { step, node });
                        crashes += 1;
                    }
                    // Unknown node, duplicate crash, exhausted quota: the
                    // pinned choice is dropped silently.
                }
                None if crashes < config.crash_quota => {
                    let gate = draw_int(&mut cursors, &mut strategy, &mut trace) as usize
                        % config.steps
                        < config.crash_quota;
                    if gate {
                        let alive = env.alive();
                        if alive.len() > 1 {
                            let pick = draw_int(&mut cursors, &mut strategy, &mut trace) as usize;
                            let node = alive[pick % alive.len()];
                            env.stop(node);
                            trace.push(Choice::StopNode { step, node });
                            crashes += 1;
                        }
                    }
                }
                None => {}
            }

            // Message channel for this step. A malformed pinned choice is
            // replaced by a fresh draw.
            let (from, to, max_messages) = match cursors.nodes.pop_front() {
                Some((from, to, max))
                    if from >= 1 && from <= replicas && to >= 1 && to <= replicas && from != to =>
                {
                    (from, to, max)
                }
                _ => strategy.pick_node(),
            };
            trace.push(Choice::Node {
                from,
                to,
                max_messages,
            });

            if !env.is_crashed(to) {
                for msg in env.dequeue(from, to, max_messages) {
                    events.push(deliver_event(&msg));
                    env.step(msg);
                }
            }
            events.extend(env.take_events());

            match cursors.requests.get(&step).copied() {
                Some(request) => {
                    if let Some(target) = env.request_target() {
                        env.client_request(target, request);
                        trace.push(Choice::ClientRequest { step, request });
                        events.push(Event::ClientRequest {
                            request,
                            node: target,
                        });
                        injected += 1;
                    }
                }
                None if injected < config.number_requests => {
                    let target = if draw_bool(&mut cursors, &mut strategy, &mut trace) {
                        env.request_target()
                    } else {
                        let alive = env.alive();
                        let pick = draw_int(&mut cursors, &mut strategy, &mut trace) as usize;
                        if alive.is_empty() {
                            None
                        } else {
                            alive.get(pick % alive.len()).copied()
                        }
                    };
                    if let Some(target) = target {
                        injected += 1;
                        let request = injected;
                        env.client_request(target, request);
                        trace.push(Choice::ClientRequest { step, request });
                        events.push(Event::ClientRequest {
                            request,
                            node: target,
                        });
                    }
                }
                None => {}
            }

            for msg in env.tick() {
                events.push(send_event(&msg));
                env.enqueue(msg);
            }
            events.extend(env.take_events());
        }

        Ok(IterationRun {
            trace,
            events,
            committed: env.committed(),
        })
    }

    fn persist_run(
        &self,
        dir: &Path,
        iteration: usize,
        run: &IterationRun,
    ) -> Result<(), FuzzError> {
        fs::create_dir_all(dir).map_err(|source| FuzzError::Save {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(format!("fuzz_{iteration}.json"));
        let record = TraceRecord {
            trace: &run.trace,
            events: &run.events,
            coverage: self.guider.coverage(),
        };
        let data = serde_json::to_vec_pretty(&record)?;
        fs::write(&path, data).map_err(|source| FuzzError::Save { path, source })?;
        Ok(())
    }

    /// Writes the per-iteration coverage series under the save path.
    pub fn write_coverage_series(&self) -> Result<PathBuf, FuzzError> {
        let path = self.config.save_path.join("coverage.csv");
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["iteration", "new_states", "coverage"])?;
        for (iteration, (new_states, coverage)) in self
            .stats
            .new_states
            .iter()
            .zip(&self.stats.coverage)
            .enumerate()
        {
            writer.write_record([
                iteration.to_string(),
                new_states.to_string(),
                coverage.to_string(),
            ])?;
        }
        writer.flush().map_err(|source| FuzzError::Save {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursors_sort_is_kind_keyed() {
        let schedule = vec![
            Choice::Node {
                from: 1,
                to: 2,
                max_messages: 5,
            },
            Choice::RandomInteger { value: 17 },
            Choice::StopNode { step: 3, node: 2 },
            Choice::Node {
                from: 2,
                to: 1,
                max_messages: 1,
            },
            Choice::RandomBoolean { value: true },
            Choice::ClientRequest {
                step: 4,
                request: 1,
            },
            Choice::StartNode { step: 8, node: 2 },
        ];
        let cursors = Cursors::sort(&schedule);
        assert_eq!(cursors.nodes, vec![(1, 2, 5), (2, 1, 1)]);
        assert_eq!(cursors.ints, vec![17]);
        assert_eq!(cursors.bools, vec![true]);
        assert_eq!(cursors.stops.get(&3), Some(&2));
        assert_eq!(cursors.starts.get(&8), Some(&2));
        assert_eq!(cursors.requests.get(&4), Some(&1));
    }

    #[test]
    fn test_cursors_duplicate_steps_are_last_write_wins() {
        let schedule = vec![
            Choice::StopNode { step: 3, node: 1 },
            Choice::StopNode { step: 3, node: 2 },
        ];
        let cursors = Cursors::sort(&schedule);
        assert_eq!(cursors.stops.get(&3), Some(&2));
    }

    #[test]
    fn test_derive_seed_separates_streams() {
        let base = 2023;
        assert_ne!(derive_seed(base, 1), derive_seed(base, 2));
        assert_eq!(derive_seed(base, 5), derive_seed(base, 5));
    }
}
