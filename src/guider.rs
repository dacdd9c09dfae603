//! Coverage oracles scoring each executed schedule.
//!
//! All three guiders share one contract: `check` returns how many
//! previously-unseen coverage units the iteration contributed, plus that
//! count relative to everything seen so far. A positive count is what
//! triggers mutation in the fuzzer loop. Transport failures never propagate:
//! they are logged, counted, and reported as zero novelty.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::schedule::{trace_hash, Event, Schedule};
use crate::tlc::TlcClient;

/// Outcome of one coverage check: `(new_units, novelty_ratio)`.
pub type CheckOutcome = (usize, f64);

#[async_trait]
pub trait Guider: Send {
    /// Scores one executed `(trace, events)` pair and folds it into the
    /// guider's cumulative coverage.
    async fn check(&mut self, trace: &Schedule, events: &[Event]) -> CheckOutcome;

    /// Total coverage units accumulated so far.
    fn coverage(&self) -> usize;

    /// Transport failures absorbed so far.
    fn failures(&self) -> usize {
        0
    }

    /// Clears all accumulated coverage, for reuse across comparison runs.
    fn reset(&mut self);
}

fn ratio(new_units: usize, total: usize) -> f64 {
    new_units as f64 / total.max(1) as f64
}

/// Coverage measured in distinct TLC state keys.
pub struct TlcStateGuider {
    client: TlcClient,
    seen: HashSet<String>,
    failures: usize,
}

impl TlcStateGuider {
    pub fn new(addr: &str) -> Self {
        Self {
            client: TlcClient::new(addr),
            seen: HashSet::new(),
            failures: 0,
        }
    }

    /// Submits the trace and counts state keys never seen before.
    async fn count_new_states(&mut self, events: &[Event]) -> usize {
        match self.client.send_trace(events).await {
            Ok(states) => states
                .into_iter()
                .filter(|state| self.seen.insert(state.key.clone()))
                .count(),
            Err(err) => {
                warn!(%err, "model checker call failed, scoring zero novelty");
                self.failures += 1;
                0
            }
        }
    }
}

#[async_trait]
impl Guider for TlcStateGuider {
    async fn check(&mut self, _trace: &Schedule, events: &[Event]) -> CheckOutcome {
        let new_states = self.count_new_states(events).await;
        (new_states, ratio(new_states, self.seen.len()))
    }

    fn coverage(&self) -> usize {
        self.seen.len()
    }

    fn failures(&self) -> usize {
        self.failures
    }

    fn reset(&mut self) {
        self.seen.clear();
        self.failures = 0;
    }
}

/// Coverage measured in distinct canonical event traces. The TLC state set
/// is still updated on every check so state statistics stay comparable.
pub struct TraceCoverageGuider {
    states: TlcStateGuider,
    traces: HashSet<u64>,
}

impl TraceCoverageGuider {
    pub fn new(addr: &str) -> Self {
        Self {
            states: TlcStateGuider::new(addr),
            traces: HashSet::new(),
        }
    }
}

#[async_trait]
impl Guider for TraceCoverageGuider {
    async fn check(&mut self, trace: &Schedule, events: &[Event]) -> CheckOutcome {
        self.states.check(trace, events).await;
        let fresh = self.traces.insert(trace_hash(events));
        let new_traces = usize::from(fresh);
        if fresh {
            debug!(traces = self.traces.len(), "new canonical trace");
        }
        (new_traces, ratio(new_traces, self.traces.len()))
    }

    fn coverage(&self) -> usize {
        self.traces.len()
    }

    fn failures(&self) -> usize {
        self.states.failures()
    }

    fn reset(&mut self) {
        self.states.reset();
        self.traces.clear();
    }
}

/// Coverage measured in source lines reported by the system under test at
/// `GET http://{addr}/coverage`. Counters are assumed cumulative; the guider
/// diffs against its own union.
pub struct LineCoverageGuider {
    client: reqwest::Client,
    endpoint: String,
    seen: HashSet<String>,
    failures: usize,
}

impl LineCoverageGuider {
    pub fn new(addr: &str) -> Self {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: format!("{base}/coverage"),
            seen: HashSet::new(),
            failures: 0,
        }
    }

    async fn fetch_lines(&self) -> Result<Vec<String>, reqwest::Error> {
        let response = self.client.get(&self.endpoint).send().await?;
        let lines = response.error_for_status()?.json::<Vec<String>>().await?;
        Ok(lines)
    }
}

#[async_trait]
impl Guider for LineCoverageGuider {
    async fn check(&mut self, _trace: &Schedule, _events: &[Event]) -> CheckOutcome {
        let new_lines = match self.fetch_lines().await {
            Ok(lines) => lines
                .into_iter()
                .filter(|line| self.seen.insert(line.clone()))
                .count(),
            Err(err) => {
                warn!(%err, "coverage endpoint call failed, scoring zero novelty");
                self.failures += 1;
                0
            }
        };
        (new_lines, ratio(new_lines, self.seen.len()))
    }

    fn coverage(&self) -> usize {
        self.seen.len()
    }

    fn failures(&self) -> usize {
        self.failures
    }

    fn reset(&mut self) {
        self.seen.clear();
        self.failures = 0;
    }
}
