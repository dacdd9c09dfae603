use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors with descriptive messages.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

/// Shape and timing of the simulated cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of replicas, ids `1..=replicas`.
    pub replicas: u64,
    /// Ticks a follower waits without leader contact before campaigning.
    pub election_tick: usize,
    /// Ticks between leader heartbeats.
    pub heartbeat_tick: usize,
    /// Logical ticks advanced per fuzzer step.
    pub ticks_per_step: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            election_tick: 10,
            heartbeat_tick: 2,
            ticks_per_step: 3,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replicas < 2 {
            return Err(invalid("replicas", "at least 2 replicas are required"));
        }
        if self.heartbeat_tick == 0 {
            return Err(invalid("heartbeat_tick", "must be at least 1"));
        }
        if self.election_tick <= self.heartbeat_tick {
            return Err(invalid(
                "election_tick",
                "must be greater than heartbeat_tick",
            ));
        }
        if self.ticks_per_step == 0 {
            return Err(invalid("ticks_per_step", "must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration for one fuzzing run.
#[derive(Debug, Clone)]
pub struct FuzzConfig {
    /// Number of episodes to execute.
    pub iterations: usize,
    /// Logical steps per episode (the horizon).
    pub steps: usize,
    /// Mutants generated per unit of novelty.
    pub mutations_per_trace: usize,
    /// Client writes injected per episode.
    pub number_requests: usize,
    /// Upper bound on crashes per episode.
    pub crash_quota: usize,
    /// Upper bound on messages delivered by one `Node` choice.
    pub max_messages: usize,
    /// Random schedules executed when (re)seeding the corpus.
    pub seed_population: usize,
    /// Episodes between corpus reseeds.
    pub reseed_frequency: usize,
    /// Base seed; each episode derives its own PRNG stream from it.
    pub seed: u64,
    /// Write per-episode `{trace, events, coverage}` JSON files.
    pub record_traces: bool,
    /// Root directory for series, traces, and violations.
    pub save_path: PathBuf,
    pub cluster: ClusterConfig,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            steps: 50,
            mutations_per_trace: 3,
            number_requests: 3,
            crash_quota: 10,
            max_messages: 5,
            seed_population: 20,
            reseed_frequency: 200,
            seed: 2023,
            record_traces: false,
            save_path: PathBuf::from("results"),
            cluster: ClusterConfig::default(),
        }
    }
}

impl FuzzConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cluster.validate()?;
        if self.steps == 0 {
            return Err(invalid("steps", "the horizon must be at least 1 step"));
        }
        if self.reseed_frequency == 0 {
            return Err(invalid("reseed_frequency", "must be at least 1"));
        }
        if self.max_messages == 0 {
            return Err(invalid("max_messages", "must be at least 1"));
        }
        if self.crash_quota >= self.steps {
            return Err(invalid(
                "crash_quota",
                "must be smaller than the number of steps",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(FuzzConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_reseed_frequency() {
        let config = FuzzConfig {
            reseed_frequency: 0,
            ..FuzzConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reseed_frequency"));
    }

    #[test]
    fn test_rejects_single_replica_cluster() {
        let config = ClusterConfig {
            replicas: 1,
            ..ClusterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_election_tick_not_above_heartbeat() {
        let config = ClusterConfig {
            election_tick: 2,
            heartbeat_tick: 2,
            ..ClusterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_crash_quota_at_horizon() {
        let config = FuzzConfig {
            steps: 10,
            crash_quota: 10,
            ..FuzzConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
