//! Side-by-side evaluation of (guider, mutator) configurations.
//!
//! Every configuration runs the same iteration budget `runs` times; the
//! per-iteration coverage series are averaged across runs and written as
//! one CSV file per configuration. Runs execute sequentially so the model
//! checker sees one trace stream at a time.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::FuzzConfig;
use crate::errors::FuzzError;
use crate::fuzzer::Fuzzer;
use crate::guider::Guider;
use crate::mutator::Mutator;

/// One named (guider, mutator) pairing under comparison.
pub struct Experiment {
    pub name: String,
    pub guider: Box<dyn Guider>,
    pub mutator: Box<dyn Mutator>,
}

pub struct Comparison {
    base: FuzzConfig,
    runs: usize,
    experiments: Vec<Experiment>,
}

impl Comparison {
    pub fn new(base: FuzzConfig, runs: usize) -> Result<Self, FuzzError> {
        base.validate()?;
        Ok(Self {
            base,
            runs: runs.max(1),
            experiments: Vec::new(),
        })
    }

    pub fn experiment(
        mut self,
        name: &str,
        guider: Box<dyn Guider>,
        mutator: Box<dyn Mutator>,
    ) -> Self {
        self.experiments.push(Experiment {
            name: name.to_string(),
            guider,
            mutator,
        });
        self
    }

    /// Runs every configuration and writes its averaged coverage series to
    /// `{save}/cov_{name}.csv`.
    pub async fn run(self) -> Result<(), FuzzError> {
        let save = self.base.save_path.clone();
        fs::create_dir_all(&save).map_err(|source| FuzzError::Save {
            path: save.clone(),
            source,
        })?;

        for experiment in self.experiments {
            let name = experiment.name;
            info!(config = %name, runs = self.runs, "comparing configuration");

            // Violations and recorded traces land in a per-configuration
            // subdirectory so parallel-named iterations cannot clobber
            // each other.
            let mut config = self.base.clone();
            config.save_path = save.join(&name);
            let mut fuzzer = Fuzzer::new(config, experiment.guider, experiment.mutator)?;

            let mut series = Vec::with_capacity(self.runs);
            for run in 0..self.runs {
                fuzzer.reset(self.base.seed.wrapping_add(run as u64));
                fuzzer.run().await?;
                series.push(fuzzer.stats().coverage.clone());
            }
            let path = write_mean_series(&save, &name, &series)?;
            info!(config = %name, path = %path.display(), "coverage series written");
        }
        Ok(())
    }
}

fn write_mean_series(
    save: &Path,
    name: &str,
    series: &[Vec<usize>],
) -> Result<PathBuf, FuzzError> {
    let path = save.join(format!("cov_{name}.csv"));
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(["iteration", "coverage"])?;
    let iterations = series.iter().map(Vec::len).max().unwrap_or(0);
    for iteration in 0..iterations {
        let mut sum = 0.0;
        let mut count = 0usize;
        for run in series {
            if let Some(value) = run.get(iteration) {
                sum += *value as f64;
                count += 1;
            }
        }
        let mean = sum / count.max(1) as f64;
        writer.write_record([iteration.to_string(), format!("{mean:.2}")])?;
    }
    writer.flush().map_err(|source| FuzzError::Save {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
