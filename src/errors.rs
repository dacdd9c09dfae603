//! Error taxonomy for the fuzzing engine.
//!
//! Only two failure classes abort a run: the Raft environment cannot be
//! constructed, or results cannot be written under the save path. Transport
//! errors against TLC or the coverage endpoint stay inside the guiders
//! (logged and counted, never raised), and mutator failures are ordinary
//! control flow.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum FuzzError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("raft environment: {0}")]
    Environment(#[from] raft::Error),

    #[error("write {path}: {source}")]
    Save {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialize trace: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write series: {0}")]
    Csv(#[from] csv::Error),
}
