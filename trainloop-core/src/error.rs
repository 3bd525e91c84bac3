//! Error types for the trainloop-core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for training runs.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Incomplete experiment: {0}")]
    IncompleteExperiment(String),

    #[error("Run folder already exists: {}", path.display())]
    RunExists { path: PathBuf },

    #[error("Experiment error: {0}")]
    Experiment(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrainError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn incomplete(msg: impl Into<String>) -> Self {
        Self::IncompleteExperiment(msg.into())
    }

    pub fn experiment(msg: impl Into<String>) -> Self {
        Self::Experiment(msg.into())
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, TrainError>;
