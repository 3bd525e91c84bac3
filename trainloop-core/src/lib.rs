//! # trainloop-core — a generic training-loop driver
//!
//! The [`Trainer`] runs an [`Experiment`] through epochs of training with
//! periodic evaluation, checkpointing and metric logging. Model, data and
//! loss all live in the experiment; the trainer owns only the loop, the
//! cadence, metric aggregation and the run's artifacts on disk.

pub mod config;
pub mod error;
pub mod experiment;
pub mod params;
pub mod persistence;
pub mod sink;
pub mod training;

// Re-exports
pub use config::{ArgOverrides, TrainingArgs, load_args};
pub use error::{Result, TrainError};
pub use experiment::{
    DataLoader, DataLoaders, Device, Experiment, ForwardOutput, Metrics, Model, Optimizer,
};
pub use sink::{JsonlScalarWriter, ScalarSink};
pub use training::{History, RunLayout, RunSummary, SummarizerCollection, SummaryMode, Trainer};
