//! The experiment interface consumed by the [`Trainer`](crate::Trainer).
//!
//! An experiment owns everything domain-specific: how data is loaded, how the
//! model is built and run, what the loss is and which metrics are reported.
//! The trainer only sequences these hooks and persists what they return.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::config::TrainingArgs;
use crate::error::Result;

/// Metric name to scalar value, as produced by one batch or one test pass.
pub type Metrics = BTreeMap<String, f64>;

/// Compute device assigned to an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

/// A trainable model with a step counter and train/eval modes.
pub trait Model {
    /// Number of optimization steps taken so far.
    fn global_step(&self) -> u64;

    fn increment_global_step(&mut self);

    /// Write model-defined checkpoint files into `folder`.
    fn checkpoint(&self, folder: &Path) -> Result<()>;

    /// Switch to training mode.
    fn train(&mut self);

    /// Switch to evaluation mode.
    fn eval(&mut self);

    fn is_training(&self) -> bool;

    /// Trainable parameters as `(dotted.name, element count)` pairs.
    fn named_parameters(&self) -> Vec<(String, usize)> {
        Vec::new()
    }
}

/// Updates a model's parameters from the gradients accumulated in it.
pub trait Optimizer<M> {
    /// Clear accumulated gradients.
    fn zero_grad(&mut self, model: &mut M);

    /// Apply one update.
    fn step(&mut self, model: &mut M) -> Result<()>;
}

/// Result of a forward pass. Carries the loss and can backpropagate it.
pub trait ForwardOutput<M> {
    fn loss(&self) -> f64;

    /// Accumulate gradients of the loss into `model`.
    fn backward(&mut self, model: &mut M) -> Result<()>;
}

/// Produces batches of `(input, target)` pairs.
pub trait DataLoader {
    type Input;
    type Target;

    /// Number of samples in the underlying dataset.
    fn dataset_len(&self) -> usize;

    /// One pass over the dataset. Loaders may reshuffle on each call.
    fn batches(&mut self) -> Box<dyn Iterator<Item = (Self::Input, Self::Target)> + '_>;
}

/// Train and test loaders plus the shape of a single sample.
#[derive(Debug, Clone)]
pub struct DataLoaders<L> {
    pub train: L,
    pub test: L,
    pub data_shape: Vec<usize>,
}

/// Domain-specific collaborator driven by the trainer.
///
/// The `make_and_set_*` hooks build the data loaders, model and optimizer;
/// the trainer takes ownership of what they return and passes it back into
/// the other hooks.
pub trait Experiment {
    type Model: Model;
    type Optimizer: Optimizer<Self::Model>;
    type Loader: DataLoader;
    type Output: ForwardOutput<Self::Model>;

    fn args(&self) -> &TrainingArgs;

    /// Short human-readable label, used in run folder names.
    fn run_description(&self) -> &str;

    fn device(&self) -> Option<Device>;

    fn set_device(&mut self, device: Device);

    /// Whether an accelerator is available to this experiment.
    fn cuda_available(&self) -> bool {
        false
    }

    fn make_and_set_datamanager(&mut self, rng: &mut StdRng)
    -> Result<DataLoaders<Self::Loader>>;

    fn make_and_set_model(&mut self, rng: &mut StdRng) -> Result<Self::Model>;

    fn make_and_set_optimizer(&mut self, model: &Self::Model) -> Result<Self::Optimizer>;

    fn forward_pass(
        &mut self,
        model: &mut Self::Model,
        x: <Self::Loader as DataLoader>::Input,
        y: <Self::Loader as DataLoader>::Target,
    ) -> Result<Self::Output>;

    /// Scalars to feed into the training summarizers for one batch.
    fn get_metrics_dict(&self, outputs: &Self::Output) -> Metrics;

    /// Evaluate the model on the test loader. Called with the model in eval mode.
    fn test_procedure(
        &mut self,
        model: &mut Self::Model,
        test_loader: &mut Self::Loader,
    ) -> Result<Metrics>;

    /// Extra evaluation work such as saving sample images to `img_folder`.
    fn additional_testing(&mut self, _model: &mut Self::Model, _img_folder: &Path) -> Result<()> {
        Ok(())
    }

    fn print_train_log(&self, step: u64, epoch: u64, summaries: &Metrics) {
        tracing::info!(step, epoch, metrics = ?summaries, "train");
    }

    fn print_test_log(&self, summaries: &Metrics, step: u64, epoch: u64) {
        tracing::info!(step, epoch, metrics = ?summaries, "test");
    }
}
