//! Demo experiment: linear regression on synthetic data with plain SGD.
//!
//! Small enough to train in a blink, but it exercises every trainer hook:
//! shuffled loaders, checkpoints, a test pass and per-test artifacts.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

use trainloop_core::experiment::{DataLoader, DataLoaders, ForwardOutput, Model, Optimizer};
use trainloop_core::params::{NormType, grad_norm};
use trainloop_core::persistence::atomic_write_json;
use trainloop_core::{Device, Experiment, Metrics, Result, TrainError, TrainingArgs};

/// Knobs of the synthetic problem and its optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoSettings {
    pub features: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub noise: f64,
    pub max_grad_norm: Option<f64>,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            features: 4,
            train_samples: 2048,
            test_samples: 256,
            batch_size: 32,
            learning_rate: 0.05,
            noise: 0.1,
            max_grad_norm: Some(10.0),
        }
    }
}

type Sample = (Vec<f64>, f64);

/// In-memory loader yielding `(inputs, targets)` mini-batches.
pub struct VecLoader {
    samples: Vec<Sample>,
    batch_size: usize,
    shuffle: Option<StdRng>,
}

impl DataLoader for VecLoader {
    type Input = Vec<Vec<f64>>;
    type Target = Vec<f64>;

    fn dataset_len(&self) -> usize {
        self.samples.len()
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = (Vec<Vec<f64>>, Vec<f64>)> + '_> {
        if let Some(rng) = self.shuffle.as_mut() {
            self.samples.shuffle(rng);
        }
        Box::new(
            self.samples
                .chunks(self.batch_size)
                .map(|chunk| -> (Vec<Vec<f64>>, Vec<f64>) { chunk.iter().cloned().unzip() }),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinearState {
    weights: Vec<f64>,
    bias: f64,
    global_step: u64,
}

/// `y = w·x + b` with gradient buffers.
pub struct LinearModel {
    weights: Vec<f64>,
    bias: f64,
    grad_weights: Vec<f64>,
    grad_bias: f64,
    global_step: u64,
    training: bool,
}

impl LinearModel {
    fn new(features: usize, rng: &mut StdRng) -> Self {
        Self {
            weights: (0..features).map(|_| rng.gen_range(-0.1..0.1)).collect(),
            bias: 0.0,
            grad_weights: vec![0.0; features],
            grad_bias: 0.0,
            global_step: 0,
            training: true,
        }
    }

    fn predict(&self, x: &[f64]) -> f64 {
        self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + self.bias
    }
}

impl Model for LinearModel {
    fn global_step(&self) -> u64 {
        self.global_step
    }

    fn increment_global_step(&mut self) {
        self.global_step += 1;
    }

    fn checkpoint(&self, folder: &Path) -> Result<()> {
        let state = LinearState {
            weights: self.weights.clone(),
            bias: self.bias,
            global_step: self.global_step,
        };
        atomic_write_json(&folder.join("model.json"), &state)?;
        Ok(())
    }

    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn named_parameters(&self) -> Vec<(String, usize)> {
        vec![
            ("linear.weight".to_string(), self.weights.len()),
            ("linear.bias".to_string(), 1),
        ]
    }
}

/// Plain SGD with optional gradient-norm clipping.
pub struct Sgd {
    learning_rate: f64,
    max_grad_norm: Option<f64>,
}

impl Optimizer<LinearModel> for Sgd {
    fn zero_grad(&mut self, model: &mut LinearModel) {
        model.grad_weights.iter_mut().for_each(|g| *g = 0.0);
        model.grad_bias = 0.0;
    }

    fn step(&mut self, model: &mut LinearModel) -> Result<()> {
        let bias = [model.grad_bias];
        let norm = grad_norm(&[&model.grad_weights, &bias], NormType::P(2.0));
        if !norm.is_finite() {
            return Err(TrainError::experiment(format!(
                "non-finite gradient norm at step {}",
                model.global_step
            )));
        }
        let scale = match self.max_grad_norm {
            Some(max) if norm > max => max / norm,
            _ => 1.0,
        };
        for (w, g) in model.weights.iter_mut().zip(&model.grad_weights) {
            *w -= self.learning_rate * scale * g;
        }
        model.bias -= self.learning_rate * scale * model.grad_bias;
        Ok(())
    }
}

/// Forward-pass result: keeps the batch around for backprop.
pub struct RegressionOutput {
    inputs: Vec<Vec<f64>>,
    residuals: Vec<f64>,
    loss: f64,
    mae: f64,
}

impl ForwardOutput<LinearModel> for RegressionOutput {
    fn loss(&self) -> f64 {
        self.loss
    }

    fn backward(&mut self, model: &mut LinearModel) -> Result<()> {
        let n = self.residuals.len().max(1) as f64;
        for (x, r) in self.inputs.iter().zip(&self.residuals) {
            for (g, v) in model.grad_weights.iter_mut().zip(x) {
                *g += 2.0 * r * v / n;
            }
            model.grad_bias += 2.0 * r / n;
        }
        Ok(())
    }
}

fn regression_output(
    model: &LinearModel,
    inputs: Vec<Vec<f64>>,
    targets: &[f64],
) -> RegressionOutput {
    let residuals: Vec<f64> = inputs
        .iter()
        .zip(targets)
        .map(|(x, y)| model.predict(x) - y)
        .collect();
    let n = residuals.len().max(1) as f64;
    RegressionOutput {
        loss: residuals.iter().map(|r| r * r).sum::<f64>() / n,
        mae: residuals.iter().map(|r| r.abs()).sum::<f64>() / n,
        inputs,
        residuals,
    }
}

/// Sample predictions written by the test pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSample {
    pub target: f64,
    pub prediction: f64,
}

/// The linear-regression experiment.
pub struct LinearRegression {
    args: TrainingArgs,
    description: String,
    settings: DemoSettings,
    device: Option<Device>,
    truth: Vec<f64>,
}

impl LinearRegression {
    pub fn new(args: TrainingArgs, description: impl Into<String>, settings: DemoSettings) -> Self {
        Self {
            args,
            description: description.into(),
            settings,
            device: None,
            truth: Vec::new(),
        }
    }

    fn synthesize(&self, rng: &mut StdRng, n: usize, truth: &[f64]) -> Vec<Sample> {
        (0..n)
            .map(|_| {
                let x: Vec<f64> = truth.iter().map(|_| rng.gen_range(-1.0..1.0)).collect();
                let noise = rng.gen_range(-1.0..1.0_f64) * self.settings.noise;
                let y = truth.iter().zip(&x).map(|(w, v)| w * v).sum::<f64>() + 0.5 + noise;
                (x, y)
            })
            .collect()
    }
}

impl Experiment for LinearRegression {
    type Model = LinearModel;
    type Optimizer = Sgd;
    type Loader = VecLoader;
    type Output = RegressionOutput;

    fn args(&self) -> &TrainingArgs {
        &self.args
    }

    fn run_description(&self) -> &str {
        &self.description
    }

    fn device(&self) -> Option<Device> {
        self.device
    }

    fn set_device(&mut self, device: Device) {
        self.device = Some(device);
    }

    fn make_and_set_datamanager(&mut self, rng: &mut StdRng) -> Result<DataLoaders<VecLoader>> {
        if self.settings.batch_size == 0 {
            return Err(TrainError::config("batch_size must be positive"));
        }
        let truth: Vec<f64> = (0..self.settings.features)
            .map(|_| rng.gen_range(-2.0..2.0))
            .collect();
        let train = self.synthesize(rng, self.settings.train_samples, &truth);
        let test = self.synthesize(rng, self.settings.test_samples, &truth);
        self.truth = truth;
        Ok(DataLoaders {
            train: VecLoader {
                samples: train,
                batch_size: self.settings.batch_size,
                shuffle: Some(StdRng::seed_from_u64(rng.r#gen())),
            },
            test: VecLoader {
                samples: test,
                batch_size: self.settings.batch_size,
                shuffle: None,
            },
            data_shape: vec![self.settings.features],
        })
    }

    fn make_and_set_model(&mut self, rng: &mut StdRng) -> Result<LinearModel> {
        Ok(LinearModel::new(self.settings.features, rng))
    }

    fn make_and_set_optimizer(&mut self, _model: &LinearModel) -> Result<Sgd> {
        Ok(Sgd {
            learning_rate: self.settings.learning_rate,
            max_grad_norm: self.settings.max_grad_norm,
        })
    }

    fn forward_pass(
        &mut self,
        model: &mut LinearModel,
        x: Vec<Vec<f64>>,
        y: Vec<f64>,
    ) -> Result<RegressionOutput> {
        Ok(regression_output(model, x, &y))
    }

    fn get_metrics_dict(&self, outputs: &RegressionOutput) -> Metrics {
        Metrics::from([
            ("loss".to_string(), outputs.loss),
            ("mae".to_string(), outputs.mae),
        ])
    }

    fn test_procedure(
        &mut self,
        model: &mut LinearModel,
        test_loader: &mut VecLoader,
    ) -> Result<Metrics> {
        let (mut sq, mut abs, mut n) = (0.0, 0.0, 0usize);
        for (x, y) in test_loader.batches() {
            for (xi, yi) in x.iter().zip(&y) {
                let r = model.predict(xi) - yi;
                sq += r * r;
                abs += r.abs();
                n += 1;
            }
        }
        if n == 0 {
            return Err(TrainError::experiment("test set is empty"));
        }
        Ok(Metrics::from([
            ("loss".to_string(), sq / n as f64),
            ("mae".to_string(), abs / n as f64),
        ]))
    }

    fn additional_testing(&mut self, model: &mut LinearModel, img_folder: &Path) -> Result<()> {
        if self.args.dry_run {
            return Ok(());
        }
        let mut rng = StdRng::seed_from_u64(self.args.seed);
        let samples: Vec<PredictionSample> = self
            .synthesize(&mut rng, 8, &self.truth)
            .into_iter()
            .map(|(x, y)| PredictionSample {
                target: y,
                prediction: model.predict(&x),
            })
            .collect();
        let path = img_folder.join(format!("predictions_{}.json", model.global_step()));
        atomic_write_json(&path, &samples)?;
        Ok(())
    }

    fn print_train_log(&self, step: u64, epoch: u64, summaries: &Metrics) {
        tracing::info!(
            "train epoch {epoch} step {step}: loss {:.5}, mae {:.5}",
            summaries.get("loss").copied().unwrap_or(f64::NAN),
            summaries.get("mae").copied().unwrap_or(f64::NAN),
        );
    }

    fn print_test_log(&self, summaries: &Metrics, step: u64, epoch: u64) {
        tracing::info!(
            "TEST epoch {epoch} step {step}: loss {:.5}, mae {:.5}",
            summaries.get("loss").copied().unwrap_or(f64::NAN),
            summaries.get("mae").copied().unwrap_or(f64::NAN),
        );
    }
}
