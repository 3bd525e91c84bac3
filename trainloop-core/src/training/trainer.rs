//! The training driver.
//!
//! [`Trainer`] owns iteration control, the test/checkpoint/log cadence,
//! metric aggregation and artifact persistence. Everything else is delegated
//! to the [`Experiment`].

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::config::TrainingArgs;
use crate::error::{Result, TrainError};
use crate::experiment::{DataLoader, DataLoaders, Device, Experiment, ForwardOutput, Metrics};
use crate::experiment::{Model, Optimizer};
use crate::params::param_summary;
use crate::persistence::atomic_write_json;
use crate::sink::{JsonlScalarWriter, ScalarSink};
use crate::training::history::{History, RunLog};
use crate::training::layout::{RunLayout, date_str};
use crate::training::summarize::SummarizerCollection;

/// Outcome of [`Trainer::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub epochs_completed: u64,
    pub global_step: u64,
    pub train_records: usize,
    pub test_records: usize,
}

/// Histories plus everywhere they get written.
struct Recorder {
    layout: RunLayout,
    dry_run: bool,
    sink: Option<Box<dyn ScalarSink>>,
    train_history: History,
    test_history: History,
}

impl Recorder {
    fn log_train(&mut self, summaries: &Metrics, step: u64) -> Result<()> {
        self.train_history.add(summaries, step);
        if self.dry_run {
            return Ok(());
        }
        self.persist()?;
        self.write_scalars("train_", summaries, step)
    }

    fn log_test(&mut self, summaries: &Metrics, step: u64) -> Result<()> {
        self.test_history.add(summaries, step);
        if self.dry_run {
            return Ok(());
        }
        self.write_scalars("validation_", summaries, step)?;
        self.persist()
    }

    /// Rewrite `log.json` with both histories in full.
    fn persist(&self) -> Result<()> {
        let log = RunLog::from_histories(&self.train_history, &self.test_history);
        atomic_write_json(&self.layout.log_path, &log)?;
        Ok(())
    }

    fn write_scalars(&mut self, prefix: &str, summaries: &Metrics, step: u64) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            for (name, value) in summaries {
                sink.add_scalar(&format!("{prefix}{name}"), *value, step)?;
            }
        }
        Ok(())
    }
}

/// Generic driver for training an experiment's model.
pub struct Trainer<E: Experiment> {
    experiment: E,
    model: E::Model,
    optimizer: Option<E::Optimizer>,
    loaders: DataLoaders<E::Loader>,
    device: Device,
    recorder: Recorder,
    args: TrainingArgs,
}

impl<E: Experiment> Trainer<E> {
    /// Set up a run stamped with the current local time.
    pub fn new(experiment: E, create_optimizer: bool) -> Result<Self> {
        Self::with_date(experiment, create_optimizer, &date_str())
    }

    /// Set up a run whose folders are named after `date`.
    ///
    /// Validates the arguments, picks the device, creates the run folders and
    /// saves the config (unless `dry_run`), then asks the experiment for its
    /// data loaders, model and optionally optimizer, in that order.
    pub fn with_date(mut experiment: E, create_optimizer: bool, date: &str) -> Result<Self> {
        let args = experiment.args().clone();
        args.validate()?;
        if experiment.run_description().is_empty() {
            return Err(TrainError::incomplete("run description is empty"));
        }

        let mut rng = StdRng::seed_from_u64(args.seed);

        let use_cuda = !args.no_cuda && experiment.cuda_available();
        let device = if use_cuda { Device::Cuda(0) } else { Device::Cpu };
        experiment.set_device(device);
        info!(%device, start_time = date, "Starting run");

        let layout = RunLayout::new(&args.output_root, date, experiment.run_description());
        let mut sink: Option<Box<dyn ScalarSink>> = None;
        if !args.dry_run {
            layout.create(args.tensorboard)?;
            if args.tensorboard {
                sink = Some(Box::new(JsonlScalarWriter::new(&layout.tensorboard_folder)));
            }
            atomic_write_json(&layout.config_path, &args)?;
            info!(run = %layout.run_name, "Created run folders");
        }

        info!("Getting dataset ready...");
        let loaders = experiment.make_and_set_datamanager(&mut rng)?;
        info!(data_shape = ?loaders.data_shape, "Data shape");
        info!(
            train = loaders.train.dataset_len(),
            test = loaders.test.dataset_len(),
            "Train/test set size"
        );

        info!("Creating model...");
        let model = experiment.make_and_set_model(&mut rng)?;
        let summary = param_summary(&model.named_parameters(), args.model_print_depth);
        info!("\n{summary}");

        let optimizer = if create_optimizer {
            Some(experiment.make_and_set_optimizer(&model)?)
        } else {
            None
        };

        check_experiment(&experiment)?;

        Ok(Self {
            experiment,
            model,
            optimizer,
            loaders,
            device,
            recorder: Recorder {
                layout,
                dry_run: args.dry_run,
                sink,
                train_history: History::new(),
                test_history: History::new(),
            },
            args,
        })
    }

    /// Replace the scalar sink. Ignored in dry-run mode.
    pub fn set_scalar_sink(&mut self, sink: Box<dyn ScalarSink>) {
        if !self.args.dry_run {
            self.recorder.sink = Some(sink);
        }
    }

    /// Train for `max_epochs` epochs, testing, checkpointing and logging on cadence.
    pub fn run(&mut self) -> Result<RunSummary> {
        let Self {
            experiment,
            model,
            optimizer,
            loaders,
            recorder,
            args,
            ..
        } = self;
        let optimizer = optimizer
            .as_mut()
            .ok_or_else(|| TrainError::incomplete("training requires an optimizer"))?;

        let mut summarizers = SummarizerCollection::moving_average(args.ma_length);
        model.train();

        for epoch in 1..=args.max_epochs {
            for (x, y) in loaders.train.batches() {
                let step = model.global_step();
                if step % args.test_log_interval == 0 {
                    test_pass(experiment, model, &mut loaders.test, recorder, epoch)?;

                    if step > 0 && step % args.checkpoint_interval == 0 {
                        if args.dry_run {
                            debug!(step, "dry run, skipping model checkpoint");
                        } else {
                            info!(step, "* saving model checkpoint");
                            model.checkpoint(&recorder.layout.checkpoint_folder)?;
                        }
                    }
                }

                optimizer.zero_grad(model);
                let mut outputs = experiment.forward_pass(model, x, y)?;
                outputs.backward(model)?;
                summarizers.add(&experiment.get_metrics_dict(&outputs));

                if (step + 1) % args.log_interval == 0 {
                    let summaries = summarizers.get_all(true);
                    experiment.print_train_log(step + 1, epoch, &summaries);
                    recorder.log_train(&summaries, step + 1)?;
                }

                optimizer.step(model)?;
                model.increment_global_step();
            }
            debug!(epoch, step = model.global_step(), "epoch finished");
        }

        Ok(RunSummary {
            epochs_completed: args.max_epochs,
            global_step: model.global_step(),
            train_records: recorder.train_history.len(),
            test_records: recorder.test_history.len(),
        })
    }

    /// Run one evaluation pass outside the training loop.
    pub fn test(&mut self, epoch: u64) -> Result<Metrics> {
        test_pass(
            &mut self.experiment,
            &mut self.model,
            &mut self.loaders.test,
            &mut self.recorder,
            epoch,
        )
    }

    pub fn args(&self) -> &TrainingArgs {
        &self.args
    }

    pub fn experiment(&self) -> &E {
        &self.experiment
    }

    pub fn model(&self) -> &E::Model {
        &self.model
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn layout(&self) -> &RunLayout {
        &self.recorder.layout
    }

    pub fn train_history(&self) -> &History {
        &self.recorder.train_history
    }

    pub fn test_history(&self) -> &History {
        &self.recorder.test_history
    }
}

/// Evaluate in eval mode, record the results, and always return to train mode.
fn test_pass<E: Experiment>(
    experiment: &mut E,
    model: &mut E::Model,
    test_loader: &mut E::Loader,
    recorder: &mut Recorder,
    epoch: u64,
) -> Result<Metrics> {
    let step = model.global_step();
    model.eval();
    let result = evaluate(experiment, model, test_loader, recorder, step, epoch);
    model.train();
    result
}

fn evaluate<E: Experiment>(
    experiment: &mut E,
    model: &mut E::Model,
    test_loader: &mut E::Loader,
    recorder: &mut Recorder,
    step: u64,
    epoch: u64,
) -> Result<Metrics> {
    let summaries = experiment.test_procedure(model, test_loader)?;
    experiment.additional_testing(model, &recorder.layout.img_folder)?;
    experiment.print_test_log(&summaries, step, epoch);
    recorder.log_test(&summaries, step)?;
    Ok(summaries)
}

fn check_experiment<E: Experiment>(experiment: &E) -> Result<()> {
    if experiment.device().is_none() {
        return Err(TrainError::incomplete("device was not set"));
    }
    if experiment.run_description().is_empty() {
        return Err(TrainError::incomplete("run description is empty"));
    }
    Ok(())
}
