//! Integration tests for the training driver.
//!
//! A scripted experiment records every hook the trainer calls, so the tests
//! can check cadence, mode switching and what lands on disk.

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use trainloop_core::experiment::{DataLoader, DataLoaders, ForwardOutput, Model, Optimizer};
use trainloop_core::persistence::load_json;
use trainloop_core::sink::ScalarEvent;
use trainloop_core::training::{RunLayout, RunLog, Series};
use trainloop_core::{Device, Experiment, Metrics, TrainError, Trainer, TrainingArgs};

const DATE: &str = "240101_120000";

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Test { step: u64, training: bool },
    Checkpoint(u64),
    ZeroGrad,
    Forward(u64),
    Backward,
    Step,
}

type EventLog = Rc<RefCell<Vec<Event>>>;

struct ScriptedModel {
    step: u64,
    training: bool,
    grad: f64,
    weight: f64,
    events: EventLog,
}

impl Model for ScriptedModel {
    fn global_step(&self) -> u64 {
        self.step
    }

    fn increment_global_step(&mut self) {
        self.step += 1;
    }

    fn checkpoint(&self, folder: &Path) -> trainloop_core::Result<()> {
        self.events.borrow_mut().push(Event::Checkpoint(self.step));
        std::fs::write(
            folder.join(format!("model_{}.txt", self.step)),
            self.weight.to_string(),
        )?;
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
        vec![("linear.weight".to_string(), 1)]
    }
}

struct ScriptedOptimizer;

impl Optimizer<ScriptedModel> for ScriptedOptimizer {
    fn zero_grad(&mut self, model: &mut ScriptedModel) {
        model.events.borrow_mut().push(Event::ZeroGrad);
        model.grad = 0.0;
    }

    fn step(&mut self, model: &mut ScriptedModel) -> trainloop_core::Result<()> {
        model.events.borrow_mut().push(Event::Step);
        model.weight -= 0.1 * model.grad;
        Ok(())
    }
}

struct ScriptedOutput {
    loss: f64,
}

impl ForwardOutput<ScriptedModel> for ScriptedOutput {
    fn loss(&self) -> f64 {
        self.loss
    }

    fn backward(&mut self, model: &mut ScriptedModel) -> trainloop_core::Result<()> {
        model.events.borrow_mut().push(Event::Backward);
        model.grad += self.loss;
        Ok(())
    }
}

struct RangeLoader {
    batches: usize,
}

impl DataLoader for RangeLoader {
    type Input = f64;
    type Target = f64;

    fn dataset_len(&self) -> usize {
        self.batches
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = (f64, f64)> + '_> {
        Box::new((0..self.batches).map(|i| (i as f64, 1.0)))
    }
}

struct ScriptedExperiment {
    args: TrainingArgs,
    description: String,
    device: Option<Device>,
    batches_per_epoch: usize,
    cuda: bool,
    fail_test: bool,
    ignore_device: bool,
    events: EventLog,
    /// Contents of `log.json` seen at each print hook, before the trainer rewrites it.
    snapshots: RefCell<Vec<RunLog>>,
    log_path: PathBuf,
}

impl ScriptedExperiment {
    fn new(args: TrainingArgs, batches_per_epoch: usize) -> Self {
        let log_path = RunLayout::new(&args.output_root, DATE, "scripted").log_path;
        Self {
            args,
            description: "scripted".to_string(),
            device: None,
            batches_per_epoch,
            cuda: false,
            fail_test: false,
            ignore_device: false,
            events: Rc::new(RefCell::new(Vec::new())),
            snapshots: RefCell::new(Vec::new()),
            log_path,
        }
    }

    fn snapshot(&self) {
        if let Some(log) = load_json::<RunLog>(&self.log_path).unwrap() {
            self.snapshots.borrow_mut().push(log);
        }
    }
}

impl Experiment for ScriptedExperiment {
    type Model = ScriptedModel;
    type Optimizer = ScriptedOptimizer;
    type Loader = RangeLoader;
    type Output = ScriptedOutput;

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
        if !self.ignore_device {
            self.device = Some(device);
        }
    }

    fn cuda_available(&self) -> bool {
        self.cuda
    }

    fn make_and_set_datamanager(
        &mut self,
        _rng: &mut StdRng,
    ) -> trainloop_core::Result<DataLoaders<RangeLoader>> {
        Ok(DataLoaders {
            train: RangeLoader {
                batches: self.batches_per_epoch,
            },
            test: RangeLoader { batches: 2 },
            data_shape: vec![1],
        })
    }

    fn make_and_set_model(&mut self, _rng: &mut StdRng) -> trainloop_core::Result<ScriptedModel> {
        Ok(ScriptedModel {
            step: 0,
            training: false,
            grad: 0.0,
            weight: 1.0,
            events: self.events.clone(),
        })
    }

    fn make_and_set_optimizer(
        &mut self,
        _model: &ScriptedModel,
    ) -> trainloop_core::Result<ScriptedOptimizer> {
        Ok(ScriptedOptimizer)
    }

    fn forward_pass(
        &mut self,
        model: &mut ScriptedModel,
        x: f64,
        _y: f64,
    ) -> trainloop_core::Result<ScriptedOutput> {
        model.events.borrow_mut().push(Event::Forward(model.step));
        Ok(ScriptedOutput { loss: 1.0 / (x + 1.0) })
    }

    fn get_metrics_dict(&self, outputs: &ScriptedOutput) -> Metrics {
        Metrics::from([("loss".to_string(), outputs.loss())])
    }

    fn test_procedure(
        &mut self,
        model: &mut ScriptedModel,
        _test_loader: &mut RangeLoader,
    ) -> trainloop_core::Result<Metrics> {
        self.events.borrow_mut().push(Event::Test {
            step: model.global_step(),
            training: model.is_training(),
        });
        if self.fail_test {
            return Err(TrainError::experiment("test set unavailable"));
        }
        Ok(Metrics::from([("loss".to_string(), 0.25)]))
    }

    fn print_train_log(&self, _step: u64, _epoch: u64, _summaries: &Metrics) {
        self.snapshot();
    }

    fn print_test_log(&self, _summaries: &Metrics, _step: u64, _epoch: u64) {
        self.snapshot();
    }
}

fn args_in(root: &Path) -> TrainingArgs {
    TrainingArgs {
        checkpoint_interval: 4,
        test_log_interval: 2,
        log_interval: 3,
        max_epochs: 2,
        output_root: root.to_path_buf(),
        ..Default::default()
    }
}

fn events_of(trainer: &Trainer<ScriptedExperiment>) -> Vec<Event> {
    trainer.experiment().events.borrow().clone()
}

#[test]
fn test_checkpoint_interval_must_be_multiple_of_test_interval() {
    let dir = tempfile::tempdir().unwrap();
    let args = TrainingArgs {
        checkpoint_interval: 5,
        ..args_in(dir.path())
    };
    let result = Trainer::with_date(ScriptedExperiment::new(args, 4), true, DATE);
    assert!(matches!(result, Err(TrainError::Config(_))));
    // Validation runs before any folder is created.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let args = TrainingArgs {
        dry_run: true,
        ..args_in(dir.path())
    };
    let mut trainer = Trainer::with_date(ScriptedExperiment::new(args, 5), true, DATE).unwrap();
    let summary = trainer.run().unwrap();

    assert_eq!(summary.global_step, 10);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    // Checkpoints are skipped, histories are still kept in memory.
    assert!(!events_of(&trainer).contains(&Event::Checkpoint(4)));
    assert_eq!(trainer.train_history().len(), 3);
}

#[test]
fn test_train_history_has_one_record_per_log_interval() {
    let dir = tempfile::tempdir().unwrap();
    // 2 epochs of 10 batches, log every 3 steps.
    let args = TrainingArgs {
        checkpoint_interval: 10,
        test_log_interval: 5,
        ..args_in(dir.path())
    };
    let mut trainer = Trainer::with_date(ScriptedExperiment::new(args, 10), true, DATE).unwrap();
    let summary = trainer.run().unwrap();

    assert_eq!(summary.global_step, 20);
    assert_eq!(summary.epochs_completed, 2);
    let steps: Vec<u64> = trainer
        .train_history()
        .records()
        .iter()
        .map(|r| r.step)
        .collect();
    assert_eq!(steps, vec![3, 6, 9, 12, 15, 18]);
    assert_eq!(summary.train_records, 6);
}

#[test]
fn test_persisted_log_only_grows() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer =
        Trainer::with_date(ScriptedExperiment::new(args_in(dir.path()), 7), true, DATE).unwrap();
    trainer.run().unwrap();

    let mut snapshots = trainer.experiment().snapshots.borrow().clone();
    let final_log: RunLog = load_json(&trainer.layout().log_path).unwrap().unwrap();
    snapshots.push(final_log.clone());
    assert!(snapshots.len() > 2);

    fn extends(before: &Series, after: &Series) -> bool {
        before
            .iter()
            .all(|(name, points)| after.get(name).is_some_and(|p| p.starts_with(points)))
    }

    for pair in snapshots.windows(2) {
        assert!(extends(&pair[0].train, &pair[1].train));
        assert!(extends(&pair[0].test, &pair[1].test));
    }

    // 14 steps, log every 3 steps; test every 2 steps starting at step 0.
    assert_eq!(final_log.train["loss"].len(), 4);
    assert_eq!(final_log.test["loss"].len(), 7);
}

#[test]
fn test_model_in_eval_mode_during_test_and_train_mode_after() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer =
        Trainer::with_date(ScriptedExperiment::new(args_in(dir.path()), 4), true, DATE).unwrap();
    trainer.run().unwrap();

    let tests: Vec<Event> = events_of(&trainer)
        .into_iter()
        .filter(|e| matches!(e, Event::Test { .. }))
        .collect();
    assert_eq!(
        tests,
        vec![
            Event::Test { step: 0, training: false },
            Event::Test { step: 2, training: false },
            Event::Test { step: 4, training: false },
            Event::Test { step: 6, training: false },
        ]
    );
    assert!(trainer.model().is_training());
}

#[test]
fn test_failed_test_pass_restores_train_mode() {
    let dir = tempfile::tempdir().unwrap();
    let mut experiment = ScriptedExperiment::new(args_in(dir.path()), 4);
    experiment.fail_test = true;
    let mut trainer = Trainer::with_date(experiment, true, DATE).unwrap();

    let err = trainer.run().unwrap_err();
    assert!(matches!(err, TrainError::Experiment(_)));
    assert!(trainer.model().is_training());
    assert_eq!(trainer.model().global_step(), 0);
}

#[test]
fn test_checkpoints_only_on_positive_multiples() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer =
        Trainer::with_date(ScriptedExperiment::new(args_in(dir.path()), 5), true, DATE).unwrap();
    trainer.run().unwrap();

    let checkpoints: Vec<Event> = events_of(&trainer)
        .into_iter()
        .filter(|e| matches!(e, Event::Checkpoint(_)))
        .collect();
    assert_eq!(checkpoints, vec![Event::Checkpoint(4), Event::Checkpoint(8)]);

    let folder = &trainer.layout().checkpoint_folder;
    assert!(folder.join("model_4.txt").exists());
    assert!(folder.join("model_8.txt").exists());
    assert!(!folder.join("model_0.txt").exists());
}

#[test]
fn test_step_sequence_order() {
    let dir = tempfile::tempdir().unwrap();
    let args = TrainingArgs {
        max_epochs: 1,
        ..args_in(dir.path())
    };
    let mut trainer = Trainer::with_date(ScriptedExperiment::new(args, 1), true, DATE).unwrap();
    trainer.run().unwrap();

    assert_eq!(
        events_of(&trainer),
        vec![
            Event::Test { step: 0, training: false },
            Event::ZeroGrad,
            Event::Forward(0),
            Event::Backward,
            Event::Step,
        ]
    );
}

#[test]
fn test_run_folders_and_config_are_created() {
    let dir = tempfile::tempdir().unwrap();
    let args = args_in(dir.path());
    let trainer =
        Trainer::with_date(ScriptedExperiment::new(args.clone(), 3), true, DATE).unwrap();

    let layout = trainer.layout();
    assert_eq!(layout.run_name, "240101_120000_scripted");
    assert!(layout.img_folder.is_dir());
    assert!(layout.tensorboard_folder.is_dir());

    let saved: TrainingArgs = load_json(&layout.config_path).unwrap().unwrap();
    assert_eq!(saved, args);
}

#[test]
fn test_existing_run_folder_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    Trainer::with_date(ScriptedExperiment::new(args_in(dir.path()), 3), true, DATE).unwrap();

    let second = Trainer::with_date(ScriptedExperiment::new(args_in(dir.path()), 3), true, DATE);
    assert!(matches!(second, Err(TrainError::RunExists { .. })));
}

#[test]
fn test_scalars_are_prefixed_by_phase() {
    let dir = tempfile::tempdir().unwrap();
    let args = TrainingArgs {
        max_epochs: 1,
        ..args_in(dir.path())
    };
    let mut trainer = Trainer::with_date(ScriptedExperiment::new(args, 3), true, DATE).unwrap();
    trainer.run().unwrap();

    let path = trainer.layout().tensorboard_folder.join("scalars.jsonl");
    let events: Vec<ScalarEvent> = std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let tags: Vec<(&str, u64)> = events.iter().map(|e| (e.tag.as_str(), e.step)).collect();
    assert_eq!(
        tags,
        vec![
            ("validation_loss", 0),
            ("validation_loss", 2),
            ("train_loss", 3),
        ]
    );
}

#[test]
fn test_no_tensorboard_folder_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let args = TrainingArgs {
        tensorboard: false,
        ..args_in(dir.path())
    };
    let mut trainer = Trainer::with_date(ScriptedExperiment::new(args, 3), true, DATE).unwrap();
    trainer.run().unwrap();
    assert!(!trainer.layout().tensorboard_folder.exists());
    assert!(trainer.layout().log_path.exists());
}

#[test]
fn test_without_optimizer_only_testing_is_possible() {
    let dir = tempfile::tempdir().unwrap();
    let mut trainer =
        Trainer::with_date(ScriptedExperiment::new(args_in(dir.path()), 3), false, DATE).unwrap();

    assert!(matches!(
        trainer.run(),
        Err(TrainError::IncompleteExperiment(_))
    ));
    let metrics = trainer.test(1).unwrap();
    assert_eq!(metrics["loss"], 0.25);
    assert_eq!(trainer.test_history().len(), 1);
}

#[test]
fn test_empty_run_description_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut experiment = ScriptedExperiment::new(args_in(dir.path()), 3);
    experiment.description.clear();
    let result = Trainer::with_date(experiment, true, DATE);
    assert!(matches!(result, Err(TrainError::IncompleteExperiment(_))));
}

#[test]
fn test_device_selection() {
    let dir = tempfile::tempdir().unwrap();
    let args = TrainingArgs {
        dry_run: true,
        ..args_in(dir.path())
    };

    let mut experiment = ScriptedExperiment::new(args.clone(), 1);
    experiment.cuda = true;
    let trainer = Trainer::with_date(experiment, true, DATE).unwrap();
    assert_eq!(trainer.device(), Device::Cuda(0));
    assert_eq!(trainer.experiment().device, Some(Device::Cuda(0)));

    let mut experiment = ScriptedExperiment::new(
        TrainingArgs {
            no_cuda: true,
            ..args
        },
        1,
    );
    experiment.cuda = true;
    let trainer = Trainer::with_date(experiment, true, DATE).unwrap();
    assert_eq!(trainer.device(), Device::Cpu);
}

struct CollectingSink {
    events: Rc<RefCell<Vec<(String, u64)>>>,
}

impl trainloop_core::ScalarSink for CollectingSink {
    fn add_scalar(&mut self, tag: &str, _value: f64, step: u64) -> trainloop_core::Result<()> {
        self.events.borrow_mut().push((tag.to_string(), step));
        Ok(())
    }
}

#[test]
fn test_custom_scalar_sink_receives_scalars() {
    let dir = tempfile::tempdir().unwrap();
    let args = TrainingArgs {
        max_epochs: 1,
        tensorboard: false,
        ..args_in(dir.path())
    };
    let mut trainer = Trainer::with_date(ScriptedExperiment::new(args, 6), true, DATE).unwrap();
    let events = Rc::new(RefCell::new(Vec::new()));
    trainer.set_scalar_sink(Box::new(CollectingSink {
        events: events.clone(),
    }));
    trainer.run().unwrap();

    let train_steps: Vec<u64> = events
        .borrow()
        .iter()
        .filter(|(tag, _)| tag == "train_loss")
        .map(|(_, step)| *step)
        .collect();
    assert_eq!(train_steps, vec![3, 6]);
}

#[test]
fn test_experiment_that_drops_the_device_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let args = TrainingArgs {
        dry_run: true,
        ..args_in(dir.path())
    };
    let mut experiment = ScriptedExperiment::new(args, 1);
    experiment.ignore_device = true;

    let result = Trainer::with_date(experiment, true, DATE);
    match result {
        Err(TrainError::IncompleteExperiment(msg)) => assert!(msg.contains("device")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("experiment without a device was accepted"),
    }
}
