//! CLI subcommand handlers.

use trainloop_core::{ArgOverrides, Trainer, TrainingArgs};

use crate::RunArgs;
use crate::demo::{DemoSettings, LinearRegression};

/// Train the demo experiment with `args`, which already include the run flags.
pub fn handle_run(run: RunArgs, args: TrainingArgs) -> anyhow::Result<()> {
    let settings = DemoSettings {
        features: run.features,
        train_samples: run.train_samples,
        test_samples: run.test_samples,
        batch_size: run.batch_size,
        learning_rate: run.lr,
        ..Default::default()
    };

    let experiment = LinearRegression::new(args, run.description, settings);
    let mut trainer = Trainer::new(experiment, true)?;
    let summary = trainer.run()?;

    tracing::info!(
        epochs = summary.epochs_completed,
        global_step = summary.global_step,
        train_records = summary.train_records,
        test_records = summary.test_records,
        "Training finished"
    );
    if !trainer.args().dry_run {
        println!("Results: {}", trainer.layout().result_folder.display());
        println!("Checkpoints: {}", trainer.layout().checkpoint_folder.display());
    }
    Ok(())
}

/// Print the resolved configuration.
pub fn handle_config(args: &TrainingArgs) -> anyhow::Result<()> {
    let toml_str = toml::to_string_pretty(args)?;
    println!("{}", toml_str);
    Ok(())
}

/// Training arguments set by `run` flags. Flags that were not given stay unset.
pub fn run_overrides(run: &RunArgs) -> ArgOverrides {
    ArgOverrides {
        dry_run: run.dry_run.then_some(true),
        tensorboard: run.no_tensorboard.then_some(false),
        max_epochs: run.max_epochs,
        output_root: run.output_root.clone(),
        seed: run.seed,
        ..Default::default()
    }
}
