//! Training arguments and their layered loading.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit config file -> environment (`TRAINLOOP_*`) -> explicit overrides.
//! Only the override fields that are set take part in the merge.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::TrainError;

/// Arguments that drive a training run.
///
/// These are persisted verbatim to `checkpoints/<run>/config.json` when a run
/// starts, so every field must stay serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingArgs {
    /// Save a model checkpoint every this many steps. Must be a multiple of
    /// `test_log_interval`.
    pub checkpoint_interval: u64,
    /// Run the evaluation pass every this many steps.
    pub test_log_interval: u64,
    /// Flush training summaries every this many steps.
    pub log_interval: u64,
    /// Seed for the run's random number generator.
    pub seed: u64,
    /// Force CPU even when the experiment reports an accelerator.
    pub no_cuda: bool,
    /// Run the loop without creating folders or writing any files.
    pub dry_run: bool,
    /// Number of passes over the training loader.
    pub max_epochs: u64,
    /// Write scalars to `tensorboard_logs/<run>/`.
    pub tensorboard: bool,
    /// Base directory holding `results/`, `checkpoints/` and `tensorboard_logs/`.
    pub output_root: PathBuf,
    /// Depth at which parameter names are grouped in the parameter summary.
    pub model_print_depth: Option<usize>,
    /// Window length of the training-metric moving average.
    pub ma_length: usize,
}

impl Default for TrainingArgs {
    fn default() -> Self {
        Self {
            checkpoint_interval: 1000,
            test_log_interval: 500,
            log_interval: 100,
            seed: 54321,
            no_cuda: false,
            dry_run: false,
            max_epochs: 10,
            tensorboard: true,
            output_root: PathBuf::from("."),
            model_print_depth: Some(3),
            ma_length: 1000,
        }
    }
}

impl TrainingArgs {
    /// Check the cadence invariants the training loop relies on.
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.log_interval == 0 || self.test_log_interval == 0 || self.checkpoint_interval == 0
        {
            return Err(TrainError::config(
                "log_interval, test_log_interval and checkpoint_interval must be positive",
            ));
        }
        if self.checkpoint_interval % self.test_log_interval != 0 {
            return Err(TrainError::config(format!(
                "checkpoint_interval ({}) must be a multiple of test_log_interval ({})",
                self.checkpoint_interval, self.test_log_interval
            )));
        }
        if self.max_epochs == 0 {
            return Err(TrainError::config("max_epochs must be at least 1"));
        }
        if self.ma_length == 0 {
            return Err(TrainError::config("ma_length must be positive"));
        }
        Ok(())
    }
}

/// Explicitly set values, typically from command-line flags.
///
/// `None` fields are left out of the merge, so they never mask a value from
/// the config file or the environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_log_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_cuda: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_epochs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tensorboard: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_print_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ma_length: Option<usize>,
}

/// Load training arguments using layered configuration.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (`TRAINLOOP_LOG_INTERVAL`, `TRAINLOOP_DRY_RUN`, ...)
/// 3. Explicit config file
/// 4. User config (`~/.config/trainloop/config.toml`)
/// 5. Defaults
///
/// An explicit config file that does not exist is an error.
pub fn load_args(
    config_file: Option<&Path>,
    overrides: Option<&ArgOverrides>,
) -> Result<TrainingArgs, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TrainingArgs::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(file) = config_file {
        if !file.is_file() {
            return Err(Box::new(figment::Error::from(format!(
                "config file not found: {}",
                file.display()
            ))));
        }
        figment = figment.merge(Toml::file(file));
    }

    figment = figment.merge(Env::prefixed("TRAINLOOP_"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Location of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "trainloop", "trainloop")
        .map(|d| d.config_dir().join("config.toml"))
}
