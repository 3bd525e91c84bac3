//! On-disk layout of a training run.
//!
//! ```text
//! <root>/results/<date>_<description>/imgs/
//! <root>/results/<date>_<description>/log.json
//! <root>/checkpoints/<date>_<description>/config.json
//! <root>/tensorboard_logs/<date>_<description>/scalars.jsonl
//! ```

use std::path::{Path, PathBuf};

use crate::error::{Result, TrainError};

/// Timestamp used as the prefix of run folder names, e.g. `240131_235959`.
pub fn date_str() -> String {
    chrono::Local::now().format("%y%m%d_%H%M%S").to_string()
}

/// Paths derived from a run's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub run_name: String,
    pub result_folder: PathBuf,
    pub img_folder: PathBuf,
    pub checkpoint_folder: PathBuf,
    pub tensorboard_folder: PathBuf,
    pub log_path: PathBuf,
    pub config_path: PathBuf,
}

impl RunLayout {
    pub fn new(root: &Path, date: &str, description: &str) -> Self {
        let run_name = format!("{date}_{description}");
        let result_folder = root.join("results").join(&run_name);
        let checkpoint_folder = root.join("checkpoints").join(&run_name);
        Self {
            img_folder: result_folder.join("imgs"),
            log_path: result_folder.join("log.json"),
            config_path: checkpoint_folder.join("config.json"),
            tensorboard_folder: root.join("tensorboard_logs").join(&run_name),
            result_folder,
            checkpoint_folder,
            run_name,
        }
    }

    /// Create the run folders. Fails if any of them already exists.
    pub fn create(&self, with_tensorboard: bool) -> Result<()> {
        make_new_dir(&self.result_folder)?;
        make_new_dir(&self.img_folder)?;
        make_new_dir(&self.checkpoint_folder)?;
        if with_tensorboard {
            make_new_dir(&self.tensorboard_folder)?;
        }
        Ok(())
    }
}

/// Create `path` itself with `create_dir`, so an existing folder is reported
/// rather than reused. Missing parents are created.
fn make_new_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(TrainError::RunExists {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}
