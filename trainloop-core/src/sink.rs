//! Scalar sinks: optional per-step metric streams for dashboards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::persistence::append_json_line;

/// Receives tagged scalar values as training progresses.
pub trait ScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()>;
}

/// One line of `scalars.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub tag: String,
    pub step: u64,
    #[serde(with = "crate::persistence::non_finite")]
    pub value: f64,
    /// Seconds since the Unix epoch.
    pub wall_time: f64,
}

/// Appends scalar events as JSON lines to `<folder>/scalars.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlScalarWriter {
    path: PathBuf,
}

impl JsonlScalarWriter {
    pub const FILE_NAME: &'static str = "scalars.jsonl";

    /// The folder must already exist.
    pub fn new(folder: &Path) -> Self {
        Self {
            path: folder.join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScalarSink for JsonlScalarWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()> {
        let event = ScalarEvent {
            tag: tag.to_string(),
            step,
            value,
            wall_time: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        append_json_line(&self.path, &event)?;
        Ok(())
    }
}
