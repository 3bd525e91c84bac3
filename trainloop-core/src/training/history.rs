//! Append-only, step-indexed metric histories.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::experiment::Metrics;

/// Metric name to its ordered `(step, value)` pairs.
pub type Series = BTreeMap<String, Vec<(u64, f64)>>;

/// One logged snapshot of metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub step: u64,
    pub metrics: Metrics,
}

/// Ordered sequence of metric snapshots keyed by step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    records: Vec<HistoryRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot taken at `step`.
    pub fn add(&mut self, metrics: &Metrics, step: u64) {
        self.records.push(HistoryRecord {
            step,
            metrics: metrics.clone(),
        });
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_step(&self) -> Option<u64> {
        self.records.last().map(|r| r.step)
    }

    /// Regroup the records by metric name.
    ///
    /// A metric missing from some snapshots simply has fewer points.
    pub fn to_series(&self) -> Series {
        let mut series = Series::new();
        for record in &self.records {
            for (name, value) in &record.metrics {
                series
                    .entry(name.clone())
                    .or_default()
                    .push((record.step, *value));
            }
        }
        series
    }
}

/// On-disk content of `results/<run>/log.json`.
///
/// Each point is a `[step, value]` pair. NaN and infinite values are kept
/// as strings, see [`crate::persistence::non_finite`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    #[serde(with = "series_format")]
    pub train: Series,
    #[serde(with = "series_format")]
    pub test: Series,
}

impl RunLog {
    pub fn from_histories(train: &History, test: &History) -> Self {
        Self {
            train: train.to_series(),
            test: test.to_series(),
        }
    }
}

mod series_format {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    use super::Series;

    #[derive(Serialize, Deserialize)]
    struct Point(u64, #[serde(with = "crate::persistence::non_finite")] f64);

    pub fn serialize<S: Serializer>(series: &Series, serializer: S) -> Result<S::Ok, S::Error> {
        let points: BTreeMap<&str, Vec<Point>> = series
            .iter()
            .map(|(name, values)| {
                let values = values.iter().map(|&(step, v)| Point(step, v)).collect();
                (name.as_str(), values)
            })
            .collect();
        points.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Series, D::Error> {
        let points = BTreeMap::<String, Vec<Point>>::deserialize(deserializer)?;
        Ok(points
            .into_iter()
            .map(|(name, values)| {
                let values = values.into_iter().map(|Point(step, v)| (step, v)).collect();
                (name, values)
            })
            .collect())
    }
}
