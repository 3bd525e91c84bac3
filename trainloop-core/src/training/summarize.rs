//! Metric summarizers that smooth per-batch metrics between log flushes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::experiment::Metrics;

/// How a summarizer reduces the values it has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMode {
    /// Mean of the last `length` values. A length of 0 is treated as 1.
    MovingAverage { length: usize },
    /// Mean of every value since the last reset.
    Mean,
    /// Sum of every value since the last reset.
    Sum,
}

/// Accumulator for a single metric.
#[derive(Debug, Clone)]
pub struct Summarizer {
    mode: SummaryMode,
    window: VecDeque<f64>,
    total: f64,
    count: usize,
}

impl Summarizer {
    pub fn new(mode: SummaryMode) -> Self {
        let mode = match mode {
            SummaryMode::MovingAverage { length } => SummaryMode::MovingAverage {
                length: length.max(1),
            },
            other => other,
        };
        Self {
            mode,
            window: VecDeque::new(),
            total: 0.0,
            count: 0,
        }
    }

    pub fn add(&mut self, value: f64) {
        self.count += 1;
        match self.mode {
            SummaryMode::MovingAverage { length } => {
                self.window.push_back(value);
                while self.window.len() > length {
                    self.window.pop_front();
                }
            }
            SummaryMode::Mean | SummaryMode::Sum => self.total += value,
        }
    }

    /// Current summary, or `None` if nothing was added since the last reset.
    pub fn get(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let value = match self.mode {
            SummaryMode::MovingAverage { .. } => {
                self.window.iter().sum::<f64>() / self.window.len() as f64
            }
            SummaryMode::Mean => self.total / self.count as f64,
            SummaryMode::Sum => self.total,
        };
        Some(value)
    }

    /// Number of values added since the last reset.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.total = 0.0;
        self.count = 0;
    }
}

/// One summarizer per metric name, all sharing the same mode.
#[derive(Debug, Clone)]
pub struct SummarizerCollection {
    mode: SummaryMode,
    summarizers: BTreeMap<String, Summarizer>,
}

impl SummarizerCollection {
    pub fn new(mode: SummaryMode) -> Self {
        Self {
            mode,
            summarizers: BTreeMap::new(),
        }
    }

    pub fn moving_average(length: usize) -> Self {
        Self::new(SummaryMode::MovingAverage { length })
    }

    /// Feed one batch worth of metrics. Unseen names get a fresh summarizer.
    pub fn add(&mut self, metrics: &Metrics) {
        for (name, value) in metrics {
            self.summarizers
                .entry(name.clone())
                .or_insert_with(|| Summarizer::new(self.mode))
                .add(*value);
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.summarizers.get(name).and_then(Summarizer::get)
    }

    /// Summaries of every metric seen since the last reset.
    pub fn get_all(&mut self, reset: bool) -> Metrics {
        let summaries = self
            .summarizers
            .iter()
            .filter_map(|(name, s)| s.get().map(|v| (name.clone(), v)))
            .collect();
        if reset {
            self.reset();
        }
        summaries
    }

    pub fn reset(&mut self) {
        self.summarizers.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.summarizers.is_empty()
    }
}
