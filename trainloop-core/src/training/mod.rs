//! Training infrastructure: the driver, metric histories, summarizers and run layout.

pub mod history;
pub mod layout;
pub mod summarize;
pub mod trainer;

pub use history::{History, HistoryRecord, RunLog, Series};
pub use layout::{RunLayout, date_str};
pub use summarize::{Summarizer, SummarizerCollection, SummaryMode};
pub use trainer::{RunSummary, Trainer};
