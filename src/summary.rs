//! Scalar Summaries
//!
//! Sinks for the per-step scalars the training op emits. The driver picks
//! one: a CSV file for later analysis, or an in-memory buffer for tests and
//! notebooks.
//!
//! ## CSV Format
//!
//! [`CsvSummaryWriter`] writes one row per scalar with the columns:
//! - `step`: global step the value belongs to
//! - `elapsed_seconds`: time since the writer was created
//! - `tag`: metric name, e.g. `loss`
//! - `value`: the scalar
//! - `perplexity`: `exp(value)` for `cross_entropy` rows, empty otherwise
//!
//! Only the unregularised mean cross-entropy gets a perplexity; the `loss`
//! row may include an entropy term.
//!
//! Rows are flushed as they are written, so a crashed run keeps its history.
//!
//! ## Example
//!
//! ```rust
//! use recurrent_lm::{MemorySummary, ScalarSummary};
//!
//! let mut summary = MemorySummary::default();
//! summary.scalar("loss", 1, 2.5).unwrap();
//! assert_eq!(summary.values("loss"), vec![2.5]);
//! ```

use crate::error::Result;
use csv::Writer;
use log::info;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use std::time::Instant;

/// Tag under which the training op reports its loss
pub const LOSS_TAG: &str = "loss";

/// Tag for the mean cross-entropy without regularisation
pub const CROSS_ENTROPY_TAG: &str = "cross_entropy";

/// Destination for scalar metrics
pub trait ScalarSummary {
    fn scalar(&mut self, tag: &str, step: usize, value: f32) -> Result<()>;
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    step: usize,
    elapsed_seconds: f32,
    tag: &'a str,
    value: f32,
    perplexity: Option<f32>,
}

/// Writes scalars to a CSV file and echoes them through `log`
pub struct CsvSummaryWriter {
    writer: Writer<File>,
    start_time: Instant,
    last_log_time: Instant,
}

impl CsvSummaryWriter {
    /// Create (or truncate) `path` and write the header row
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let writer = Writer::from_path(path)?;
        let now = Instant::now();
        Ok(Self {
            writer,
            start_time: now,
            last_log_time: now,
        })
    }
}

impl ScalarSummary for CsvSummaryWriter {
    fn scalar(&mut self, tag: &str, step: usize, value: f32) -> Result<()> {
        let elapsed = self.start_time.elapsed().as_secs_f32();
        let perplexity = (tag == CROSS_ENTROPY_TAG).then(|| value.exp());

        self.writer.serialize(SummaryRow {
            step,
            elapsed_seconds: elapsed,
            tag,
            value,
            perplexity,
        })?;
        self.writer.flush()?;

        let step_time = self.last_log_time.elapsed().as_secs_f32();
        match perplexity {
            Some(ppl) => info!(
                "Step {:4} | Time: {:7.1}s (+{:.1}s) | {}: {:.4} | Perplexity: {:.2}",
                step, elapsed, step_time, tag, value, ppl
            ),
            None => info!(
                "Step {:4} | Time: {:7.1}s (+{:.1}s) | {}: {:.4}",
                step, elapsed, step_time, tag, value
            ),
        }
        self.last_log_time = Instant::now();
        Ok(())
    }
}

/// One recorded scalar
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarRecord {
    pub tag: String,
    pub step: usize,
    pub value: f32,
}

/// Keeps every scalar in memory
#[derive(Default, Debug)]
pub struct MemorySummary {
    pub records: Vec<ScalarRecord>,
}

impl MemorySummary {
    /// Values recorded under `tag`, in emission order
    pub fn values(&self, tag: &str) -> Vec<f32> {
        self.records
            .iter()
            .filter(|r| r.tag == tag)
            .map(|r| r.value)
            .collect()
    }
}

impl ScalarSummary for MemorySummary {
    fn scalar(&mut self, tag: &str, step: usize, value: f32) -> Result<()> {
        self.records.push(ScalarRecord {
            tag: tag.to_string(),
            step,
            value,
        });
        Ok(())
    }
}

/// Discards everything
#[derive(Default, Debug, Clone, Copy)]
pub struct NullSummary;

impl ScalarSummary for NullSummary {
    fn scalar(&mut self, _tag: &str, _step: usize, _value: f32) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_rows_and_perplexity_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        {
            let mut writer = CsvSummaryWriter::create(&path).unwrap();
            writer.scalar(CROSS_ENTROPY_TAG, 1, 0.0).unwrap();
            writer.scalar(LOSS_TAG, 1, 3.5).unwrap();
        }

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["step", "elapsed_seconds", "tag", "value", "perplexity"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], CROSS_ENTROPY_TAG);
        assert_eq!(rows[0][4].parse::<f32>().unwrap(), 1.0);
        assert_eq!(&rows[1][2], LOSS_TAG);
        assert_eq!(&rows[1][4], "");
    }

    #[test]
    fn test_memory_summary_filters_by_tag() {
        let mut summary = MemorySummary::default();
        summary.scalar(LOSS_TAG, 1, 3.0).unwrap();
        summary.scalar("other", 1, 9.0).unwrap();
        summary.scalar(LOSS_TAG, 2, 2.0).unwrap();
        assert_eq!(summary.values(LOSS_TAG), vec![3.0, 2.0]);
        assert_eq!(summary.records[2].step, 2);
    }
}
