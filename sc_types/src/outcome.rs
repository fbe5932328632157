//! Per-sample terminal outcomes and the run report.

use crate::attempt::AttemptRecord;
use crate::errors::StageError;
use crate::inference::InferenceResult;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// The stages a sample goes through, in order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Download,
    Grouping,
    Inference,
    Mapping,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStage::Download => "download",
            PipelineStage::Grouping => "grouping",
            PipelineStage::Inference => "inference",
            PipelineStage::Mapping => "mapping",
        })
    }
}

/// Terminal status of a sample. Skipped and Failed always carry a reason.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum SampleStatus {
    Completed,
    Skipped(String),
    Failed(String),
}

fn non_empty(reason: String) -> String {
    if reason.trim().is_empty() {
        "unspecified error".to_string()
    } else {
        reason
    }
}

impl SampleStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        SampleStatus::Skipped(non_empty(reason.into()))
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        SampleStatus::Failed(non_empty(reason.into()))
    }

    /// Skipped or Failed, depending on the severity of the error. The reason
    /// carries the whole chain of causes.
    pub fn from_error(err: &StageError) -> Self {
        let chain = std::iter::successors(Some(err as &dyn Error), |&e| e.source());
        let reason = chain.format(": ").to_string();
        if err.is_skip() {
            SampleStatus::skipped(reason)
        } else {
            SampleStatus::failed(reason)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SampleStatus::Completed => "Completed",
            SampleStatus::Skipped(_) => "Skipped",
            SampleStatus::Failed(_) => "Failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SampleStatus::Completed => None,
            SampleStatus::Skipped(reason) | SampleStatus::Failed(reason) => Some(reason),
        }
    }
}

/// Everything the coordinator learned about one sample.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SampleOutcome {
    pub sample: String,
    pub status: SampleStatus,
    /// The last stage the sample entered.
    pub stage: PipelineStage,
    pub inference: Option<InferenceResult>,
    pub download_attempts: u32,
    pub mapping_attempts: u32,
    /// Location of the alignment output, once completed.
    pub output: Option<PathBuf>,
    pub attempts: Vec<AttemptRecord>,
}

impl SampleOutcome {
    pub fn new(sample: impl Into<String>) -> Self {
        SampleOutcome {
            sample: sample.into(),
            status: SampleStatus::Completed,
            stage: PipelineStage::Download,
            inference: None,
            download_attempts: 0,
            mapping_attempts: 0,
            output: None,
            attempts: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SampleStatus::Completed
    }

    /// Flatten into a row of the run summary.
    pub fn summary_row(&self) -> SummaryRow {
        let resolved = self.inference.as_ref().and_then(|inf| inf.whitelist.as_ref());
        SummaryRow {
            sample: self.sample.clone(),
            status: self.status.label().to_string(),
            stage: self.stage,
            whitelist: resolved.map(|wl| wl.name.clone()),
            confidence: self.inference.as_ref().map(|inf| inf.confidence),
            barcode_length: resolved.map(|wl| wl.barcode_length),
            umi_length: resolved.map(|wl| wl.umi_length),
            download_attempts: self.download_attempts,
            mapping_attempts: self.mapping_attempts,
            output: self.output.as_ref().map(|p| p.display().to_string()),
            reason: self.status.reason().map(str::to_string),
        }
    }
}

/// One row of `run_summary.csv`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SummaryRow {
    pub sample: String,
    pub status: String,
    pub stage: PipelineStage,
    pub whitelist: Option<String>,
    pub confidence: Option<f64>,
    pub barcode_length: Option<usize>,
    pub umi_length: Option<usize>,
    pub download_attempts: u32,
    pub mapping_attempts: u32,
    pub output: Option<String>,
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Aggregated outcomes of a run, sorted by sample id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunReport {
    pub outcomes: Vec<SampleOutcome>,
}

impl RunReport {
    pub fn new(mut outcomes: Vec<SampleOutcome>) -> Self {
        outcomes.sort_by(|a, b| a.sample.cmp(&b.sample));
        RunReport { outcomes }
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for outcome in &self.outcomes {
            match outcome.status {
                SampleStatus::Completed => counts.completed += 1,
                SampleStatus::Skipped(_) => counts.skipped += 1,
                SampleStatus::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }

    /// A run succeeds if at least one sample completed.
    pub fn is_success(&self) -> bool {
        self.counts().completed > 0
    }

    pub fn outcome(&self, sample: &str) -> Option<&SampleOutcome> {
        self.outcomes.iter().find(|o| o.sample == sample)
    }
}

impl fmt::Display for RunCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} skipped, {} failed",
            self.completed, self.skipped, self.failed
        )
    }
}
