//! Result of barcode whitelist detection.

use crate::errors::InferenceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferenceStatus {
    Resolved,
    Inconclusive,
}

/// The whitelist a sample was matched to, with its declared read layout.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ResolvedWhitelist {
    pub name: String,
    pub path: PathBuf,
    pub barcode_length: usize,
    pub umi_length: usize,
}

/// Outcome of whitelist detection for one sample.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InferenceResult {
    pub sample: String,
    pub status: InferenceStatus,
    /// Present only when resolved.
    pub whitelist: Option<ResolvedWhitelist>,
    /// Match rate of the winner, or the best seen when inconclusive.
    pub confidence: f64,
    /// Name of the best candidate, even when inconclusive.
    pub best_candidate: Option<String>,
    pub match_rates: BTreeMap<String, f64>,
    pub reads_sampled: usize,
    /// False if sampled R1 reads differ in length.
    pub uniform_read_length: bool,
}

impl InferenceResult {
    pub fn is_resolved(&self) -> bool {
        self.status == InferenceStatus::Resolved
    }

    pub fn whitelist_name(&self) -> Option<&str> {
        self.whitelist.as_ref().map(|wl| wl.name.as_str())
    }

    /// The error to report for this sample, if detection did not resolve.
    pub fn to_error(&self) -> Option<InferenceError> {
        (!self.is_resolved()).then(|| InferenceError::Inconclusive {
            best: self.best_candidate.clone(),
            best_rate: self.confidence,
        })
    }
}
