//! Error taxonomy of the pipeline.
//!
//! `InputError` is the only run-fatal kind. Every other error is scoped to a
//! single sample and is turned into that sample's outcome.
#![deny(missing_docs)]

use crate::outcome::PipelineStage;
use itertools::Itertools;
use std::io;
use std::path::PathBuf;

/// The manifest or the whitelist catalog could not be used.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// The manifest file could not be opened or read.
    #[error("could not read manifest {}", path.display())]
    Unreadable {
        /// Manifest path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The manifest is not a valid tab-separated table.
    #[error("malformed manifest {}", path.display())]
    Malformed {
        /// Manifest path.
        path: PathBuf,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },
    /// None of the sample identifier columns is present.
    #[error(
        "manifest {} has none of the sample identifier columns: {}",
        path.display(),
        candidates.iter().format(", ")
    )]
    MissingIdColumn {
        /// Manifest path.
        path: PathBuf,
        /// Columns that were searched for.
        candidates: Vec<String>,
    },
    /// The manifest has a header but no sample rows.
    #[error("manifest {} does not describe any samples", path.display())]
    NoSamples {
        /// Manifest path.
        path: PathBuf,
    },
    /// A whitelist file could not be read.
    #[error("could not read whitelist {}", path.display())]
    WhitelistUnreadable {
        /// Whitelist path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The whitelist catalog is inconsistent.
    #[error("invalid whitelist catalog {}: {reason}", path.display())]
    InvalidCatalog {
        /// Catalog directory or file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
    /// No whitelist candidates were found.
    #[error("no whitelist candidates found in {}", path.display())]
    EmptyCatalog {
        /// Catalog directory.
        path: PathBuf,
    },
}

/// Fetching the read files of one sample failed.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The manifest lists no read-file locators for the sample.
    #[error("no read-file locators listed for sample {sample}")]
    NoLocators {
        /// Sample identifier.
        sample: String,
    },
    /// The locator cannot be turned into a URL.
    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator {
        /// Locator as written in the manifest.
        locator: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Every attempt ended in a transient failure.
    #[error("download of {locator} failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        /// Locator being fetched.
        locator: String,
        /// Number of attempts made.
        attempts: u32,
        /// Diagnostic of the final attempt.
        last_error: String,
    },
    /// The run was interrupted while the file was being fetched.
    #[error("run aborted while downloading {locator} (attempt {attempts}: {last_error})")]
    Interrupted {
        /// Locator being fetched.
        locator: String,
        /// Number of attempts made.
        attempts: u32,
        /// Diagnostic of the interrupted attempt.
        last_error: String,
    },
    /// The sample's download directory could not be created.
    #[error("could not prepare download directory {}", path.display())]
    Destination {
        /// Destination directory.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// The files of a sample do not form a read pair.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GroupingError {
    /// Anything but two files were found for the sample.
    #[error("expected 2 read files (R1 and R2) for sample {sample}, found {count}")]
    UnexpectedFileCount {
        /// Sample identifier.
        sample: String,
        /// Number of files found.
        count: usize,
    },
    /// Two files were found, but not one R1 and one R2.
    #[error(
        "read files of sample {sample} are not an R1/R2 pair: {}",
        files.iter().format(", ")
    )]
    UnpairedReads {
        /// Sample identifier.
        sample: String,
        /// File names involved.
        files: Vec<String>,
    },
    /// The downloaded files belong to several other samples.
    #[error(
        "no read files named after sample {sample}; found files for {}",
        found.iter().format(", ")
    )]
    UnmatchedSample {
        /// Sample identifier.
        sample: String,
        /// Identifiers derived from the file names.
        found: Vec<String>,
    },
}

/// Barcode whitelist detection failed for a sample.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The R1 file has no reads.
    #[error("read file {} contains no reads", path.display())]
    EmptyReadFile {
        /// R1 path.
        path: PathBuf,
    },
    /// No candidate cleared the confidence threshold, or the best ones were tied.
    #[error(
        "no whitelist matched confidently (best {}: {:.1}% of reads)",
        best.as_deref().unwrap_or("none"),
        100.0 * best_rate
    )]
    Inconclusive {
        /// Best candidate seen, if any.
        best: Option<String>,
        /// Its match rate.
        best_rate: f64,
    },
    /// The R1 file is unreadable or not FASTQ.
    #[error("could not read {}: {reason}", path.display())]
    ReadFile {
        /// R1 path.
        path: PathBuf,
        /// Description of the failure.
        reason: String,
    },
}

/// Alignment of a sample failed.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// The aligner failed for a reason that another attempt cannot fix.
    #[error("aligner failed for sample {sample}: {reason}")]
    Fatal {
        /// Sample identifier.
        sample: String,
        /// Classified diagnostic.
        reason: String,
    },
    /// The aligner ran out of resources on every attempt.
    #[error("aligner exhausted its resources on {attempts} attempts; last: {last_reason}")]
    ExhaustedRetries {
        /// Number of attempts made.
        attempts: u32,
        /// Diagnostic of the final attempt.
        last_reason: String,
    },
    /// The run was interrupted while the aligner was running.
    #[error("run aborted while mapping (attempt {attempts}: {last_reason})")]
    Interrupted {
        /// Number of attempts made.
        attempts: u32,
        /// Diagnostic of the interrupted attempt.
        last_reason: String,
    },
    /// The sample's output directory could not be prepared.
    #[error("could not prepare mapping directory {}", path.display())]
    Destination {
        /// Output directory.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Any per-sample failure, as recorded in the run summary.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Download stage failure.
    #[error(transparent)]
    Download(#[from] DownloadError),
    /// Grouping stage failure.
    #[error(transparent)]
    Grouping(#[from] GroupingError),
    /// Inference stage failure.
    #[error(transparent)]
    Inference(#[from] InferenceError),
    /// Mapping stage failure.
    #[error(transparent)]
    Mapping(#[from] MappingError),
    /// The run was interrupted before the stage started.
    #[error("run aborted before {0}")]
    Aborted(PipelineStage),
}

impl StageError {
    /// True if the sample should be reported as skipped rather than failed.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            StageError::Grouping(_)
                | StageError::Download(DownloadError::NoLocators { .. })
                | StageError::Download(DownloadError::Interrupted { .. })
                | StageError::Mapping(MappingError::Interrupted { .. })
                | StageError::Aborted(_)
        )
    }

    /// The stage at which the error happened.
    pub fn stage(&self) -> PipelineStage {
        match self {
            StageError::Download(_) => PipelineStage::Download,
            StageError::Grouping(_) => PipelineStage::Grouping,
            StageError::Inference(_) => PipelineStage::Inference,
            StageError::Mapping(_) => PipelineStage::Mapping,
            StageError::Aborted(stage) => *stage,
        }
    }
}
