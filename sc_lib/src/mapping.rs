//! Alignment of one sample with resource escalation.
//!
//! The aligner itself is an [`AlignmentTool`]; the orchestrator decides,
//! after each attempt, whether another attempt with more memory and time
//! could succeed.

use crate::cancel::CancelToken;
use crate::process::ExitKind;
use crate::report::SampleLog;
use crate::retry::{RetryError, RetryPolicy, Step};
use anyhow::Result;
use log::{info, warn};
use sc_types::{
    Allocation, AttemptOutcome, AttemptRecord, FileSet, InferenceResult, MappingError,
    PipelineStage, ResolvedWhitelist, ResourceAllocation,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Diagnostics that mean the aligner ran out of memory.
pub const MEMORY_PATTERNS: [&str; 4] = [
    "std::bad_alloc",
    "not enough memory",
    "out of memory",
    "cannot allocate memory",
];

const SIGKILL: i32 = 9;
const KILLED_EXIT_CODE: i32 = 128 + SIGKILL;

/// Everything the aligner needs for one attempt.
#[derive(Debug, Clone)]
pub struct AlignmentJob<'a> {
    pub file_set: &'a FileSet,
    pub whitelist: &'a ResolvedWhitelist,
    /// False when R1 lengths vary, so the barcode read length cannot be checked.
    pub uniform_read_length: bool,
    pub output_dir: &'a Path,
    pub resources: ResourceAllocation,
    pub attempt: u32,
}

/// What an aligner invocation left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRun {
    pub exit: ExitKind,
    /// Tail of the aligner's log, used to classify failures.
    pub log_excerpt: String,
    /// The count matrix directory, if the aligner produced one.
    pub artifact: Option<PathBuf>,
}

pub trait AlignmentTool: Send + Sync {
    fn name(&self) -> &str;

    /// Run the aligner once. An `Err` means it could not be started at all.
    fn run(&self, job: &AlignmentJob<'_>) -> Result<ToolRun>;
}

/// Classify a finished attempt.
pub fn classify(run: &ToolRun) -> Step<PathBuf, String> {
    let last_line = run.log_excerpt.lines().last().unwrap_or_default();
    let lowered = run.log_excerpt.to_lowercase();
    match run.exit {
        ExitKind::Success => match &run.artifact {
            Some(artifact) => Step::Success(artifact.clone()),
            None => Step::Fatal("aligner exited successfully but produced no count matrix".to_string()),
        },
        ExitKind::TimedOut => Step::Retryable(format!("aligner {}", run.exit)),
        ExitKind::Signal(SIGKILL) | ExitKind::Code(KILLED_EXIT_CODE) => {
            Step::Retryable(format!("aligner {} (likely out of memory)", run.exit))
        }
        _ if MEMORY_PATTERNS.iter().any(|p| lowered.contains(p)) => {
            Step::Retryable(format!("aligner ran out of memory: {last_line}"))
        }
        exit => Step::Fatal(format!("aligner {exit}: {last_line}")),
    }
}

/// Base allocation for the first attempt.
pub fn base_resources(cpus: usize) -> Result<ResourceAllocation> {
    Ok(ResourceAllocation {
        cpus,
        mem_gb: *parameters_toml::mapping_base_mem_gb()?,
        wall_time: Duration::from_secs(60 * *parameters_toml::mapping_base_time_mins()?),
    })
}

/// The outcome of a successful alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingResult {
    pub output: PathBuf,
    pub attempts: u32,
    pub resources: ResourceAllocation,
}

pub struct MappingOrchestrator {
    tool: Box<dyn AlignmentTool>,
    policy: RetryPolicy,
    base: ResourceAllocation,
}

impl MappingOrchestrator {
    pub fn new(tool: Box<dyn AlignmentTool>, policy: RetryPolicy, base: ResourceAllocation) -> Self {
        MappingOrchestrator { tool, policy, base }
    }

    /// Align `file_set` using the whitelist of a resolved `inference`, in
    /// `output_dir`. Each attempt starts from an empty directory and gets
    /// the base memory and wall time multiplied by its attempt number.
    /// Once `cancel` is set a failed attempt is not retried.
    pub fn align(
        &self,
        file_set: &FileSet,
        inference: &InferenceResult,
        output_dir: &Path,
        log: &mut SampleLog,
        cancel: &CancelToken,
    ) -> Result<MappingResult, MappingError> {
        let sample = &file_set.sample;
        let Some(whitelist) = inference.whitelist.as_ref().filter(|_| inference.is_resolved())
        else {
            return Err(MappingError::Fatal {
                sample: sample.clone(),
                reason: "no whitelist was resolved".to_string(),
            });
        };

        let result = self.policy.run(cancel, |attempt| {
            let resources = self.base.for_attempt(attempt);
            info!(
                "{sample}: running {} (attempt {attempt}, {resources})",
                self.tool.name()
            );
            let job = AlignmentJob {
                file_set,
                whitelist,
                uniform_read_length: inference.uniform_read_length,
                output_dir,
                resources,
                attempt,
            };
            let step = self.attempt(&job);
            let (outcome, message) = match &step {
                Step::Success(path) => (AttemptOutcome::Success, path.display().to_string()),
                Step::Retryable(failure) => (AttemptOutcome::RetryableFailure, failure.to_string()),
                Step::Fatal(failure) => (AttemptOutcome::FatalFailure, failure.to_string()),
            };
            if outcome != AttemptOutcome::Success {
                warn!("{sample}: mapping attempt {attempt} failed: {message}");
            }
            log.record_attempt(AttemptRecord {
                sample: sample.clone(),
                stage: PipelineStage::Mapping,
                attempt,
                allocation: Allocation::Mapping(resources),
                outcome,
                message,
            });
            match step {
                Step::Success(path) => Step::Success((path, resources)),
                Step::Retryable(failure) => Step::Retryable(failure),
                Step::Fatal(failure) => Step::Fatal(failure),
            }
        });

        match result {
            Ok(((output, resources), attempts)) => Ok(MappingResult {
                output,
                attempts,
                resources,
            }),
            Err(RetryError::Exhausted { attempts, last }) => Err(match last {
                Failure::Retryable(last_reason) => MappingError::ExhaustedRetries {
                    attempts,
                    last_reason,
                },
                Failure::Fatal(err) => err,
            }),
            Err(RetryError::Fatal { error, .. }) => Err(match error {
                Failure::Fatal(err) => err,
                Failure::Retryable(reason) => MappingError::Fatal {
                    sample: sample.clone(),
                    reason,
                },
            }),
            Err(RetryError::Cancelled { attempts, last }) => Err(MappingError::Interrupted {
                attempts,
                last_reason: last.to_string(),
            }),
        }
    }

    fn attempt(&self, job: &AlignmentJob<'_>) -> Step<PathBuf, Failure> {
        let sample = &job.file_set.sample;
        if let Err(source) = prepare_dir(job.output_dir) {
            return Step::Fatal(Failure::Fatal(MappingError::Destination {
                path: job.output_dir.to_path_buf(),
                source,
            }));
        }
        let run = match self.tool.run(job) {
            Ok(run) => run,
            Err(err) => {
                return Step::Fatal(Failure::Fatal(MappingError::Fatal {
                    sample: sample.clone(),
                    reason: format!("could not run {}: {err:#}", self.tool.name()),
                }))
            }
        };
        match classify(&run) {
            Step::Success(path) => Step::Success(path),
            Step::Retryable(reason) => Step::Retryable(Failure::Retryable(reason)),
            Step::Fatal(reason) => Step::Fatal(Failure::Fatal(MappingError::Fatal {
                sample: sample.clone(),
                reason,
            })),
        }
    }
}

/// Why an attempt failed: a retryable diagnostic, or the error to report.
#[derive(Debug)]
enum Failure {
    Retryable(String),
    Fatal(MappingError),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Retryable(reason) => f.write_str(reason),
            Failure::Fatal(err) => write!(f, "{err}"),
        }
    }
}

/// Start an attempt from an empty directory so partial output from an
/// earlier attempt is never taken for a result.
fn prepare_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)
}
