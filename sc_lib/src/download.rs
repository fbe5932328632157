//! Fetching a sample's read files from remote locators.
//!
//! The actual transfer is behind the [`Transport`] trait; [`AxelTransport`]
//! shells out to `axel`. The [`Downloader`] owns retries, timeouts and the
//! reuse of files left by a previous run.

use crate::cancel::CancelToken;
use crate::process::{log_tail, run_with_deadline, ExitKind};
use crate::report::{DownloadReportRow, SampleLog};
use crate::retry::{RetryError, RetryPolicy, Step};
use anyhow::{bail, Result};
use log::{info, warn};
use sc_types::{
    Allocation, AttemptOutcome, AttemptRecord, DownloadError, DownloadedFile, PipelineStage,
    ReadFile, SampleDescriptor,
};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use url::Url;

/// Scheme assumed for locators written without one.
pub const DEFAULT_SCHEME: &str = "ftp";

/// Suffix of the state file axel keeps next to an incomplete download.
const AXEL_STATE_SUFFIX: &str = ".st";

/// Turn a manifest locator into a URL: default to ftp and percent-encode
/// each path segment.
pub fn normalize_locator(locator: &str) -> Result<Url, DownloadError> {
    let invalid = |reason: String| DownloadError::InvalidLocator {
        locator: locator.to_string(),
        reason,
    };
    let trimmed = locator.trim();
    let (scheme, rest) = trimmed.split_once("://").unwrap_or((DEFAULT_SCHEME, trimmed));
    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
    if host.is_empty() {
        return Err(invalid("no host".to_string()));
    }
    if path.is_empty() {
        return Err(invalid("no file path".to_string()));
    }
    let mut url = Url::parse(&format!("{scheme}://{host}/")).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("cannot hold a path".to_string()))?
        .clear()
        .extend(path.split('/'));
    Ok(url)
}

/// The local file name for a locator: its last path segment, as written.
/// `?` and `#` are part of the name, as [`normalize_locator`] encodes them
/// into the path that is fetched.
pub fn file_name_of(locator: &str) -> Option<&str> {
    locator
        .trim()
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}

/// Moves one remote file to a local path.
pub trait Transport: Send + Sync {
    /// Connections the transport opens per file, for the attempt log.
    fn connections(&self) -> usize {
        1
    }

    /// Fetch `url` into `dest`, giving up after `timeout`. Any error is
    /// treated as transient.
    fn fetch(&self, url: &Url, dest: &Path, timeout: Duration) -> Result<()>;
}

/// Downloads with `axel -n <connections> -o <dest> <url>`.
#[derive(Debug, Clone)]
pub struct AxelTransport {
    pub program: PathBuf,
    pub connections: usize,
}

impl AxelTransport {
    pub fn new(connections: usize) -> Self {
        AxelTransport {
            program: PathBuf::from("axel"),
            connections: connections.max(1),
        }
    }
}

impl Transport for AxelTransport {
    fn connections(&self) -> usize {
        self.connections
    }

    fn fetch(&self, url: &Url, dest: &Path, timeout: Duration) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-n")
            .arg(self.connections.to_string())
            .arg("-o")
            .arg(dest)
            .arg(url.as_str());
        // axel refuses to overwrite a file it has no state for.
        if !state_file(dest).exists() && dest.exists() {
            std::fs::remove_file(dest)?;
        }
        let log_path = PathBuf::from(format!("{}.axel.log", dest.display()));
        match run_with_deadline(&mut cmd, timeout, &log_path)? {
            ExitKind::Success => Ok(()),
            kind => {
                let tail = log_tail(&log_path, 512);
                bail!("axel {kind}: {}", tail.lines().last().unwrap_or_default())
            }
        }
    }
}

/// Fetches the read files of one sample at a time.
pub struct Downloader {
    transport: Box<dyn Transport>,
    policy: RetryPolicy,
    base_timeout: Duration,
}

impl Downloader {
    pub fn new(transport: Box<dyn Transport>, policy: RetryPolicy, base_timeout: Duration) -> Self {
        Downloader {
            transport,
            policy,
            base_timeout,
        }
    }

    /// Fetch every locator of `sample` into `dest_dir`. Attempts and per-file
    /// results are recorded in `log`. Fails on the first file that cannot be
    /// fetched. Once `cancel` is set a failed transfer is not retried, but
    /// one in flight is left to finish.
    pub fn fetch(
        &self,
        sample: &SampleDescriptor,
        dest_dir: &Path,
        log: &mut SampleLog,
        cancel: &CancelToken,
    ) -> Result<Vec<DownloadedFile>, DownloadError> {
        if sample.locators.is_empty() {
            return Err(DownloadError::NoLocators {
                sample: sample.id.clone(),
            });
        }
        std::fs::create_dir_all(dest_dir).map_err(|source| DownloadError::Destination {
            path: dest_dir.to_path_buf(),
            source,
        })?;
        sample
            .locators
            .iter()
            .map(|locator| self.fetch_one(sample, locator, dest_dir, log, cancel))
            .collect()
    }

    fn fetch_one(
        &self,
        sample: &SampleDescriptor,
        locator: &str,
        dest_dir: &Path,
        log: &mut SampleLog,
        cancel: &CancelToken,
    ) -> Result<DownloadedFile, DownloadError> {
        let url = normalize_locator(locator)?;
        let file_name = file_name_of(locator).ok_or_else(|| DownloadError::InvalidLocator {
            locator: locator.to_string(),
            reason: "no file name".to_string(),
        })?;
        let dest = dest_dir.join(file_name);
        let mut row = DownloadReportRow {
            sample: sample.id.clone(),
            file_name: file_name.to_string(),
            url: url.to_string(),
            status: String::new(),
            attempts: 0,
            bytes: 0,
            path: dest.display().to_string(),
        };

        if let Some(file) = reusable(&dest) {
            info!("{}: reusing {}", sample.id, dest.display());
            row.status = "reused".to_string();
            row.bytes = file.bytes;
            log.record_download(row);
            return Ok(DownloadedFile {
                sample: sample.id.clone(),
                locator: locator.to_string(),
                file,
                attempts: 0,
            });
        }

        let result = self.policy.run(cancel, |attempt| {
            let timeout = self.policy.escalate(self.base_timeout, attempt);
            info!(
                "{}: downloading {url} (attempt {attempt}, timeout {}s)",
                sample.id,
                timeout.as_secs()
            );
            let step = match self.transport.fetch(&url, &dest, timeout) {
                Ok(()) => match ReadFile::from_path(&dest) {
                    Ok(file) if file.bytes > 0 => Step::Success(file),
                    _ => Step::Retryable("transfer finished but the file is missing or empty".to_string()),
                },
                Err(err) => Step::Retryable(format!("{err:#}")),
            };
            let (outcome, message) = match &step {
                Step::Success(file) => (AttemptOutcome::Success, format!("{} bytes", file.bytes)),
                Step::Retryable(msg) => (AttemptOutcome::RetryableFailure, msg.clone()),
                Step::Fatal(msg) => (AttemptOutcome::FatalFailure, msg.clone()),
            };
            if outcome != AttemptOutcome::Success {
                warn!("{}: download of {url} failed: {message}", sample.id);
            }
            log.record_attempt(AttemptRecord {
                sample: sample.id.clone(),
                stage: PipelineStage::Download,
                attempt,
                allocation: Allocation::Download {
                    connections: self.transport.connections(),
                    timeout,
                },
                outcome,
                message,
            });
            step
        });

        match result {
            Ok((file, attempts)) => {
                row.status = "downloaded".to_string();
                row.attempts = attempts;
                row.bytes = file.bytes;
                log.record_download(row);
                Ok(DownloadedFile {
                    sample: sample.id.clone(),
                    locator: locator.to_string(),
                    file,
                    attempts,
                })
            }
            Err(err) => {
                let (attempts, last_error, interrupted) = match err {
                    RetryError::Exhausted { attempts, last } => (attempts, last, false),
                    RetryError::Fatal { attempt, error } => (attempt, error, false),
                    RetryError::Cancelled { attempts, last } => (attempts, last, true),
                };
                row.status = "failed".to_string();
                row.attempts = attempts;
                log.record_download(row);
                let locator = locator.to_string();
                Err(if interrupted {
                    DownloadError::Interrupted {
                        locator,
                        attempts,
                        last_error,
                    }
                } else {
                    DownloadError::ExhaustedRetries {
                        locator,
                        attempts,
                        last_error,
                    }
                })
            }
        }
    }
}

fn state_file(dest: &Path) -> PathBuf {
    PathBuf::from(format!("{}{AXEL_STATE_SUFFIX}", dest.display()))
}

/// A complete file from an earlier run: present, non-empty, and without
/// an axel state file marking it as partial.
fn reusable(dest: &Path) -> Option<ReadFile> {
    if state_file(dest).exists() {
        return None;
    }
    ReadFile::from_path(dest).ok().filter(|file| file.bytes > 0)
}
