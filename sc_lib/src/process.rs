//! Running external tools under a wall-clock deadline.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How an external process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    Code(i32),
    Signal(i32),
    /// Killed by us after exceeding its deadline.
    TimedOut,
}

impl ExitKind {
    pub fn is_success(&self) -> bool {
        *self == ExitKind::Success
    }
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            ExitKind::Success
        } else if let Some(code) = status.code() {
            ExitKind::Code(code)
        } else if let Some(signal) = status.signal() {
            ExitKind::Signal(signal)
        } else {
            ExitKind::Code(-1)
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Success => write!(f, "exited successfully"),
            ExitKind::Code(code) => write!(f, "exited with status {code}"),
            ExitKind::Signal(signal) => write!(f, "killed by signal {signal}"),
            ExitKind::TimedOut => write!(f, "exceeded its time limit and was killed"),
        }
    }
}

/// Run `cmd` with stdout and stderr appended to `log_path`, killing it if
/// it runs longer than `limit`. The child leads its own process group, so a
/// terminal interrupt reaches only this process and not the tools it runs.
pub fn run_with_deadline(cmd: &mut Command, limit: Duration, log_path: &Path) -> io::Result<ExitKind> {
    let log = File::create(log_path)?;
    cmd.stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log)
        .process_group(0);
    let mut child = cmd.spawn()?;
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.into());
        }
        if start.elapsed() >= limit {
            // The child may exit between try_wait and kill.
            let _ = child.kill();
            child.wait()?;
            return Ok(ExitKind::TimedOut);
        }
        std::thread::sleep(POLL_INTERVAL.min(limit.saturating_sub(start.elapsed())));
    }
}

/// The last `max_bytes` of a log file, lossily decoded. Empty if unreadable.
pub fn log_tail(path: &Path, max_bytes: u64) -> String {
    let read_tail = || -> io::Result<String> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(len.saturating_sub(max_bytes)))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).trim().to_string())
    };
    read_tail().unwrap_or_default()
}
