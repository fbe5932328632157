//! Attempt bookkeeping for retried stages.

use crate::outcome::PipelineStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Compute resources given to one aligner invocation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceAllocation {
    pub cpus: usize,
    pub mem_gb: usize,
    pub wall_time: Duration,
}

impl ResourceAllocation {
    /// Scale memory and wall time by the attempt number; cpus stay fixed.
    pub fn for_attempt(&self, attempt: u32) -> ResourceAllocation {
        let attempt = attempt.max(1);
        ResourceAllocation {
            cpus: self.cpus,
            mem_gb: self.mem_gb * attempt as usize,
            wall_time: self.wall_time * attempt,
        }
    }

    pub fn mem_bytes(&self) -> u64 {
        self.mem_gb as u64 * 1024 * 1024 * 1024
    }
}

impl fmt::Display for ResourceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cpus, {} GB, {} s",
            self.cpus,
            self.mem_gb,
            self.wall_time.as_secs()
        )
    }
}

/// What an attempt was allowed to use.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Allocation {
    Download { connections: usize, timeout: Duration },
    Mapping(ResourceAllocation),
}

/// How a single attempt ended.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
}

/// One execution of a download or mapping step.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AttemptRecord {
    pub sample: String,
    pub stage: PipelineStage,
    pub attempt: u32,
    pub allocation: Allocation,
    pub outcome: AttemptOutcome,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_scales_with_attempt() {
        let base = ResourceAllocation {
            cpus: 32,
            mem_gb: 16,
            wall_time: Duration::from_secs(3600),
        };
        for n in 1..=3u32 {
            let alloc = base.for_attempt(n);
            assert_eq!(alloc.cpus, 32);
            assert_eq!(alloc.mem_gb, 16 * n as usize);
            assert_eq!(alloc.wall_time, Duration::from_secs(3600 * u64::from(n)));
        }
    }

    #[test]
    fn test_record_json() -> anyhow::Result<()> {
        let record = AttemptRecord {
            sample: "S1".into(),
            stage: PipelineStage::Download,
            attempt: 2,
            allocation: Allocation::Download {
                connections: 4,
                timeout: Duration::from_secs(10),
            },
            outcome: AttemptOutcome::RetryableFailure,
            message: "axel exited with status 1".into(),
        };
        let json = serde_json::to_string(&record)?;
        assert!(json.contains(r#""kind":"download""#));
        assert_eq!(serde_json::from_str::<AttemptRecord>(&json)?, record);
        Ok(())
    }
}
