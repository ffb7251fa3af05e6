//! Core data model.
//!
//! A job is one unit of submitted work. It has identity, a loosely typed
//! argument bag, and a lifecycle status that only ever moves forward.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Argument bag handed to a job's function. The engine doesn't interpret it.
pub type Args = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Job identity
// ---------------------------------------------------------------------------

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum JobStatus {
    /// Built, not yet picked up by the dispatcher.
    Created = 0,
    /// Pulled off the queue, waiting for a free worker.
    Pending = 1,
    /// A worker is running the job's function.
    Working = 2,
    /// Function returned a payload. Terminal.
    Success = 3,
    /// Function returned an error or panicked. Terminal.
    Failure = 4,
    /// Never ran to completion (pool stopped, job dropped). Terminal.
    Aborted = 5,
}

impl JobStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Created, Pending)
                // rejected at submit
                | (Created, Aborted)
                | (Pending, Working)
                // pool stopped before a worker took it
                | (Pending, Aborted)
                | (Working, Success)
                | (Working, Failure)
                // worker task torn down mid-run
                | (Working, Aborted)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Aborted
        )
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => JobStatus::Created,
            1 => JobStatus::Pending,
            2 => JobStatus::Working,
            3 => JobStatus::Success,
            4 => JobStatus::Failure,
            _ => JobStatus::Aborted,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Created => "created",
            JobStatus::Pending => "pending",
            JobStatus::Working => "working",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "pending" => Ok(JobStatus::Pending),
            "working" => Ok(JobStatus::Working),
            "success" => Ok(JobStatus::Success),
            "failure" => Ok(JobStatus::Failure),
            "aborted" => Ok(JobStatus::Aborted),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Why a job produced no payload.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0:#}")]
    Failed(anyhow::Error),

    #[error("job panicked: {0}")]
    Panicked(String),
}

/// Outcome of one job execution: a payload or an error, never both.
pub type JobResult<T> = std::result::Result<T, JobError>;

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// One page returned by a paginated API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Next page number, `None` on the last page.
    pub next_page: Option<u32>,
    /// Total page count when the API reports it.
    pub total_pages: Option<u32>,
}
