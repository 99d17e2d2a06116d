//! Core data model.
//!
//! A job is a deferred function call: a registered function name plus its
//! arguments, stored as an opaque payload against a named queue. Its status
//! only ever moves forward through the lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{Failure, Value};
use crate::error::Error;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A unit of work tracked by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier. The only handle for result retrieval.
    pub id: JobId,

    /// Queue this job belongs to.
    pub queue_name: String,

    /// Encoded `(function, args, kwargs)`. Never mutated after creation.
    pub payload: Vec<u8>,

    /// Encoded return value (completed) or failure detail (failed).
    /// `None` until the job is terminal.
    pub result: Option<Vec<u8>>,

    /// Current lifecycle status.
    pub status: Status,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Newtype for job IDs.
///
/// UUIDv7, so the canonical text form sorts in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// First 8 characters, for tabular output.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|e| Error::InvalidArgument(format!("invalid job id '{s}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Enqueued, waiting for a worker.
    Pending,
    /// Claimed by exactly one worker.
    Running,
    /// Function returned. Terminal.
    Completed,
    /// Function failed, or could not be resolved or decoded. Terminal.
    Failed,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::Running,
        Status::Completed,
        Status::Failed,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Pending, Running) | (Running, Completed) | (Running, Failed)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "running" => Ok(Status::Running),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            _ => Err(Error::Other(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A named partition of the job namespace. Created lazily on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// What a producer sees when asking for a job's result.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Pending,
    Running,
    Completed(Value),
    Failed(Failure),
}

impl JobResult {
    pub fn status(&self) -> Status {
        match self {
            JobResult::Pending => Status::Pending,
            JobResult::Running => Status::Running,
            JobResult::Completed(_) => Status::Completed,
            JobResult::Failed(_) => Status::Failed,
        }
    }
}
