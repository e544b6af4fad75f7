//! Job lifecycle types.
//!
//! The job state machine:
//!
//! ```text
//!   Unscheduled (dropped)
//!
//!   Pending ──→ Running ──→ Completed(result)
//!      │                        ▲
//!      └────────────────────────┘
//! ```
//!
//! **Invariants:**
//! - States are totally ordered `Pending < Running < Completed`.
//! - Progress is monotonic: a stored job never moves backward.
//! - `Completed` is absorbing.
//! - The result is `Unknown` until the job is `Completed`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Globally unique identifier of a logical job.
///
/// Stable across every message describing the same job. For task-runtime
/// jobs it has the form `<task uuid>/<run id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Guid(pub String);

impl Guid {
    /// Create a new guid.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the guid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Guid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Guid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a job.
///
/// The derived ordering is the progress ordering used when merging
/// messages for the same guid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Job will never run. Never persisted.
    Unscheduled,
    /// Job is waiting for a worker.
    Pending,
    /// Job is executing.
    Running,
    /// Job finished; the result is meaningful.
    Completed,
}

impl JobState {
    /// Check if this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed)
    }

    /// Check if this state is ever written to storage.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, JobState::Unscheduled)
    }

    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Unscheduled => "unscheduled",
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unscheduled" => Ok(JobState::Unscheduled),
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// Result value as it appears in an incoming message.
///
/// Besides the pulse vocabulary this accepts results that are already in
/// stored form, which are kept verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawResult {
    Success,
    Fail,
    Exception,
    Canceled,
    Superseded,
    #[default]
    Unknown,
    #[serde(rename = "testfailed")]
    TestFailed,
    Busted,
    #[serde(rename = "usercancel")]
    UserCancel,
    Retry,
}

impl FromStr for RawResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RawResult::Success),
            "fail" => Ok(RawResult::Fail),
            "exception" => Ok(RawResult::Exception),
            "canceled" => Ok(RawResult::Canceled),
            "superseded" => Ok(RawResult::Superseded),
            "unknown" => Ok(RawResult::Unknown),
            "testfailed" => Ok(RawResult::TestFailed),
            "busted" => Ok(RawResult::Busted),
            "usercancel" => Ok(RawResult::UserCancel),
            "retry" => Ok(RawResult::Retry),
            other => Err(format!("unknown job result '{other}'")),
        }
    }
}

/// Result of a job as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobResult {
    #[default]
    Unknown,
    Success,
    #[serde(rename = "testfailed")]
    TestFailed,
    Busted,
    Exception,
    #[serde(rename = "usercancel")]
    UserCancel,
    Superseded,
    Retry,
}

impl JobResult {
    /// Map a raw result for a completed job of the given kind.
    ///
    /// `fail` becomes `busted` for builds and `testfailed` for everything
    /// else.
    pub fn from_raw(raw: RawResult, kind: JobKind) -> Self {
        match raw {
            RawResult::Success => JobResult::Success,
            RawResult::Fail if kind == JobKind::Build => JobResult::Busted,
            RawResult::Fail => JobResult::TestFailed,
            RawResult::Exception => JobResult::Exception,
            RawResult::Canceled | RawResult::UserCancel => JobResult::UserCancel,
            RawResult::Superseded => JobResult::Superseded,
            RawResult::Unknown => JobResult::Unknown,
            RawResult::TestFailed => JobResult::TestFailed,
            RawResult::Busted => JobResult::Busted,
            RawResult::Retry => JobResult::Retry,
        }
    }

    /// Check if this result is a failure that a retry replaces.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobResult::TestFailed | JobResult::Busted | JobResult::Exception
        )
    }

    /// Stored name of the result.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobResult::Unknown => "unknown",
            JobResult::Success => "success",
            JobResult::TestFailed => "testfailed",
            JobResult::Busted => "busted",
            JobResult::Exception => "exception",
            JobResult::UserCancel => "usercancel",
            JobResult::Superseded => "superseded",
            JobResult::Retry => "retry",
        }
    }
}

impl std::fmt::Display for JobResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Kind of work a job performs. Selects the failure mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Build,
    Test,
    #[default]
    Other,
}

/// Where a job came from: used to resolve the owning push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Project (repository) name.
    pub project: String,
    /// Revision the job ran against.
    pub revision: String,
}

/// Build or machine platform description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub platform: String,
    pub os: String,
    pub architecture: String,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            platform: "unknown".into(),
            os: "unknown".into(),
            architecture: "unknown".into(),
        }
    }
}

/// A named log artifact attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogReference {
    pub name: String,
    pub url: String,
}

impl LogReference {
    /// Create a new log reference.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Task-runtime identifiers of the run that produced a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Slug-encoded task id.
    pub task_id: String,
    pub run_id: u32,
    pub retry_id: u32,
}

/// Descriptive fields of a job. Free text is already truncated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFields {
    pub job_type_name: String,
    pub job_symbol: String,
    pub group_name: String,
    pub group_symbol: String,
    pub job_kind: JobKind,
    pub tier: u8,
    pub product_name: String,
    pub reason: String,
    pub who: String,
    pub machine_name: String,
    pub build_platform: Platform,
    pub machine_platform: Platform,
    /// Sorted, de-duplicated option labels.
    pub option_collection: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// The one internal shape every supported message is normalized into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalJob {
    pub origin: Origin,
    pub guid: Guid,
    pub state: JobState,
    /// Mapped result, `Unknown` unless `state` is `Completed`. The retry
    /// override has not been applied yet.
    pub result: JobResult,
    pub is_retried: bool,
    pub fields: JobFields,
    /// Empty for pending jobs.
    pub logs: Vec<LogReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_metadata: Option<TaskMetadata>,
    /// Guids of jobs this one coalesced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<Guid>,
}

impl CanonicalJob {
    /// Check if the pipeline drops this job without writing anything.
    pub fn is_drop(&self) -> bool {
        !self.state.is_persisted()
    }
}
