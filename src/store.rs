//! Collaborator traits: repositories, pushes, job storage, log parsing.
//!
//! The loader owns none of these. It is handed one implementation of
//! each and drives them in a fixed order per message:
//!
//! ```text
//!   RepositoryRegistry::lookup() ──→ PushResolver::resolve() ──→ JobTransaction::*
//!        (skip if absent)              (abort batch if absent)     (one per batch)
//!
//!   JobTransaction::commit() ──→ LogParseTrigger::schedule_parse()
//! ```
//!
//! ## Method table
//!
//! | Method | Kind | Returns |
//! |--------|------|---------|
//! | `lookup()` | async | `IngestResult<Option<Repository>>` |
//! | `resolve()` | async | `IngestResult<Push>` (`PushNotFound` if unknown) |
//! | `begin()` | async | `IngestResult<Box<dyn JobTransaction>>` |
//! | `fetch_job()` | async | `IngestResult<Option<StoredJob>>` |
//! | `upsert_job()` | async | `IngestResult<JobId>` |
//! | `update_state()` | async | `IngestResult<()>` |
//! | `upsert_task_metadata()` | async | `IngestResult<()>` |
//! | `add_job_log()` | async | `IngestResult<JobLogEntry>` |
//! | `commit()` / `rollback()` | async | `IngestResult<()>` |
//! | `schedule_parse()` | sync | `()` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IngestResult;
use crate::job::{Guid, JobFields, LogReference, TaskMetadata};
use crate::lifecycle::StoredState;

/// Storage id of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage id of a job log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobLogId(pub u64);

impl std::fmt::Display for JobLogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A repository jobs can be reported against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    /// Project name used in message origins.
    pub name: String,
}

/// Handle to the push a revision belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Push {
    pub id: u64,
    pub repository_id: u64,
    pub revision: String,
}

/// A job row as storage holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    pub id: JobId,
    pub guid: Guid,
    pub push_id: u64,
    pub repository_id: u64,
    pub state: StoredState,
    pub fields: JobFields,
}

/// Outcome of adding a log reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobLogEntry {
    pub id: JobLogId,
    /// `false` when a log with the same name already existed for the job.
    pub created: bool,
}

/// Looks up repositories by project name.
#[async_trait]
pub trait RepositoryRegistry: Send + Sync {
    /// Find the repository for `project`, or `None` if it is unknown.
    async fn lookup(&self, project: &str) -> IngestResult<Option<Repository>>;
}

/// Resolves a revision to its push.
#[async_trait]
pub trait PushResolver: Send + Sync {
    /// Resolve `revision` within `repository`.
    ///
    /// MUST fail with [`IngestError::PushNotFound`](crate::IngestError::PushNotFound)
    /// when the revision is unknown; the loader aborts the batch on it.
    async fn resolve(&self, repository: &Repository, revision: &str) -> IngestResult<Push>;
}

/// Job storage that hands out transactions.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Start a transaction. Nothing written through it is visible to
    /// other transactions before `commit()`.
    async fn begin(&self) -> IngestResult<Box<dyn JobTransaction>>;
}

/// One unit of work against job storage.
///
/// # Contract
///
/// - At most one job row exists per guid; `upsert_job()` updates in place.
/// - Log references are unique per `(job, name)`; adding a duplicate
///   returns the existing entry with `created == false`.
/// - Task metadata is unique per job; upserting overwrites.
/// - Dropping a transaction without `commit()` discards its writes.
#[async_trait]
pub trait JobTransaction: Send {
    /// Fetch the job stored for `guid`, including writes made earlier in
    /// this transaction.
    async fn fetch_job(&mut self, guid: &Guid) -> IngestResult<Option<StoredJob>>;

    /// Create or update the job row for `guid`.
    async fn upsert_job(
        &mut self,
        guid: &Guid,
        state: StoredState,
        push: &Push,
        fields: &JobFields,
    ) -> IngestResult<JobId>;

    /// Overwrite only the state/result of an existing job.
    async fn update_state(&mut self, job: JobId, state: StoredState) -> IngestResult<()>;

    /// Create or overwrite the task metadata of a job.
    async fn upsert_task_metadata(
        &mut self,
        job: JobId,
        metadata: &TaskMetadata,
    ) -> IngestResult<()>;

    /// Add a log reference, returning the existing one on conflict.
    async fn add_job_log(&mut self, job: JobId, log: &LogReference)
    -> IngestResult<JobLogEntry>;

    /// Make every write of this transaction visible.
    async fn commit(self: Box<Self>) -> IngestResult<()>;

    /// Discard every write of this transaction.
    async fn rollback(self: Box<Self>) -> IngestResult<()>;
}

/// Hands stored logs to the log parser.
///
/// Fire-and-forget: the loader never waits for, or learns about, the
/// outcome of parsing.
pub trait LogParseTrigger: Send + Sync {
    /// Queue the log for parsing.
    fn schedule_parse(&self, log: JobLogId);
}
