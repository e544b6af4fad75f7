//! Job Loader — idempotent ingestion of CI job-status messages
//!
//! This crate turns job-status messages from a CI message bus into canonical
//! job records. Messages may arrive duplicated or out of order; the loader
//! guarantees that every logical job (identified by its [`Guid`]) ends up as
//! exactly one stored row whose state only ever moves forward.
//!
//! # Overview
//!
//! The crate defines:
//! - [`schema`]: validation of the two supported message shapes
//! - [`normalize()`]: mapping either shape into one [`CanonicalJob`]
//! - [`lifecycle`]: the monotonic state machine merging a job with what is stored
//! - [`registrar`]: log references and task metadata for a stored job
//! - [`JobLoader`]: the batch controller and its partial-failure policy
//! - [`native`]: fan-out of task-runtime status messages into per-run jobs
//! - [`store`]: the collaborator traits storage and lookups implement
//! - [`memory`]: in-memory collaborators for tests and tooling
//!
//! # Pipeline
//!
//! ```text
//!   process_batch() ──→ validate() ──→ normalize() ──→ transition() ──→ register()
//!     (in order)         (skip)         (skip drop)     (write/ignore)    (logs, metadata)
//! ```
//!
//! # Failure policy
//!
//! | Condition | Effect |
//! |-----------|--------|
//! | message matches no schema | message skipped |
//! | `state == unscheduled` | message skipped |
//! | unknown project | message skipped |
//! | revision without a push | batch aborted, nothing committed |
//!
//! ```ignore
//! use std::sync::Arc;
//! use job_loader::{JobLoader, LoaderConfig};
//! use job_loader::memory::{MemoryJobStore, MemoryPushes, MemoryRepositories, QueuedParseTrigger};
//!
//! let (trigger, _parse_queue) = QueuedParseTrigger::new();
//! let loader = JobLoader::new(
//!     Arc::new(repositories),
//!     Arc::new(pushes),
//!     Arc::new(MemoryJobStore::new()),
//!     Arc::new(trigger),
//!     LoaderConfig::default(),
//! )?;
//! let root_url = "https://firefox-ci-tc.services.mozilla.com";
//! let stored = loader.process_batch(&messages, root_url).await?;
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod loader;
pub mod memory;
pub mod native;
pub mod normalize;
pub mod registrar;
pub mod schema;
pub mod slug;
pub mod store;

pub use config::LoaderConfig;
pub use error::{IngestError, IngestResult};
pub use job::{
    CanonicalJob, Guid, JobFields, JobKind, JobResult, JobState, LogReference, Origin, RawResult,
    TaskMetadata,
};
pub use lifecycle::{StoredState, Transition};
pub use loader::JobLoader;
pub use normalize::normalize;
pub use schema::{RawJobMessage, SchemaTag};
pub use store::{
    JobId, JobLogId, JobStore, JobTransaction, LogParseTrigger, Push, PushResolver, Repository,
    RepositoryRegistry, StoredJob,
};
