//! Ingestion error types.
//!
//! Errors are categorized by how the batch controller reacts to them:
//!
//! | Category | Variants | Batch reaction |
//! |----------|----------|----------------|
//! | **Message-local** | `SchemaInvalid`, `UnknownProject`, `InvalidTaskId` | Drop the message, continue |
//! | **Batch-fatal** | `PushNotFound` | Abort, commit nothing, caller redelivers |
//! | **Infrastructure** | `Storage`, `Configuration` | Abort, commit nothing |
//!
//! Oversized text is clipped, and duplicate log names are treated as
//! already stored. Neither is an error.

use thiserror::Error;

/// Errors that can occur while loading job messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IngestError {
    // ── Message-local errors (skip the message) ──────────────────────
    /// Message does not match any supported job schema.
    #[error("Invalid job message: {0}")]
    SchemaInvalid(String),

    /// Message names a project with no registered repository.
    #[error("Unknown project: {0}")]
    UnknownProject(String),

    /// Task id could not be decoded into a task UUID.
    #[error("Invalid task id: {0}")]
    InvalidTaskId(String),

    // ── Batch-fatal errors ───────────────────────────────────────────
    /// The revision is not (yet) known for the project.
    #[error("Push not found for {project} revision {revision}")]
    PushNotFound {
        /// Project the message was addressed to.
        project: String,
        /// Revision that could not be resolved.
        revision: String,
    },

    // ── Infrastructure errors ────────────────────────────────────────
    /// Storage collaborator failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error (fix configuration).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl IngestError {
    /// Returns `true` if this error must abort the whole batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PushNotFound { .. } | Self::Storage(_) | Self::Configuration(_)
        )
    }

    /// Returns `true` if the batch can be redelivered later and may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PushNotFound { .. })
    }
}

/// Result type for ingestion operations.
pub type IngestResult<T> = Result<T, IngestError>;
