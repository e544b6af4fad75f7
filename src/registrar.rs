//! Artifact and metadata registration for a stored job.

use tracing::debug;

use crate::config::LoaderConfig;
use crate::error::IngestResult;
use crate::job::{CanonicalJob, JobState};
use crate::store::{JobId, JobLogId, JobTransaction};

/// What registration wrote for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Log references newly created.
    pub logs_created: usize,
    /// Newly created logs that should be parsed once committed.
    pub to_parse: Vec<JobLogId>,
    /// Whether task metadata was written.
    pub task_metadata: bool,
}

/// Attach the logs and task metadata of `job` to the stored row `job_id`.
///
/// Task metadata is written for every job. Logs are never written for a
/// pending message, whatever it carries. Logs that already exist are left
/// alone and are not parsed again.
pub async fn register(
    tx: &mut dyn JobTransaction,
    job_id: JobId,
    job: &CanonicalJob,
    config: &LoaderConfig,
) -> IngestResult<Registration> {
    let mut registration = register_stale(tx, job_id, job).await?;

    if job.state == JobState::Pending {
        if !job.logs.is_empty() {
            debug!(guid = %job.guid, "ignoring logs on pending job");
        }
        return Ok(registration);
    }

    for log in &job.logs {
        let entry = tx.add_job_log(job_id, log).await?;
        if !entry.created {
            continue;
        }
        registration.logs_created += 1;
        if config.should_parse(&log.name) {
            registration.to_parse.push(entry.id);
        }
    }
    Ok(registration)
}

/// Register a stale message: task metadata only.
///
/// Logs are attached when a message creates or advances its job, never by a
/// message the stored state has already moved past.
pub async fn register_stale(
    tx: &mut dyn JobTransaction,
    job_id: JobId,
    job: &CanonicalJob,
) -> IngestResult<Registration> {
    let mut registration = Registration::default();
    if let Some(metadata) = &job.task_metadata {
        tx.upsert_task_metadata(job_id, metadata).await?;
        registration.task_metadata = true;
    }
    Ok(registration)
}
