//! Batch ingestion controller.
//!
//! [`JobLoader`] walks a batch in arrival order. Each message is validated,
//! normalized, resolved to its repository and push, merged through the
//! lifecycle state machine and registered, all inside one transaction per
//! batch:
//!
//! ```text
//!   validate ──→ normalize ──→ repository ──→ push ──→ lifecycle ──→ registrar
//!   (skip)       (skip drop)   (skip)         (ABORT)
//! ```
//!
//! A missing push aborts the whole batch and nothing is committed: the push
//! is expected to show up, and the bus redelivers the batch. An unknown
//! project is a defect of that one message, so only the message is skipped.
//!
//! A stale message (one the stored state has already moved past) refreshes
//! task metadata but attaches no logs.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::LoaderConfig;
use crate::error::IngestResult;
use crate::job::CanonicalJob;
use crate::lifecycle::{self, Transition};
use crate::normalize::normalize;
use crate::registrar::{register, register_stale};
use crate::schema;
use crate::store::{
    JobLogId, JobStore, JobTransaction, LogParseTrigger, PushResolver, RepositoryRegistry,
};

/// A message that made it into storage.
#[derive(Debug)]
struct Loaded {
    job: CanonicalJob,
    to_parse: Vec<JobLogId>,
}

/// Loads job messages into job storage.
pub struct JobLoader {
    repositories: Arc<dyn RepositoryRegistry>,
    pushes: Arc<dyn PushResolver>,
    store: Arc<dyn JobStore>,
    log_parser: Arc<dyn LogParseTrigger>,
    config: LoaderConfig,
}

impl JobLoader {
    /// Create a loader over the given collaborators.
    pub fn new(
        repositories: Arc<dyn RepositoryRegistry>,
        pushes: Arc<dyn PushResolver>,
        store: Arc<dyn JobStore>,
        log_parser: Arc<dyn LogParseTrigger>,
        config: LoaderConfig,
    ) -> IngestResult<Self> {
        config.validate()?;
        Ok(Self {
            repositories,
            pushes,
            store,
            log_parser,
            config,
        })
    }

    /// The loader's configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Ingest a batch of raw messages in order.
    ///
    /// Returns the number of messages that were written to storage.
    /// Messages matching no schema, unscheduled jobs and jobs for unknown
    /// projects are skipped. Any error aborts the batch and rolls back
    /// every write it made.
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub async fn process_batch(
        &self,
        messages: &[Value],
        log_base_url: &str,
    ) -> IngestResult<usize> {
        let mut tx = self.store.begin().await?;
        let mut stored = 0;
        let mut to_parse = Vec::new();

        for message in messages {
            match self.load(tx.as_mut(), message, log_base_url).await {
                Ok(Some(loaded)) => {
                    stored += 1;
                    to_parse.extend(loaded.to_parse);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "aborting batch, nothing committed");
                    abort(tx).await;
                    return Err(err);
                }
            }
        }

        tx.commit().await?;
        self.dispatch(to_parse);
        info!(stored, skipped = messages.len() - stored, "batch committed");
        Ok(stored)
    }

    /// Ingest a single message in its own transaction.
    ///
    /// Returns the canonical job that was stored, or `None` when the
    /// message was dropped on purpose.
    #[instrument(skip_all)]
    pub async fn process_one(
        &self,
        message: &Value,
        log_base_url: &str,
    ) -> IngestResult<Option<CanonicalJob>> {
        let mut tx = self.store.begin().await?;
        match self.load(tx.as_mut(), message, log_base_url).await {
            Ok(Some(loaded)) => {
                tx.commit().await?;
                self.dispatch(loaded.to_parse);
                Ok(Some(loaded.job))
            }
            Ok(None) => {
                abort(tx).await;
                Ok(None)
            }
            Err(err) => {
                abort(tx).await;
                Err(err)
            }
        }
    }

    async fn load(
        &self,
        tx: &mut dyn JobTransaction,
        message: &Value,
        log_base_url: &str,
    ) -> IngestResult<Option<Loaded>> {
        let Some(raw) = schema::validate(message) else {
            return Ok(None);
        };
        let root_url = if log_base_url.is_empty() {
            self.config.root_url.as_str()
        } else {
            log_base_url
        };
        let job = match normalize(&raw, root_url, &self.config) {
            Ok(job) => job,
            Err(err) if !err.is_fatal() => {
                debug!(error = %err, "dropping message that cannot be normalized");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if job.is_drop() {
            debug!(guid = %job.guid, "skipping unscheduled job");
            return Ok(None);
        }

        let project = &job.origin.project;
        let Some(repository) = self.repositories.lookup(project).await? else {
            warn!(%project, guid = %job.guid, "skipping job for unknown project");
            return Ok(None);
        };
        let push = self
            .pushes
            .resolve(&repository, &job.origin.revision)
            .await?;

        let existing = tx.fetch_job(&job.guid).await?;
        let registration = match lifecycle::transition(&job, existing.as_ref().map(|j| &j.state)) {
            Transition::Write(state) => {
                let job_id = tx.upsert_job(&job.guid, state, &push, &job.fields).await?;
                register(tx, job_id, &job, &self.config).await?
            }
            Transition::Ignore => match existing {
                Some(stored) => {
                    debug!(
                        guid = %job.guid,
                        stored = %stored.state.state,
                        incoming = %job.state,
                        "stale message, keeping stored state"
                    );
                    register_stale(tx, stored.id, &job).await?
                }
                None => return Ok(None),
            },
            Transition::Drop => return Ok(None),
        };
        debug!(
            guid = %job.guid,
            logs_created = registration.logs_created,
            task_metadata = registration.task_metadata,
            "registered job artifacts"
        );

        self.supersede(tx, &job).await?;

        Ok(Some(Loaded {
            job,
            to_parse: registration.to_parse,
        }))
    }

    /// Mark the jobs `job` coalesced as superseded, if they are stored.
    async fn supersede(
        &self,
        tx: &mut dyn JobTransaction,
        job: &CanonicalJob,
    ) -> IngestResult<()> {
        for guid in &job.superseded {
            let Some(stored) = tx.fetch_job(guid).await? else {
                continue;
            };
            if let Transition::Write(state) = lifecycle::supersede(&stored.state) {
                debug!(%guid, by = %job.guid, "superseding coalesced job");
                tx.update_state(stored.id, state).await?;
            }
        }
        Ok(())
    }

    fn dispatch(&self, logs: Vec<JobLogId>) {
        for log in logs {
            self.log_parser.schedule_parse(log);
        }
    }
}

/// Roll back, logging rather than masking the error that caused it.
async fn abort(tx: Box<dyn JobTransaction>) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "rollback failed");
    }
}
