//! In-memory collaborators.
//!
//! Backed by `FxHashMap`s behind a mutex. Transactions stage their writes
//! in a private overlay and merge it into the shared tables on commit, so
//! an aborted batch leaves no trace. Ids come from shared sequences and
//! are never reused, even after a rollback.
//!
//! Commits serialize on the table lock. A guid committed by another
//! transaction in the meantime keeps its first id: the overlay's task
//! metadata and logs move to that id, the first committed log of a name
//! wins, and the state is merged with [`lifecycle::reconcile`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::{IngestError, IngestResult};
use crate::job::{Guid, JobFields, LogReference, TaskMetadata};
use crate::lifecycle::{self, StoredState, Transition};
use crate::store::{
    JobId, JobLogEntry, JobLogId, JobStore, JobTransaction, LogParseTrigger, Push, PushResolver,
    Repository, RepositoryRegistry, StoredJob,
};

/// Repository registry with a fixed set of projects.
#[derive(Debug, Default)]
pub struct MemoryRepositories {
    repositories: FxHashMap<String, Repository>,
}

impl MemoryRepositories {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project, returning its repository.
    pub fn add(&mut self, name: impl Into<String>) -> Repository {
        let name = name.into();
        let repository = Repository {
            id: self.repositories.len() as u64 + 1,
            name: name.clone(),
        };
        self.repositories.insert(name, repository.clone());
        repository
    }
}

#[async_trait]
impl RepositoryRegistry for MemoryRepositories {
    async fn lookup(&self, project: &str) -> IngestResult<Option<Repository>> {
        Ok(self.repositories.get(project).cloned())
    }
}

/// Push resolver over a fixed set of `(repository, revision)` pairs.
#[derive(Debug, Default)]
pub struct MemoryPushes {
    pushes: FxHashMap<(u64, String), Push>,
}

impl MemoryPushes {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a push containing `revision`.
    pub fn add(&mut self, repository: &Repository, revision: impl Into<String>) -> Push {
        let revision = revision.into();
        let push = Push {
            id: self.pushes.len() as u64 + 1,
            repository_id: repository.id,
            revision: revision.clone(),
        };
        self.pushes
            .insert((repository.id, revision), push.clone());
        push
    }
}

#[async_trait]
impl PushResolver for MemoryPushes {
    async fn resolve(&self, repository: &Repository, revision: &str) -> IngestResult<Push> {
        self.pushes
            .get(&(repository.id, revision.to_string()))
            .cloned()
            .ok_or_else(|| IngestError::PushNotFound {
                project: repository.name.clone(),
                revision: revision.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
struct StoredLog {
    id: JobLogId,
    url: String,
}

#[derive(Debug, Default)]
struct Tables {
    jobs: FxHashMap<Guid, StoredJob>,
    task_metadata: FxHashMap<JobId, TaskMetadata>,
    logs: FxHashMap<(JobId, String), StoredLog>,
}

impl Tables {
    fn merge(&mut self, overlay: Tables) {
        let mut moved: FxHashMap<JobId, JobId> = FxHashMap::default();
        for (guid, mut job) in overlay.jobs {
            if let Some(current) = self.jobs.get_mut(&guid) {
                if current.id != job.id {
                    moved.insert(job.id, current.id);
                    job.id = current.id;
                }
                if let Transition::Write(state) = lifecycle::reconcile(&current.state, job.state) {
                    job.state = state;
                    *current = job;
                }
            } else {
                self.jobs.insert(guid, job);
            }
        }

        let target = |id: JobId| moved.get(&id).copied().unwrap_or(id);
        for (job, metadata) in overlay.task_metadata {
            self.task_metadata.insert(target(job), metadata);
        }
        for ((job, name), log) in overlay.logs {
            self.logs.entry((target(job), name)).or_insert(log);
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    next_job_id: AtomicU64,
    next_log_id: AtomicU64,
}

impl Shared {
    fn tables(&self) -> IngestResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| IngestError::Storage("job tables lock poisoned".into()))
    }
}

/// In-memory job storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    shared: Arc<Shared>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> MutexGuard<'_, Tables> {
        self.shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of committed job rows.
    pub fn job_count(&self) -> usize {
        self.read().jobs.len()
    }

    /// Committed job for `guid`.
    pub fn job(&self, guid: &Guid) -> Option<StoredJob> {
        self.read().jobs.get(guid).cloned()
    }

    /// Committed jobs ordered by id.
    pub fn jobs(&self) -> Vec<StoredJob> {
        let mut jobs: Vec<_> = self.read().jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Committed task metadata of a job.
    pub fn task_metadata(&self, job: JobId) -> Option<TaskMetadata> {
        self.read().task_metadata.get(&job).cloned()
    }

    /// Committed logs of a job ordered by name.
    pub fn logs(&self, job: JobId) -> Vec<(JobLogId, LogReference)> {
        let mut logs: Vec<_> = self
            .read()
            .logs
            .iter()
            .filter(|((id, _), _)| *id == job)
            .map(|((_, name), log)| (log.id, LogReference::new(name.as_str(), log.url.as_str())))
            .collect();
        logs.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        logs
    }

    /// Total number of committed log rows.
    pub fn log_count(&self) -> usize {
        self.read().logs.len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn begin(&self) -> IngestResult<Box<dyn JobTransaction>> {
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            staged: Tables::default(),
        }))
    }
}

/// Transaction over a [`MemoryJobStore`].
#[derive(Debug)]
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    staged: Tables,
}

impl MemoryTransaction {
    fn find_job(&self, guid: &Guid) -> IngestResult<Option<StoredJob>> {
        if let Some(job) = self.staged.jobs.get(guid) {
            return Ok(Some(job.clone()));
        }
        Ok(self.shared.tables()?.jobs.get(guid).cloned())
    }

    fn find_job_by_id(&self, id: JobId) -> IngestResult<Option<StoredJob>> {
        if let Some(job) = self.staged.jobs.values().find(|j| j.id == id) {
            return Ok(Some(job.clone()));
        }
        Ok(self
            .shared
            .tables()?
            .jobs
            .values()
            .find(|j| j.id == id)
            .cloned())
    }
}

#[async_trait]
impl JobTransaction for MemoryTransaction {
    async fn fetch_job(&mut self, guid: &Guid) -> IngestResult<Option<StoredJob>> {
        self.find_job(guid)
    }

    async fn upsert_job(
        &mut self,
        guid: &Guid,
        state: StoredState,
        push: &Push,
        fields: &JobFields,
    ) -> IngestResult<JobId> {
        let id = match self.find_job(guid)? {
            Some(existing) => existing.id,
            None => JobId(self.shared.next_job_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        self.staged.jobs.insert(
            guid.clone(),
            StoredJob {
                id,
                guid: guid.clone(),
                push_id: push.id,
                repository_id: push.repository_id,
                state,
                fields: fields.clone(),
            },
        );
        Ok(id)
    }

    async fn update_state(&mut self, job: JobId, state: StoredState) -> IngestResult<()> {
        let mut stored = self
            .find_job_by_id(job)?
            .ok_or_else(|| IngestError::Storage(format!("job {job} does not exist")))?;
        stored.state = state;
        self.staged.jobs.insert(stored.guid.clone(), stored);
        Ok(())
    }

    async fn upsert_task_metadata(
        &mut self,
        job: JobId,
        metadata: &TaskMetadata,
    ) -> IngestResult<()> {
        self.staged.task_metadata.insert(job, metadata.clone());
        Ok(())
    }

    async fn add_job_log(
        &mut self,
        job: JobId,
        log: &LogReference,
    ) -> IngestResult<JobLogEntry> {
        let key = (job, log.name.clone());
        let existing = match self.staged.logs.get(&key) {
            Some(found) => Some(found.id),
            None => self.shared.tables()?.logs.get(&key).map(|l| l.id),
        };
        if let Some(id) = existing {
            return Ok(JobLogEntry { id, created: false });
        }

        let id = JobLogId(self.shared.next_log_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.staged.logs.insert(
            key,
            StoredLog {
                id,
                url: log.url.clone(),
            },
        );
        Ok(JobLogEntry { id, created: true })
    }

    async fn commit(self: Box<Self>) -> IngestResult<()> {
        let Self { shared, staged } = *self;
        shared.tables()?.merge(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> IngestResult<()> {
        Ok(())
    }
}

/// Log parse trigger that queues log ids on a channel.
///
/// The receiving half stands in for the parse worker.
#[derive(Debug, Clone)]
pub struct QueuedParseTrigger {
    sender: UnboundedSender<JobLogId>,
}

impl QueuedParseTrigger {
    /// Create a trigger and the queue it feeds.
    pub fn new() -> (Self, UnboundedReceiver<JobLogId>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl LogParseTrigger for QueuedParseTrigger {
    fn schedule_parse(&self, log: JobLogId) {
        // A closed queue means no worker is listening; parsing is best effort.
        if self.sender.send(log).is_err() {
            tracing::debug!(%log, "log parse queue closed, dropping request");
        }
    }
}
