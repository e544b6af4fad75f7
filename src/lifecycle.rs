//! Lifecycle state machine.
//!
//! Merges an incoming [`CanonicalJob`] with whatever is already stored for
//! its guid. The merge is a join over `Pending < Running < Completed`:
//!
//! ```text
//!   stored \ incoming   Pending   Running   Completed
//!   (none)              write     write     write
//!   Pending             write     write     write
//!   Running             ignore    write     write
//!   Completed           ignore    ignore    write (retry sticky)
//! ```
//!
//! A completed failure becomes `Retry` when the message says the job was
//! retried, or when the stored result already is `Retry`. Messages are
//! therefore safe to replay in any order once they are all delivered.

use serde::{Deserialize, Serialize};

use crate::job::{CanonicalJob, JobResult, JobState};

/// State/result pair persisted for one guid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    pub state: JobState,
    pub result: JobResult,
}

impl StoredState {
    /// Create a stored state.
    pub fn new(state: JobState, result: JobResult) -> Self {
        Self { state, result }
    }
}

/// What to do with an incoming job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Persist this state/result.
    Write(StoredState),
    /// Stale message: leave state/result as stored.
    Ignore,
    /// Job never ran: write nothing at all.
    Drop,
}

impl Transition {
    /// State/result to persist, if any.
    pub fn written(&self) -> Option<StoredState> {
        match self {
            Transition::Write(s) => Some(*s),
            Transition::Ignore | Transition::Drop => None,
        }
    }
}

/// Compute the transition for `job` given the state stored for its guid.
pub fn transition(job: &CanonicalJob, stored: Option<&StoredState>) -> Transition {
    if job.is_drop() {
        return Transition::Drop;
    }
    if stored.is_some_and(|prev| job.state < prev.state) {
        return Transition::Ignore;
    }

    let mut result = if job.state == JobState::Completed {
        job.result
    } else {
        JobResult::Unknown
    };
    if job.state == JobState::Completed && result.is_failure() {
        let retried_before = stored.is_some_and(|prev| prev.result == JobResult::Retry);
        if job.is_retried || retried_before {
            result = JobResult::Retry;
        }
    }
    Transition::Write(StoredState::new(job.state, result))
}

/// Merge a state another writer computed with the state committed since.
///
/// Applies the same join as [`transition`]: an older state is ignored and a
/// committed `Retry` stays sticky over a completed failure.
pub fn reconcile(committed: &StoredState, incoming: StoredState) -> Transition {
    if incoming.state < committed.state {
        return Transition::Ignore;
    }
    if incoming.state.is_terminal()
        && incoming.result.is_failure()
        && committed.result == JobResult::Retry
    {
        return Transition::Write(StoredState::new(JobState::Completed, JobResult::Retry));
    }
    Transition::Write(incoming)
}

/// Transition for a stored job that a newer job coalesced.
///
/// Unfinished jobs become `Completed/Superseded`; finished ones keep their
/// result.
pub fn supersede(stored: &StoredState) -> Transition {
    if stored.state.is_terminal() {
        Transition::Ignore
    } else {
        Transition::Write(StoredState::new(
            JobState::Completed,
            JobResult::Superseded,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Guid, JobFields, JobKind, Origin, Platform};

    fn job(state: JobState, result: JobResult, is_retried: bool) -> CanonicalJob {
        CanonicalJob {
            origin: Origin {
                project: "try".into(),
                revision: "abc".into(),
            },
            guid: Guid::new("g/0"),
            state,
            result,
            is_retried,
            fields: JobFields {
                job_type_name: "test".into(),
                job_symbol: "T".into(),
                group_name: "unknown".into(),
                group_symbol: "?".into(),
                job_kind: JobKind::Test,
                tier: 1,
                product_name: "unknown".into(),
                reason: "unknown".into(),
                who: "unknown".into(),
                machine_name: "unknown".into(),
                build_platform: Platform::default(),
                machine_platform: Platform::default(),
                option_collection: vec!["opt".into()],
                submit_time: None,
                start_time: None,
                end_time: None,
            },
            logs: vec![],
            task_metadata: None,
            superseded: vec![],
        }
    }

    /// Fold a message sequence through the state machine.
    fn replay(messages: &[(JobState, JobResult, bool)]) -> Option<StoredState> {
        let mut stored = None;
        for &(state, result, retried) in messages {
            let incoming = job(state, result, retried);
            if let Transition::Write(next) = transition(&incoming, stored.as_ref()) {
                stored = Some(next);
            }
        }
        stored
    }

    #[test]
    fn test_pending_running_completed() {
        let final_state = replay(&[
            (JobState::Pending, JobResult::Unknown, false),
            (JobState::Running, JobResult::Unknown, false),
            (JobState::Completed, JobResult::TestFailed, false),
        ]);
        assert_eq!(
            final_state,
            Some(StoredState::new(JobState::Completed, JobResult::TestFailed))
        );
    }

    #[test]
    fn test_completed_is_absorbing() {
        for late in [JobState::Pending, JobState::Running] {
            let final_state = replay(&[
                (JobState::Completed, JobResult::TestFailed, false),
                (late, JobResult::Unknown, false),
            ]);
            assert_eq!(
                final_state,
                Some(StoredState::new(JobState::Completed, JobResult::TestFailed))
            );
        }
    }

    #[test]
    fn test_running_dominates_pending() {
        let final_state = replay(&[
            (JobState::Running, JobResult::Unknown, false),
            (JobState::Pending, JobResult::Unknown, false),
        ]);
        assert_eq!(
            final_state,
            Some(StoredState::new(JobState::Running, JobResult::Unknown))
        );
    }

    #[test]
    fn test_running_superseded() {
        let final_state = replay(&[
            (JobState::Running, JobResult::Unknown, false),
            (JobState::Completed, JobResult::Superseded, false),
        ]);
        assert_eq!(
            final_state,
            Some(StoredState::new(JobState::Completed, JobResult::Superseded))
        );
    }

    #[test]
    fn test_retry_is_sticky() {
        let final_state = replay(&[
            (JobState::Pending, JobResult::Unknown, false),
            (JobState::Completed, JobResult::TestFailed, true),
            (JobState::Completed, JobResult::TestFailed, false),
        ]);
        assert_eq!(
            final_state,
            Some(StoredState::new(JobState::Completed, JobResult::Retry))
        );
    }

    #[test]
    fn test_retried_success_stays_success() {
        let t = transition(&job(JobState::Completed, JobResult::Success, true), None);
        assert_eq!(
            t.written(),
            Some(StoredState::new(JobState::Completed, JobResult::Success))
        );
    }

    #[test]
    fn test_unscheduled_dropped() {
        let t = transition(&job(JobState::Unscheduled, JobResult::Unknown, false), None);
        assert_eq!(t, Transition::Drop);
        assert_eq!(t.written(), None);
    }

    #[test]
    fn test_result_ignored_before_completion() {
        let t = transition(&job(JobState::Running, JobResult::TestFailed, false), None);
        assert_eq!(
            t.written(),
            Some(StoredState::new(JobState::Running, JobResult::Unknown))
        );
    }

    #[test]
    fn test_reconcile_keeps_progress() {
        let done = StoredState::new(JobState::Completed, JobResult::Success);
        let pending = StoredState::new(JobState::Pending, JobResult::Unknown);
        assert_eq!(reconcile(&done, pending), Transition::Ignore);

        let running = StoredState::new(JobState::Running, JobResult::Unknown);
        assert_eq!(reconcile(&pending, running).written(), Some(running));

        let retry = StoredState::new(JobState::Completed, JobResult::Retry);
        let failed = StoredState::new(JobState::Completed, JobResult::TestFailed);
        assert_eq!(reconcile(&retry, failed).written(), Some(retry));
    }

    #[test]
    fn test_supersede() {
        let running = StoredState::new(JobState::Running, JobResult::Unknown);
        assert_eq!(
            supersede(&running).written(),
            Some(StoredState::new(JobState::Completed, JobResult::Superseded))
        );
        let done = StoredState::new(JobState::Completed, JobResult::Success);
        assert_eq!(supersede(&done), Transition::Ignore);
    }
}
