//! End-to-end ingestion against the in-memory collaborators.

use std::sync::Arc;

use job_loader::memory::{MemoryJobStore, MemoryPushes, MemoryRepositories, QueuedParseTrigger};
use job_loader::native::{self, TaskDefinition, TaskStatusMessage};
use job_loader::{Guid, IngestError, JobLoader, JobLogId, JobResult, JobState, LoaderConfig};
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;

const ROOT: &str = "https://firefox-ci-tc.services.mozilla.com";
const REVISION: &str = "45f8637cb9f78f19cb8463ff174e81756805d8cf";
const GUID: &str = "008dcdae-bde0-4834-a967-d13d681037ae/0";

struct Harness {
    loader: JobLoader,
    store: MemoryJobStore,
    parse_queue: UnboundedReceiver<JobLogId>,
}

fn harness() -> Harness {
    let mut repos = MemoryRepositories::new();
    let repo = repos.add("test_treeherder_jobs");
    let mut pushes = MemoryPushes::new();
    pushes.add(&repo, REVISION);
    let store = MemoryJobStore::new();
    let (trigger, parse_queue) = QueuedParseTrigger::new();
    let loader = JobLoader::new(
        Arc::new(repos),
        Arc::new(pushes),
        Arc::new(store.clone()),
        Arc::new(trigger),
        LoaderConfig::default(),
    )
    .unwrap();
    Harness {
        loader,
        store,
        parse_queue,
    }
}

fn pulse_job(guid: &str) -> Value {
    json!({
        "taskId": guid,
        "retryId": 0,
        "isRetried": false,
        "origin": {
            "kind": "hg.mozilla.org",
            "project": "test_treeherder_jobs",
            "revision": REVISION,
            "pushLogID": 42
        },
        "display": {
            "jobSymbol": "B",
            "jobName": "build-linux64/opt",
            "groupSymbol": "?",
            "groupName": "unknown"
        },
        "state": "completed",
        "result": "fail",
        "jobKind": "test",
        "tier": 1,
        "owner": "who@example.com",
        "reason": "scheduled",
        "productName": "firefox",
        "buildMachine": {
            "name": "bm-1",
            "platform": "linux64",
            "os": "linux",
            "architecture": "x86_64"
        },
        "labels": ["opt"],
        "timeScheduled": "2024-03-01T10:00:00Z",
        "timeStarted": "2024-03-01T10:05:00Z",
        "timeCompleted": "2024-03-01T10:45:00Z",
        "logs": [{"name": "live_backing_log", "url": "public/logs/live_backing.log"}],
        "jobInfo": {"links": [], "summary": "done"}
    })
}

/// Thirty distinct jobs on the same push.
fn pulse_jobs() -> Vec<Value> {
    (0..30)
        .map(|i| pulse_job(&format!("00000000-0000-4000-8000-{i:012}/0")))
        .collect()
}

/// Ingest `job` with the given state/result and check the stored
/// `(state, result)` names.
async fn change_state_result(
    h: &Harness,
    job: &Value,
    new_state: &str,
    new_result: &str,
    expected: (&str, &str),
) {
    let mut job = job.clone();
    job["state"] = json!(new_state);
    job["result"] = json!(new_result);
    if new_state == "pending" {
        job.as_object_mut().unwrap().remove("logs");
    }
    h.loader.process_one(&job, ROOT).await.unwrap();

    assert_eq!(h.store.job_count(), 1);
    let stored = h.store.job(&Guid::new(GUID)).unwrap();
    assert_eq!(
        (stored.state.state.as_str(), stored.state.result.as_str()),
        expected
    );
}

#[tokio::test]
async fn ingest_pulse_jobs() {
    let h = harness();
    let stored = h.loader.process_batch(&pulse_jobs(), ROOT).await.unwrap();
    assert_eq!(stored, 30);
    assert_eq!(h.store.job_count(), 30);

    let first = h.store.jobs().into_iter().next().unwrap();
    let logs = h.store.logs(first.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].1.name, "live_backing_log");
    assert!(logs[0].1.url.starts_with(ROOT));
    assert!(logs[0].1.url.ends_with("/runs/0/artifacts/public/logs/live_backing.log"));
    assert!(h.store.task_metadata(first.id).is_some());
}

#[tokio::test]
async fn idempotent_guid_mapping() {
    let h = harness();
    let job = pulse_job(GUID);
    h.loader.process_one(&job, ROOT).await.unwrap();
    h.loader.process_one(&job, ROOT).await.unwrap();
    h.loader.process_batch(&[job.clone(), job], ROOT).await.unwrap();

    assert_eq!(h.store.job_count(), 1);
    assert_eq!(h.store.log_count(), 1);
}

#[tokio::test]
async fn ingest_long_job_type_name() {
    let h = harness();
    let mut job = pulse_job(GUID);
    job["display"]["jobName"] = json!(
        "this is a very long string that exceeds the 100 character size that was the previous limit by just a little bit"
    );
    h.loader.process_one(&job, ROOT).await.unwrap();

    assert_eq!(h.store.job_count(), 1);
    let stored = h.store.job(&Guid::new(GUID)).unwrap();
    assert_eq!(stored.fields.job_type_name.chars().count(), 100);
}

#[tokio::test]
async fn ingest_pending_job_stores_metadata_without_logs() {
    let h = harness();
    let mut job = pulse_job(GUID);
    job["state"] = json!("pending");
    h.loader.process_one(&job, ROOT).await.unwrap();

    assert_eq!(h.store.job_count(), 1);
    let stored = h.store.job(&Guid::new(GUID)).unwrap();
    let metadata = h.store.task_metadata(stored.id).unwrap();
    assert_eq!(metadata.task_id, "AI3Nrr3gSDSpZ9E9aBA3rg");
    assert_eq!(h.store.log_count(), 0);
}

#[tokio::test]
async fn ingest_bad_project_skips_one() {
    let h = harness();
    let mut jobs = pulse_jobs();
    jobs[0]["origin"]["project"] = json!("ferd");
    let stored = h.loader.process_batch(&jobs, ROOT).await.unwrap();

    assert_eq!(stored, 29);
    assert_eq!(h.store.job_count(), 29);
}

#[tokio::test]
async fn ingest_missing_push_aborts_batch() {
    let mut h = harness();
    let mut jobs = pulse_jobs();
    jobs[5]["origin"]["revision"] = json!("1234567890123456789012345678901234567890");
    let err = h.loader.process_batch(&jobs, ROOT).await.unwrap_err();

    assert!(matches!(err, IngestError::PushNotFound { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.store.job_count(), 0);
    assert_eq!(h.store.log_count(), 0);
    assert!(h.parse_queue.try_recv().is_err());
}

#[tokio::test]
async fn invalid_messages_are_skipped() {
    let h = harness();
    let mut missing_origin = pulse_job("a/0");
    missing_origin.as_object_mut().unwrap().remove("origin");
    let batch = [
        json!({"exchange": "exchange/taskcluster-queue/v1/task-defined"}),
        missing_origin,
        pulse_job(GUID),
    ];
    assert_eq!(h.loader.process_batch(&batch, ROOT).await.unwrap(), 1);
    assert_eq!(h.store.job_count(), 1);
}

#[tokio::test]
async fn transition_pending_running_complete() {
    let h = harness();
    let job = pulse_job(GUID);
    change_state_result(&h, &job, "pending", "unknown", ("pending", "unknown")).await;
    change_state_result(&h, &job, "running", "unknown", ("running", "unknown")).await;
    change_state_result(&h, &job, "completed", "fail", ("completed", "testfailed")).await;
}

#[tokio::test]
async fn transition_complete_pending_stays_complete() {
    let h = harness();
    let job = pulse_job(GUID);
    change_state_result(&h, &job, "completed", "fail", ("completed", "testfailed")).await;
    change_state_result(&h, &job, "pending", "unknown", ("completed", "testfailed")).await;
}

#[tokio::test]
async fn transition_complete_running_stays_complete() {
    let h = harness();
    let job = pulse_job(GUID);
    change_state_result(&h, &job, "completed", "fail", ("completed", "testfailed")).await;
    change_state_result(&h, &job, "running", "unknown", ("completed", "testfailed")).await;
}

#[tokio::test]
async fn transition_running_pending_stays_running() {
    let h = harness();
    let job = pulse_job(GUID);
    change_state_result(&h, &job, "running", "unknown", ("running", "unknown")).await;
    change_state_result(&h, &job, "pending", "unknown", ("running", "unknown")).await;
}

#[tokio::test]
async fn transition_running_superseded() {
    let h = harness();
    let job = pulse_job(GUID);
    change_state_result(&h, &job, "running", "unknown", ("running", "unknown")).await;
    change_state_result(&h, &job, "completed", "superseded", ("completed", "superseded")).await;
}

#[tokio::test]
async fn transition_pending_retry_fail_stays_retry() {
    let h = harness();
    let mut job = pulse_job(GUID);
    change_state_result(&h, &job, "pending", "unknown", ("pending", "unknown")).await;
    job["isRetried"] = json!(true);
    change_state_result(&h, &job, "completed", "fail", ("completed", "retry")).await;
    job["isRetried"] = json!(false);
    change_state_result(&h, &job, "completed", "fail", ("completed", "retry")).await;
}

#[tokio::test]
async fn transition_complete_running_adds_no_logs() {
    let h = harness();
    let mut job = pulse_job(GUID);
    job["logs"] = json!([]);
    change_state_result(&h, &job, "completed", "fail", ("completed", "testfailed")).await;
    job["logs"] = json!([{"name": "live_backing_log", "url": "public/logs/live_backing.log"}]);
    change_state_result(&h, &job, "running", "unknown", ("completed", "testfailed")).await;
    assert_eq!(h.store.log_count(), 0);
}

#[tokio::test]
async fn skip_unscheduled() {
    let h = harness();
    let mut job = pulse_job(GUID);
    job["state"] = json!("unscheduled");
    assert!(h.loader.process_one(&job, ROOT).await.unwrap().is_none());
    assert_eq!(h.store.job_count(), 0);
}

#[tokio::test]
async fn live_log_scheduled_for_parsing_once() {
    let mut h = harness();
    let job = pulse_job(GUID);
    h.loader.process_one(&job, ROOT).await.unwrap();
    h.loader.process_one(&job, ROOT).await.unwrap();

    let stored = h.store.job(&Guid::new(GUID)).unwrap();
    let (log_id, _) = h.store.logs(stored.id)[0].clone();
    assert_eq!(h.parse_queue.try_recv().unwrap(), log_id);
    assert!(h.parse_queue.try_recv().is_err());
}

#[tokio::test]
async fn native_fan_out_ingests_one_job_per_run() {
    let h = harness();
    let task: TaskDefinition = serde_json::from_value(json!({
        "routes": [format!("tc-treeherder.v2.test_treeherder_jobs.{REVISION}.42")],
        "metadata": {"name": "test-linux64/opt-mochitest-1", "owner": "dev@example.com"},
        "extra": {"treeherder": {"symbol": "M1", "groupSymbol": "M", "jobKind": "test",
                                 "machine": {"platform": "linux64"}}}
    }))
    .unwrap();
    let status: TaskStatusMessage = serde_json::from_value(json!({
        "status": {"taskId": "AI3Nrr3gSDSpZ9E9aBA3rg", "runs": [
            {"runId": 0, "state": "failed", "reasonCreated": "scheduled"},
            {"runId": 1, "state": "running", "reasonCreated": "retry"}
        ]}
    }))
    .unwrap();

    let messages = native::expand(&status, &task);
    assert_eq!(messages.len(), 2);
    assert_eq!(h.loader.process_batch(&messages, ROOT).await.unwrap(), 2);

    let first = h
        .store
        .job(&Guid::new("008dcdae-bde0-4834-a967-d13d681037ae/0"))
        .unwrap();
    let second = h
        .store
        .job(&Guid::new("008dcdae-bde0-4834-a967-d13d681037ae/1"))
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(first.state.result, JobResult::Retry);
    assert_eq!(second.state.state, JobState::Running);
    assert_eq!(h.store.task_metadata(second.id).unwrap().run_id, 1);
    assert!(
        h.store.logs(second.id)[0]
            .1
            .url
            .ends_with("/task/AI3Nrr3gSDSpZ9E9aBA3rg/runs/1/artifacts/public/logs/live_backing.log")
    );
}
