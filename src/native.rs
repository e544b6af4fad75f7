//! Fan-out of task-runtime status messages into native job messages.
//!
//! A task status carries every run of the task. Each run is a separate
//! logical job, so one status message expands into one job message per
//! run, each with its own `runId` and therefore its own guid.
//!
//! Run state mapping:
//!
//! | Run state | Job state | Job result |
//! |-----------|-----------|------------|
//! | `pending` | `pending` | `unknown` |
//! | `running` | `running` | `unknown` |
//! | `completed` | `completed` | `success` |
//! | `failed` | `completed` | `fail` |
//! | `exception` | `completed` | `exception`, or `superseded`/`canceled` by resolution reason |
//!
//! A run is flagged `isRetried` when the next run was created with reason
//! `retry` or `rerun`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

/// Route prefix that marks a task as reporting to this system.
pub const ROUTE_PREFIX: &str = "tc-treeherder.v2.";

/// Artifact path of the live log every started run publishes.
pub const LIVE_BACKING_LOG_PATH: &str = "public/logs/live_backing.log";

/// Status envelope published by the task runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusMessage {
    pub status: TaskStatus,
    /// Run the event is about. Later runs are not reported.
    #[serde(default)]
    pub run_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Slug-encoded task id.
    pub task_id: String,
    #[serde(default)]
    pub runs: Vec<TaskRun>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub run_id: u32,
    pub state: RunState,
    #[serde(default)]
    pub reason_created: Option<String>,
    #[serde(default)]
    pub reason_resolved: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub scheduled: Option<String>,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub resolved: Option<String>,
}

/// State of one task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Exception,
}

/// The task descriptor the status refers to.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub metadata: TaskMetadataBlock,
    #[serde(default)]
    pub extra: TaskExtra,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskMetadataBlock {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskExtra {
    #[serde(default)]
    pub treeherder: Option<TreeherderExtra>,
}

/// Display hints a task carries for this system.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeherderExtra {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub group_symbol: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub job_kind: Option<String>,
    #[serde(default)]
    pub tier: Option<u8>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub machine: Option<MachineHint>,
    #[serde(default)]
    pub collection: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MachineHint {
    pub platform: String,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
}

/// `(project, revision)` of the first reporting route of a task.
pub fn reporting_target(task: &TaskDefinition) -> Option<(String, String)> {
    task.routes.iter().find_map(|route| {
        let rest = route.strip_prefix(ROUTE_PREFIX)?;
        let mut parts = rest.split('.');
        let project = parts.next().filter(|p| !p.is_empty())?;
        let revision = parts.next().filter(|r| !r.is_empty())?;
        Some((project.to_string(), revision.to_string()))
    })
}

/// Expand a task status into one native job message per run.
///
/// Returns an empty vector for tasks that do not report here.
pub fn expand(message: &TaskStatusMessage, task: &TaskDefinition) -> Vec<Value> {
    let Some((project, revision)) = reporting_target(task) else {
        return Vec::new();
    };
    let Some(hints) = task.extra.treeherder.as_ref() else {
        return Vec::new();
    };

    let runs = &message.status.runs;
    runs.iter()
        .enumerate()
        .filter(|(_, run)| message.run_id.is_none_or(|last| run.run_id <= last))
        .map(|(idx, run)| {
            let is_retried = runs
                .get(idx + 1)
                .and_then(|next| next.reason_created.as_deref())
                .is_some_and(|reason| matches!(reason, "retry" | "rerun"));
            run_message(&message.status.task_id, run, is_retried, &project, &revision, task, hints)
        })
        .collect()
}

fn run_message(
    task_id: &str,
    run: &TaskRun,
    is_retried: bool,
    project: &str,
    revision: &str,
    task: &TaskDefinition,
    hints: &TreeherderExtra,
) -> Value {
    let (state, result) = match run.state {
        RunState::Pending => ("pending", "unknown"),
        RunState::Running => ("running", "unknown"),
        RunState::Completed => ("completed", "success"),
        RunState::Failed => ("completed", "fail"),
        RunState::Exception => match run.reason_resolved.as_deref() {
            Some("superseded") => ("completed", "superseded"),
            Some("canceled") => ("completed", "canceled"),
            _ => ("completed", "exception"),
        },
    };

    let platform = hints.machine.as_ref().map(|m| {
        json!({
            "platform": m.platform,
            "os": m.os.as_deref().unwrap_or("-"),
            "architecture": m.architecture.as_deref().unwrap_or("-"),
        })
    });
    let labels: Vec<&str> = hints
        .collection
        .iter()
        .filter(|(_, enabled)| **enabled)
        .map(|(label, _)| label.as_str())
        .collect();

    let mut job = json!({
        "taskId": task_id,
        "runId": run.run_id,
        "retryId": run.run_id,
        "isRetried": is_retried,
        "origin": {"kind": "hg.mozilla.org", "project": project, "revision": revision},
        "display": {
            "jobSymbol": hints.symbol.as_deref().unwrap_or("?"),
            "jobName": task.metadata.name.as_deref().unwrap_or("unknown"),
            "groupSymbol": hints.group_symbol.as_deref().unwrap_or("?"),
            "groupName": hints.group_name.as_deref().unwrap_or("unknown"),
        },
        "state": state,
        "result": result,
        "jobKind": hints.job_kind.as_deref().unwrap_or("other"),
        "tier": hints.tier.unwrap_or(1),
        "owner": task.metadata.owner.as_deref().unwrap_or("unknown"),
        "reason": run.reason_created.as_deref().unwrap_or("scheduled"),
        "labels": labels,
    });

    let Some(obj) = job.as_object_mut() else {
        return job;
    };
    if let Some(product) = &hints.product_name {
        obj.insert("productName".into(), json!(product));
    }
    if let Some(platform) = platform {
        obj.insert("buildPlatform".into(), platform.clone());
        obj.insert("machinePlatform".into(), platform);
    }
    if let Some(worker) = &run.worker_id {
        obj.insert("runMachine".into(), json!({"name": worker}));
    }
    for (key, value) in [
        ("timeScheduled", &run.scheduled),
        ("timeStarted", &run.started),
        ("timeCompleted", &run.resolved),
    ] {
        if let Some(time) = value {
            obj.insert(key.into(), json!(time));
        }
    }
    if run.state != RunState::Pending {
        obj.insert(
            "logs".into(),
            json!([{"name": "live_backing_log", "url": LIVE_BACKING_LOG_PATH}]),
        );
    }
    job
}
