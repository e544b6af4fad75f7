//! Supported job message schemas.
//!
//! Two message shapes reach the loader:
//!
//! - **Legacy** pulse jobs: a flat camelCase document whose `taskId` *is*
//!   the job guid (conventionally `<task uuid>/<retry id>`).
//! - **Native** task-runtime jobs: `taskId` is the 22-character task slug
//!   and an integer `runId` names the run. The guid is derived from both.
//!
//! Apart from those identifiers both shapes share one body, [`JobBody`].
//! The shape is decided once here; later stages only see
//! [`CanonicalJob`](crate::CanonicalJob).

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{IngestError, IngestResult};
use crate::job::{JobKind, JobState, Origin, RawResult};
use crate::slug;

/// Which schema a message matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaTag {
    Legacy,
    Native,
}

/// A message that passed validation, tagged by shape.
#[derive(Debug, Clone)]
pub enum RawJobMessage {
    Legacy(LegacyJobMessage),
    Native(NativeJobMessage),
}

impl RawJobMessage {
    /// Schema the message matched.
    pub fn tag(&self) -> SchemaTag {
        match self {
            RawJobMessage::Legacy(_) => SchemaTag::Legacy,
            RawJobMessage::Native(_) => SchemaTag::Native,
        }
    }

    /// Shared body of the message.
    pub fn body(&self) -> &JobBody {
        match self {
            RawJobMessage::Legacy(m) => &m.body,
            RawJobMessage::Native(m) => &m.body,
        }
    }
}

/// Pulse job message; `task_id` is the guid.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyJobMessage {
    pub task_id: String,
    #[serde(default)]
    pub retry_id: Option<u32>,
    #[serde(flatten)]
    pub body: JobBody,
}

/// Task-runtime job message, one per task run.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeJobMessage {
    /// Slug-encoded task id.
    pub task_id: String,
    pub run_id: u32,
    #[serde(default)]
    pub retry_id: Option<u32>,
    #[serde(flatten)]
    pub body: JobBody,
}

/// Fields common to both message shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobBody {
    pub origin: Origin,
    pub display: Display,
    pub state: JobState,
    #[serde(default)]
    pub result: RawResult,
    #[serde(default)]
    pub is_retried: bool,
    #[serde(default)]
    pub job_kind: JobKind,
    #[serde(default)]
    pub tier: Option<u8>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub build_machine: Option<Machine>,
    #[serde(default)]
    pub run_machine: Option<Machine>,
    #[serde(default)]
    pub build_platform: Option<Machine>,
    #[serde(default)]
    pub machine_platform: Option<Machine>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub time_scheduled: Option<String>,
    #[serde(default)]
    pub time_started: Option<String>,
    #[serde(default)]
    pub time_completed: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub job_info: Option<JobInfo>,
    #[serde(default)]
    pub coalesced: Vec<String>,
}

/// Display block of a message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Display {
    #[serde(default)]
    pub job_symbol: Option<String>,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub group_symbol: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub chunk_id: Option<u32>,
}

/// Machine or platform block. Platform blocks carry no `name`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Machine {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
}

/// Log entry of a message.
#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    pub name: String,
    pub url: String,
}

/// Extra job information; only links are used.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    #[serde(default)]
    pub links: Vec<Link>,
}

/// A link published by a job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub url: String,
    #[serde(default)]
    pub link_text: String,
}

/// Validate a raw message, returning `None` if it matches no schema.
///
/// Non-job traffic on the bus is expected, so rejection is only logged at
/// debug level.
pub fn validate(message: &Value) -> Option<RawJobMessage> {
    match check(message) {
        Ok(raw) => Some(raw),
        Err(err) => {
            debug!(error = %err, "dropping message that matches no job schema");
            None
        }
    }
}

/// Validate a raw message, explaining why it was rejected.
pub fn check(message: &Value) -> IngestResult<RawJobMessage> {
    let obj = message
        .as_object()
        .ok_or_else(|| invalid("message is not an object"))?;

    for path in ["/origin/project", "/origin/revision", "/state", "/taskId"] {
        match message.pointer(path).and_then(Value::as_str) {
            Some(s) if !s.is_empty() => {}
            _ => return Err(invalid(&format!("missing required field {path}"))),
        }
    }
    if !obj.get("display").is_some_and(Value::is_object) {
        return Err(invalid("missing display block"));
    }

    if obj.contains_key("runId") {
        let task_id = obj.get("taskId").and_then(Value::as_str).unwrap_or_default();
        if !slug::is_slug(task_id) {
            return Err(invalid("native message taskId is not a task slug"));
        }
        let native: NativeJobMessage = serde_json::from_value(message.clone())
            .map_err(|e| invalid(&e.to_string()))?;
        Ok(RawJobMessage::Native(native))
    } else {
        let legacy: LegacyJobMessage = serde_json::from_value(message.clone())
            .map_err(|e| invalid(&e.to_string()))?;
        Ok(RawJobMessage::Legacy(legacy))
    }
}

fn invalid(reason: &str) -> IngestError {
    IngestError::SchemaInvalid(reason.to_string())
}
