//! Message normalization into [`CanonicalJob`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::LoaderConfig;
use crate::error::IngestResult;
use crate::job::{
    CanonicalJob, Guid, JobFields, JobResult, JobState, LogReference, Platform, TaskMetadata,
};
use crate::schema::{JobBody, Machine, RawJobMessage};
use crate::slug;

/// Name given to error summaries published as job links.
pub const ERROR_SUMMARY_LOG_NAME: &str = "errorsummary_json";

const ERROR_SUMMARY_SUFFIX: &str = "_errorsummary.log";
const UNKNOWN: &str = "unknown";

/// Normalize a validated message.
///
/// `root_url` is the task runtime root that relative log paths are
/// resolved against. Fails only when a native task slug cannot be decoded.
pub fn normalize(
    raw: &RawJobMessage,
    root_url: &str,
    config: &LoaderConfig,
) -> IngestResult<CanonicalJob> {
    let (guid, task_metadata) = match raw {
        RawJobMessage::Legacy(m) => (
            Guid::new(m.task_id.clone()),
            legacy_task_metadata(&m.task_id, m.retry_id),
        ),
        RawJobMessage::Native(m) => {
            let task = slug::decode(&m.task_id)?;
            let metadata = TaskMetadata {
                task_id: slug::encode(&task),
                run_id: m.run_id,
                retry_id: m.retry_id.unwrap_or(m.run_id),
            };
            (Guid::new(format!("{task}/{}", m.run_id)), Some(metadata))
        }
    };

    let body = raw.body();
    let result = if body.state == JobState::Completed {
        JobResult::from_raw(body.result, body.job_kind)
    } else {
        JobResult::Unknown
    };
    let logs = if body.state == JobState::Pending {
        Vec::new()
    } else {
        log_references(body, root_url, task_metadata.as_ref())
    };

    Ok(CanonicalJob {
        origin: body.origin.clone(),
        guid,
        state: body.state,
        result,
        is_retried: body.is_retried,
        fields: fields(body, config),
        logs,
        task_metadata,
        superseded: body.coalesced.iter().map(|g| Guid::new(g.as_str())).collect(),
    })
}

/// Clip `text` to at most `max` characters.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Task metadata for a legacy guid of the form `<uuid>/<run>`.
fn legacy_task_metadata(guid: &str, retry_id: Option<u32>) -> Option<TaskMetadata> {
    let (task, run) = guid.split_once('/')?;
    let task = Uuid::parse_str(task).ok()?;
    let run_id: u32 = run.parse().ok()?;
    Some(TaskMetadata {
        task_id: slug::encode(&task),
        run_id,
        retry_id: retry_id.unwrap_or(run_id),
    })
}

fn fields(body: &JobBody, config: &LoaderConfig) -> JobFields {
    let name = |v: Option<&str>| truncate(v.unwrap_or(UNKNOWN), config.max_name_len);
    let display = &body.display;

    let mut job_symbol = display.job_symbol.clone().unwrap_or_else(|| "?".into());
    if let Some(chunk) = display.chunk_id {
        job_symbol.push_str(&chunk.to_string());
    }

    let default_platform = body.build_machine.as_ref().or(body.run_machine.as_ref());
    let build_platform = body.build_platform.as_ref().or(default_platform);
    let machine_platform = body.machine_platform.as_ref().or(default_platform);
    let machine_name = body
        .run_machine
        .as_ref()
        .and_then(|m| m.name.as_deref())
        .or_else(|| body.build_machine.as_ref().and_then(|m| m.name.as_deref()));

    let mut option_collection = body.labels.clone();
    option_collection.sort();
    option_collection.dedup();
    if option_collection.is_empty() {
        option_collection.push("opt".into());
    }

    JobFields {
        job_type_name: name(display.job_name.as_deref()),
        job_symbol: truncate(&job_symbol, config.max_symbol_len),
        group_name: name(display.group_name.as_deref()),
        group_symbol: truncate(
            display.group_symbol.as_deref().unwrap_or("?"),
            config.max_symbol_len,
        ),
        job_kind: body.job_kind,
        tier: body.tier.unwrap_or(1),
        product_name: name(body.product_name.as_deref()),
        reason: name(body.reason.as_deref()),
        who: name(body.owner.as_deref()),
        machine_name: name(machine_name),
        build_platform: platform(build_platform, config),
        machine_platform: platform(machine_platform, config),
        option_collection,
        submit_time: timestamp(body.time_scheduled.as_deref()),
        start_time: timestamp(body.time_started.as_deref()),
        end_time: timestamp(body.time_completed.as_deref()),
    }
}

fn platform(machine: Option<&Machine>, config: &LoaderConfig) -> Platform {
    let Some(m) = machine else {
        return Platform::default();
    };
    let clip = |v: &Option<String>| truncate(v.as_deref().unwrap_or(UNKNOWN), config.max_name_len);
    Platform {
        platform: clip(&m.platform),
        os: clip(&m.os),
        architecture: clip(&m.architecture),
    }
}

fn timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn log_references(
    body: &JobBody,
    root_url: &str,
    task: Option<&TaskMetadata>,
) -> Vec<LogReference> {
    let mut logs: Vec<LogReference> = body
        .logs
        .iter()
        .map(|log| LogReference::new(log.name.as_str(), resolve_url(&log.url, root_url, task)))
        .collect();

    let summaries = body
        .job_info
        .iter()
        .flat_map(|info| info.links.iter())
        .filter(|link| link.link_text.ends_with(ERROR_SUMMARY_SUFFIX));
    for link in summaries {
        logs.push(LogReference::new(
            ERROR_SUMMARY_LOG_NAME,
            resolve_url(&link.url, root_url, task),
        ));
    }
    logs
}

/// Make a log url absolute. Relative paths name artifacts of the task run.
fn resolve_url(url: &str, root_url: &str, task: Option<&TaskMetadata>) -> String {
    if url.starts_with("https://") || url.starts_with("http://") {
        return url.to_string();
    }
    match task {
        Some(t) => format!(
            "{}/api/queue/v1/task/{}/runs/{}/artifacts/{}",
            root_url.trim_end_matches('/'),
            t.task_id,
            t.run_id,
            url.trim_start_matches('/'),
        ),
        None => url.to_string(),
    }
}
