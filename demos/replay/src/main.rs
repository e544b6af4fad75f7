//! Replays job messages through the loader with in-memory storage.
//!
//! ```text
//! cargo run -- [messages.json] [loader.toml]
//! ```
//!
//! Without arguments a scripted sequence is replayed: duplicated and
//! out-of-order messages for one job, a job for an unknown project, and
//! finally a batch whose push is missing. Only the project `try` at
//! revision `abc123` is known. Set `RUST_LOG=debug` to see skipped
//! messages.

use std::sync::Arc;

use job_loader::memory::{MemoryJobStore, MemoryPushes, MemoryRepositories, QueuedParseTrigger};
use job_loader::{JobLoader, LoaderConfig};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

fn scripted_messages() -> Vec<Value> {
    let job = |state: &str, result: &str| {
        json!({
            "taskId": "008dcdae-bde0-4834-a967-d13d681037ae/0",
            "origin": {"kind": "hg.mozilla.org", "project": "try", "revision": "abc123"},
            "display": {"jobSymbol": "B", "jobName": "build-linux64/opt"},
            "state": state,
            "result": result,
            "jobKind": "build",
            "logs": [{"name": "live_backing_log", "url": "public/logs/live_backing.log"}]
        })
    };
    let mut stray = job("running", "unknown");
    stray["taskId"] = json!("0401bb89-f4b5-41b1-820f-088e3fb36495/0");
    stray["origin"]["project"] = json!("ferd");

    vec![
        job("pending", "unknown"),
        job("completed", "fail"),
        job("running", "unknown"),
        job("completed", "fail"),
        stray,
        json!({"exchange": "exchange/taskcluster-queue/v1/task-defined"}),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let messages: Vec<Value> = match args.next() {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => scripted_messages(),
    };
    let config = match args.next() {
        Some(path) => LoaderConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => LoaderConfig::default(),
    };

    let mut repositories = MemoryRepositories::new();
    let repository = repositories.add("try");
    let mut pushes = MemoryPushes::new();
    pushes.add(&repository, "abc123");
    let store = MemoryJobStore::new();
    let (trigger, mut parse_queue) = QueuedParseTrigger::new();

    let root_url = config.root_url.clone();
    let loader = JobLoader::new(
        Arc::new(repositories),
        Arc::new(pushes),
        Arc::new(store.clone()),
        Arc::new(trigger),
        config,
    )?;

    let stored = loader.process_batch(&messages, &root_url).await?;
    println!("Stored {stored} of {} messages", messages.len());
    println!();

    println!("Jobs:");
    for job in store.jobs() {
        println!(
            "  {} {:<10} {:<10} {}",
            job.id, job.state.state, job.state.result, job.guid
        );
        for (_, log) in store.logs(job.id) {
            println!("      {}: {}", log.name, log.url);
        }
    }

    println!();
    println!("Queued for parsing:");
    while let Ok(log) = parse_queue.try_recv() {
        println!("  log {log}");
    }

    // The push for this revision never arrives: the whole batch is refused.
    let mut late = messages.clone();
    late.push(json!({
        "taskId": "0401bb89-f4b5-41b1-820f-088e3fb36495/1",
        "origin": {"project": "try", "revision": "ffffffffffff"},
        "display": {"jobName": "lint"},
        "state": "running"
    }));
    let before = store.job_count();
    match loader.process_batch(&late, &root_url).await {
        Ok(n) => println!("\nUnexpectedly stored {n} messages"),
        Err(err) => println!(
            "\nBatch refused ({err}); jobs stored before: {before}, after: {}",
            store.job_count()
        ),
    }

    Ok(())
}
