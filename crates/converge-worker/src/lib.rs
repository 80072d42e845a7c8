//! The poll-loop worker: periodically calls `ProcessQueue` against a
//! configured store/SCM pair until shut down. All tuning comes from
//! `CONVERGE_WORKER_*` environment variables so the binary needs no
//! config file to run.

use std::time::Duration;

use anyhow::{Context, Result};
use converge_coherence::{CommandRunner, ShellCommandRunner};
use converge_engine::checks::SubprocessCheckRunner;
use converge_engine::queue::{process_queue, ProcessQueueParams, QueueCounts};
use converge_engine::validator::ValidationConfig;
use converge_eventlog::new_trace_id;
use converge_policy::{load_policy_config, GateMode, PolicyConfig};
use converge_schemas::NewEvent;
use converge_scm::GitCliScm;
use converge_store::Store;
use tracing::{error, info, warn};

pub use converge_engine::queue::QUEUE_LOCK_NAME;

pub const ENV_POLL_INTERVAL: &str = "CONVERGE_WORKER_POLL_INTERVAL";
pub const ENV_BATCH_SIZE: &str = "CONVERGE_WORKER_BATCH_SIZE";
pub const ENV_MAX_RETRIES: &str = "CONVERGE_WORKER_MAX_RETRIES";
pub const ENV_TARGET: &str = "CONVERGE_WORKER_TARGET";
pub const ENV_AUTO_CONFIRM: &str = "CONVERGE_WORKER_AUTO_CONFIRM";
pub const ENV_SKIP_CHECKS: &str = "CONVERGE_WORKER_SKIP_CHECKS";
pub const ENV_FRESH_SIMULATION: &str = "CONVERGE_WORKER_FRESH_SIMULATION";
/// Git checkout the worker drives `SimulateMerge`/`ExecuteMerge` against.
/// Named for the spec's `CONVERGE_DB_PATH` var; the database connection
/// itself is `converge_store::ENV_DB_URL` (`CONVERGE_DATABASE_URL`),
/// following the teacher's Postgres/sqlx stack rather than a file-path DB.
pub const ENV_REPO_PATH: &str = "CONVERGE_DB_PATH";

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: u32,
    pub max_retries: u32,
    pub target: String,
    pub auto_confirm: bool,
    pub skip_checks: bool,
    pub use_last_simulation: bool,
    pub repo_path: String,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        WorkerConfig {
            poll_interval: Duration::from_secs(env_u32(ENV_POLL_INTERVAL, 5) as u64),
            batch_size: env_u32(ENV_BATCH_SIZE, 20),
            max_retries: env_u32(ENV_MAX_RETRIES, 3),
            target: std::env::var(ENV_TARGET).unwrap_or_else(|_| "main".to_string()),
            auto_confirm: env_bool(ENV_AUTO_CONFIRM, false),
            skip_checks: env_bool(ENV_SKIP_CHECKS, false),
            use_last_simulation: !env_bool(ENV_FRESH_SIMULATION, false),
            repo_path: std::env::var(ENV_REPO_PATH).unwrap_or_else(|_| ".".to_string()),
        }
    }
}

/// One `ProcessQueue` cycle. A cycle-level failure (lock contention, a
/// store outage) is logged and swallowed — the worker loop keeps running
/// rather than crashing on a transient error.
pub async fn run_cycle<S: Store>(
    store: &S,
    scm: &GitCliScm,
    policy: &PolicyConfig,
    worker: &WorkerConfig,
    holder_pid: i64,
) -> Result<QueueCounts> {
    let checks = SubprocessCheckRunner;
    let runner = ShellCommandRunner;
    let validation = ValidationConfig {
        policy,
        gate_mode: GateMode::Shadow,
        enforce_ratio: 1.0,
        skip_checks: worker.skip_checks,
        use_last_simulation: worker.use_last_simulation,
        harness: None,
    };
    let params = ProcessQueueParams {
        limit: worker.batch_size,
        target: Some(worker.target.as_str()),
        auto_confirm: worker.auto_confirm,
        max_retries: worker.max_retries,
        tenant_id: None,
    };

    process_queue(store, scm, &checks, &runner as &dyn CommandRunner, &[], holder_pid, &validation, &params).await
}

async fn emit_lifecycle_event<S: Store>(store: &S, event_type: &str) {
    let result = store
        .append(NewEvent {
            id: None,
            trace_id: Some(new_trace_id()),
            event_type: event_type.to_string(),
            intent_id: None,
            agent_id: None,
            tenant_id: None,
            payload: serde_json::json!({}),
            evidence: serde_json::json!({}),
        })
        .await;
    if let Err(err) = result {
        warn!(error = %err, event_type, "failed to append worker lifecycle event");
    }
}

/// Runs cycles on `worker.poll_interval` until `shutdown` resolves. Emits
/// `worker.started` on entry and `worker.stopped` (after force-releasing
/// the queue lock, in case it is held) on exit. Every cycle's error is
/// logged, never propagated — a worker process should stay up across a
/// bad cycle; a signal only sets a draining flag so the in-flight cycle
/// completes before the loop breaks.
pub async fn run_loop<S: Store>(
    store: &S,
    scm: &GitCliScm,
    policy_path: Option<&std::path::Path>,
    worker: WorkerConfig,
    holder_pid: i64,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let policy = load_policy_config(policy_path).context("load policy config")?;
    let mut ticker = tokio::time::interval(worker.poll_interval);

    emit_lifecycle_event(store, "worker.started").await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_cycle(store, scm, &policy, &worker, holder_pid).await {
                    Ok(counts) => info!(?counts, "queue cycle complete"),
                    Err(err) => warn!(error = %err, "queue cycle failed"),
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, draining current cycle");
                break;
            }
        }
    }

    if let Err(err) = store.force_release_queue_lock(converge_engine::queue::QUEUE_LOCK_NAME).await {
        error!(error = %err, "failed to force-release queue lock on shutdown");
    }
    emit_lifecycle_event(store, "worker.stopped").await;
    Ok(())
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

pub fn log_startup(worker: &WorkerConfig) {
    info!(
        poll_interval = ?worker.poll_interval,
        batch_size = worker.batch_size,
        max_retries = worker.max_retries,
        target = %worker.target,
        auto_confirm = worker.auto_confirm,
        "converge-worker starting"
    );
}

pub fn log_fatal(context: &str, err: &anyhow::Error) {
    error!(error = %err, "{context}");
}
