//! converge-worker entry point.
//!
//! Thin by design: boots tracing, connects the store, and hands off to
//! `converge_worker::run_loop`. Graceful shutdown force-releases the queue
//! lock so a killed worker never leaves it stuck until its TTL expires.

use std::process;

use anyhow::Context;
use converge_scm::GitCliScm;
use converge_store::PgStore;
use converge_worker::{init_tracing, log_fatal, log_startup, run_loop, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let worker = WorkerConfig::from_env();
    log_startup(&worker);

    let store = match PgStore::connect_from_env().await {
        Ok(store) => store,
        Err(err) => {
            log_fatal("failed to connect to store", &err);
            process::exit(1);
        }
    };
    let scm = GitCliScm::new(worker.repo_path.clone());
    let holder_pid = process::id() as i64;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    run_loop(&store, &scm, None, worker, holder_pid, shutdown_rx)
        .await
        .context("worker loop exited with an error")
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
