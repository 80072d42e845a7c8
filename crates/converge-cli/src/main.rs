use anyhow::Result;
use clap::{Parser, Subcommand};
use converge_coherence::ShellCommandRunner;
use converge_engine::checks::SubprocessCheckRunner;
use converge_engine::queue::{confirm_merge, process_queue, reset_queue, ProcessQueueParams};
use converge_engine::validator::{validate_intent, ValidationConfig, ValidationOutcome};
use converge_policy::{load_policy_config, GateMode};
use converge_schemas::IntentStatus;
use converge_scm::GitCliScm;
use converge_store::{IntentStore, PgStore, StoreError};

#[derive(Parser)]
#[command(name = "converge")]
#[command(about = "Merge-coordination engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Merge queue commands
    Queue {
        #[command(subcommand)]
        cmd: QueueCmd,
    },

    /// Run the validation pipeline against a single intent
    Validate {
        intent_id: String,
        #[arg(long)]
        repo_path: String,
        #[arg(long, default_value_t = false)]
        skip_checks: bool,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum QueueCmd {
    /// Run one merge queue cycle
    Process {
        #[arg(long)]
        repo_path: String,
        #[arg(long, default_value = "main")]
        target: String,
        #[arg(long, default_value_t = 20)]
        batch_size: u32,
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        #[arg(long, default_value_t = false)]
        auto_confirm: bool,
        #[arg(long, default_value_t = false)]
        skip_checks: bool,
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Manually confirm a QUEUED intent as merged
    Confirm {
        intent_id: String,
        #[arg(long)]
        merged_commit: Option<String>,
    },
    /// Reset an intent's retry count and optionally its status
    Reset {
        intent_id: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = false)]
        clear_lock: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let store = PgStore::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let ok = store.status().await.is_ok();
                    println!("db_ok={ok}");
                }
                DbCmd::Migrate => {
                    store.migrate().await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Queue { cmd } => match cmd {
            QueueCmd::Process {
                repo_path,
                target,
                batch_size,
                max_retries,
                auto_confirm,
                skip_checks,
                tenant,
            } => {
                let store = PgStore::connect_from_env().await?;
                let scm = GitCliScm::new(repo_path);
                let checks = SubprocessCheckRunner;
                let runner = ShellCommandRunner;
                let policy = load_policy_config(None)?;
                let validation = ValidationConfig {
                    policy: &policy,
                    gate_mode: GateMode::Shadow,
                    enforce_ratio: 1.0,
                    skip_checks,
                    use_last_simulation: true,
                    harness: None,
                };
                let params = ProcessQueueParams {
                    limit: batch_size,
                    target: Some(target.as_str()),
                    auto_confirm,
                    max_retries,
                    tenant_id: tenant.as_deref(),
                };
                let counts = process_queue(
                    &store,
                    &scm,
                    &checks,
                    &runner as &dyn converge_coherence::CommandRunner,
                    &[],
                    std::process::id() as i64,
                    &validation,
                    &params,
                )
                .await?;
                println!("{}", serde_json::to_string_pretty(&counts)?);
            }
            QueueCmd::Confirm { intent_id, merged_commit } => {
                let store = PgStore::connect_from_env().await?;
                confirm_merge(&store, &intent_id, merged_commit).await?;
                println!("confirmed={intent_id}");
            }
            QueueCmd::Reset {
                intent_id,
                status,
                clear_lock,
            } => {
                let store = PgStore::connect_from_env().await?;
                let set_status = status.map(|s| parse_status(&s)).transpose()?;
                reset_queue(&store, &intent_id, set_status, clear_lock).await?;
                println!("reset={intent_id}");
            }
        },

        Commands::Validate {
            intent_id,
            repo_path,
            skip_checks,
        } => {
            let store = PgStore::connect_from_env().await?;
            let scm = GitCliScm::new(repo_path);
            let checks = SubprocessCheckRunner;
            let runner = ShellCommandRunner;
            let policy = load_policy_config(None)?;
            let validation = ValidationConfig {
                policy: &policy,
                gate_mode: GateMode::Shadow,
                enforce_ratio: 1.0,
                skip_checks,
                use_last_simulation: false,
                harness: None,
            };
            let mut intent = store
                .get_intent(&intent_id)
                .await?
                .ok_or_else(|| StoreError::IntentNotFound(intent_id.clone()))?;

            let outcome = validate_intent(
                &store,
                &scm,
                &checks,
                &runner as &dyn converge_coherence::CommandRunner,
                &[],
                &mut intent,
                None,
                &validation,
            )
            .await?;

            match outcome {
                ValidationOutcome::Validated { trace_id } => println!("result=validated trace_id={trace_id}"),
                ValidationOutcome::Blocked { trace_id, reason } => {
                    println!("result=blocked trace_id={trace_id} reason={reason}")
                }
            }
        }
    }

    Ok(())
}

fn parse_status(s: &str) -> Result<IntentStatus> {
    match s.to_lowercase().as_str() {
        "ready" => Ok(IntentStatus::Ready),
        "validated" => Ok(IntentStatus::Validated),
        "queued" => Ok(IntentStatus::Queued),
        "merged" => Ok(IntentStatus::Merged),
        "rejected" => Ok(IntentStatus::Rejected),
        other => anyhow::bail!("unknown status '{other}'"),
    }
}
