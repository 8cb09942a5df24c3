//! posegrid -- CLI front-end over the Dispatcher.
//!
//! Exit codes: 0 ok, 2 invalid arguments, 3 not found, 4 timeout,
//! 5 transport failure.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use posegrid_core::error::CoreError;
use posegrid_core::job::{JobKind, JobParams};
use posegrid_core::layout::SCRIPTS_PREFIX;
use posegrid_core::status::JobStatus;
use posegrid_dispatcher::ssh_queue::SshQueue;
use posegrid_dispatcher::{bootstrap, maintenance, Dispatcher, WaitOutcome, WorkstationSettings};
use posegrid_store::{ObjectStore, RcloneStore};

const EXIT_INVALID_ARGS: i32 = 2;
const EXIT_NOT_FOUND: i32 = 3;
const EXIT_TIMEOUT: i32 = 4;
const EXIT_TRANSPORT: i32 = 5;

#[derive(Parser)]
#[command(
    name = "posegrid",
    about = "Dispatch render jobs to GPU workers through the object store"
)]
struct Cli {
    /// Store remote (overrides STORE_REMOTE)
    #[arg(long, global = true)]
    remote: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a job
    Submit {
        /// Job kind: render or character
        #[arg(long, default_value = "render")]
        kind: String,
        /// Store-relative script path under scripts/
        #[arg(long)]
        script: String,
        /// Comma-separated character names
        #[arg(long)]
        characters: Option<String>,
        /// Store-relative asset paths under assets/ the job needs
        #[arg(long = "asset", value_name = "PATH")]
        assets: Vec<String>,
        /// Output subpath for downloaded results
        #[arg(long, default_value = "renders")]
        output: String,
        /// Scalar overrides passed to the tool
        #[arg(long = "param", value_name = "KEY=VAL")]
        params: Vec<String>,
        /// Wait for completion and download the results
        #[arg(long)]
        wait: bool,
    },
    /// Check job status (no id lists all recorded jobs)
    Status {
        #[arg(long)]
        id: Option<String>,
    },
    /// Wait for a job to complete
    Wait {
        #[arg(long)]
        id: String,
        /// Timeout in seconds (default: WAIT_TIMEOUT)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Download job results
    Download {
        #[arg(long)]
        id: String,
        /// Destination directory (default: <data>/working)
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Download even when the job is not completed
        #[arg(long)]
        force: bool,
    },
    /// List locally recorded jobs
    List,
    /// Move stale processing manifests back to pending
    Reap {
        /// Age threshold in seconds
        #[arg(long = "older-than", value_name = "SECS")]
        older_than: u64,
    },
    /// Mirror local scripts to the store, optionally bootstrap a pod
    Setup {
        /// Pod host to bootstrap over the SSH agent queue
        #[arg(long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Parse first: --help and argument errors must not require any
    // environment to be configured (clap exits 2 on bad arguments).
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Flags take precedence over the environment; the settings loader
    // reads STORE_REMOTE, so install the override before loading.
    if let Some(remote) = &cli.remote {
        std::env::set_var("STORE_REMOTE", remote);
    }
    let settings = WorkstationSettings::from_env();
    let store: Arc<dyn ObjectStore> = Arc::new(RcloneStore::new(settings.store_remote.clone()));
    let dispatcher = Dispatcher::new(
        store,
        settings.data_dir.clone(),
        settings.scripts_dir.clone(),
    )
    .with_poll_interval(settings.poll_interval);

    match run(cli.command, &dispatcher, &settings).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code(&e));
        }
    }
}

fn exit_code(err: &CoreError) -> i32 {
    match err {
        CoreError::Validation(_) => EXIT_INVALID_ARGS,
        CoreError::NotFound { .. } => EXIT_NOT_FOUND,
        CoreError::Transport(_) => EXIT_TRANSPORT,
        CoreError::Execution { .. } | CoreError::Internal(_) => 1,
    }
}

async fn run(
    command: Command,
    dispatcher: &Dispatcher,
    settings: &WorkstationSettings,
) -> Result<i32, CoreError> {
    match command {
        Command::Submit {
            kind,
            script,
            characters,
            assets,
            output,
            params,
            wait,
        } => {
            let kind = JobKind::from_name(&kind)?;
            let mut job_params = JobParams::new(script, output);
            job_params.characters = characters.map(|list| {
                list.split(',')
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect()
            });
            if !assets.is_empty() {
                job_params.assets = Some(assets);
            }
            job_params.overrides = parse_overrides(&params)?;

            let manifest = dispatcher.submit(kind, job_params).await?;
            let id = manifest.job_id.clone();
            println!("Job dispatched: {id}");

            if wait {
                wait_and_download(dispatcher, settings, &id).await
            } else {
                println!("  status:   posegrid status --id {id}");
                println!("  download: posegrid download --id {id}");
                Ok(0)
            }
        }

        Command::Status { id: Some(id) } => {
            let status = dispatcher.status(&id).await?;
            println!("{id}: {status}");
            Ok(0)
        }

        Command::Status { id: None } => {
            for (manifest, status) in dispatcher.list_with_status().await? {
                println!("{}: {status} ({})", manifest.job_id, manifest.created_at);
            }
            Ok(0)
        }

        Command::Wait { id, timeout } => {
            let timeout = timeout.map(Duration::from_secs).unwrap_or(settings.wait_timeout);
            match dispatcher.wait(&id, timeout, &CancellationToken::new()).await? {
                WaitOutcome::Completed => {
                    println!("{id}: completed");
                    Ok(0)
                }
                WaitOutcome::TimedOut | WaitOutcome::Cancelled => {
                    eprintln!("Timed out waiting for {id}");
                    Ok(EXIT_TIMEOUT)
                }
            }
        }

        Command::Download { id, dest, force } => {
            if !force {
                let status = dispatcher.status(&id).await?;
                if status != JobStatus::Completed {
                    eprintln!("Job {id} is not completed (status: {status})");
                    eprintln!("Use --force to download anyway");
                    return Ok(EXIT_NOT_FOUND);
                }
            }
            let dest = dest.unwrap_or_else(|| settings.working_dir());
            let files = dispatcher.download(&id, &dest).await?;
            println!(
                "Downloaded {} file(s) to {}",
                files.len(),
                dest.join(&id).display()
            );
            Ok(0)
        }

        Command::List => {
            for manifest in dispatcher.list().await? {
                println!(
                    "{} [{}] {}",
                    manifest.job_id,
                    manifest.job_type.name(),
                    manifest.created_at
                );
            }
            Ok(0)
        }

        Command::Reap { older_than } => {
            let requeued = maintenance::reap_stale(
                dispatcher.store().as_ref(),
                Duration::from_secs(older_than),
            )
            .await?;
            for id in &requeued {
                println!("requeued: {id}");
            }
            println!("{} manifest(s) moved back to pending", requeued.len());
            Ok(0)
        }

        Command::Setup { host } => {
            dispatcher
                .store()
                .mirror(&settings.scripts_dir, SCRIPTS_PREFIX)
                .await
                .map_err(CoreError::from)?;
            println!("Scripts uploaded to {SCRIPTS_PREFIX}/");

            match host {
                Some(host) => run_bootstrap(settings, &host).await.map(|()| 0),
                None => {
                    println!("Run `posegrid setup --host <pod>` to bootstrap a fresh pod");
                    Ok(0)
                }
            }
        }
    }
}

/// Parse `KEY=VAL` overrides. Values that parse as JSON scalars keep their
/// type; everything else is a string.
fn parse_overrides(params: &[String]) -> Result<BTreeMap<String, serde_json::Value>, CoreError> {
    let mut overrides = BTreeMap::new();
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            return Err(CoreError::Validation(format!(
                "Override '{param}' must have the form KEY=VAL"
            )));
        };
        let value = match serde_json::from_str::<serde_json::Value>(value) {
            Ok(v) if !v.is_object() && !v.is_array() => v,
            _ => serde_json::Value::String(value.to_string()),
        };
        overrides.insert(key.to_string(), value);
    }
    Ok(overrides)
}

async fn wait_and_download(
    dispatcher: &Dispatcher,
    settings: &WorkstationSettings,
    id: &str,
) -> Result<i32, CoreError> {
    println!("Waiting for {id} (poll every {}s)...", settings.poll_interval.as_secs());
    match dispatcher
        .wait(id, settings.wait_timeout, &CancellationToken::new())
        .await?
    {
        WaitOutcome::Completed => {
            let dest = settings.working_dir();
            let files = dispatcher.download(id, &dest).await?;
            println!(
                "Completed: {} file(s) in {}",
                files.len(),
                dest.join(id).display()
            );
            Ok(0)
        }
        WaitOutcome::TimedOut | WaitOutcome::Cancelled => {
            eprintln!("Timed out waiting for {id}; the job may still be running");
            eprintln!("  check:    posegrid status --id {id}");
            eprintln!("  download: posegrid download --id {id}");
            Ok(EXIT_TIMEOUT)
        }
    }
}

/// Bootstrap a fresh pod over the SSH agent queue: replay the store
/// credentials from the local rclone config, verify the connection,
/// prefetch scripts.
async fn run_bootstrap(settings: &WorkstationSettings, host: &str) -> Result<(), CoreError> {
    let Some(queue_dir) = &settings.ssh_agent_queue else {
        return Err(CoreError::Validation(
            "SSH_AGENT_QUEUE is not configured; cannot reach the pod".into(),
        ));
    };

    let home = std::env::var("HOME")
        .map_err(|_| CoreError::Validation("HOME is not set; cannot find rclone config".into()))?;
    let config_path = PathBuf::from(home).join(".config/rclone/rclone.conf");
    let config = std::fs::read_to_string(&config_path).map_err(|e| {
        CoreError::Validation(format!(
            "Cannot read rclone config '{}': {e}",
            config_path.display()
        ))
    })?;

    let section = settings
        .store_remote
        .split(':')
        .next()
        .unwrap_or(&settings.store_remote);
    let creds = bootstrap::parse_rclone_section(&config, section)?;

    let workspace_root =
        std::env::var("WORKSPACE_ROOT").unwrap_or_else(|_| "/workspace".into());

    let queue = SshQueue::new(queue_dir);
    bootstrap::bootstrap_pod(&queue, host, &settings.store_remote, &creds, &workspace_root).await?;

    println!("Pod {host} bootstrapped; the worker agent can start polling");
    Ok(())
}
