//! Workstation-side configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use posegrid_core::tuning::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_WAIT_TIMEOUT_SECS};

/// Settings shared by both workstation front-ends (CLI and HTTP API).
#[derive(Debug, Clone)]
pub struct WorkstationSettings {
    /// rclone remote for the bucket, e.g. `r2_pose:pose-grid`.
    pub store_remote: String,
    /// Root of local state; job records live under `<data>/jobs/`,
    /// downloads under `<data>/working/`.
    pub data_dir: PathBuf,
    /// Local scripts tree mirrored to the store on submit.
    pub scripts_dir: PathBuf,
    /// Interval for `wait` polling and the download stability window.
    pub poll_interval: Duration,
    /// Default upper bound on a `wait` call.
    pub wait_timeout: Duration,
    /// Directory of the SSH agent queue, when pod bootstrap is in use.
    pub ssh_agent_queue: Option<PathBuf>,
}

impl WorkstationSettings {
    /// Load from the environment with compiled-in defaults.
    ///
    /// | Env Var             | Default       |
    /// |---------------------|---------------|
    /// | `STORE_REMOTE`      | -- (required)  |
    /// | `DATA_DIR`          | `data`        |
    /// | `SCRIPTS_DIR`       | `scripts`     |
    /// | `JOB_POLL_INTERVAL` | `30` (secs)   |
    /// | `WAIT_TIMEOUT`      | `3600` (secs) |
    /// | `SSH_AGENT_QUEUE`   | unset         |
    ///
    /// Panics when `STORE_REMOTE` is missing or an interval fails to
    /// parse -- misconfiguration should fail fast at startup.
    pub fn from_env() -> Self {
        let store_remote = std::env::var("STORE_REMOTE").expect("STORE_REMOTE must be set");

        let data_dir: PathBuf = std::env::var("DATA_DIR")
            .unwrap_or_else(|_| "data".into())
            .into();

        let scripts_dir: PathBuf = std::env::var("SCRIPTS_DIR")
            .unwrap_or_else(|_| "scripts".into())
            .into();

        let poll_interval_secs: u64 = std::env::var("JOB_POLL_INTERVAL")
            .unwrap_or_else(|_| DEFAULT_POLL_INTERVAL_SECS.to_string())
            .parse()
            .expect("JOB_POLL_INTERVAL must be a number of seconds");

        let wait_timeout_secs: u64 = std::env::var("WAIT_TIMEOUT")
            .unwrap_or_else(|_| DEFAULT_WAIT_TIMEOUT_SECS.to_string())
            .parse()
            .expect("WAIT_TIMEOUT must be a number of seconds");

        let ssh_agent_queue = std::env::var("SSH_AGENT_QUEUE").ok().map(PathBuf::from);

        Self {
            store_remote,
            data_dir,
            scripts_dir,
            poll_interval: Duration::from_secs(poll_interval_secs),
            wait_timeout: Duration::from_secs(wait_timeout_secs),
            ssh_agent_queue,
        }
    }

    /// Default download destination (`<data>/working`).
    pub fn working_dir(&self) -> PathBuf {
        self.data_dir.join("working")
    }
}
