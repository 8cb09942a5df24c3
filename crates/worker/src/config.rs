use std::path::PathBuf;
use std::time::Duration;

use posegrid_core::tuning::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_TOOL_TIMEOUT_SECS};

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// rclone remote for the bucket, e.g. `r2_pose:pose-grid`.
    pub store_remote: String,
    /// Root of the worker workspace.
    pub workspace_root: PathBuf,
    /// Sleep between polls of `jobs/pending/` when the queue is empty.
    pub poll_interval: Duration,
    /// Execution timeout for one tool run; also the staleness threshold
    /// for abandoned `processing/` manifests on startup.
    pub tool_timeout: Duration,
    /// Command used to invoke the render tool.
    pub tool: String,
    /// Verbose logging and no tool timeout.
    pub debug_mode: bool,
    /// Sleep a random fraction of the poll interval before claiming, to
    /// soften the claim race in multi-worker deployments.
    pub claim_jitter: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default       |
    /// |----------------------|---------------|
    /// | `STORE_REMOTE`       | -- (required)  |
    /// | `WORKSPACE_ROOT`     | `/workspace`  |
    /// | `JOB_POLL_INTERVAL`  | `30` (secs)   |
    /// | `JOB_TIMEOUT`        | `3600` (secs) |
    /// | `RENDER_TOOL`        | `render-tool` |
    /// | `DEBUG_MODE`         | off           |
    /// | `WORKER_CLAIM_JITTER`| off           |
    ///
    /// Panics on missing `STORE_REMOTE` or unparsable numbers -- a
    /// misconfigured worker should die at startup, not mid-job.
    pub fn from_env() -> Self {
        let store_remote = std::env::var("STORE_REMOTE").expect("STORE_REMOTE must be set");

        let workspace_root: PathBuf = std::env::var("WORKSPACE_ROOT")
            .unwrap_or_else(|_| "/workspace".into())
            .into();

        let poll_interval_secs: u64 = std::env::var("JOB_POLL_INTERVAL")
            .unwrap_or_else(|_| DEFAULT_POLL_INTERVAL_SECS.to_string())
            .parse()
            .expect("JOB_POLL_INTERVAL must be a number of seconds");

        let tool_timeout_secs: u64 = std::env::var("JOB_TIMEOUT")
            .unwrap_or_else(|_| DEFAULT_TOOL_TIMEOUT_SECS.to_string())
            .parse()
            .expect("JOB_TIMEOUT must be a number of seconds");

        let tool = std::env::var("RENDER_TOOL").unwrap_or_else(|_| "render-tool".into());

        Self {
            store_remote,
            workspace_root,
            poll_interval: Duration::from_secs(poll_interval_secs),
            tool_timeout: Duration::from_secs(tool_timeout_secs),
            tool,
            debug_mode: env_flag("DEBUG_MODE"),
            claim_jitter: env_flag("WORKER_CLAIM_JITTER"),
        }
    }
}

/// Read a boolean flag from the environment (`1`, `true`, `yes`).
fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
