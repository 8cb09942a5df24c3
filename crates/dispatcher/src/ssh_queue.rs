//! Out-of-band setup messaging via the SSH agent queue.
//!
//! The workstation cannot reach a fresh pod directly; an external SSH
//! agent watches `<queue>/requests.jsonl` and appends command results to
//! `<queue>/results.jsonl`. This client appends a request line and polls
//! the results file for the matching id. It is only used during pod
//! bootstrap -- job traffic never goes through here.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use posegrid_core::error::CoreError;

/// How often the results file is re-read while waiting.
const RESULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct QueueRequest<'a> {
    id: &'a str,
    host: &'a str,
    command: &'a str,
}

/// One line of `results.jsonl`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResult {
    pub id: String,
    #[serde(default)]
    pub exit_status: Option<i32>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
}

pub struct SshQueue {
    dir: PathBuf,
}

impl SshQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn requests_path(&self) -> PathBuf {
        self.dir.join("requests.jsonl")
    }

    fn results_path(&self) -> PathBuf {
        self.dir.join("results.jsonl")
    }

    async fn result_line_count(&self) -> usize {
        match tokio::fs::read_to_string(self.results_path()).await {
            Ok(text) => text.lines().count(),
            Err(_) => 0,
        }
    }

    /// Send `command` to `host` and wait up to `timeout` for its result.
    /// Only result lines appended after the request are considered, so a
    /// stale results file cannot satisfy a new request.
    pub async fn send(
        &self,
        id: &str,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, CoreError> {
        let baseline = self.result_line_count().await;

        let request = QueueRequest { id, host, command };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| CoreError::Internal(format!("Failed to encode queue request: {e}")))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.requests_path())
            .await
            .map_err(|e| {
                CoreError::Transport(format!(
                    "Failed to open SSH agent queue '{}': {e}",
                    self.dir.display()
                ))
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| CoreError::Transport(format!("Failed to write queue request: {e}")))?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(text) = tokio::fs::read_to_string(self.results_path()).await {
                for line in text.lines().skip(baseline) {
                    match serde_json::from_str::<CommandResult>(line) {
                        Ok(result) if result.id == id => return Ok(result),
                        Ok(_) => {}
                        Err(_) => continue,
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::Transport(format!(
                    "Timed out waiting for SSH agent result '{id}'"
                )));
            }
            tokio::time::sleep(RESULT_POLL_INTERVAL.min(timeout)).await;
        }
    }
}
