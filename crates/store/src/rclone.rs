//! rclone-backed store implementation.
//!
//! Each operation maps to one rclone subcommand against the configured
//! remote (e.g. `r2_pose:pose-grid`). rclone is invoked as a subprocess;
//! its exit codes 3 and 4 (directory / file not found) map to
//! [`StoreError::NotFound`], everything else non-zero is a transport
//! failure and goes through the retry policy.
//!
//! Credentials live in rclone's own configuration and never pass through
//! this process.

use std::path::Path;
use std::process::Stdio;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;
use crate::retry::RetryPolicy;
use crate::{check_key, ObjectMeta, ObjectStore};

/// rclone exit code for "directory not found".
const EXIT_DIR_NOT_FOUND: i32 = 3;
/// rclone exit code for "file not found".
const EXIT_FILE_NOT_FOUND: i32 = 4;

pub struct RcloneStore {
    remote: String,
    binary: String,
    retry: RetryPolicy,
}

impl RcloneStore {
    /// `remote` is an rclone target such as `r2_pose:pose-grid`.
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            binary: "rclone".into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn target(&self, key: &str) -> String {
        format!("{}/{key}", self.remote)
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>, StoreError> {
        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(StoreError::BinaryMissing)?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(StoreError::CommandFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }

    async fn run_with_stdin(&self, args: &[String], input: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut child = tokio::process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(StoreError::BinaryMissing)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(StoreError::CommandFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}

/// Map rclone's not-found exit codes onto [`StoreError::NotFound`] so the
/// retry policy does not hammer on a deterministic miss.
fn map_not_found(err: StoreError, key: &str) -> StoreError {
    match err {
        StoreError::CommandFailed {
            exit_code: Some(EXIT_DIR_NOT_FOUND | EXIT_FILE_NOT_FOUND),
            ..
        } => StoreError::NotFound(key.to_string()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Argv builders (pure, unit-tested without the binary)
// ---------------------------------------------------------------------------

pub(crate) fn lsf_args(target: &str) -> Vec<String> {
    vec![
        "lsf".into(),
        "-R".into(),
        "--files-only".into(),
        target.into(),
    ]
}

pub(crate) fn cat_args(target: &str) -> Vec<String> {
    vec!["cat".into(), target.into()]
}

pub(crate) fn rcat_args(target: &str) -> Vec<String> {
    vec!["rcat".into(), target.into()]
}

pub(crate) fn copy_args(src: &str, dst: &str) -> Vec<String> {
    vec!["copy".into(), src.into(), dst.into()]
}

pub(crate) fn copyto_args(src: &str, dst: &str) -> Vec<String> {
    vec!["copyto".into(), src.into(), dst.into()]
}

pub(crate) fn deletefile_args(target: &str) -> Vec<String> {
    vec!["deletefile".into(), target.into()]
}

pub(crate) fn stat_args(target: &str) -> Vec<String> {
    vec!["lsjson".into(), "--stat".into(), target.into()]
}

/// One entry of `rclone lsjson --stat` output.
#[derive(Debug, Deserialize)]
struct RcloneItem {
    #[serde(rename = "Size")]
    size: i64,
    #[serde(rename = "ModTime")]
    mod_time: DateTime<Utc>,
}

#[async_trait::async_trait]
impl ObjectStore for RcloneStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        check_key(prefix)?;
        let args = lsf_args(&self.target(prefix));
        let stdout = match self
            .retry
            .run("list", || {
                let args = args.clone();
                async move { self.run(&args).await.map_err(|e| map_not_found(e, prefix)) }
            })
            .await
        {
            Ok(stdout) => stdout,
            // A prefix that does not exist yet is simply empty.
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let text = String::from_utf8_lossy(&stdout);
        let mut keys: Vec<String> = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| format!("{prefix}/{line}"))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        check_key(key)?;
        let args = cat_args(&self.target(key));
        self.retry
            .run("get", || {
                let args = args.clone();
                async move { self.run(&args).await.map_err(|e| map_not_found(e, key)) }
            })
            .await
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        check_key(key)?;
        let args = rcat_args(&self.target(key));
        self.retry
            .run("put", || {
                let args = args.clone();
                async move { self.run_with_stdin(&args, bytes).await.map(|_| ()) }
            })
            .await
    }

    async fn mirror(&self, local: &Path, prefix: &str) -> Result<(), StoreError> {
        check_key(prefix)?;
        let args = copy_args(&local.to_string_lossy(), &self.target(prefix));
        self.retry
            .run("mirror", || {
                let args = args.clone();
                async move { self.run(&args).await.map(|_| ()) }
            })
            .await
    }

    async fn pull(&self, prefix: &str, local: &Path) -> Result<(), StoreError> {
        check_key(prefix)?;
        let args = copy_args(&self.target(prefix), &local.to_string_lossy());
        self.retry
            .run("pull", || {
                let args = args.clone();
                async move { self.run(&args).await.map_err(|e| map_not_found(e, prefix)) }
            })
            .await
            .map(|_| ())
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        check_key(src)?;
        check_key(dst)?;

        let copy = copyto_args(&self.target(src), &self.target(dst));
        self.retry
            .run("rename/copy", || {
                let args = copy.clone();
                async move { self.run(&args).await.map_err(|e| map_not_found(e, src)) }
            })
            .await?;

        let del = deletefile_args(&self.target(src));
        self.retry
            .run("rename/delete", || {
                let args = del.clone();
                async move { self.run(&args).await.map_err(|e| map_not_found(e, src)) }
            })
            .await
            .map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        check_key(key)?;
        let args = deletefile_args(&self.target(key));
        self.retry
            .run("delete", || {
                let args = args.clone();
                async move { self.run(&args).await.map_err(|e| map_not_found(e, key)) }
            })
            .await
            .map(|_| ())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.stat(key).await?.is_some())
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        check_key(key)?;
        let args = stat_args(&self.target(key));
        let stdout = match self
            .retry
            .run("stat", || {
                let args = args.clone();
                async move { self.run(&args).await.map_err(|e| map_not_found(e, key)) }
            })
            .await
        {
            Ok(stdout) => stdout,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let item: RcloneItem = serde_json::from_slice(&stdout)
            .map_err(|e| StoreError::ParseError(format!("lsjson --stat for '{key}': {e}")))?;
        Ok(Some(ObjectMeta {
            size: item.size.max(0) as u64,
            modified: item.mod_time,
        }))
    }
}
