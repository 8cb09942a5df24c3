//! The worker loop: claim, stage, execute, publish, cleanup.
//!
//! The store offers no compare-and-swap, so the claim is copy-then-delete
//! and the race is resolved at whichever step first observes a missing
//! source: another worker won, walk away. A double-win overwrites
//! `jobs/processing/<id>.json` with an identical manifest (manifests are
//! immutable) and `results/<id>/` is last-writer-wins -- duplicate work
//! wastes GPU time but cannot corrupt state.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use posegrid_core::error::CoreError;
use posegrid_core::failure::{FailureCause, FailureRecord};
use posegrid_core::job::JobManifest;
use posegrid_core::layout::{self, ASSETS_PREFIX, PENDING_PREFIX, PROCESSING_PREFIX, SCRIPTS_PREFIX};
use posegrid_core::slug::is_valid_slug;
use posegrid_core::tuning::LOCAL_RECORD_RETENTION_SECS;
use posegrid_store::{ObjectStore, StoreError};

use crate::config::WorkerConfig;
use crate::tool::{self, ToolOutcome};
use crate::workspace::Workspace;

enum ClaimOutcome {
    Claimed(JobManifest),
    /// Another worker moved the manifest first, or the manifest turned out
    /// to be unusable and was failed on the spot.
    Consumed,
}

/// Why staging could not produce a runnable workspace.
enum StageError {
    /// A script or asset named by the manifest is not on the store.
    /// Permanent for this job.
    MissingInput(String),
    /// The store itself failed after retries. The job stays in
    /// `processing/` for a restart or an explicit reap to recover.
    Transport(CoreError),
}

pub struct WorkerAgent {
    store: Arc<dyn ObjectStore>,
    config: WorkerConfig,
    workspace: Workspace,
}

impl WorkerAgent {
    pub fn new(store: Arc<dyn ObjectStore>, config: WorkerConfig) -> Self {
        let workspace = Workspace::new(&config.workspace_root);
        Self {
            store,
            config,
            workspace,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Run the polling loop until the cancellation token fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), CoreError> {
        self.workspace
            .ensure_layout()
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to create workspace layout: {e}")))?;

        if let Err(e) = self.recover_stale_claims().await {
            tracing::error!(error = %e, "Stale-claim recovery failed; continuing");
        }

        tracing::info!(
            root = %self.workspace.root().display(),
            poll_secs = self.config.poll_interval.as_secs(),
            "Worker agent started",
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.poll_once().await {
                // Something was consumed; look again without sleeping so a
                // backlog drains at full speed.
                Ok(true) => {}
                Ok(false) => self.idle_sleep(&cancel).await,
                Err(e) => {
                    tracing::error!(error = %e, "Worker cycle failed");
                    self.idle_sleep(&cancel).await;
                }
            }
        }

        tracing::info!("Worker agent stopped");
        Ok(())
    }

    async fn idle_sleep(&self, cancel: &CancellationToken) {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    /// One pass over the pending queue: pick the lexically first manifest
    /// (oldest first, since ids embed their timestamp) and take it through
    /// the whole lifecycle. Returns whether anything was consumed.
    pub async fn poll_once(&self) -> Result<bool, CoreError> {
        let mut pending = self.store.list(PENDING_PREFIX).await?;
        pending.retain(|key| key.ends_with(".json"));
        pending.sort();

        let Some(key) = pending.first() else {
            return Ok(false);
        };
        let Some(job_id) = layout::job_id_from_manifest_key(key) else {
            return Ok(false);
        };
        if !is_valid_slug(job_id) {
            tracing::warn!(key = %key, "Skipping foreign object in pending prefix");
            return Ok(false);
        }
        let job_id = job_id.to_string();

        if self.config.claim_jitter {
            let jitter = self
                .config
                .poll_interval
                .mul_f64(rand::rng().random::<f64>());
            tokio::time::sleep(jitter).await;
        }

        match self.claim(&job_id).await? {
            ClaimOutcome::Consumed => Ok(true),
            ClaimOutcome::Claimed(manifest) => {
                self.process(&manifest).await?;
                Ok(true)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Claim
    // -----------------------------------------------------------------------

    /// Download the manifest, then move it `pending/` → `processing/`.
    /// A missing source at either step means another worker claimed it.
    async fn claim(&self, job_id: &str) -> Result<ClaimOutcome, CoreError> {
        let pending_key = layout::pending_key(job_id);

        let bytes = match self.store.get(&pending_key).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(job_id, "Lost claim race before download");
                return Ok(ClaimOutcome::Consumed);
            }
            Err(e) => return Err(e.into()),
        };

        // Keep a local copy before the move so a crash cannot strand a
        // manifest we can no longer read.
        tokio::fs::write(self.workspace.processing_record_path(job_id), &bytes)
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to write local manifest: {e}")))?;

        match self
            .store
            .rename(&pending_key, &layout::processing_key(job_id))
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(job_id, "Lost claim race during move");
                self.workspace.clean_job(job_id).await?;
                return Ok(ClaimOutcome::Consumed);
            }
            Err(e) => return Err(e.into()),
        }

        // Manifests come from outside this process: re-check the id and
        // every path-like param before anything touches the filesystem.
        let manifest = JobManifest::parse(&bytes).and_then(|manifest| {
            if manifest.job_id != job_id {
                return Err(CoreError::Validation(format!(
                    "Manifest id '{}' does not match its key",
                    manifest.job_id
                )));
            }
            manifest.validate()?;
            Ok(manifest)
        });

        match manifest {
            Ok(manifest) => Ok(ClaimOutcome::Claimed(manifest)),
            Err(e) => {
                tracing::error!(job_id, error = %e, "Claimed manifest is unusable");
                self.fail_and_cleanup(job_id, FailureCause::Internal, &e.to_string())
                    .await?;
                Ok(ClaimOutcome::Consumed)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stage
    // -----------------------------------------------------------------------

    /// Mirror the script cache (and the asset cache when the manifest lists
    /// assets), then verify every referenced input is actually present.
    async fn stage(&self, manifest: &JobManifest) -> Result<(), StageError> {
        if let Err(e) = self.pull_cache(SCRIPTS_PREFIX, &self.workspace.scripts_dir()).await {
            return Err(StageError::Transport(e));
        }

        let script = self.workspace.scripts_dir().join(&manifest.params.script);
        if tokio::fs::metadata(&script).await.is_err() {
            return Err(StageError::MissingInput(format!(
                "Script '{}' is not on the store",
                manifest.params.script
            )));
        }

        if let Some(assets) = &manifest.params.assets {
            if !assets.is_empty() {
                if let Err(e) = self.pull_cache(ASSETS_PREFIX, &self.workspace.assets_dir()).await {
                    return Err(StageError::Transport(e));
                }
                for asset in assets {
                    let path = self.workspace.assets_dir().join(asset);
                    if tokio::fs::metadata(&path).await.is_err() {
                        return Err(StageError::MissingInput(format!(
                            "Asset '{asset}' is not on the store"
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Pull a cache prefix; a prefix that does not exist yet is just empty.
    async fn pull_cache(&self, prefix: &str, dir: &std::path::Path) -> Result<(), CoreError> {
        match self.store.pull(prefix, dir).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Execute and publish
    // -----------------------------------------------------------------------

    async fn process(&self, manifest: &JobManifest) -> Result<(), CoreError> {
        let job_id = manifest.job_id.as_str();
        tracing::info!(job_id, kind = manifest.job_type.name(), "Job claimed");

        match self.stage(manifest).await {
            Ok(()) => {}
            Err(StageError::MissingInput(message)) => {
                tracing::warn!(job_id, %message, "Job inputs missing");
                self.fail_and_cleanup(job_id, FailureCause::MissingInput, &message)
                    .await?;
                return Ok(());
            }
            Err(StageError::Transport(e)) => {
                return self.abandon(job_id, "Staging failed", e).await;
            }
        }

        let output_dir = self.workspace.job_output_dir(job_id);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to create output dir: {e}")))?;
        let log_path = self.workspace.job_log_path(job_id);
        let script_path = self.workspace.scripts_dir().join(&manifest.params.script);

        // DEBUG_MODE disables the timeout so a tool can sit in a debugger.
        let timeout = if self.config.debug_mode {
            None
        } else {
            Some(self.config.tool_timeout)
        };

        let args = tool::tool_args(manifest, &script_path, &output_dir);
        tracing::info!(job_id, tool = %self.config.tool, "Executing tool");

        let outcome = match tool::run_tool(
            &self.config.tool,
            &args,
            self.workspace.root(),
            &log_path,
            timeout,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(CoreError::Execution { cause, message }) => {
                tracing::error!(job_id, %message, "Tool could not run");
                self.fail_and_cleanup(job_id, cause, &message).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let publish = match outcome {
            ToolOutcome::Success => {
                tracing::info!(job_id, "Tool finished, publishing results");
                self.publish_success(job_id, &output_dir, &log_path).await
            }
            ToolOutcome::Failed { exit_code } => {
                let message = match exit_code {
                    Some(code) => format!("Tool exited with code {code}"),
                    None => "Tool was killed by a signal".to_string(),
                };
                tracing::warn!(job_id, %message, "Tool failed");
                self.publish_failure(job_id, FailureCause::ToolError, &message, &log_path)
                    .await
            }
            ToolOutcome::TimedOut => {
                let message = format!(
                    "Tool exceeded the {}s execution timeout and was killed",
                    self.config.tool_timeout.as_secs()
                );
                tracing::warn!(job_id, %message, "Tool timed out");
                self.publish_failure(job_id, FailureCause::Timeout, &message, &log_path)
                    .await
            }
        };

        match publish {
            Ok(()) => self.cleanup(job_id).await,
            Err(e) => self.abandon(job_id, "Publish failed", e).await,
        }
    }

    /// Results upload must complete before cleanup deletes the processing
    /// manifest; that ordering is what makes the status probe race-free.
    async fn publish_success(
        &self,
        job_id: &str,
        output_dir: &std::path::Path,
        log_path: &std::path::Path,
    ) -> Result<(), CoreError> {
        self.store
            .mirror(output_dir, &layout::results_prefix(job_id))
            .await
            .map_err(CoreError::from)?;
        self.upload_log(job_id, log_path).await
    }

    async fn publish_failure(
        &self,
        job_id: &str,
        cause: FailureCause,
        message: &str,
        log_path: &std::path::Path,
    ) -> Result<(), CoreError> {
        let record = FailureRecord::new(cause, message);
        self.store
            .put(&layout::failed_key(job_id), &record.to_bytes()?)
            .await
            .map_err(CoreError::from)?;
        self.upload_log(job_id, log_path).await
    }

    async fn upload_log(&self, job_id: &str, log_path: &std::path::Path) -> Result<(), CoreError> {
        let bytes = tokio::fs::read(log_path).await.unwrap_or_default();
        self.store
            .put(&layout::log_key(job_id), &bytes)
            .await
            .map_err(CoreError::from)
    }

    /// Publish a failure record for a job that never reached execution and
    /// clean up. There is no tool output, so the failure message doubles as
    /// the log body (`log.txt` exists for every published job).
    async fn fail_and_cleanup(
        &self,
        job_id: &str,
        cause: FailureCause,
        message: &str,
    ) -> Result<(), CoreError> {
        let record = FailureRecord::new(cause, message);
        let publish = async {
            self.store
                .put(&layout::failed_key(job_id), &record.to_bytes()?)
                .await?;
            self.store
                .put(&layout::log_key(job_id), message.as_bytes())
                .await?;
            Ok::<(), CoreError>(())
        };
        match publish.await {
            Ok(()) => self.cleanup(job_id).await,
            Err(e) => self.abandon(job_id, "Failure publish failed", e).await,
        }
    }

    /// Delete the processing manifest, then drop the per-job workspace and
    /// prune old local records.
    async fn cleanup(&self, job_id: &str) -> Result<(), CoreError> {
        match self.store.delete(&layout::processing_key(job_id)).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                // A duplicate winner finished first; nothing left to do.
                tracing::warn!(job_id, "Processing manifest already deleted");
            }
            Err(e) => return Err(e.into()),
        }

        self.workspace.clean_job(job_id).await?;

        let retention = std::time::Duration::from_secs(LOCAL_RECORD_RETENTION_SECS);
        if let Err(e) = self.workspace.prune_job_records(retention).await {
            tracing::warn!(error = %e, "Record pruning failed");
        }

        tracing::info!(job_id, "Job cleanup complete");
        Ok(())
    }

    /// Transient-transport dead end: leave the processing manifest where it
    /// is (a restart or an explicit reap retries the job), keep the caches,
    /// drop the rest of the per-job state.
    async fn abandon(&self, job_id: &str, context: &str, error: CoreError) -> Result<(), CoreError> {
        tracing::error!(job_id, error = %error, "{context}; leaving job in processing");
        self.workspace.clean_job(job_id).await
    }

    // -----------------------------------------------------------------------
    // Startup recovery
    // -----------------------------------------------------------------------

    /// Requeue `processing/` manifests older than the tool timeout. Those
    /// belong to a worker (possibly this one, before a crash) that never
    /// finished; moving them back to `pending/` re-runs them from scratch.
    pub async fn recover_stale_claims(&self) -> Result<(), CoreError> {
        let now = Utc::now();

        for key in self.store.list(PROCESSING_PREFIX).await? {
            if !key.ends_with(".json") {
                continue;
            }
            let Some(job_id) = layout::job_id_from_manifest_key(&key) else {
                continue;
            };
            if !is_valid_slug(job_id) {
                continue;
            }

            let Some(meta) = self.store.stat(&key).await? else {
                continue;
            };
            let age = (now - meta.modified).num_seconds().max(0) as u64;
            if age < self.config.tool_timeout.as_secs() {
                continue;
            }

            match self.store.rename(&key, &layout::pending_key(job_id)).await {
                Ok(()) => {
                    tracing::warn!(job_id, age_secs = age, "Requeued stale processing manifest");
                }
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}
