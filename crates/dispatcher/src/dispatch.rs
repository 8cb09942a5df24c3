//! The Dispatcher: submit, status, wait, download, list.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use posegrid_core::error::CoreError;
use posegrid_core::job::{validate_params, JobKind, JobManifest, JobParams};
use posegrid_core::layout::{self, SCRIPTS_PREFIX};
use posegrid_core::slug::is_valid_slug;
use posegrid_core::status::JobStatus;
use posegrid_core::tuning::DEFAULT_POLL_INTERVAL_SECS;
use posegrid_store::ObjectStore;

use crate::records;

/// Upper bound on download re-mirror passes while a worker is still
/// publishing (scenario: wait observed completion off the first uploaded
/// object). After this many passes the partial mirror is returned with a
/// warning.
const MAX_DOWNLOAD_PASSES: u32 = 10;

/// Outcome of a [`Dispatcher::wait`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

pub struct Dispatcher {
    store: Arc<dyn ObjectStore>,
    data_dir: PathBuf,
    scripts_dir: PathBuf,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        data_dir: impl Into<PathBuf>,
        scripts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            data_dir: data_dir.into(),
            scripts_dir: scripts_dir.into(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    /// Override the poll interval used by `wait` and by the download
    /// stability window.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // -----------------------------------------------------------------------
    // Submit
    // -----------------------------------------------------------------------

    /// Validate, mirror the local scripts tree, and upload the manifest to
    /// `jobs/pending/`. The manifest upload is the commit point: a failure
    /// before it leaves no job visible to any worker (the script mirror is
    /// idempotent and shared across jobs).
    pub async fn submit(&self, kind: JobKind, params: JobParams) -> Result<JobManifest, CoreError> {
        validate_params(kind, &params)?;

        let script_path = self.scripts_dir.join(&params.script);
        if tokio::fs::metadata(&script_path).await.is_err() {
            return Err(CoreError::Validation(format!(
                "Script '{}' not found under '{}'",
                params.script,
                self.scripts_dir.display()
            )));
        }

        let manifest = JobManifest::new(kind, params);

        records::write(&self.data_dir, &manifest).await?;

        self.store.mirror(&self.scripts_dir, SCRIPTS_PREFIX).await?;
        self.store
            .put(&layout::pending_key(&manifest.job_id), &manifest.to_bytes()?)
            .await?;

        tracing::info!(
            job_id = %manifest.job_id,
            job_type = manifest.job_type.name(),
            "Job submitted",
        );

        Ok(manifest)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Derive the status of `job_id` from store contents.
    ///
    /// Probe order is mandatory: results (non-empty listing), then
    /// processing, then pending. The worst race -- results uploaded but the
    /// processing manifest not yet deleted -- therefore resolves to
    /// `completed`, which is correct; the reverse cannot happen because the
    /// worker deletes the processing manifest only after the results upload
    /// finishes.
    ///
    /// Ids that fail the slug check return `Unknown` without probing the
    /// store at all.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus, CoreError> {
        if !is_valid_slug(job_id) {
            return Ok(JobStatus::Unknown);
        }

        let results = self.store.list(&layout::results_prefix(job_id)).await?;
        if !results.is_empty() {
            return Ok(JobStatus::Completed);
        }
        if self.store.exists(&layout::processing_key(job_id)).await? {
            return Ok(JobStatus::Processing);
        }
        if self.store.exists(&layout::pending_key(job_id)).await? {
            return Ok(JobStatus::Pending);
        }
        Ok(JobStatus::Unknown)
    }

    // -----------------------------------------------------------------------
    // Wait
    // -----------------------------------------------------------------------

    /// Poll `status` until the job completes, the timeout elapses, or the
    /// caller cancels. Cancelling the wait does NOT cancel the worker-side
    /// job.
    pub async fn wait(
        &self,
        job_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, CoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.status(job_id).await? == JobStatus::Completed {
                return Ok(WaitOutcome::Completed);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }

            let sleep_for = self.poll_interval.min(deadline - now);
            tokio::select! {
                () = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
                () = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Mirror `results/<id>/` into `dest_dir/<id>/`, overwriting on
    /// conflict. Because a worker may still be publishing when completion
    /// is first observed, the mirror repeats until the results listing is
    /// unchanged across one poll interval.
    ///
    /// Returns the local paths of the downloaded files.
    pub async fn download(
        &self,
        job_id: &str,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, CoreError> {
        if !is_valid_slug(job_id) {
            return Err(CoreError::Validation(format!(
                "Job id '{job_id}' is not a valid path segment"
            )));
        }

        let prefix = layout::results_prefix(job_id);
        let mut before = self.store.list(&prefix).await?;
        if before.is_empty() {
            return Err(CoreError::NotFound {
                entity: "Job results",
                id: job_id.to_string(),
            });
        }

        let dest = dest_dir.join(job_id);
        let mut pass = 1u32;
        let listing = loop {
            self.store.pull(&prefix, &dest).await?;
            let after = self.store.list(&prefix).await?;
            if after == before {
                break after;
            }
            if pass >= MAX_DOWNLOAD_PASSES {
                tracing::warn!(
                    job_id,
                    passes = pass,
                    "Results prefix still changing; returning the latest mirror",
                );
                break after;
            }
            before = after;
            pass += 1;
            tokio::time::sleep(self.poll_interval).await;
        };

        tracing::info!(job_id, files = listing.len(), dest = %dest.display(), "Results downloaded");

        let base = format!("{prefix}/");
        Ok(listing
            .iter()
            .map(|key| dest.join(key.strip_prefix(&base).unwrap_or(key.as_str())))
            .collect())
    }

    // -----------------------------------------------------------------------
    // List
    // -----------------------------------------------------------------------

    /// Local job records, newest first. This is the only history the
    /// workstation keeps; the store knows nothing about consumed jobs.
    pub async fn list(&self) -> Result<Vec<JobManifest>, CoreError> {
        records::read_all(&self.data_dir).await
    }

    /// Local records paired with their live store status, newest first.
    pub async fn list_with_status(&self) -> Result<Vec<(JobManifest, JobStatus)>, CoreError> {
        let mut out = Vec::new();
        for manifest in self.list().await? {
            let status = self.status(&manifest.job_id).await?;
            out.push((manifest, status));
        }
        Ok(out)
    }
}
