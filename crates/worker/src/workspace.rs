//! Worker-side workspace layout.
//!
//! Fixed child roots under a configurable root directory. `assets/` and
//! `scripts/` are caches surviving across job boundaries; `output/<id>/`
//! exists only for the duration of one job; `jobs/` holds local manifest
//! copies and `logs/` the captured tool output, both pruned after 24 h.

use std::path::{Path, PathBuf};
use std::time::Duration;

use posegrid_core::error::CoreError;

pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn pending_records_dir(&self) -> PathBuf {
        self.root.join("jobs").join("pending")
    }

    pub fn processing_records_dir(&self) -> PathBuf {
        self.root.join("jobs").join("processing")
    }

    /// Local copy of a claimed manifest.
    pub fn processing_record_path(&self, job_id: &str) -> PathBuf {
        self.processing_records_dir().join(format!("{job_id}.json"))
    }

    /// Per-job output tree handed to the tool and mirrored on success.
    pub fn job_output_dir(&self, job_id: &str) -> PathBuf {
        self.output_dir().join(job_id)
    }

    /// Captured stdout+stderr of the tool for one job.
    pub fn job_log_path(&self, job_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{job_id}.log"))
    }

    /// Create every child root.
    pub async fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.assets_dir(),
            self.scripts_dir(),
            self.output_dir(),
            self.logs_dir(),
            self.pending_records_dir(),
            self.processing_records_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Drop the per-job state (output tree, local manifest copy) while
    /// keeping the asset and script caches.
    pub async fn clean_job(&self, job_id: &str) -> Result<(), CoreError> {
        remove_dir_if_present(&self.job_output_dir(job_id)).await?;
        remove_file_if_present(&self.processing_record_path(job_id)).await?;
        Ok(())
    }

    /// Remove local job records and logs older than `older_than`.
    /// Returns how many files were removed.
    pub async fn prune_job_records(&self, older_than: Duration) -> Result<usize, CoreError> {
        let mut removed = 0;
        for dir in [
            self.pending_records_dir(),
            self.processing_records_dir(),
            self.logs_dir(),
        ] {
            removed += prune_dir(&dir, older_than).await?;
        }
        Ok(removed)
    }
}

async fn prune_dir(dir: &Path, older_than: Duration) -> Result<usize, CoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(CoreError::Internal(format!(
                "Failed to read '{}': {e}",
                dir.display()
            )))
        }
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CoreError::Internal(format!("Failed to read '{}': {e}", dir.display())))?
    {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .unwrap_or(Duration::ZERO);
        if age >= older_than {
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

async fn remove_dir_if_present(dir: &Path) -> Result<(), CoreError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::Internal(format!(
            "Failed to remove '{}': {e}",
            dir.display()
        ))),
    }
}

async fn remove_file_if_present(path: &Path) -> Result<(), CoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::Internal(format!(
            "Failed to remove '{}': {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn layout_creates_all_child_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        ws.ensure_layout().await.unwrap();

        for dir in ["assets", "scripts", "output", "logs", "jobs/pending", "jobs/processing"] {
            assert!(tmp.path().join(dir).is_dir(), "missing {dir}");
        }
    }

    #[tokio::test]
    async fn clean_job_keeps_caches() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        ws.ensure_layout().await.unwrap();

        std::fs::create_dir_all(ws.job_output_dir("j1")).unwrap();
        std::fs::write(ws.job_output_dir("j1").join("front.png"), b"png").unwrap();
        std::fs::write(ws.processing_record_path("j1"), b"{}").unwrap();
        std::fs::write(ws.scripts_dir().join("cached.py"), b"print").unwrap();

        ws.clean_job("j1").await.unwrap();

        assert!(!ws.job_output_dir("j1").exists());
        assert!(!ws.processing_record_path("j1").exists());
        assert!(ws.scripts_dir().join("cached.py").is_file());

        // Cleaning an already-clean job is a no-op.
        ws.clean_job("j1").await.unwrap();
    }

    #[tokio::test]
    async fn prune_removes_only_old_records() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        ws.ensure_layout().await.unwrap();

        std::fs::write(ws.processing_record_path("j1"), b"{}").unwrap();
        std::fs::write(ws.job_log_path("j1"), b"log").unwrap();

        // Nothing is older than an hour yet.
        assert_eq!(ws.prune_job_records(Duration::from_secs(3600)).await.unwrap(), 0);
        assert!(ws.processing_record_path("j1").is_file());

        // With a zero threshold everything qualifies.
        assert_eq!(ws.prune_job_records(Duration::ZERO).await.unwrap(), 2);
        assert!(!ws.processing_record_path("j1").exists());
        assert!(!ws.job_log_path("j1").exists());
    }
}
