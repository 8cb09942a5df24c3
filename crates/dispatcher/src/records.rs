//! Local job records (`<data>/jobs/<id>.json`).
//!
//! A mirror of every submitted manifest, written at submit time and never
//! touched again by the orchestrator. Unreadable files are skipped with a
//! warning rather than failing the whole listing.

use std::path::{Path, PathBuf};

use posegrid_core::error::CoreError;
use posegrid_core::job::JobManifest;

pub fn record_path(data_dir: &Path, job_id: &str) -> PathBuf {
    data_dir.join("jobs").join(format!("{job_id}.json"))
}

pub async fn write(data_dir: &Path, manifest: &JobManifest) -> Result<(), CoreError> {
    let path = record_path(data_dir, &manifest.job_id);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to create records dir: {e}")))?;
    }
    tokio::fs::write(&path, manifest.to_bytes()?)
        .await
        .map_err(|e| {
            CoreError::Internal(format!(
                "Failed to write job record '{}': {e}",
                path.display()
            ))
        })
}

/// All parseable records, sorted by creation time descending.
pub async fn read_all(data_dir: &Path) -> Result<Vec<JobManifest>, CoreError> {
    let jobs_dir = data_dir.join("jobs");
    let mut manifests = Vec::new();

    let mut entries = match tokio::fs::read_dir(&jobs_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(manifests),
        Err(e) => {
            return Err(CoreError::Internal(format!(
                "Failed to read records dir '{}': {e}",
                jobs_dir.display()
            )))
        }
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CoreError::Internal(format!("Failed to read records dir: {e}")))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable job record");
                continue;
            }
        };
        match JobManifest::parse(&bytes) {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping malformed job record");
            }
        }
    }

    manifests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(manifests)
}
