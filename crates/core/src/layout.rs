//! Object-store bucket layout.
//!
//! The bucket has exactly five top-level prefixes; a job's status is derived
//! from which prefix currently holds its manifest, so these names are wire
//! format. Keys use `/` as separator, are case-sensitive, and must match
//! `[A-Za-z0-9/_.-]+`.

/// Manifests awaiting a worker.
pub const PENDING_PREFIX: &str = "jobs/pending";

/// Manifests claimed by a worker (at most one worker per id).
pub const PROCESSING_PREFIX: &str = "jobs/processing";

/// Output trees of completed jobs.
pub const RESULTS_PREFIX: &str = "results";

/// User scripts mirrored from the workstation.
pub const SCRIPTS_PREFIX: &str = "scripts";

/// Static inputs (meshes, animations) shared across jobs.
pub const ASSETS_PREFIX: &str = "assets";

/// Marker object written under `results/<id>/` when a job fails.
pub const FAILED_MARKER: &str = "_FAILED";

/// Captured stdout+stderr of the tool, uploaded with every publish.
pub const LOG_NAME: &str = "log.txt";

pub fn pending_key(job_id: &str) -> String {
    format!("{PENDING_PREFIX}/{job_id}.json")
}

pub fn processing_key(job_id: &str) -> String {
    format!("{PROCESSING_PREFIX}/{job_id}.json")
}

pub fn results_prefix(job_id: &str) -> String {
    format!("{RESULTS_PREFIX}/{job_id}")
}

pub fn failed_key(job_id: &str) -> String {
    format!("{RESULTS_PREFIX}/{job_id}/{FAILED_MARKER}")
}

pub fn log_key(job_id: &str) -> String {
    format!("{RESULTS_PREFIX}/{job_id}/{LOG_NAME}")
}

/// Whether `key` is a legal object key: non-empty and restricted to
/// `[A-Za-z0-9/_.-]`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-'))
}

/// Extract the job id from a queue manifest key such as
/// `jobs/pending/<id>.json`. Returns `None` for keys that are not manifest
/// objects.
pub fn job_id_from_manifest_key(key: &str) -> Option<&str> {
    key.rsplit('/').next()?.strip_suffix(".json")
}
