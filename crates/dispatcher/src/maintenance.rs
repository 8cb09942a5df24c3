//! Stale-claim recovery.
//!
//! A worker that died mid-job leaves its manifest in `jobs/processing/`
//! forever. Requeueing is always an explicit operator action (`posegrid
//! reap`); nothing in the system calls this on a schedule, because
//! automatic requeueing combined with duplicate-execution tolerance could
//! re-run a poisoned job without bound.

use std::time::Duration;

use chrono::Utc;

use posegrid_core::error::CoreError;
use posegrid_core::layout::{self, PROCESSING_PREFIX};
use posegrid_core::slug::is_valid_slug;
use posegrid_store::ObjectStore;

/// Move every `processing/` manifest whose store modified-time is older
/// than `older_than` back to `pending/`. Returns the requeued job ids.
pub async fn reap_stale(
    store: &dyn ObjectStore,
    older_than: Duration,
) -> Result<Vec<String>, CoreError> {
    let now = Utc::now();
    let mut requeued = Vec::new();

    for key in store.list(PROCESSING_PREFIX).await? {
        let Some(job_id) = layout::job_id_from_manifest_key(&key) else {
            continue;
        };
        if !is_valid_slug(job_id) {
            tracing::warn!(key = %key, "Skipping foreign object in processing prefix");
            continue;
        }

        let Some(meta) = store.stat(&key).await? else {
            // Deleted between list and stat; the worker finished.
            continue;
        };

        let age = (now - meta.modified).num_seconds().max(0) as u64;
        if age < older_than.as_secs() {
            continue;
        }

        match store.rename(&key, &layout::pending_key(job_id)).await {
            Ok(()) => {
                tracing::info!(job_id, age_secs = age, "Requeued stale processing manifest");
                requeued.push(job_id.to_string());
            }
            Err(posegrid_store::StoreError::NotFound(_)) => {
                // Another reaper or a resurfacing worker got there first.
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(requeued)
}
