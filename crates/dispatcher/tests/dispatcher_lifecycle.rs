//! Integration tests for the Dispatcher against the in-memory store.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use posegrid_core::error::CoreError;
use posegrid_core::job::{JobKind, JobManifest, JobParams};
use posegrid_core::layout;
use posegrid_core::status::JobStatus;
use posegrid_dispatcher::{maintenance, records, Dispatcher, WaitOutcome};
use posegrid_store::{MemoryStore, ObjectMeta, ObjectStore, StoreError};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Fixture {
    store: Arc<MemoryStore>,
    dispatcher: Dispatcher,
    _data: TempDir,
    _scripts: TempDir,
}

/// A dispatcher over a fresh memory store, with one render script on disk
/// and a 10 ms poll interval so wait/download loops run fast.
fn fixture() -> Fixture {
    let data = tempfile::tempdir().unwrap();
    let scripts = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(scripts.path().join("rendering")).unwrap();
    std::fs::write(scripts.path().join("rendering/multi_angle.py"), b"print(1)").unwrap();

    let store = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::new(store.clone(), data.path(), scripts.path())
        .with_poll_interval(Duration::from_millis(10));

    Fixture {
        store,
        dispatcher,
        _data: data,
        _scripts: scripts,
    }
}

fn render_params() -> JobParams {
    let mut params = JobParams::new("rendering/multi_angle.py", "multi_angle");
    params.characters = Some(vec!["X Bot".into(), "Dancer".into()]);
    params
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_uploads_scripts_record_and_manifest() {
    let fx = fixture();
    let manifest = fx
        .dispatcher
        .submit(JobKind::Render, render_params())
        .await
        .unwrap();

    // Manifest landed in pending.
    let key = layout::pending_key(&manifest.job_id);
    let stored = JobManifest::parse(&fx.store.get(&key).await.unwrap()).unwrap();
    assert_eq!(stored, manifest);

    // Scripts were mirrored as a shared prefix, not per-job copies.
    assert!(fx
        .store
        .exists("scripts/rendering/multi_angle.py")
        .await
        .unwrap());

    // Local record exists and parses back to the same manifest.
    let listed = fx.dispatcher.list().await.unwrap();
    assert_eq!(listed, vec![manifest.clone()]);

    // A status query right after submit observes at least pending.
    assert_eq!(
        fx.dispatcher.status(&manifest.job_id).await.unwrap(),
        JobStatus::Pending
    );
}

#[tokio::test]
async fn submit_rejects_traversal_output_dir_without_store_mutation() {
    let fx = fixture();
    let mut params = render_params();
    params.output_dir = "../../etc/passwd".into();

    let err = fx.dispatcher.submit(JobKind::Render, params).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(fx.store.keys().is_empty(), "no store mutation on rejection");
    assert!(fx.dispatcher.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn submit_rejects_missing_local_script() {
    let fx = fixture();
    let params = JobParams::new("rendering/does_not_exist.py", "out");

    let err = fx.dispatcher.submit(JobKind::Render, params).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(fx.store.keys().is_empty());
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_unknown_for_never_submitted_id() {
    let fx = fixture();
    assert_eq!(
        fx.dispatcher
            .status("nonexistent_20200101_000000_abcdef12")
            .await
            .unwrap(),
        JobStatus::Unknown
    );
}

#[tokio::test]
async fn status_unknown_without_probing_for_unsafe_ids() {
    let fx = fixture();
    for id in ["..", "a/b", "jobs/../etc", ""] {
        assert_eq!(fx.dispatcher.status(id).await.unwrap(), JobStatus::Unknown);
    }
}

#[tokio::test]
async fn status_prefers_processing_over_pending_mid_move() {
    let fx = fixture();
    let manifest = fx
        .dispatcher
        .submit(JobKind::Render, render_params())
        .await
        .unwrap();
    let id = &manifest.job_id;

    // Both present, as during the copy-then-delete window.
    fx.store
        .put(&layout::processing_key(id), &manifest.to_bytes().unwrap())
        .await
        .unwrap();
    assert_eq!(fx.dispatcher.status(id).await.unwrap(), JobStatus::Processing);

    // Any results object wins over everything.
    fx.store
        .put(&layout::log_key(id), b"rendering...")
        .await
        .unwrap();
    assert_eq!(fx.dispatcher.status(id).await.unwrap(), JobStatus::Completed);
}

// ---------------------------------------------------------------------------
// Wait
// ---------------------------------------------------------------------------

#[tokio::test]
async fn wait_returns_once_any_result_object_exists() {
    let fx = fixture();
    let manifest = fx
        .dispatcher
        .submit(JobKind::Render, render_params())
        .await
        .unwrap();
    let id = manifest.job_id.clone();

    let store = fx.store.clone();
    let key = layout::log_key(&id);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.put(&key, b"done").await.unwrap();
    });

    let outcome = fx
        .dispatcher
        .wait(&id, Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Completed);
}

#[tokio::test]
async fn wait_times_out_on_silent_job() {
    let fx = fixture();
    let outcome = fx
        .dispatcher
        .wait(
            "render_20260802_120000_a1b2c3d4",
            Duration::from_millis(60),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);
}

#[tokio::test]
async fn wait_is_cancellable() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let outcome = fx
        .dispatcher
        .wait(
            "render_20260802_120000_a1b2c3d4",
            Duration::from_secs(60),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Cancelled);
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn download_unknown_id_is_not_found() {
    let fx = fixture();
    let dest = tempfile::tempdir().unwrap();
    let err = fx
        .dispatcher
        .download("nonexistent_20200101_000000_abcdef12", dest.path())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn download_rejects_unsafe_ids() {
    let fx = fixture();
    let dest = tempfile::tempdir().unwrap();
    let err = fx.dispatcher.download("..", dest.path()).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn download_mirrors_results_tree() {
    let fx = fixture();
    let id = "render_20260802_120000_a1b2c3d4";
    fx.store
        .put(&format!("results/{id}/X_Bot/front.png"), b"png")
        .await
        .unwrap();
    fx.store
        .put(&layout::log_key(id), b"log")
        .await
        .unwrap();

    let dest = tempfile::tempdir().unwrap();
    let files = fx.dispatcher.download(id, dest.path()).await.unwrap();

    assert_eq!(files.len(), 2);
    assert!(dest.path().join(id).join("X_Bot/front.png").is_file());
    assert!(dest.path().join(id).join("log.txt").is_file());
}

/// A store whose first `pull` races with a worker that is still uploading:
/// one more result object appears mid-mirror. Download must re-mirror until
/// the listing is stable.
struct PublishingStore {
    inner: MemoryStore,
    late_key: String,
    injected: AtomicBool,
}

#[async_trait::async_trait]
impl ObjectStore for PublishingStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix).await
    }
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key).await
    }
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.inner.put(key, bytes).await
    }
    async fn mirror(&self, local: &Path, prefix: &str) -> Result<(), StoreError> {
        self.inner.mirror(local, prefix).await
    }
    async fn pull(&self, prefix: &str, local: &Path) -> Result<(), StoreError> {
        self.inner.pull(prefix, local).await?;
        if !self.injected.swap(true, Ordering::SeqCst) {
            self.inner.put(&self.late_key, b"late").await?;
        }
        Ok(())
    }
    async fn rename(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        self.inner.rename(src, dst).await
    }
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }
    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        self.inner.stat(key).await
    }
}

#[tokio::test]
async fn download_repeats_mirror_until_listing_is_stable() {
    let id = "render_20260802_120000_a1b2c3d4";
    let store = PublishingStore {
        inner: MemoryStore::new(),
        late_key: format!("results/{id}/X_Bot/back.png"),
        injected: AtomicBool::new(false),
    };
    store
        .put(&format!("results/{id}/X_Bot/front.png"), b"png")
        .await
        .unwrap();

    let data = tempfile::tempdir().unwrap();
    let scripts = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(Arc::new(store), data.path(), scripts.path())
        .with_poll_interval(Duration::from_millis(10));

    let dest = tempfile::tempdir().unwrap();
    let files = dispatcher.download(id, dest.path()).await.unwrap();

    assert_eq!(files.len(), 2, "late-published object must be mirrored too");
    assert!(dest.path().join(id).join("X_Bot/back.png").is_file());
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_orders_records_newest_first() {
    let fx = fixture();

    let mut older = JobManifest::new(JobKind::Render, render_params());
    older.job_id = "render_20260801_080000_aaaaaaaa".into();
    older.created_at = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
    let mut newer = older.clone();
    newer.job_id = "render_20260802_080000_bbbbbbbb".into();
    newer.created_at = Utc.with_ymd_and_hms(2026, 8, 2, 8, 0, 0).unwrap();

    records::write(fx.dispatcher.data_dir(), &older).await.unwrap();
    records::write(fx.dispatcher.data_dir(), &newer).await.unwrap();

    let ids: Vec<String> = fx
        .dispatcher
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.job_id)
        .collect();
    assert_eq!(
        ids,
        vec![
            "render_20260802_080000_bbbbbbbb".to_string(),
            "render_20260801_080000_aaaaaaaa".to_string()
        ]
    );
}

// ---------------------------------------------------------------------------
// Reap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reap_requeues_only_stale_processing_manifests() {
    let fx = fixture();
    let stale = JobManifest::new(JobKind::Render, render_params());
    let fresh = JobManifest::new(JobKind::Render, render_params());

    fx.store
        .put(
            &layout::processing_key(&stale.job_id),
            &stale.to_bytes().unwrap(),
        )
        .await
        .unwrap();
    fx.store
        .put(
            &layout::processing_key(&fresh.job_id),
            &fresh.to_bytes().unwrap(),
        )
        .await
        .unwrap();
    fx.store.set_modified(
        &layout::processing_key(&stale.job_id),
        Utc::now() - chrono::Duration::hours(2),
    );

    let requeued = maintenance::reap_stale(fx.store.as_ref(), Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(requeued, vec![stale.job_id.clone()]);
    assert!(fx
        .store
        .exists(&layout::pending_key(&stale.job_id))
        .await
        .unwrap());
    assert!(!fx
        .store
        .exists(&layout::processing_key(&stale.job_id))
        .await
        .unwrap());
    assert!(fx
        .store
        .exists(&layout::processing_key(&fresh.job_id))
        .await
        .unwrap());
}
