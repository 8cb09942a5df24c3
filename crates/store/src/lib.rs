//! Object-store client wrapper.
//!
//! A minimal, total interface over the bucket: each operation either
//! succeeds fully or returns an error ([`mirror`](ObjectStore::mirror) and
//! [`pull`](ObjectStore::pull) are multi-object and therefore not atomic --
//! callers tolerate partial mirrors because all inputs are idempotent).
//!
//! The production implementation shells out to rclone; an in-memory
//! implementation backs integration tests. Retry and bandwidth policy live
//! in this crate, never in the callers.

pub mod error;
pub mod memory;
pub mod rclone;
pub mod retry;

use std::path::Path;

use chrono::{DateTime, Utc};

pub use crate::error::StoreError;
pub use crate::memory::MemoryStore;
pub use crate::rclone::RcloneStore;
pub use crate::retry::RetryPolicy;

/// Metadata for a single object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// The storage surface the orchestrator depends on.
///
/// Keys are bucket-root-relative, `/`-separated, and restricted to
/// `[A-Za-z0-9/_.-]+`; every implementation rejects anything else with
/// [`StoreError::InvalidKey`] before touching the transport.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// List object keys under `prefix`, recursively. Returned keys are full
    /// (bucket-root-relative) and sorted. A missing prefix is an empty list.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Read a whole object.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Write a whole object, replacing any previous version.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Recursively upload a local directory tree under `prefix`. Unchanged
    /// files are skipped by the transport, which is what makes repeated
    /// script syncs cheap. Not atomic.
    async fn mirror(&self, local: &Path, prefix: &str) -> Result<(), StoreError>;

    /// Recursively download everything under `prefix` into `local`,
    /// overwriting on conflict. Not atomic.
    async fn pull(&self, prefix: &str, local: &Path) -> Result<(), StoreError>;

    /// Server-side move, implemented as copy + delete. The store offers no
    /// compare-and-swap; callers resolve the resulting claim race by
    /// treating a missing source as "someone else won".
    async fn rename(&self, src: &str, dst: &str) -> Result<(), StoreError>;

    /// Delete a single object.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Whether a single object exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Size and modified time of a single object, or `None` if absent.
    /// The modified time of a `processing/` manifest is what stale-claim
    /// detection keys on.
    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError>;
}

/// Reject keys outside the allowed charset before they reach a path or a
/// subprocess argv.
pub(crate) fn check_key(key: &str) -> Result<(), StoreError> {
    if posegrid_core::layout::is_valid_key(key) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
