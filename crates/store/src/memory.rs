//! In-memory store used by integration tests and dry runs.
//!
//! Visible semantics match the rclone store: whole-object writes,
//! copy-then-delete rename, recursive mirror/pull against the local
//! filesystem, and `NotFound` for operations on absent objects.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::{check_key, ObjectMeta, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys currently in the store, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Backdate an object's modified time. Test hook for the stale-claim
    /// paths, which key on manifest age.
    pub fn set_modified(&self, key: &str, modified: DateTime<Utc>) {
        if let Some(object) = self.objects.lock().unwrap().get_mut(key) {
            object.modified = modified;
        }
    }

    fn entries_under(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        let want = format!("{prefix}/");
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(&want))
            .map(|(key, object)| (key.clone(), object.data.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        check_key(prefix)?;
        let want = format!("{prefix}/");
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(&want))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        check_key(key)?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|object| object.data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        check_key(key)?;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: bytes.to_vec(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn mirror(&self, local: &Path, prefix: &str) -> Result<(), StoreError> {
        check_key(prefix)?;
        if !local.is_dir() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("local directory '{}' does not exist", local.display()),
            )));
        }

        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(local) {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        for path in files {
            let rel = path
                .strip_prefix(local)
                .expect("walkdir yields paths under its root");
            let rel_key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let data = tokio::fs::read(&path).await?;
            self.put(&format!("{prefix}/{rel_key}"), &data).await?;
        }
        Ok(())
    }

    async fn pull(&self, prefix: &str, local: &Path) -> Result<(), StoreError> {
        check_key(prefix)?;
        let want = format!("{prefix}/");
        for (key, data) in self.entries_under(prefix) {
            let rel = &key[want.len()..];
            let dest = local.join(rel);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, &data).await?;
        }
        Ok(())
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        check_key(src)?;
        check_key(dst)?;
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get(src)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(src.to_string()))?;
        objects.insert(
            dst.to_string(),
            StoredObject {
                data: object.data,
                modified: Utc::now(),
            },
        );
        objects.remove(src);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        check_key(key)?;
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        check_key(key)?;
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        check_key(key)?;
        Ok(self.objects.lock().unwrap().get(key).map(|object| ObjectMeta {
            size: object.data.len() as u64,
            modified: object.modified,
        }))
    }
}
