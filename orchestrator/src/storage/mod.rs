//! Object storage seam for build archives and backup uploads.
//!
//! Production deployments point this at a bucket; the local implementation
//! keeps the same key layout on disk so the rest of the orchestrator never
//! cares which backend is wired in.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Metadata stored alongside every object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Request server-side encryption from the backend
    pub encrypt: bool,
    pub tags: HashMap<String, String>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, data: &[u8], meta: &ObjectMeta) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Keys under a prefix, sorted ascending
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Filesystem-backed store. Objects live under `root/<key>`; metadata sits
/// in a `<key>.meta.json` sidecar. The encryption flag is recorded there;
/// at-rest encryption itself is the backend's job, not this process's.
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        // Keys are slash-separated and must stay inside the root
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(anyhow!("Invalid object key '{}'", key));
        }
        Ok(self.root.join(key))
    }

    fn meta_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(".meta.json");
        PathBuf::from(os)
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(&self, key: &str, data: &[u8], meta: &ObjectMeta) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        tokio::fs::write(Self::meta_path(&path), serde_json::to_vec_pretty(meta)?).await?;
        debug!("Stored object '{}' ({} bytes)", key, data.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow!("Object '{}' not readable: {}", key, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue, // root may not exist yet
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if path.extension().map(|e| e == "json").unwrap_or(false)
                    && path.to_string_lossy().ends_with(".meta.json")
                {
                    continue;
                }
                let key = path
                    .strip_prefix(&self.root)
                    .map_err(|e| anyhow!("Path outside storage root: {}", e))?
                    .to_string_lossy()
                    .replace('\\', "/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| anyhow!("Failed to delete object '{}': {}", key, e))?;
        let _ = tokio::fs::remove_file(Self::meta_path(&path)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_list_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStorage::new(dir.path());

        let meta = ObjectMeta {
            encrypt: true,
            tags: HashMap::from([("kind".to_string(), "test".to_string())]),
        };
        store.put("a/b/one.bin", b"hello", &meta).await.unwrap();
        store.put("a/two.bin", b"world", &meta).await.unwrap();

        assert_eq!(store.get("a/b/one.bin").await.unwrap(), b"hello");

        let keys = store.list("a/").await.unwrap();
        assert_eq!(keys, vec!["a/b/one.bin".to_string(), "a/two.bin".to_string()]);

        store.delete("a/b/one.bin").await.unwrap();
        assert!(store.get("a/b/one.bin").await.is_err());
        let keys = store.list("a/").await.unwrap();
        assert_eq!(keys, vec!["a/two.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStorage::new(dir.path());
        let meta = ObjectMeta::default();
        assert!(store.put("../escape", b"x", &meta).await.is_err());
        assert!(store.put("", b"x", &meta).await.is_err());
        assert!(store.put("a//b", b"x", &meta).await.is_err());
    }
}
