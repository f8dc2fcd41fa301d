//! Blob storage abstraction.
//!
//! Every core component talks to storage through the [`BlobStore`] trait:
//! a flat key/value store of text blobs with list-by-prefix. Three backends
//! implement it:
//!
//! - [`crate::store_local::LocalStore`] — files under a root directory.
//! - [`crate::store_s3::S3Store`] — an S3-compatible bucket (AWS SigV4).
//! - [`MemoryStore`] — `RwLock<HashMap>`, for tests.
//!
//! The backend is chosen once at startup from `[storage]` config and passed
//! into the core components; nothing branches on the backend type after
//! construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::models::DocumentsFile;

/// A flat text-blob store with list-by-prefix.
///
/// Paths are `/`-separated keys (e.g. `tos/acme/current.txt`); no path is
/// ever interpreted as a directory by the trait itself.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a blob, overwriting any existing content at `path`.
    async fn put(&self, path: &str, content: &str) -> Result<()>;

    /// Read a blob. Returns `Ok(None)` when the path does not exist.
    async fn get(&self, path: &str) -> Result<Option<String>>;

    /// List all paths starting with `prefix`, sorted ascending.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Delete a blob. Returns `false` when the path did not exist.
    async fn delete(&self, path: &str) -> Result<bool>;
}

/// Construct the configured storage backend.
pub fn create_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend.as_str() {
        "local" => Ok(Arc::new(crate::store_local::LocalStore::new(
            config.root.clone(),
        ))),
        "s3" => Ok(Arc::new(crate::store_s3::S3Store::from_config(config)?)),
        other => anyhow::bail!("Unknown storage backend: {}", other),
    }
}

/// Load the monitored-document configuration from storage.
///
/// Returns `Ok(None)` when `config/documents.json` does not exist; a present
/// but unparsable file is an error (configuration failures are fatal to the
/// request, not per-document).
pub async fn load_documents(store: &dyn BlobStore) -> Result<Option<DocumentsFile>> {
    match store.get("config/documents.json").await? {
        Some(raw) => {
            let parsed: DocumentsFile = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("Invalid config/documents.json: {}", e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

// ============ In-memory store ============

/// In-memory store for tests.
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, path: &str, content: &str) -> Result<()> {
        let mut blobs = self.blobs.write().unwrap();
        blobs.insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<String>> {
        let blobs = self.blobs.read().unwrap();
        Ok(blobs.get(path).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let blobs = self.blobs.read().unwrap();
        let mut paths: Vec<String> = blobs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let blobs = self.blobs.read().unwrap();
        Ok(blobs.contains_key(path))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let mut blobs = self.blobs.write().unwrap();
        Ok(blobs.remove(path).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.put("tos/d1/current.txt", "hello").await.unwrap();

        assert_eq!(
            store.get("tos/d1/current.txt").await.unwrap().as_deref(),
            Some("hello")
        );
        assert!(store.exists("tos/d1/current.txt").await.unwrap());
        assert!(!store.exists("tos/d1/missing.txt").await.unwrap());
        assert!(store.get("tos/d1/missing.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_list_by_prefix() {
        let store = MemoryStore::new();
        store.put("tos/d1/2024-01-01.txt", "a").await.unwrap();
        store.put("tos/d1/2024-02-01.txt", "b").await.unwrap();
        store.put("tos/d2/2024-01-01.txt", "c").await.unwrap();

        let paths = store.list("tos/d1/").await.unwrap();
        assert_eq!(
            paths,
            vec!["tos/d1/2024-01-01.txt", "tos/d1/2024-02-01.txt"]
        );
    }

    #[tokio::test]
    async fn memory_store_delete_reports_absence() {
        let store = MemoryStore::new();
        store.put("tos/d1/changed", "2024-01-01").await.unwrap();

        assert!(store.delete("tos/d1/changed").await.unwrap());
        assert!(!store.delete("tos/d1/changed").await.unwrap());
    }
}
