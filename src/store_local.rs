//! Local-filesystem storage backend.
//!
//! Maps blob paths onto files under a root directory. Parent directories are
//! created on demand; listing walks the tree under the prefix and returns
//! `/`-separated keys regardless of platform separator.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::store::BlobStore;

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve a blob path under the root, rejecting traversal components.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => bail!("Invalid blob path: {}", path),
            }
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn put(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&full, content)
            .with_context(|| format!("Failed to write {}", full.display()))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<String>> {
        let full = self.resolve(path)?;
        match std::fs::read_to_string(&full) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", full.display())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        collect_files(&self.root, &self.root, &mut paths)?;
        paths.retain(|p| p.starts_with(prefix));
        paths.sort();
        Ok(paths)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", full.display())),
        }
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_roundtrip_and_list() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().to_path_buf());

        store.put("tos/d1/current.txt", "body").await.unwrap();
        store.put("tos/d1/2024-01-01.txt", "v1").await.unwrap();
        store.put("diffs/d1/latest.txt", "summary").await.unwrap();

        assert_eq!(
            store.get("tos/d1/current.txt").await.unwrap().as_deref(),
            Some("body")
        );
        assert!(store.get("tos/d1/nope.txt").await.unwrap().is_none());

        let listed = store.list("tos/d1/").await.unwrap();
        assert_eq!(listed, vec!["tos/d1/2024-01-01.txt", "tos/d1/current.txt"]);
    }

    #[tokio::test]
    async fn local_store_delete() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().to_path_buf());

        store.put("tos/d1/changed", "2024-01-01").await.unwrap();
        assert!(store.delete("tos/d1/changed").await.unwrap());
        assert!(!store.delete("tos/d1/changed").await.unwrap());
        assert!(!store.exists("tos/d1/changed").await.unwrap());
    }

    #[tokio::test]
    async fn traversal_components_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().to_path_buf());

        assert!(store.get("../outside.txt").await.is_err());
        assert!(store.put("tos/../../x", "y").await.is_err());
    }
}
