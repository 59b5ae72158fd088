//! Filesystem-backed [`BlobStore`].
//!
//! Each key is a `/`-separated relative path under `[blobs].root`. Writes go
//! to a temporary sibling first and are renamed into place, so a reader
//! never sees a half-written archive.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use blogport_core::store::BlobStore;

use crate::config::Config;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.blobs.root.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let bad_segment = key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
        if bad_segment || key.contains('\\') {
            bail!("invalid blob key: {:?}", key);
        }
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid blob key: {:?}", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create blob directory: {}", parent.display()))?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write blob: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move blob into place: {}", path.display()))?;
        debug!(key, content_type, size = bytes.len(), "stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Failed to read blob: {}", path.display())),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to delete blob: {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        store
            .put("exports/t1.zip", b"zip".to_vec(), "application/zip")
            .await
            .unwrap();
        assert_eq!(store.get("exports/t1.zip").await.unwrap(), Some(b"zip".to_vec()));
        assert!(dir.path().join("exports/t1.zip").exists());

        store.delete("exports/t1.zip").await.unwrap();
        assert_eq!(store.get("exports/t1.zip").await.unwrap(), None);
        store.delete("exports/t1.zip").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        for key in ["", "/etc/passwd", "../x", "a/../../x", "a/./b"] {
            assert!(store.put(key, vec![], "x").await.is_err(), "{}", key);
        }
    }
}
