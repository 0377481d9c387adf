//! Directory-backed object store implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::error::ObjectStoreError;
use super::traits::ObjectStore;

/// Object store backed by a local directory tree (`root/bucket/key`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsObjectStore {
    /// Directory objects are placed under.
    pub root: PathBuf,
    /// Base URL prepended to keys when building download URLs. Without one,
    /// `file://` URLs are produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            public_base_url: None,
        }
    }

    pub fn with_public_base_url(mut self, base_url: String) -> Self {
        self.public_base_url = Some(base_url);
        self
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }

    async fn ensure_parent(path: &Path) -> Result<(), ObjectStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        _content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let dest = self.object_path(bucket, key);
        Self::ensure_parent(&dest).await?;
        fs::copy(path, &dest).await?;
        Ok(())
    }

    async fn upload_bytes(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let dest = self.object_path(bucket, key);
        Self::ensure_parent(&dest).await?;
        fs::write(&dest, body).await?;
        Ok(())
    }

    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        _ttl: Duration,
    ) -> Result<String, ObjectStoreError> {
        if !self.exists(bucket, key).await? {
            return Err(ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        match &self.public_base_url {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                key.trim_start_matches('/')
            )),
            None => Ok(format!(
                "file://{}",
                self.object_path(bucket, key).display()
            )),
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(fs::try_exists(self.object_path(bucket, key)).await?)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        match fs::remove_file(self.object_path(bucket, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_and_exists() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp.path().to_path_buf());

        store
            .upload_bytes("archives", "sets/v1/1.zip", b"data".to_vec(), "application/zip")
            .await
            .unwrap();
        assert!(store.exists("archives", "sets/v1/1.zip").await.unwrap());
        assert!(!store.exists("archives", "sets/v1/2.zip").await.unwrap());
    }

    #[tokio::test]
    async fn test_upload_file_copies_content() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.zip");
        tokio::fs::write(&src, b"archive bytes").await.unwrap();

        let store = FsObjectStore::new(temp.path().join("store"));
        store
            .upload_file("archives", "sets/v1/9.zip", &src, "application/zip")
            .await
            .unwrap();

        let stored = tokio::fs::read(temp.path().join("store/archives/sets/v1/9.zip"))
            .await
            .unwrap();
        assert_eq!(stored, b"archive bytes");
    }

    #[tokio::test]
    async fn test_presigned_url_variants() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp.path().to_path_buf());
        store
            .upload_bytes("archives", "k.zip", b"x".to_vec(), "application/zip")
            .await
            .unwrap();

        let url = store
            .presigned_url("archives", "k.zip", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));

        let store = store.with_public_base_url("https://dl.example.com/".to_string());
        let url = store
            .presigned_url("archives", "k.zip", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(url, "https://dl.example.com/k.zip");
    }

    #[tokio::test]
    async fn test_presigned_url_missing_object() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp.path().to_path_buf());
        let err = store
            .presigned_url("archives", "gone.zip", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp.path().to_path_buf());
        store
            .upload_bytes("archives", "k.zip", b"x".to_vec(), "application/zip")
            .await
            .unwrap();
        store.delete("archives", "k.zip").await.unwrap();
        store.delete("archives", "k.zip").await.unwrap();
        assert!(!store.exists("archives", "k.zip").await.unwrap());
    }
}
