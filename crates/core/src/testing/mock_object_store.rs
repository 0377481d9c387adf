//! In-memory object store for tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::object_store::{ObjectStore, ObjectStoreError};

/// Object store that keeps everything in a map.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored object's bytes.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// All stored keys for a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let body = tokio::fs::read(path).await?;
        self.upload_bytes(bucket, key, body, content_type).await
    }

    async fn upload_bytes(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body);
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
        Ok(format!("memory://{bucket}/{key}"))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let store = MemoryObjectStore::new();
        store
            .upload_bytes("archives", "a.zip", b"abc".to_vec(), "application/zip")
            .await
            .unwrap();

        assert_eq!(store.object("archives", "a.zip").unwrap(), b"abc");
        assert!(store.exists("archives", "a.zip").await.unwrap());
        assert_eq!(
            store
                .presigned_url("archives", "a.zip", Duration::from_secs(60))
                .await
                .unwrap(),
            "memory://archives/a.zip"
        );

        store.delete("archives", "a.zip").await.unwrap();
        assert_eq!(store.object_count(), 0);
    }
}
