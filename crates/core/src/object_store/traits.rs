//! Trait definition for object storage backends.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::error::ObjectStoreError;

/// A store that can hold archive variants and hand out download URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the name of this store implementation.
    fn name(&self) -> &str;

    /// Upload a local file under the given bucket and key.
    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;

    /// Upload an in-memory body under the given bucket and key.
    async fn upload_bytes(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;

    /// A time-limited download URL for an object.
    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ObjectStoreError>;

    /// Whether an object exists.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, ObjectStoreError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError>;
}
