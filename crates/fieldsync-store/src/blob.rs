//! Blob storage abstraction for file contents.
//!
//! File metadata travels through the remote store like any other record;
//! the bytes themselves go to a bucket addressed by path.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RemoteResult;

/// Remote object storage.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `bytes` at `path`, returning the stored path.
    async fn upload(&self, path: &str, bytes: &Bytes) -> RemoteResult<String>;

    /// Remove the object at `path`. Removing a missing object succeeds.
    async fn delete(&self, path: &str) -> RemoteResult<()>;
}

/// In-memory blob storage for testing.
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;

    use parking_lot::RwLock;

    #[derive(Default)]
    pub struct MemoryBlobStorage {
        objects: RwLock<BTreeMap<String, Bytes>>,
    }

    impl MemoryBlobStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get(&self, path: &str) -> Option<Bytes> {
            self.objects.read().get(path).cloned()
        }

        pub fn paths(&self) -> Vec<String> {
            self.objects.read().keys().cloned().collect()
        }

        pub fn len(&self) -> usize {
            self.objects.read().len()
        }

        pub fn is_empty(&self) -> bool {
            self.objects.read().is_empty()
        }
    }

    #[async_trait]
    impl BlobStorage for MemoryBlobStorage {
        async fn upload(&self, path: &str, bytes: &Bytes) -> RemoteResult<String> {
            self.objects.write().insert(path.to_string(), bytes.clone());
            Ok(path.to_string())
        }

        async fn delete(&self, path: &str) -> RemoteResult<()> {
            self.objects.write().remove(path);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBlobStorage;
    use super::*;

    #[tokio::test]
    async fn test_upload_then_delete() {
        let blobs = MemoryBlobStorage::new();
        let stored = blobs
            .upload("t1/p1/f1-plan.pdf", &Bytes::from_static(b"%PDF"))
            .await
            .unwrap();
        assert_eq!(stored, "t1/p1/f1-plan.pdf");
        assert_eq!(blobs.get(&stored).unwrap(), Bytes::from_static(b"%PDF"));

        blobs.delete(&stored).await.unwrap();
        blobs.delete(&stored).await.unwrap();
        assert!(blobs.is_empty());
    }
}
