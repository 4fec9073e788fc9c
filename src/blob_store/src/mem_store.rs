use crate::BlobStore;
use async_trait::async_trait;
use dedup_lib::{ContentHash, FsError, FsResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// In-memory `BlobStore` for tests. Tracks how many physical writes
/// happened so dedup behavior can be asserted.
#[derive(Default)]
pub struct MemBlobStore {
    blobs: Mutex<HashMap<ContentHash, Vec<u8>>>,
    write_count: AtomicU64,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    /// Number of `write` calls that actually stored bytes.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn write(&self, hash: &ContentHash, data: &[u8]) -> FsResult<()> {
        self.blobs
            .lock()
            .unwrap()
            .insert(hash.clone(), data.to_vec());
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn read(&self, hash: &ContentHash) -> FsResult<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| FsError::BlobMissing(hash.to_string()))
    }

    async fn exists(&self, hash: &ContentHash) -> FsResult<bool> {
        Ok(self.blobs.lock().unwrap().contains_key(hash))
    }

    async fn delete(&self, hash: &ContentHash) -> FsResult<()> {
        self.blobs.lock().unwrap().remove(hash);
        Ok(())
    }

    async fn delete_many(&self, hashes: &[ContentHash]) -> FsResult<Vec<ContentHash>> {
        let mut blobs = self.blobs.lock().unwrap();
        for hash in hashes {
            blobs.remove(hash);
        }
        Ok(Vec::new())
    }
}
