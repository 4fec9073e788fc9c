mod local_store;
mod mem_store;

pub use local_store::{LocalBlobConfig, LocalBlobStore};
pub use mem_store::MemBlobStore;

use async_trait::async_trait;
use dedup_lib::{ContentHash, FsResult};

/// Byte storage keyed by content hash.
///
/// Objects are immutable per key: two writers of the same hash carry the
/// same bytes, so write-write races are safe and `write` is idempotent.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` under `hash`. Writing the same pair twice leaves the
    /// store in the same observable state.
    async fn write(&self, hash: &ContentHash, data: &[u8]) -> FsResult<()>;

    /// Returns the bytes, or `BlobMissing`.
    async fn read(&self, hash: &ContentHash) -> FsResult<Vec<u8>>;

    /// Presence check without transferring bytes.
    async fn exists(&self, hash: &ContentHash) -> FsResult<bool>;

    /// Removes the object; a missing object is not an error.
    async fn delete(&self, hash: &ContentHash) -> FsResult<()>;

    /// Bulk delete. Returns the hashes that failed; the rest are removed.
    async fn delete_many(&self, hashes: &[ContentHash]) -> FsResult<Vec<ContentHash>>;
}
