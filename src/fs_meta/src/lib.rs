mod mem_store;
mod sqlite_store;

pub use mem_store::MemMetaStore;
pub use sqlite_store::SqliteMetaStore;

use async_trait::async_trait;
use dedup_lib::{BlobRecord, ContentHash, FsNode, FsPath, FsResult, TenantId};

/// Persistence contract for per-tenant node records and shared blob
/// reference counts.
///
/// Every call is scoped by an explicit tenant id; implementations keep no
/// per-instance tenant state, so one store handle can serve parallel
/// requests for different tenants. Refcount arithmetic must be atomic per
/// hash under concurrent callers.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Inserts a new node. `Conflict` if `(tenant, path)` already exists.
    async fn create_node(&self, tenant: &TenantId, node: &FsNode) -> FsResult<()>;

    async fn get_node_by_path(
        &self,
        tenant: &TenantId,
        path: &FsPath,
    ) -> FsResult<Option<FsNode>>;

    /// Replaces the mutable attributes of the node at `node.path()`:
    /// hash/size/mime type/modified time for files, modified time for
    /// directories. No-op when no row matches; callers verify existence.
    async fn update_node(&self, tenant: &TenantId, node: &FsNode) -> FsResult<()>;

    /// Removes the row. Deleting a missing path is not an error.
    async fn delete_node(&self, tenant: &TenantId, path: &FsPath) -> FsResult<()>;

    /// Nodes exactly one component below `dir`, directories first, then
    /// ascending path.
    async fn list_children(&self, tenant: &TenantId, dir: &FsPath) -> FsResult<Vec<FsNode>>;

    /// Atomically bumps the refcount, creating the record (with `size`) on
    /// the first reference. Returns the new count.
    async fn increment_blob_ref(&self, hash: &ContentHash, size: u64) -> FsResult<u64>;

    /// Atomically decrements and returns the new count. A missing row
    /// returns 0; a decrement that would go negative surfaces `Invariant`.
    async fn decrement_blob_ref(&self, hash: &ContentHash) -> FsResult<u64>;

    async fn get_blob_record(&self, hash: &ContentHash) -> FsResult<Option<BlobRecord>>;

    /// Up to `limit` zero-refcount hashes with `last_accessed_at <=
    /// older_than`, oldest first.
    async fn get_orphan_blobs(&self, older_than: u64, limit: u32) -> FsResult<Vec<ContentHash>>;

    /// Removes the blob record only while its refcount is still zero.
    /// Returns whether a row was removed.
    async fn remove_blob_if_zero(&self, hash: &ContentHash) -> FsResult<bool>;
}
