use crate::MetaStore;
use async_trait::async_trait;
use dedup_lib::{
    unix_timestamp, BlobRecord, ContentHash, FsError, FsNode, FsPath, FsResult, TenantId,
};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory `MetaStore` with the same observable contract as the SQLite
/// backing. Used by tests and embedded setups that do not need durability.
#[derive(Default)]
pub struct MemMetaStore {
    state: Mutex<MemState>,
}

#[derive(Default)]
struct MemState {
    nodes: HashMap<(TenantId, FsPath), FsNode>,
    blobs: HashMap<ContentHash, BlobRecord>,
}

impl MemMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    pub fn blob_record_count(&self) -> usize {
        self.state.lock().unwrap().blobs.len()
    }
}

#[async_trait]
impl MetaStore for MemMetaStore {
    async fn create_node(&self, tenant: &TenantId, node: &FsNode) -> FsResult<()> {
        let mut state = self.state.lock().unwrap();
        let key = (*tenant, node.path().clone());
        if state.nodes.contains_key(&key) {
            return Err(FsError::Conflict(format!(
                "path already exists: {}",
                node.path()
            )));
        }
        state.nodes.insert(key, node.clone());
        Ok(())
    }

    async fn get_node_by_path(
        &self,
        tenant: &TenantId,
        path: &FsPath,
    ) -> FsResult<Option<FsNode>> {
        let state = self.state.lock().unwrap();
        Ok(state.nodes.get(&(*tenant, path.clone())).cloned())
    }

    async fn update_node(&self, tenant: &TenantId, node: &FsNode) -> FsResult<()> {
        let mut state = self.state.lock().unwrap();
        let key = (*tenant, node.path().clone());
        if let Some(existing) = state.nodes.get_mut(&key) {
            match (existing, node) {
                (FsNode::File(old), FsNode::File(new)) => {
                    old.hash = new.hash.clone();
                    old.size = new.size;
                    old.mime_type = new.mime_type.clone();
                    old.modified_at = new.modified_at;
                }
                (FsNode::Directory(old), FsNode::Directory(new)) => {
                    old.modified_at = new.modified_at;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn delete_node(&self, tenant: &TenantId, path: &FsPath) -> FsResult<()> {
        let mut state = self.state.lock().unwrap();
        state.nodes.remove(&(*tenant, path.clone()));
        Ok(())
    }

    async fn list_children(&self, tenant: &TenantId, dir: &FsPath) -> FsResult<Vec<FsNode>> {
        let state = self.state.lock().unwrap();
        let mut children: Vec<FsNode> = state
            .nodes
            .iter()
            .filter(|((t, path), _)| t == tenant && path.parent().as_ref() == Some(dir))
            .map(|(_, node)| node.clone())
            .collect();
        children.sort_by(|a, b| {
            (a.is_file(), a.path()).cmp(&(b.is_file(), b.path()))
        });
        Ok(children)
    }

    async fn increment_blob_ref(&self, hash: &ContentHash, size: u64) -> FsResult<u64> {
        let now = unix_timestamp();
        let mut state = self.state.lock().unwrap();
        let record = state
            .blobs
            .entry(hash.clone())
            .or_insert_with(|| BlobRecord {
                hash: hash.clone(),
                ref_count: 0,
                size,
                created_at: now,
                last_accessed_at: now,
            });
        record.ref_count += 1;
        record.last_accessed_at = now;
        Ok(record.ref_count)
    }

    async fn decrement_blob_ref(&self, hash: &ContentHash) -> FsResult<u64> {
        let now = unix_timestamp();
        let mut state = self.state.lock().unwrap();
        let Some(record) = state.blobs.get_mut(hash) else {
            return Ok(0);
        };
        if record.ref_count == 0 {
            return Err(FsError::Invariant(format!(
                "ref_count would be negative: {}",
                hash
            )));
        }
        record.ref_count -= 1;
        record.last_accessed_at = now;
        Ok(record.ref_count)
    }

    async fn get_blob_record(&self, hash: &ContentHash) -> FsResult<Option<BlobRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.blobs.get(hash).cloned())
    }

    async fn get_orphan_blobs(&self, older_than: u64, limit: u32) -> FsResult<Vec<ContentHash>> {
        let state = self.state.lock().unwrap();
        let mut orphans: Vec<(u64, ContentHash)> = state
            .blobs
            .values()
            .filter(|r| r.ref_count == 0 && r.last_accessed_at <= older_than)
            .map(|r| (r.last_accessed_at, r.hash.clone()))
            .collect();
        orphans.sort();
        Ok(orphans
            .into_iter()
            .take(limit as usize)
            .map(|(_, hash)| hash)
            .collect())
    }

    async fn remove_blob_if_zero(&self, hash: &ContentHash) -> FsResult<bool> {
        let mut state = self.state.lock().unwrap();
        let removable = state
            .blobs
            .get(hash)
            .map(|r| r.ref_count == 0)
            .unwrap_or(false);
        if removable {
            state.blobs.remove(hash);
        }
        Ok(removable)
    }
}
