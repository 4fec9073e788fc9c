use blob_store::BlobStore;
use dedup_lib::{
    mime_type_for_path, unix_timestamp, ContentHash, DirectoryNode, FileNode, FsError, FsNode,
    FsPath, FsResult, TenantId,
};
use fs_meta::MetaStore;
use log::{debug, info};
use std::collections::VecDeque;
use std::sync::Arc;

/// The deduplicating file-system engine.
///
/// Couples the per-tenant path namespace in the metadata store with the
/// shared, refcounted blob store; it is the only component that mutates the
/// two together. Two ordering rules hold across every operation:
///
/// 1. Blob bytes land before any metadata references them. A crash in
///    between leaves an orphan for the reclaimer, never a dangling node.
/// 2. A new reference is counted before an old one is released, so a blob
///    with a live node never transiently reaches refcount zero.
///
/// The service itself is stateless beyond its two store handles; the tenant
/// is part of every call, so one instance serves parallel requests for any
/// number of tenants.
pub struct FileSystemService {
    meta: Arc<dyn MetaStore>,
    blobs: Arc<dyn BlobStore>,
}

impl FileSystemService {
    pub fn new(meta: Arc<dyn MetaStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { meta, blobs }
    }

    /// Creates the tenant root `/` if it does not exist yet and returns it.
    /// Safe to call on every request; only the first call writes.
    pub async fn bootstrap_tenant(&self, tenant: &TenantId) -> FsResult<DirectoryNode> {
        let root = FsPath::root();
        if let Some(node) = self.meta.get_node_by_path(tenant, &root).await? {
            return match node {
                FsNode::Directory(dir) => Ok(dir),
                FsNode::File(_) => {
                    Err(FsError::Invariant("tenant root is a file".to_string()))
                }
            };
        }
        let now = unix_timestamp();
        let dir = DirectoryNode {
            path: root,
            created_at: now,
            modified_at: now,
        };
        self.meta
            .create_node(tenant, &FsNode::Directory(dir.clone()))
            .await?;
        info!("bootstrapped tenant {}", tenant);
        Ok(dir)
    }

    pub async fn create_directory(
        &self,
        tenant: &TenantId,
        path: &FsPath,
    ) -> FsResult<DirectoryNode> {
        if self.meta.get_node_by_path(tenant, path).await?.is_some() {
            return Err(FsError::Conflict(format!("path already exists: {}", path)));
        }
        self.require_parent_dir(tenant, path).await?;

        let now = unix_timestamp();
        let dir = DirectoryNode {
            path: path.clone(),
            created_at: now,
            modified_at: now,
        };
        self.meta
            .create_node(tenant, &FsNode::Directory(dir.clone()))
            .await?;
        Ok(dir)
    }

    /// Writes the full content of a file, deduplicating against every blob
    /// the system already holds. Creates the node on first write; replaces
    /// hash/size/mime on rewrite.
    pub async fn write_file(
        &self,
        tenant: &TenantId,
        path: &FsPath,
        data: &[u8],
    ) -> FsResult<FileNode> {
        let hash = ContentHash::of(data);
        if !self.blobs.exists(&hash).await? {
            self.blobs.write(&hash, data).await?;
        }

        let now = unix_timestamp();
        match self.meta.get_node_by_path(tenant, path).await? {
            Some(FsNode::Directory(_)) => {
                Err(FsError::Conflict(format!("path is a directory: {}", path)))
            }
            Some(FsNode::File(mut file)) if file.hash == hash => {
                file.modified_at = now;
                self.meta
                    .update_node(tenant, &FsNode::File(file.clone()))
                    .await?;
                Ok(file)
            }
            Some(FsNode::File(mut file)) => {
                let old_hash = file.hash.clone();
                self.meta
                    .increment_blob_ref(&hash, data.len() as u64)
                    .await?;
                file.hash = hash;
                file.size = data.len() as u64;
                file.mime_type = mime_type_for_path(path).to_string();
                file.modified_at = now;
                self.meta
                    .update_node(tenant, &FsNode::File(file.clone()))
                    .await?;
                self.release_blob_ref(&old_hash).await?;
                Ok(file)
            }
            None => {
                self.require_parent_dir(tenant, path).await?;
                let file = FileNode {
                    path: path.clone(),
                    hash: hash.clone(),
                    size: data.len() as u64,
                    mime_type: mime_type_for_path(path).to_string(),
                    created_at: now,
                    modified_at: now,
                };
                self.meta
                    .create_node(tenant, &FsNode::File(file.clone()))
                    .await?;
                self.meta
                    .increment_blob_ref(&hash, data.len() as u64)
                    .await?;
                Ok(file)
            }
        }
    }

    pub async fn read_file(&self, tenant: &TenantId, path: &FsPath) -> FsResult<Vec<u8>> {
        let file = self.require_file(tenant, path).await?;
        self.blobs.read(&file.hash).await
    }

    pub async fn delete_file(&self, tenant: &TenantId, path: &FsPath) -> FsResult<()> {
        let file = self.require_file(tenant, path).await?;
        self.meta.delete_node(tenant, path).await?;
        self.release_blob_ref(&file.hash).await
    }

    /// Children of a directory, directories first, then ascending path.
    pub async fn list_directory(&self, tenant: &TenantId, path: &FsPath) -> FsResult<Vec<FsNode>> {
        self.require_directory(tenant, path).await?;
        self.meta.list_children(tenant, path).await
    }

    /// Removes an empty directory. The root cannot be removed.
    pub async fn delete_directory(&self, tenant: &TenantId, path: &FsPath) -> FsResult<()> {
        if path.is_root() {
            return Err(FsError::Conflict(
                "root directory cannot be removed".to_string(),
            ));
        }
        self.require_directory(tenant, path).await?;
        let children = self.meta.list_children(tenant, path).await?;
        if !children.is_empty() {
            return Err(FsError::Conflict(format!("directory not empty: {}", path)));
        }
        self.meta.delete_node(tenant, path).await
    }

    /// Copies a file without touching blob bytes; source and destination
    /// share one blob afterwards.
    pub async fn copy_file(
        &self,
        tenant: &TenantId,
        src: &FsPath,
        dst: &FsPath,
    ) -> FsResult<FileNode> {
        let src_file = self.require_file(tenant, src).await?;
        if self.meta.get_node_by_path(tenant, dst).await?.is_some() {
            return Err(FsError::Conflict(format!(
                "destination already exists: {}",
                dst
            )));
        }
        self.require_parent_dir(tenant, dst).await?;

        let now = unix_timestamp();
        let dst_file = FileNode {
            path: dst.clone(),
            hash: src_file.hash.clone(),
            size: src_file.size,
            mime_type: src_file.mime_type.clone(),
            created_at: now,
            modified_at: now,
        };
        self.meta
            .create_node(tenant, &FsNode::File(dst_file.clone()))
            .await?;
        self.meta
            .increment_blob_ref(&src_file.hash, src_file.size)
            .await?;
        debug!("copied {} -> {} (hash {})", src, dst, dst_file.hash);
        Ok(dst_file)
    }

    /// Moves a file. The destination's reference is counted before the
    /// source's is released, so the shared blob's refcount is unchanged end
    /// to end.
    pub async fn move_file(
        &self,
        tenant: &TenantId,
        src: &FsPath,
        dst: &FsPath,
    ) -> FsResult<FileNode> {
        let dst_file = self.copy_file(tenant, src, dst).await?;
        self.meta.delete_node(tenant, src).await?;
        self.release_blob_ref(&dst_file.hash).await?;
        Ok(dst_file)
    }

    /// Recursively copies a directory tree, parents before children. Not
    /// atomic: nodes created before a failure remain in place.
    pub async fn copy_directory(
        &self,
        tenant: &TenantId,
        src: &FsPath,
        dst: &FsPath,
    ) -> FsResult<()> {
        if src.is_root() {
            return Err(FsError::Conflict(
                "root directory cannot be copied".to_string(),
            ));
        }
        if dst.starts_with(src) {
            return Err(FsError::Conflict(format!(
                "destination {} is inside source {}",
                dst, src
            )));
        }
        self.require_directory(tenant, src).await?;
        if self.meta.get_node_by_path(tenant, dst).await?.is_some() {
            return Err(FsError::Conflict(format!(
                "destination already exists: {}",
                dst
            )));
        }
        self.require_parent_dir(tenant, dst).await?;

        let now = unix_timestamp();
        self.meta
            .create_node(
                tenant,
                &FsNode::Directory(DirectoryNode {
                    path: dst.clone(),
                    created_at: now,
                    modified_at: now,
                }),
            )
            .await?;

        let mut pending = VecDeque::from([src.clone()]);
        while let Some(dir_path) = pending.pop_front() {
            for child in self.meta.list_children(tenant, &dir_path).await? {
                let target = child.path().rebase(src, dst)?;
                let now = unix_timestamp();
                match &child {
                    FsNode::Directory(_) => {
                        self.meta
                            .create_node(
                                tenant,
                                &FsNode::Directory(DirectoryNode {
                                    path: target,
                                    created_at: now,
                                    modified_at: now,
                                }),
                            )
                            .await?;
                        pending.push_back(child.path().clone());
                    }
                    FsNode::File(file) => {
                        self.meta
                            .create_node(
                                tenant,
                                &FsNode::File(FileNode {
                                    path: target,
                                    hash: file.hash.clone(),
                                    size: file.size,
                                    mime_type: file.mime_type.clone(),
                                    created_at: now,
                                    modified_at: now,
                                }),
                            )
                            .await?;
                        self.meta.increment_blob_ref(&file.hash, file.size).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Moves a directory tree: copy to `dst`, then remove `src` bottom-up.
    /// Not atomic; a failure can leave both trees partially present.
    pub async fn move_directory(
        &self,
        tenant: &TenantId,
        src: &FsPath,
        dst: &FsPath,
    ) -> FsResult<()> {
        self.copy_directory(tenant, src, dst).await?;
        self.remove_tree(tenant, src).await
    }

    pub async fn get_info(&self, tenant: &TenantId, path: &FsPath) -> FsResult<FsNode> {
        self.meta
            .get_node_by_path(tenant, path)
            .await?
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// Decrements the refcount and removes the bytes once the last
    /// reference is gone.
    async fn release_blob_ref(&self, hash: &ContentHash) -> FsResult<()> {
        let remaining = self.meta.decrement_blob_ref(hash).await?;
        if remaining == 0 {
            self.blobs.delete(hash).await?;
        }
        Ok(())
    }

    async fn require_parent_dir(&self, tenant: &TenantId, path: &FsPath) -> FsResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        match self.meta.get_node_by_path(tenant, &parent).await? {
            Some(FsNode::Directory(_)) => Ok(()),
            Some(FsNode::File(_)) => Err(FsError::DirectoryNotFound(format!(
                "parent is not a directory: {}",
                parent
            ))),
            None => Err(FsError::DirectoryNotFound(format!(
                "parent directory not found: {}",
                parent
            ))),
        }
    }

    async fn require_file(&self, tenant: &TenantId, path: &FsPath) -> FsResult<FileNode> {
        match self.meta.get_node_by_path(tenant, path).await? {
            Some(FsNode::File(file)) => Ok(file),
            Some(FsNode::Directory(_)) => {
                Err(FsError::Conflict(format!("path is a directory: {}", path)))
            }
            None => Err(FsError::FileNotFound(path.to_string())),
        }
    }

    async fn require_directory(
        &self,
        tenant: &TenantId,
        path: &FsPath,
    ) -> FsResult<DirectoryNode> {
        match self.meta.get_node_by_path(tenant, path).await? {
            Some(FsNode::Directory(dir)) => Ok(dir),
            Some(FsNode::File(_)) => {
                Err(FsError::Conflict(format!("path is a file: {}", path)))
            }
            None => Err(FsError::DirectoryNotFound(path.to_string())),
        }
    }

    /// Deletes a whole subtree, files first, directories bottom-up.
    async fn remove_tree(&self, tenant: &TenantId, root: &FsPath) -> FsResult<()> {
        let mut dirs = vec![root.clone()];
        let mut index = 0;
        while index < dirs.len() {
            let dir_path = dirs[index].clone();
            index += 1;
            for child in self.meta.list_children(tenant, &dir_path).await? {
                match child {
                    FsNode::Directory(dir) => dirs.push(dir.path),
                    FsNode::File(file) => {
                        self.meta.delete_node(tenant, &file.path).await?;
                        self.release_blob_ref(&file.hash).await?;
                    }
                }
            }
        }
        for dir_path in dirs.iter().rev() {
            self.meta.delete_node(tenant, dir_path).await?;
        }
        Ok(())
    }
}
