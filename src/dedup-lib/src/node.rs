use crate::{ContentHash, FsPath};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(NodeKind::File),
            "directory" => Some(NodeKind::Directory),
            _ => None,
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Directory => "directory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: FsPath,
    pub hash: ContentHash,
    pub size: u64,
    pub mime_type: String,
    pub created_at: u64,
    pub modified_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub path: FsPath,
    pub created_at: u64,
    pub modified_at: u64,
}

/// A metadata record for one path: a file pointing at a shared blob, or a
/// directory. The two variants are closed; the persisted `kind` column maps
/// onto them one-to-one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsNode {
    File(FileNode),
    Directory(DirectoryNode),
}

impl FsNode {
    pub fn path(&self) -> &FsPath {
        match self {
            FsNode::File(f) => &f.path,
            FsNode::Directory(d) => &d.path,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            FsNode::File(_) => NodeKind::File,
            FsNode::Directory(_) => NodeKind::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FsNode::File(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, FsNode::Directory(_))
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            FsNode::File(f) => Some(f),
            FsNode::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&DirectoryNode> {
        match self {
            FsNode::File(_) => None,
            FsNode::Directory(d) => Some(d),
        }
    }

    pub fn created_at(&self) -> u64 {
        match self {
            FsNode::File(f) => f.created_at,
            FsNode::Directory(d) => d.created_at,
        }
    }

    pub fn modified_at(&self) -> u64 {
        match self {
            FsNode::File(f) => f.modified_at,
            FsNode::Directory(d) => d.modified_at,
        }
    }
}

/// Shared accounting record for one distinct byte-string.
///
/// `ref_count` equals the number of live file nodes (across all tenants)
/// whose hash matches; it never goes negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub hash: ContentHash,
    pub ref_count: u64,
    pub size: u64,
    pub created_at: u64,
    pub last_accessed_at: u64,
}
