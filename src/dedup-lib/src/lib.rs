mod hash;
mod mime;
mod node;
mod path;
mod tenant;

pub use hash::*;
pub use mime::*;
pub use node::*;
pub use path::*;
pub use tenant::*;

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("invalid content hash: {0}")]
    InvalidHash(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("blob missing: {0}")]
    BlobMissing(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FsError::NotFound(_) | FsError::FileNotFound(_) | FsError::DirectoryNotFound(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, FsError::Conflict(_))
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        FsError::StoreUnavailable(err.to_string())
    }
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
