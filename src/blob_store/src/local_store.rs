use crate::BlobStore;
use async_trait::async_trait;
use dedup_lib::{ContentHash, FsError, FsResult};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

const CONFIG_FILE_NAME: &str = "blob_store.json";
const BLOB_DIR_NAME: &str = "blobs";
const BLOB_TMP_EXT: &str = "tmp";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBlobConfig {
    pub read_only: bool,
    pub blob_dir: Option<PathBuf>,
}

impl Default for LocalBlobConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            blob_dir: None,
        }
    }
}

/// Sharded on-disk `BlobStore`.
///
/// Objects live at `<root>/blobs/<hash[0:2]>/<hash[2:4]>/<hash>`; two shard
/// levels keep any one directory small at hundreds of millions of objects.
/// Shard directories are created lazily. Writes publish through a uniquely
/// named temp file and a rename, so readers never observe a partial object
/// and the last complete writer of a hash wins.
pub struct LocalBlobStore {
    base_dir: PathBuf,
    blob_dir: PathBuf,
    read_only: bool,
}

impl LocalBlobStore {
    /// Opens the store at `root`, creating the directory and writing a
    /// default config file on first use.
    pub async fn open(root: impl Into<PathBuf>) -> FsResult<Self> {
        let base_dir = root.into();
        if !base_dir.exists() {
            debug!("LocalBlobStore: create base dir: {}", base_dir.display());
            fs::create_dir_all(&base_dir)
                .await
                .map_err(|e| FsError::StoreUnavailable(format!("create base dir failed: {}", e)))?;
        }

        let config_file = base_dir.join(CONFIG_FILE_NAME);
        let config = if !config_file.exists() {
            let config = LocalBlobConfig::default();
            let config_str = serde_json::to_string(&config)
                .map_err(|e| FsError::StoreUnavailable(e.to_string()))?;
            fs::write(&config_file, config_str)
                .await
                .map_err(|e| FsError::StoreUnavailable(format!("write config failed: {}", e)))?;
            config
        } else {
            let config_str = fs::read_to_string(&config_file).await.map_err(|e| {
                warn!("LocalBlobStore: read config failed! {}", e);
                FsError::StoreUnavailable(format!("read config failed: {}", e))
            })?;
            serde_json::from_str::<LocalBlobConfig>(&config_str).map_err(|e| {
                warn!("LocalBlobStore: parse config failed! {}", e);
                FsError::StoreUnavailable(format!("blob store config invalid: {}", e))
            })?
        };

        Self::from_config(base_dir, config).await
    }

    pub async fn from_config(base_dir: PathBuf, config: LocalBlobConfig) -> FsResult<Self> {
        let blob_dir = config
            .blob_dir
            .clone()
            .unwrap_or_else(|| base_dir.join(BLOB_DIR_NAME));
        if !config.read_only {
            fs::create_dir_all(&blob_dir)
                .await
                .map_err(|e| FsError::StoreUnavailable(format!("create blob dir failed: {}", e)))?;
        }
        Ok(Self {
            base_dir,
            blob_dir,
            read_only: config.read_only,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let (hi, lo) = hash.shard_prefixes();
        self.blob_dir.join(hi).join(lo).join(hash.as_str())
    }

    fn tmp_path(&self, hash: &ContentHash) -> PathBuf {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let file_name = format!(
            "{}.{}.{}.{}",
            hash.as_str(),
            std::process::id(),
            seq,
            BLOB_TMP_EXT
        );
        let (hi, lo) = hash.shard_prefixes();
        self.blob_dir.join(hi).join(lo).join(file_name)
    }

    fn ensure_writable(&self) -> FsResult<()> {
        if self.read_only {
            Err(FsError::Conflict("blob store is read-only".to_string()))
        } else {
            Ok(())
        }
    }

    async fn remove_if_present(path: &Path) -> FsResult<()> {
        if let Err(err) = fs::remove_file(path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(FsError::StoreUnavailable(err.to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn write(&self, hash: &ContentHash, data: &[u8]) -> FsResult<()> {
        self.ensure_writable()?;

        let final_path = self.blob_path(hash);
        if fs::try_exists(&final_path)
            .await
            .map_err(|e| FsError::StoreUnavailable(e.to_string()))?
        {
            return Ok(());
        }

        let tmp_path = self.tmp_path(hash);
        if let Some(parent) = tmp_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!("write: create shard dir failed! {}", e);
                FsError::StoreUnavailable(e.to_string())
            })?;
        }

        let write_result = async {
            let mut file = File::create(&tmp_path)
                .await
                .map_err(|e| FsError::StoreUnavailable(format!("create tmp failed: {}", e)))?;
            file.write_all(data)
                .await
                .map_err(|e| FsError::StoreUnavailable(format!("write tmp failed: {}", e)))?;
            file.flush()
                .await
                .map_err(|e| FsError::StoreUnavailable(format!("flush tmp failed: {}", e)))?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        fs::rename(&tmp_path, &final_path).await.map_err(|e| {
            warn!("write: publish blob failed! {}", e);
            FsError::StoreUnavailable(e.to_string())
        })
    }

    async fn read(&self, hash: &ContentHash) -> FsResult<Vec<u8>> {
        match fs::read(self.blob_path(hash)).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(FsError::BlobMissing(hash.to_string()))
            }
            Err(err) => {
                warn!("read: open blob failed! {}", err);
                Err(FsError::StoreUnavailable(err.to_string()))
            }
        }
    }

    async fn exists(&self, hash: &ContentHash) -> FsResult<bool> {
        fs::try_exists(self.blob_path(hash))
            .await
            .map_err(|e| FsError::StoreUnavailable(e.to_string()))
    }

    async fn delete(&self, hash: &ContentHash) -> FsResult<()> {
        self.ensure_writable()?;
        Self::remove_if_present(&self.blob_path(hash)).await
    }

    async fn delete_many(&self, hashes: &[ContentHash]) -> FsResult<Vec<ContentHash>> {
        let mut failed = Vec::new();
        for hash in hashes {
            if let Err(err) = self.delete(hash).await {
                warn!("delete_many: delete {} failed! {}", hash, err);
                failed.push(hash.clone());
            }
        }
        Ok(failed)
    }
}
