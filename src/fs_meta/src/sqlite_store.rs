use crate::MetaStore;
use async_trait::async_trait;
use dedup_lib::{
    unix_timestamp, BlobRecord, ContentHash, DirectoryNode, FileNode, FsError, FsNode, FsPath,
    FsResult, NodeKind, TenantId,
};
use log::{debug, warn};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

fn map_db_err(e: rusqlite::Error) -> FsError {
    FsError::StoreUnavailable(format!("db error: {}", e))
}

/// SQLite-backed `MetaStore`.
///
/// One connection behind a mutex; SQLite row updates give the per-hash
/// atomicity the refcount contract requires. Increments use
/// `INSERT … ON CONFLICT DO UPDATE`, decrements a conditional `UPDATE`
/// that refuses to go below zero. Every call runs its synchronous rusqlite
/// work on the blocking pool so a contended connection never stalls an
/// async worker thread.
pub struct SqliteMetaStore {
    db_path: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetaStore {
    pub fn open(db_path: impl AsRef<Path>) -> FsResult<Self> {
        let db_path = db_path.as_ref().to_string_lossy().to_string();
        debug!("SqliteMetaStore: open db path: {}", db_path);
        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .map_err(|e| {
            warn!("SqliteMetaStore: open db failed! {}", e);
            FsError::StoreUnavailable(format!("open db failed: {}", e))
        })?;
        Self::init_connection(&conn)?;
        Self::create_schema(&conn)?;
        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn init_connection(conn: &Connection) -> FsResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| FsError::StoreUnavailable(format!("pragma failed: {}", e)))
    }

    fn create_schema(conn: &Connection) -> FsResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fs_nodes (
                tenant_id TEXT NOT NULL,
                path TEXT NOT NULL,
                kind TEXT NOT NULL,
                content_hash TEXT,
                size INTEGER,
                mime_type TEXT,
                created_at INTEGER NOT NULL,
                modified_at INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, path),
                CHECK (
                    (kind = 'file' AND content_hash IS NOT NULL AND size IS NOT NULL
                        AND mime_type IS NOT NULL) OR
                    (kind = 'directory' AND content_hash IS NULL AND size IS NULL
                        AND mime_type IS NULL)
                )
            ) WITHOUT ROWID;

            CREATE INDEX IF NOT EXISTS idx_fs_nodes_hash ON fs_nodes(content_hash);

            CREATE TABLE IF NOT EXISTS blobs (
                content_hash TEXT PRIMARY KEY,
                ref_count INTEGER NOT NULL,
                size INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL,
                CHECK (ref_count >= 0)
            ) WITHOUT ROWID;

            CREATE INDEX IF NOT EXISTS idx_blobs_orphan ON blobs(last_accessed_at)
                WHERE ref_count = 0;",
        )
        .map_err(|e| {
            warn!("SqliteMetaStore: create schema failed! {}", e);
            FsError::StoreUnavailable(format!("create schema failed: {}", e))
        })
    }

    /// Runs `f` against the shared connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> FsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> FsResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn_guard = conn
                .lock()
                .map_err(|e| FsError::StoreUnavailable(format!("conn lock poisoned: {}", e)))?;
            f(&conn_guard)
        })
        .await
        .map_err(|e| FsError::StoreUnavailable(format!("db task join failed: {}", e)))?
    }

    fn node_from_row(
        path: String,
        kind: String,
        content_hash: Option<String>,
        size: Option<i64>,
        mime_type: Option<String>,
        created_at: i64,
        modified_at: i64,
    ) -> FsResult<FsNode> {
        let path = FsPath::parse(path)
            .map_err(|e| FsError::Invariant(format!("stored path invalid: {}", e)))?;
        match NodeKind::from_str(&kind) {
            Some(NodeKind::File) => {
                let hash_str = content_hash
                    .ok_or_else(|| FsError::Invariant(format!("file row without hash: {}", path)))?;
                let hash = ContentHash::parse(hash_str)
                    .map_err(|e| FsError::Invariant(format!("stored hash invalid: {}", e)))?;
                Ok(FsNode::File(FileNode {
                    path,
                    hash,
                    size: size.unwrap_or(0) as u64,
                    mime_type: mime_type.unwrap_or_default(),
                    created_at: created_at as u64,
                    modified_at: modified_at as u64,
                }))
            }
            Some(NodeKind::Directory) => Ok(FsNode::Directory(DirectoryNode {
                path,
                created_at: created_at as u64,
                modified_at: modified_at as u64,
            })),
            None => Err(FsError::Invariant(format!("unknown node kind: {}", kind))),
        }
    }
}

type NodeRow = (
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
    i64,
    i64,
);

#[async_trait]
impl MetaStore for SqliteMetaStore {
    async fn create_node(&self, tenant: &TenantId, node: &FsNode) -> FsResult<()> {
        let tenant = tenant.to_string();
        let node = node.clone();
        self.with_conn(move |conn| {
            let result = match &node {
                FsNode::File(file) => conn.execute(
                    "INSERT INTO fs_nodes
                        (tenant_id, path, kind, content_hash, size, mime_type, created_at, modified_at)
                     VALUES (?1, ?2, 'file', ?3, ?4, ?5, ?6, ?7)",
                    params![
                        tenant,
                        file.path.as_str(),
                        file.hash.as_str(),
                        file.size as i64,
                        file.mime_type,
                        file.created_at as i64,
                        file.modified_at as i64,
                    ],
                ),
                FsNode::Directory(dir) => conn.execute(
                    "INSERT INTO fs_nodes
                        (tenant_id, path, kind, content_hash, size, mime_type, created_at, modified_at)
                     VALUES (?1, ?2, 'directory', NULL, NULL, NULL, ?3, ?4)",
                    params![
                        tenant,
                        dir.path.as_str(),
                        dir.created_at as i64,
                        dir.modified_at as i64,
                    ],
                ),
            };
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(FsError::Conflict(format!(
                        "path already exists: {}",
                        node.path()
                    )))
                }
                Err(e) => {
                    warn!("SqliteMetaStore: insert node failed! {}", e);
                    Err(map_db_err(e))
                }
            }
        })
        .await
    }

    async fn get_node_by_path(
        &self,
        tenant: &TenantId,
        path: &FsPath,
    ) -> FsResult<Option<FsNode>> {
        let tenant = tenant.to_string();
        let path = path.clone();
        self.with_conn(move |conn| {
            let row: Option<NodeRow> = conn
                .query_row(
                    "SELECT path, kind, content_hash, size, mime_type, created_at, modified_at
                     FROM fs_nodes WHERE tenant_id = ?1 AND path = ?2",
                    params![tenant, path.as_str()],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    },
                )
                .optional()
                .map_err(map_db_err)?;
            match row {
                Some((path, kind, hash, size, mime, created, modified)) => {
                    Self::node_from_row(path, kind, hash, size, mime, created, modified).map(Some)
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn update_node(&self, tenant: &TenantId, node: &FsNode) -> FsResult<()> {
        let tenant = tenant.to_string();
        let node = node.clone();
        self.with_conn(move |conn| {
            match &node {
                FsNode::File(file) => conn
                    .execute(
                        "UPDATE fs_nodes SET
                            content_hash = ?3, size = ?4, mime_type = ?5, modified_at = ?6
                         WHERE tenant_id = ?1 AND path = ?2 AND kind = 'file'",
                        params![
                            tenant,
                            file.path.as_str(),
                            file.hash.as_str(),
                            file.size as i64,
                            file.mime_type,
                            file.modified_at as i64,
                        ],
                    )
                    .map_err(|e| {
                        warn!("SqliteMetaStore: update file node failed! {}", e);
                        map_db_err(e)
                    })?,
                FsNode::Directory(dir) => conn
                    .execute(
                        "UPDATE fs_nodes SET modified_at = ?3
                         WHERE tenant_id = ?1 AND path = ?2 AND kind = 'directory'",
                        params![tenant, dir.path.as_str(), dir.modified_at as i64],
                    )
                    .map_err(|e| {
                        warn!("SqliteMetaStore: update directory node failed! {}", e);
                        map_db_err(e)
                    })?,
            };
            Ok(())
        })
        .await
    }

    async fn delete_node(&self, tenant: &TenantId, path: &FsPath) -> FsResult<()> {
        let tenant = tenant.to_string();
        let path = path.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM fs_nodes WHERE tenant_id = ?1 AND path = ?2",
                params![tenant, path.as_str()],
            )
            .map_err(|e| {
                warn!("SqliteMetaStore: delete node failed! {}", e);
                map_db_err(e)
            })?;
            Ok(())
        })
        .await
    }

    async fn list_children(&self, tenant: &TenantId, dir: &FsPath) -> FsResult<Vec<FsNode>> {
        let tenant = tenant.to_string();
        let prefix = if dir.is_root() {
            "/".to_string()
        } else {
            format!("{}/", dir.as_str())
        };
        // Immediate children only: the path extends the prefix and carries
        // exactly as many slashes as the prefix itself.
        let child_slashes = prefix.matches('/').count() as i64;

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT path, kind, content_hash, size, mime_type, created_at, modified_at
                     FROM fs_nodes
                     WHERE tenant_id = ?1
                       AND substr(path, 1, ?2) = ?3
                       AND length(path) > ?2
                       AND length(path) - length(replace(path, '/', '')) = ?4
                     ORDER BY CASE kind WHEN 'directory' THEN 0 ELSE 1 END, path ASC",
                )
                .map_err(map_db_err)?;
            let mut rows = stmt
                .query(params![tenant, prefix.len() as i64, prefix, child_slashes])
                .map_err(map_db_err)?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map_db_err)? {
                let raw: NodeRow = (
                    row.get(0).map_err(map_db_err)?,
                    row.get(1).map_err(map_db_err)?,
                    row.get(2).map_err(map_db_err)?,
                    row.get(3).map_err(map_db_err)?,
                    row.get(4).map_err(map_db_err)?,
                    row.get(5).map_err(map_db_err)?,
                    row.get(6).map_err(map_db_err)?,
                );
                out.push(Self::node_from_row(
                    raw.0, raw.1, raw.2, raw.3, raw.4, raw.5, raw.6,
                )?);
            }
            Ok(out)
        })
        .await
    }

    async fn increment_blob_ref(&self, hash: &ContentHash, size: u64) -> FsResult<u64> {
        let hash = hash.clone();
        self.with_conn(move |conn| {
            let now = unix_timestamp() as i64;
            conn.execute(
                "INSERT INTO blobs (content_hash, ref_count, size, created_at, last_accessed_at)
                 VALUES (?1, 1, ?2, ?3, ?3)
                 ON CONFLICT(content_hash) DO UPDATE SET
                    ref_count = ref_count + 1,
                    last_accessed_at = excluded.last_accessed_at",
                params![hash.as_str(), size as i64, now],
            )
            .map_err(|e| {
                warn!("SqliteMetaStore: increment blob ref failed! {}", e);
                map_db_err(e)
            })?;

            let new_count: i64 = conn
                .query_row(
                    "SELECT ref_count FROM blobs WHERE content_hash = ?1",
                    params![hash.as_str()],
                    |row| row.get(0),
                )
                .map_err(map_db_err)?;
            Ok(new_count as u64)
        })
        .await
    }

    async fn decrement_blob_ref(&self, hash: &ContentHash) -> FsResult<u64> {
        let hash = hash.clone();
        self.with_conn(move |conn| {
            let now = unix_timestamp() as i64;
            let updated = conn
                .execute(
                    "UPDATE blobs SET ref_count = ref_count - 1, last_accessed_at = ?2
                     WHERE content_hash = ?1 AND ref_count >= 1",
                    params![hash.as_str(), now],
                )
                .map_err(|e| {
                    warn!("SqliteMetaStore: decrement blob ref failed! {}", e);
                    map_db_err(e)
                })?;

            if updated == 0 {
                let present: Option<i64> = conn
                    .query_row(
                        "SELECT ref_count FROM blobs WHERE content_hash = ?1",
                        params![hash.as_str()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(map_db_err)?;
                return match present {
                    None => Ok(0),
                    Some(_) => Err(FsError::Invariant(format!(
                        "ref_count would be negative: {}",
                        hash
                    ))),
                };
            }

            let new_count: i64 = conn
                .query_row(
                    "SELECT ref_count FROM blobs WHERE content_hash = ?1",
                    params![hash.as_str()],
                    |row| row.get(0),
                )
                .map_err(map_db_err)?;
            Ok(new_count as u64)
        })
        .await
    }

    async fn get_blob_record(&self, hash: &ContentHash) -> FsResult<Option<BlobRecord>> {
        let hash = hash.clone();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT ref_count, size, created_at, last_accessed_at
                     FROM blobs WHERE content_hash = ?1",
                    params![hash.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(map_db_err)?;
            Ok(row.map(|(ref_count, size, created_at, last_accessed_at)| BlobRecord {
                hash: hash.clone(),
                ref_count: ref_count as u64,
                size: size as u64,
                created_at: created_at as u64,
                last_accessed_at: last_accessed_at as u64,
            }))
        })
        .await
    }

    async fn get_orphan_blobs(&self, older_than: u64, limit: u32) -> FsResult<Vec<ContentHash>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT content_hash FROM blobs
                     WHERE ref_count = 0 AND last_accessed_at <= ?1
                     ORDER BY last_accessed_at ASC, content_hash ASC
                     LIMIT ?2",
                )
                .map_err(map_db_err)?;
            let mut rows = stmt
                .query(params![older_than as i64, limit as i64])
                .map_err(map_db_err)?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map_db_err)? {
                let hash_str: String = row.get(0).map_err(map_db_err)?;
                let hash = ContentHash::parse(hash_str)
                    .map_err(|e| FsError::Invariant(format!("stored hash invalid: {}", e)))?;
                out.push(hash);
            }
            Ok(out)
        })
        .await
    }

    async fn remove_blob_if_zero(&self, hash: &ContentHash) -> FsResult<bool> {
        let hash = hash.clone();
        self.with_conn(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM blobs WHERE content_hash = ?1 AND ref_count = 0",
                    params![hash.as_str()],
                )
                .map_err(|e| {
                    warn!("SqliteMetaStore: remove blob record failed! {}", e);
                    map_db_err(e)
                })?;
            Ok(removed > 0)
        })
        .await
    }
}
