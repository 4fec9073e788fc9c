#[cfg(test)]
mod tests {
    use crate::{FileSystemService, OrphanReclaimer};
    use blob_store::{BlobStore, LocalBlobStore, MemBlobStore};
    use dedup_lib::{ContentHash, FsError, FsNode, FsPath, TenantId};
    use fs_meta::{MemMetaStore, MetaStore, SqliteMetaStore};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct TestEnv {
        service: FileSystemService,
        meta: Arc<SqliteMetaStore>,
        blobs: Arc<MemBlobStore>,
        _tmp: TempDir,
    }

    fn create_test_env() -> TestEnv {
        let tmp = TempDir::new().unwrap();
        let meta = Arc::new(SqliteMetaStore::open(tmp.path().join("meta.db")).unwrap());
        let blobs = Arc::new(MemBlobStore::new());
        let service = FileSystemService::new(meta.clone(), blobs.clone());
        TestEnv {
            service,
            meta,
            blobs,
            _tmp: tmp,
        }
    }

    fn create_reclaimer(env: &TestEnv) -> OrphanReclaimer {
        OrphanReclaimer::new(env.meta.clone(), env.blobs.clone())
    }

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    /// Walks the whole tenant tree and counts live file nodes per hash.
    async fn count_nodes_by_hash(
        env: &TestEnv,
        tenants: &[TenantId],
    ) -> HashMap<ContentHash, u64> {
        let mut counts: HashMap<ContentHash, u64> = HashMap::new();
        for tenant in tenants {
            let mut pending = vec![FsPath::root()];
            while let Some(dir) = pending.pop() {
                if env
                    .meta
                    .get_node_by_path(tenant, &dir)
                    .await
                    .unwrap()
                    .is_none()
                {
                    continue;
                }
                for child in env.meta.list_children(tenant, &dir).await.unwrap() {
                    match child {
                        FsNode::Directory(d) => pending.push(d.path),
                        FsNode::File(f) => *counts.entry(f.hash).or_default() += 1,
                    }
                }
            }
        }
        counts
    }

    /// Refcount exactness plus hash integrity: every live file node's hash
    /// has a blob record matching the node count and stored bytes.
    async fn assert_store_invariants(env: &TestEnv, tenants: &[TenantId]) {
        let counts = count_nodes_by_hash(env, tenants).await;
        for (hash, expected) in &counts {
            let record = env
                .meta
                .get_blob_record(hash)
                .await
                .unwrap()
                .unwrap_or_else(|| panic!("no blob record for {}", hash));
            assert_eq!(record.ref_count, *expected, "refcount mismatch for {}", hash);
            assert!(
                env.blobs.exists(hash).await.unwrap(),
                "blob bytes missing for {}",
                hash
            );
        }
    }

    // ==================== End-to-End Scenarios ====================

    #[tokio::test]
    async fn test_simple_write_read() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.create_directory(&tenant, &p("/")).await.unwrap();
        let node = env
            .service
            .write_file(&tenant, &p("/hello.txt"), b"Hello World")
            .await
            .unwrap();
        assert_eq!(
            node.hash.as_str(),
            "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e"
        );
        assert_eq!(node.size, 11);
        assert_eq!(node.mime_type, "text/plain");

        let data = env
            .service
            .read_file(&tenant, &p("/hello.txt"))
            .await
            .unwrap();
        assert_eq!(data, b"Hello World");
        assert_store_invariants(&env, &[tenant]).await;
    }

    #[tokio::test]
    async fn test_cross_tenant_dedup() {
        let env = create_test_env();
        let t1 = TenantId::generate();
        let t2 = TenantId::generate();
        let hash = ContentHash::of(b"same");

        env.service.bootstrap_tenant(&t1).await.unwrap();
        env.service.bootstrap_tenant(&t2).await.unwrap();
        env.service
            .write_file(&t1, &p("/a"), b"same")
            .await
            .unwrap();
        env.service
            .write_file(&t2, &p("/b"), b"same")
            .await
            .unwrap();

        assert_eq!(env.blobs.object_count(), 1);
        assert_eq!(env.blobs.write_count(), 1);
        let record = env.meta.get_blob_record(&hash).await.unwrap().unwrap();
        assert_eq!(record.ref_count, 2);

        env.service.delete_file(&t1, &p("/a")).await.unwrap();
        let record = env.meta.get_blob_record(&hash).await.unwrap().unwrap();
        assert_eq!(record.ref_count, 1);
        assert!(env.blobs.exists(&hash).await.unwrap());

        env.service.delete_file(&t2, &p("/b")).await.unwrap();
        let record = env.meta.get_blob_record(&hash).await.unwrap().unwrap();
        assert_eq!(record.ref_count, 0);

        let stats = create_reclaimer(&env).run_once().await.unwrap();
        assert_eq!(stats.reclaimed, 1);
        assert!(env.meta.get_blob_record(&hash).await.unwrap().is_none());
        assert!(!env.blobs.exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_with_different_content() {
        let env = create_test_env();
        let tenant = TenantId::generate();
        let h1 = ContentHash::of(b"v1");
        let h2 = ContentHash::of(b"v2");

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service
            .write_file(&tenant, &p("/x"), b"v1")
            .await
            .unwrap();
        env.service
            .write_file(&tenant, &p("/x"), b"v2")
            .await
            .unwrap();

        let node = env.service.get_info(&tenant, &p("/x")).await.unwrap();
        assert_eq!(node.as_file().unwrap().hash, h2);

        let r1 = env.meta.get_blob_record(&h1).await.unwrap().unwrap();
        assert_eq!(r1.ref_count, 0);
        let r2 = env.meta.get_blob_record(&h2).await.unwrap().unwrap();
        assert_eq!(r2.ref_count, 1);
        assert!(!env.blobs.exists(&h1).await.unwrap());
        assert!(env.blobs.exists(&h2).await.unwrap());

        let stats = create_reclaimer(&env).run_once().await.unwrap();
        assert_eq!(stats.reclaimed, 1);
        assert!(env.meta.get_blob_record(&h1).await.unwrap().is_none());
        assert_store_invariants(&env, &[tenant]).await;
    }

    #[tokio::test]
    async fn test_copy_is_metadata_only() {
        let env = create_test_env();
        let tenant = TenantId::generate();
        let data = b"copy me".to_vec();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service
            .write_file(&tenant, &p("/a"), &data)
            .await
            .unwrap();
        env.service
            .copy_file(&tenant, &p("/a"), &p("/b"))
            .await
            .unwrap();

        let a = env.service.get_info(&tenant, &p("/a")).await.unwrap();
        let b = env.service.get_info(&tenant, &p("/b")).await.unwrap();
        assert_eq!(a.as_file().unwrap().hash, b.as_file().unwrap().hash);

        let record = env
            .meta
            .get_blob_record(&ContentHash::of(&data))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.ref_count, 2);
        assert_eq!(env.blobs.write_count(), 1);
        assert_eq!(env.service.read_file(&tenant, &p("/b")).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_invalid_path_rejected_before_any_store_call() {
        let env = create_test_env();

        match FsPath::parse("/../etc/passwd") {
            Err(FsError::InvalidPath(_)) => {}
            other => panic!("expected InvalidPath, got {:?}", other),
        }
        assert_eq!(env.blobs.write_count(), 0);
        assert_eq!(env.blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_nonempty_directory_refused() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service.create_directory(&tenant, &p("/d")).await.unwrap();
        env.service
            .write_file(&tenant, &p("/d/f"), b"payload")
            .await
            .unwrap();

        let err = env
            .service
            .delete_directory(&tenant, &p("/d"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FsError::Conflict(_)));

        env.service.delete_file(&tenant, &p("/d/f")).await.unwrap();
        env.service.delete_directory(&tenant, &p("/d")).await.unwrap();
        assert!(matches!(
            env.service.get_info(&tenant, &p("/d")).await,
            Err(FsError::NotFound(_))
        ));
    }

    // ==================== Write / Read / Delete Tests ====================

    #[tokio::test]
    async fn test_write_requires_parent_directory() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        let err = env
            .service
            .write_file(&tenant, &p("/missing/f"), b"x")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FsError::DirectoryNotFound(_)));
        assert_eq!(env.blobs.object_count(), 1);
        let orphan = env
            .meta
            .get_blob_record(&ContentHash::of(b"x"))
            .await
            .unwrap();
        assert!(orphan.is_none());
    }

    #[tokio::test]
    async fn test_write_with_file_as_parent_fails() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service
            .write_file(&tenant, &p("/f"), b"file")
            .await
            .unwrap();
        let err = env
            .service
            .write_file(&tenant, &p("/f/child"), b"x")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FsError::DirectoryNotFound(_)));
    }

    #[tokio::test]
    async fn test_write_to_directory_path_is_conflict() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service.create_directory(&tenant, &p("/d")).await.unwrap();
        let err = env
            .service
            .write_file(&tenant, &p("/d"), b"x")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FsError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_idempotent_rewrite() {
        let env = create_test_env();
        let tenant = TenantId::generate();
        let data = b"stable content".to_vec();
        let hash = ContentHash::of(&data);

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        let first = env
            .service
            .write_file(&tenant, &p("/f"), &data)
            .await
            .unwrap();
        let second = env
            .service
            .write_file(&tenant, &p("/f"), &data)
            .await
            .unwrap();

        assert_eq!(first.hash, second.hash);
        assert!(second.modified_at >= first.modified_at);
        assert_eq!(env.blobs.write_count(), 1);
        let record = env.meta.get_blob_record(&hash).await.unwrap().unwrap();
        assert_eq!(record.ref_count, 1);

        let children = env.service.list_directory(&tenant, &p("/")).await.unwrap();
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn test_read_and_delete_missing_file() {
        let env = create_test_env();
        let tenant = TenantId::generate();
        env.service.bootstrap_tenant(&tenant).await.unwrap();

        assert!(matches!(
            env.service.read_file(&tenant, &p("/nope")).await,
            Err(FsError::FileNotFound(_))
        ));
        assert!(matches!(
            env.service.delete_file(&tenant, &p("/nope")).await,
            Err(FsError::FileNotFound(_))
        ));

        env.service.create_directory(&tenant, &p("/d")).await.unwrap();
        assert!(matches!(
            env.service.read_file(&tenant, &p("/d")).await,
            Err(FsError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_blob_missing_surfaces_on_read() {
        let env = create_test_env();
        let tenant = TenantId::generate();
        let hash = ContentHash::of(b"will vanish");

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service
            .write_file(&tenant, &p("/f"), b"will vanish")
            .await
            .unwrap();

        env.blobs.delete(&hash).await.unwrap();
        match env.service.read_file(&tenant, &p("/f")).await {
            Err(FsError::BlobMissing(_)) => {}
            other => panic!("expected BlobMissing, got {:?}", other),
        }
    }

    // ==================== Directory Tests ====================

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        let first = env.service.bootstrap_tenant(&tenant).await.unwrap();
        let second = env.service.bootstrap_tenant(&tenant).await.unwrap();
        assert_eq!(first.path, second.path);

        let err = env
            .service
            .create_directory(&tenant, &p("/"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FsError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_directory_requires_parent() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        let err = env
            .service
            .create_directory(&tenant, &p("/a/b"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FsError::DirectoryNotFound(_)));

        env.service.create_directory(&tenant, &p("/a")).await.unwrap();
        env.service.create_directory(&tenant, &p("/a/b")).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_root_forbidden() {
        let env = create_test_env();
        let tenant = TenantId::generate();
        env.service.bootstrap_tenant(&tenant).await.unwrap();

        let err = env
            .service
            .delete_directory(&tenant, &p("/"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FsError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_directory_ordering() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service
            .write_file(&tenant, &p("/b.txt"), b"b")
            .await
            .unwrap();
        env.service.create_directory(&tenant, &p("/z")).await.unwrap();
        env.service
            .write_file(&tenant, &p("/a.txt"), b"a")
            .await
            .unwrap();
        env.service.create_directory(&tenant, &p("/m")).await.unwrap();

        let children = env.service.list_directory(&tenant, &p("/")).await.unwrap();
        let paths: Vec<&str> = children.iter().map(|n| n.path().as_str()).collect();
        assert_eq!(paths, vec!["/m", "/z", "/a.txt", "/b.txt"]);
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let env = create_test_env();
        let tenant = TenantId::generate();
        env.service.bootstrap_tenant(&tenant).await.unwrap();

        assert!(matches!(
            env.service.list_directory(&tenant, &p("/nope")).await,
            Err(FsError::DirectoryNotFound(_))
        ));

        env.service
            .write_file(&tenant, &p("/f"), b"file")
            .await
            .unwrap();
        assert!(matches!(
            env.service.list_directory(&tenant, &p("/f")).await,
            Err(FsError::Conflict(_))
        ));
    }

    // ==================== Copy / Move Tests ====================

    #[tokio::test]
    async fn test_copy_onto_existing_destination_is_conflict() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service
            .write_file(&tenant, &p("/a"), b"a")
            .await
            .unwrap();
        env.service
            .write_file(&tenant, &p("/b"), b"b")
            .await
            .unwrap();
        env.service.create_directory(&tenant, &p("/d")).await.unwrap();

        for dst in ["/b", "/d"] {
            let err = env
                .service
                .copy_file(&tenant, &p("/a"), &p(dst))
                .await
                .err()
                .unwrap();
            assert!(matches!(err, FsError::Conflict(_)), "dst {}", dst);
        }
        assert_store_invariants(&env, &[tenant]).await;
    }

    #[tokio::test]
    async fn test_move_file_keeps_refcount() {
        let env = create_test_env();
        let tenant = TenantId::generate();
        let hash = ContentHash::of(b"moving");

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service
            .write_file(&tenant, &p("/src"), b"moving")
            .await
            .unwrap();
        env.service
            .move_file(&tenant, &p("/src"), &p("/dst"))
            .await
            .unwrap();

        assert!(matches!(
            env.service.get_info(&tenant, &p("/src")).await,
            Err(FsError::NotFound(_))
        ));
        let node = env.service.get_info(&tenant, &p("/dst")).await.unwrap();
        assert_eq!(node.as_file().unwrap().hash, hash);

        let record = env.meta.get_blob_record(&hash).await.unwrap().unwrap();
        assert_eq!(record.ref_count, 1);
        assert!(env.blobs.exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_directory_recursive() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service.create_directory(&tenant, &p("/src")).await.unwrap();
        env.service
            .create_directory(&tenant, &p("/src/sub"))
            .await
            .unwrap();
        env.service
            .write_file(&tenant, &p("/src/a.txt"), b"a")
            .await
            .unwrap();
        env.service
            .write_file(&tenant, &p("/src/sub/b.txt"), b"b")
            .await
            .unwrap();

        env.service
            .copy_directory(&tenant, &p("/src"), &p("/dst"))
            .await
            .unwrap();

        for path in ["/dst", "/dst/sub"] {
            assert!(env.service.get_info(&tenant, &p(path)).await.unwrap().is_directory());
        }
        assert_eq!(
            env.service.read_file(&tenant, &p("/dst/a.txt")).await.unwrap(),
            b"a"
        );
        assert_eq!(
            env.service
                .read_file(&tenant, &p("/dst/sub/b.txt"))
                .await
                .unwrap(),
            b"b"
        );

        for content in [b"a".as_slice(), b"b".as_slice()] {
            let record = env
                .meta
                .get_blob_record(&ContentHash::of(content))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.ref_count, 2);
        }
        assert_eq!(env.blobs.object_count(), 2);
        assert_store_invariants(&env, &[tenant]).await;
    }

    #[tokio::test]
    async fn test_move_directory() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service.create_directory(&tenant, &p("/src")).await.unwrap();
        env.service
            .create_directory(&tenant, &p("/src/sub"))
            .await
            .unwrap();
        env.service
            .write_file(&tenant, &p("/src/a.txt"), b"a")
            .await
            .unwrap();
        env.service
            .write_file(&tenant, &p("/src/sub/b.txt"), b"b")
            .await
            .unwrap();

        env.service
            .move_directory(&tenant, &p("/src"), &p("/dst"))
            .await
            .unwrap();

        assert!(matches!(
            env.service.get_info(&tenant, &p("/src")).await,
            Err(FsError::NotFound(_))
        ));
        assert_eq!(
            env.service
                .read_file(&tenant, &p("/dst/sub/b.txt"))
                .await
                .unwrap(),
            b"b"
        );

        for content in [b"a".as_slice(), b"b".as_slice()] {
            let record = env
                .meta
                .get_blob_record(&ContentHash::of(content))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.ref_count, 1);
        }
        assert_store_invariants(&env, &[tenant]).await;
    }

    #[tokio::test]
    async fn test_copy_directory_into_own_subtree_is_conflict() {
        let env = create_test_env();
        let tenant = TenantId::generate();

        env.service.bootstrap_tenant(&tenant).await.unwrap();
        env.service.create_directory(&tenant, &p("/a")).await.unwrap();
        env.service.create_directory(&tenant, &p("/a/b")).await.unwrap();

        for (src, dst) in [("/a", "/a"), ("/a", "/a/b/c"), ("/", "/a/copy")] {
            let err = env
                .service
                .copy_directory(&tenant, &p(src), &p(dst))
                .await
                .err()
                .unwrap();
            assert!(matches!(err, FsError::Conflict(_)), "{} -> {}", src, dst);
        }
    }

    // ==================== Tenant Isolation Tests ====================

    #[tokio::test]
    async fn test_tenant_isolation() {
        let env = create_test_env();
        let t1 = TenantId::generate();
        let t2 = TenantId::generate();

        env.service.bootstrap_tenant(&t1).await.unwrap();
        env.service.bootstrap_tenant(&t2).await.unwrap();
        env.service
            .write_file(&t1, &p("/shared-name"), b"tenant one data")
            .await
            .unwrap();
        env.service
            .write_file(&t2, &p("/shared-name"), b"tenant two data")
            .await
            .unwrap();

        assert_eq!(
            env.service.read_file(&t1, &p("/shared-name")).await.unwrap(),
            b"tenant one data"
        );
        assert_eq!(
            env.service.read_file(&t2, &p("/shared-name")).await.unwrap(),
            b"tenant two data"
        );

        let t1_children = env.service.list_directory(&t1, &p("/")).await.unwrap();
        assert_eq!(t1_children.len(), 1);

        env.service.delete_file(&t1, &p("/shared-name")).await.unwrap();
        assert_eq!(
            env.service.read_file(&t2, &p("/shared-name")).await.unwrap(),
            b"tenant two data"
        );
        assert_store_invariants(&env, &[t1, t2]).await;
    }

    // ==================== Refcount Exactness ====================

    #[tokio::test]
    async fn test_refcount_exactness_after_mixed_operations() {
        let env = create_test_env();
        let t1 = TenantId::generate();
        let t2 = TenantId::generate();

        env.service.bootstrap_tenant(&t1).await.unwrap();
        env.service.bootstrap_tenant(&t2).await.unwrap();

        env.service.create_directory(&t1, &p("/d")).await.unwrap();
        env.service.write_file(&t1, &p("/d/a"), b"alpha").await.unwrap();
        env.service.write_file(&t1, &p("/d/b"), b"alpha").await.unwrap();
        env.service.write_file(&t2, &p("/x"), b"alpha").await.unwrap();
        env.service.write_file(&t2, &p("/y"), b"beta").await.unwrap();
        env.service
            .copy_file(&t1, &p("/d/a"), &p("/d/c"))
            .await
            .unwrap();
        env.service.write_file(&t1, &p("/d/b"), b"beta").await.unwrap();
        env.service.delete_file(&t2, &p("/x")).await.unwrap();
        env.service
            .move_file(&t1, &p("/d/c"), &p("/moved"))
            .await
            .unwrap();

        let counts = count_nodes_by_hash(&env, &[t1, t2]).await;
        assert_eq!(counts.get(&ContentHash::of(b"alpha")), Some(&2));
        assert_eq!(counts.get(&ContentHash::of(b"beta")), Some(&2));
        assert_store_invariants(&env, &[t1, t2]).await;
    }

    // ==================== Reclaimer Tests ====================

    #[tokio::test]
    async fn test_reclaimer_empty_pass() {
        let env = create_test_env();
        let stats = create_reclaimer(&env).run_once().await.unwrap();
        assert_eq!(stats.scanned, 0);
        assert_eq!(stats.reclaimed, 0);
    }

    #[tokio::test]
    async fn test_reclaimer_drains_in_batches() {
        let env = create_test_env();
        let tenant = TenantId::generate();
        env.service.bootstrap_tenant(&tenant).await.unwrap();

        let mut hashes = Vec::new();
        for i in 0..5u8 {
            let data = vec![i; 8];
            let path = p(&format!("/f{}", i));
            env.service.write_file(&tenant, &path, &data).await.unwrap();
            env.service.delete_file(&tenant, &path).await.unwrap();
            hashes.push(ContentHash::of(&data));
        }
        for hash in &hashes {
            let record = env.meta.get_blob_record(hash).await.unwrap().unwrap();
            assert_eq!(record.ref_count, 0);
        }

        let reclaimer = create_reclaimer(&env).with_batch_size(2);
        let stats = reclaimer.cleanup_in_batches().await.unwrap();
        assert_eq!(stats.scanned, 5);
        assert_eq!(stats.reclaimed, 5);
        assert_eq!(stats.failed, 0);

        for hash in &hashes {
            assert!(env.meta.get_blob_record(hash).await.unwrap().is_none());
            assert!(!env.blobs.exists(hash).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_reclaimer_respects_grace_period() {
        let env = create_test_env();
        let tenant = TenantId::generate();
        env.service.bootstrap_tenant(&tenant).await.unwrap();

        env.service.write_file(&tenant, &p("/f"), b"young").await.unwrap();
        env.service.delete_file(&tenant, &p("/f")).await.unwrap();

        let reclaimer = create_reclaimer(&env).with_grace(Duration::from_secs(3600));
        let stats = reclaimer.run_once().await.unwrap();
        assert_eq!(stats.scanned, 0);
        assert!(env
            .meta
            .get_blob_record(&ContentHash::of(b"young"))
            .await
            .unwrap()
            .is_some());

        let stats = create_reclaimer(&env).run_once().await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.reclaimed, 1);
    }

    /// Blob store double that re-references a hash during the bulk delete,
    /// landing a concurrent writer inside the reclaimer's race window.
    struct RacingWriterBlobStore {
        inner: MemBlobStore,
        meta: Arc<SqliteMetaStore>,
        hash: ContentHash,
    }

    #[async_trait::async_trait]
    impl BlobStore for RacingWriterBlobStore {
        async fn write(&self, hash: &ContentHash, data: &[u8]) -> dedup_lib::FsResult<()> {
            self.inner.write(hash, data).await
        }

        async fn read(&self, hash: &ContentHash) -> dedup_lib::FsResult<Vec<u8>> {
            self.inner.read(hash).await
        }

        async fn exists(&self, hash: &ContentHash) -> dedup_lib::FsResult<bool> {
            self.inner.exists(hash).await
        }

        async fn delete(&self, hash: &ContentHash) -> dedup_lib::FsResult<()> {
            self.inner.delete(hash).await
        }

        async fn delete_many(
            &self,
            hashes: &[ContentHash],
        ) -> dedup_lib::FsResult<Vec<ContentHash>> {
            self.meta.increment_blob_ref(&self.hash, 7).await?;
            self.inner.delete_many(hashes).await
        }
    }

    #[tokio::test]
    async fn test_reclaimer_keeps_resurrected_records() {
        let tmp = TempDir::new().unwrap();
        let meta = Arc::new(SqliteMetaStore::open(tmp.path().join("meta.db")).unwrap());
        let hash = ContentHash::of(b"revived");

        meta.increment_blob_ref(&hash, 7).await.unwrap();
        meta.decrement_blob_ref(&hash).await.unwrap();

        let blobs = Arc::new(RacingWriterBlobStore {
            inner: MemBlobStore::new(),
            meta: meta.clone(),
            hash: hash.clone(),
        });
        blobs.inner.write(&hash, b"revived").await.unwrap();

        let reclaimer = OrphanReclaimer::new(meta.clone(), blobs.clone());
        let stats = reclaimer.run_once().await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.reclaimed, 0);
        assert_eq!(stats.resurrected, 1);

        // The record survives with the new reference; the bytes are gone
        // until the racing writer's next miss re-creates them.
        let record = meta.get_blob_record(&hash).await.unwrap().unwrap();
        assert_eq!(record.ref_count, 1);
        assert!(!blobs.inner.exists(&hash).await.unwrap());
    }

    // ==================== Store Substitution ====================

    #[tokio::test]
    async fn test_in_memory_stores_substitute() {
        let meta = Arc::new(MemMetaStore::new());
        let blobs = Arc::new(MemBlobStore::new());
        let service = FileSystemService::new(meta.clone(), blobs.clone());
        let tenant = TenantId::generate();

        service.bootstrap_tenant(&tenant).await.unwrap();
        service
            .write_file(&tenant, &p("/mem.txt"), b"in memory")
            .await
            .unwrap();
        assert_eq!(
            service.read_file(&tenant, &p("/mem.txt")).await.unwrap(),
            b"in memory"
        );

        service.delete_file(&tenant, &p("/mem.txt")).await.unwrap();
        let reclaimer = OrphanReclaimer::new(meta.clone(), blobs.clone());
        let stats = reclaimer.cleanup_in_batches().await.unwrap();
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(meta.blob_record_count(), 0);
        assert_eq!(blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn test_local_blob_store_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let meta = Arc::new(SqliteMetaStore::open(tmp.path().join("meta.db")).unwrap());
        let blobs = Arc::new(
            LocalBlobStore::open(tmp.path().join("store"))
                .await
                .unwrap(),
        );
        let service = FileSystemService::new(meta.clone(), blobs.clone());
        let tenant = TenantId::generate();

        service.bootstrap_tenant(&tenant).await.unwrap();
        let data = b"on disk payload".to_vec();
        let node = service
            .write_file(&tenant, &p("/disk.bin"), &data)
            .await
            .unwrap();
        assert_eq!(service.read_file(&tenant, &p("/disk.bin")).await.unwrap(), data);

        let (hi, lo) = node.hash.shard_prefixes();
        let blob_file = tmp
            .path()
            .join("store")
            .join("blobs")
            .join(hi)
            .join(lo)
            .join(node.hash.as_str());
        assert!(blob_file.exists());

        service.delete_file(&tenant, &p("/disk.bin")).await.unwrap();
        assert!(!blob_file.exists());

        let reclaimer = OrphanReclaimer::new(meta.clone(), blobs.clone());
        let stats = reclaimer.cleanup_in_batches().await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.reclaimed, 1);
        assert!(meta.get_blob_record(&node.hash).await.unwrap().is_none());
    }
}
